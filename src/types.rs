//! Core domain types for the styleforge engine.
//!
//! This module defines the fundamental vocabulary shared across the crate:
//! session lifecycle, scoring dimensions, and the records produced by an
//! iteration run. Component-specific types (profiles, critiques, progress
//! events) live with their components.
//!
//! # Key Types
//!
//! - [`SessionMode`] / [`SessionStatus`]: session lifecycle
//! - [`ScoreDimension`] / [`ScoreSet`]: the six evaluated style dimensions
//! - [`IterationRecord`]: one persisted refinement attempt
//!
//! # Examples
//!
//! ```rust
//! use styleforge::types::{ScoreDimension, ScoreSet, SessionStatus};
//!
//! let scores = ScoreSet::uniform(72);
//! assert_eq!(scores.get(ScoreDimension::Lighting), Some(72));
//! assert_eq!(scores.overall, 72);
//!
//! // Lifecycle strings round-trip for persistence
//! let status = SessionStatus::decode("ready");
//! assert_eq!(status, Some(SessionStatus::Ready));
//! assert_eq!(SessionStatus::Ready.encode(), "ready");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// How a session decides iteration outcomes.
///
/// In `Auto` mode the evaluator's decision is committed immediately; in
/// `Training` mode the iteration stays pending until the user submits
/// feedback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Training,
    Auto,
}

impl SessionMode {
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            SessionMode::Training => "training",
            SessionMode::Auto => "auto",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "training" => Some(SessionMode::Training),
            "auto" => Some(SessionMode::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Session lifecycle state.
///
/// Transitions: `Created → Extracting → Ready → Active → Completed | Error
/// | Cancelled`. Terminal states are absorbing, except that `Completed`
/// re-enters `Active` when the user runs further iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Extracting,
    Ready,
    Active,
    Completed,
    Error,
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Extracting => "extracting",
            SessionStatus::Ready => "ready",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "created" => Some(SessionStatus::Created),
            "extracting" => Some(SessionStatus::Extracting),
            "ready" => Some(SessionStatus::Ready),
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            "error" => Some(SessionStatus::Error),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether a session in this state may start another iteration.
    #[must_use]
    pub fn can_iterate(&self) -> bool {
        matches!(
            self,
            SessionStatus::Ready | SessionStatus::Active | SessionStatus::Completed
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Error | SessionStatus::Cancelled
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// A session row: one reference image, a growing profile history, and an
/// ordered iteration log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    /// Blob-store key of the immutable reference image.
    pub reference_blob: String,
    pub style_hints: Option<String>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

/// The six style dimensions scored by the critic and weighed by the
/// evaluator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDimension {
    Palette,
    LineAndShape,
    Texture,
    Lighting,
    Composition,
    Motifs,
}

impl ScoreDimension {
    pub const ALL: [ScoreDimension; 6] = [
        ScoreDimension::Palette,
        ScoreDimension::LineAndShape,
        ScoreDimension::Texture,
        ScoreDimension::Lighting,
        ScoreDimension::Composition,
        ScoreDimension::Motifs,
    ];

    /// JSON key used on the wire and in persisted score maps.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            ScoreDimension::Palette => "palette",
            ScoreDimension::LineAndShape => "line_and_shape",
            ScoreDimension::Texture => "texture",
            ScoreDimension::Lighting => "lighting",
            ScoreDimension::Composition => "composition",
            ScoreDimension::Motifs => "motifs",
        }
    }
}

impl fmt::Display for ScoreDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-dimension match scores plus a holistic `overall`, each 0–100.
///
/// Dimensions may be absent when the critic payload omitted them; the
/// evaluator treats an absent dimension as a zero-delta contribution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub palette: Option<u8>,
    pub line_and_shape: Option<u8>,
    pub texture: Option<u8>,
    pub lighting: Option<u8>,
    pub composition: Option<u8>,
    pub motifs: Option<u8>,
    pub overall: u8,
}

impl ScoreSet {
    /// All six dimensions and `overall` set to the same value. Test and
    /// baseline convenience.
    #[must_use]
    pub fn uniform(value: u8) -> Self {
        Self {
            palette: Some(value),
            line_and_shape: Some(value),
            texture: Some(value),
            lighting: Some(value),
            composition: Some(value),
            motifs: Some(value),
            overall: value,
        }
    }

    #[must_use]
    pub fn get(&self, dim: ScoreDimension) -> Option<u8> {
        match dim {
            ScoreDimension::Palette => self.palette,
            ScoreDimension::LineAndShape => self.line_and_shape,
            ScoreDimension::Texture => self.texture,
            ScoreDimension::Lighting => self.lighting,
            ScoreDimension::Composition => self.composition,
            ScoreDimension::Motifs => self.motifs,
        }
    }

    pub fn set(&mut self, dim: ScoreDimension, value: u8) {
        let slot = match dim {
            ScoreDimension::Palette => &mut self.palette,
            ScoreDimension::LineAndShape => &mut self.line_and_shape,
            ScoreDimension::Texture => &mut self.texture,
            ScoreDimension::Lighting => &mut self.lighting,
            ScoreDimension::Composition => &mut self.composition,
            ScoreDimension::Motifs => &mut self.motifs,
        };
        *slot = Some(value);
    }

    /// True when every dimension is present and at or above `floor`.
    #[must_use]
    pub fn all_dimensions_at_least(&self, floor: u8) -> bool {
        ScoreDimension::ALL
            .iter()
            .all(|dim| self.get(*dim).is_some_and(|v| v >= floor))
    }
}

/// Outcome state of an iteration row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    /// Recorded but not yet decided (training mode).
    Pending,
    Approved,
    Rejected,
}

impl Approval {
    #[must_use]
    pub fn is_decided(&self) -> bool {
        !matches!(self, Approval::Pending)
    }

    #[must_use]
    pub fn as_db(&self) -> Option<i64> {
        match self {
            Approval::Pending => None,
            Approval::Approved => Some(1),
            Approval::Rejected => Some(0),
        }
    }

    #[must_use]
    pub fn from_db(v: Option<i64>) -> Self {
        match v {
            None => Approval::Pending,
            Some(0) => Approval::Rejected,
            Some(_) => Approval::Approved,
        }
    }
}

/// One persisted refinement attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IterationRecord {
    pub session_id: String,
    /// Strictly increasing from 1, no gaps.
    pub iteration_num: u32,
    /// Blob-store key of the candidate image.
    pub image_blob: String,
    /// Full text of the prompt sent to the generator.
    pub prompt: String,
    pub scores: ScoreSet,
    pub preserved_traits: Vec<String>,
    pub lost_traits: Vec<String>,
    pub interesting_mutations: Vec<String>,
    pub approval: Approval,
    pub decision_reason: Option<String>,
    pub recovery_guidance: Option<String>,
    pub user_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Cooperative cancellation flag for one session.
///
/// Checked at phase boundaries only; an in-flight gateway call always
/// runs to completion. Cloning shares the underlying flag.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Exported snapshot of a converged session. Immutable once created and
/// decoupled from its source session's lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainedStyle {
    pub id: String,
    pub source_session: Option<String>,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub iteration_count: u32,
    pub final_scores: ScoreSet,
    pub profile_json: serde_json::Value,
    pub representative_blob: Option<String>,
    pub created_at: DateTime<Utc>,
}
