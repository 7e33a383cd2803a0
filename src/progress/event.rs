//! Progress event variants and their normalized JSON form.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::ScoreSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Phases of one iteration, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extract,
    Assemble,
    Generate,
    Critique,
    Evaluate,
    Commit,
}

impl Phase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Extract => "extract",
            Phase::Assemble => "assemble",
            Phase::Generate => "generate",
            Phase::Critique => "critique",
            Phase::Evaluate => "evaluate",
            Phase::Commit => "commit",
        }
    }
}

/// One progress event, scoped to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: ProgressPayload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressPayload {
    Log {
        level: LogLevel,
        stage: String,
        message: String,
    },
    Progress {
        phase: Phase,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    IterationStart {
        iteration: u32,
    },
    IterationComplete {
        iteration: u32,
        approved: bool,
        scores: ScoreSet,
        reason: String,
    },
    Error {
        message: String,
    },
    Complete,
}

impl ProgressEvent {
    fn new(session_id: impl Into<String>, payload: ProgressPayload) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn log(
        session_id: impl Into<String>,
        level: LogLevel,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            session_id,
            ProgressPayload::Log {
                level,
                stage: stage.into(),
                message: message.into(),
            },
        )
    }

    pub fn phase(session_id: impl Into<String>, phase: Phase) -> Self {
        Self::new(
            session_id,
            ProgressPayload::Progress {
                phase,
                percent: None,
                message: None,
            },
        )
    }

    pub fn phase_with_percent(session_id: impl Into<String>, phase: Phase, percent: u8) -> Self {
        Self::new(
            session_id,
            ProgressPayload::Progress {
                phase,
                percent: Some(percent.min(100)),
                message: None,
            },
        )
    }

    pub fn iteration_start(session_id: impl Into<String>, iteration: u32) -> Self {
        Self::new(session_id, ProgressPayload::IterationStart { iteration })
    }

    pub fn iteration_complete(
        session_id: impl Into<String>,
        iteration: u32,
        approved: bool,
        scores: ScoreSet,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            session_id,
            ProgressPayload::IterationComplete {
                iteration,
                approved,
                scores,
                reason: reason.into(),
            },
        )
    }

    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            session_id,
            ProgressPayload::Error {
                message: message.into(),
            },
        )
    }

    pub fn complete(session_id: impl Into<String>) -> Self {
        Self::new(session_id, ProgressPayload::Complete)
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            ProgressPayload::Log { .. } => "log",
            ProgressPayload::Progress { .. } => "progress",
            ProgressPayload::IterationStart { .. } => "iteration_start",
            ProgressPayload::IterationComplete { .. } => "iteration_complete",
            ProgressPayload::Error { .. } => "error",
            ProgressPayload::Complete => "complete",
        }
    }

    /// Normalized JSON form for sinks and socket adapters:
    /// `{type, session_id, timestamp, data}`.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        let data = serde_json::to_value(&self.payload).unwrap_or(Value::Null);
        json!({
            "type": self.kind(),
            "session_id": self.session_id,
            "timestamp": self.timestamp.to_rfc3339(),
            "data": data,
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = &self.session_id;
        match &self.payload {
            ProgressPayload::Log {
                level,
                stage,
                message,
            } => write!(f, "[{session}] {} {stage}: {message}", level.as_str()),
            ProgressPayload::Progress {
                phase,
                percent,
                message,
            } => {
                write!(f, "[{session}] phase {}", phase.as_str())?;
                if let Some(p) = percent {
                    write!(f, " ({p}%)")?;
                }
                if let Some(m) = message {
                    write!(f, ": {m}")?;
                }
                Ok(())
            }
            ProgressPayload::IterationStart { iteration } => {
                write!(f, "[{session}] iteration {iteration} started")
            }
            ProgressPayload::IterationComplete {
                iteration,
                approved,
                reason,
                ..
            } => write!(
                f,
                "[{session}] iteration {iteration} {}: {reason}",
                if *approved { "approved" } else { "rejected" }
            ),
            ProgressPayload::Error { message } => write!(f, "[{session}] error: {message}"),
            ProgressPayload::Complete => write!(f, "[{session}] complete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_form_is_normalized() {
        let event = ProgressEvent::iteration_start("sess-9", 3);
        let value = event.to_json_value();
        assert_eq!(value["type"], "iteration_start");
        assert_eq!(value["session_id"], "sess-9");
        assert_eq!(value["data"]["iteration"], 3);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn percent_is_clamped() {
        let event = ProgressEvent::phase_with_percent("s", Phase::Generate, 150);
        match event.payload {
            ProgressPayload::Progress { percent, .. } => assert_eq!(percent, Some(100)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn display_names_the_session_and_outcome() {
        let event =
            ProgressEvent::iteration_complete("s1", 2, false, ScoreSet::uniform(40), "regressed");
        let line = event.to_string();
        assert!(line.contains("[s1]"));
        assert!(line.contains("rejected"));
    }
}
