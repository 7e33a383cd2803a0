//! The ordered log of refinement attempts for each session.
//!
//! `iteration_num` is assigned inside the insert transaction as
//! `max(existing) + 1`, so numbering is gapless and strictly increasing
//! even under concurrent writers. Alongside the critique outputs each row
//! stores the critic's candidate profile, so a training-mode approval can
//! bump the profile later without re-running the critique.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use super::StoreError;
use crate::profile::StyleProfile;
use crate::types::{Approval, IterationRecord, ScoreSet};

/// Input for [`IterationStore::append`]: an [`IterationRecord`] minus the
/// store-assigned fields.
#[derive(Clone, Debug)]
pub struct NewIteration {
    pub session_id: String,
    pub image_blob: String,
    pub prompt: String,
    pub scores: ScoreSet,
    pub preserved_traits: Vec<String>,
    pub lost_traits: Vec<String>,
    pub interesting_mutations: Vec<String>,
    /// The critic's corrected profile, persisted for a later approval
    /// bump.
    pub candidate_profile: StyleProfile,
    pub approval: Approval,
    pub decision_reason: Option<String>,
    pub recovery_guidance: Option<String>,
}

#[derive(Clone)]
pub struct IterationStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for IterationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationStore").finish()
    }
}

impl IterationStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Append a new iteration row, returning its assigned number.
    #[instrument(skip(self, iteration), fields(session = %iteration.session_id), err)]
    pub async fn append(&self, iteration: &NewIteration) -> Result<u32, StoreError> {
        let mut tx = self.pool.begin().await?;
        let num = Self::append_tx(&mut tx, iteration).await?;
        tx.commit().await?;
        Ok(num)
    }

    /// Transaction-aware append for pairing with a profile write.
    pub async fn append_tx(
        tx: &mut SqliteConnection,
        iteration: &NewIteration,
    ) -> Result<u32, StoreError> {
        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(iteration_num), 0) FROM iterations WHERE session_id = ?1",
        )
        .bind(&iteration.session_id)
        .fetch_one(&mut *tx)
        .await?;
        let num = (current + 1) as u32;

        sqlx::query(
            r#"
            INSERT INTO iterations (
                session_id,
                iteration_num,
                image_blob,
                prompt,
                scores_json,
                preserved_json,
                lost_json,
                mutations_json,
                candidate_profile_json,
                approved,
                decision_reason,
                recovery_guidance
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&iteration.session_id)
        .bind(num as i64)
        .bind(&iteration.image_blob)
        .bind(&iteration.prompt)
        .bind(serde_json::to_string(&iteration.scores)?)
        .bind(serde_json::to_string(&iteration.preserved_traits)?)
        .bind(serde_json::to_string(&iteration.lost_traits)?)
        .bind(serde_json::to_string(&iteration.interesting_mutations)?)
        .bind(iteration.candidate_profile.to_json()?)
        .bind(iteration.approval.as_db())
        .bind(&iteration.decision_reason)
        .bind(&iteration.recovery_guidance)
        .execute(&mut *tx)
        .await?;

        Ok(num)
    }

    /// Decide a pending iteration. Fails with
    /// [`StoreError::AlreadyDecided`] when the row is no longer pending.
    #[instrument(skip(self, reason, note), err)]
    pub async fn set_approval(
        &self,
        session_id: &str,
        iteration_num: u32,
        approved: bool,
        reason: &str,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::set_approval_tx(&mut tx, session_id, iteration_num, approved, reason, note).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Transaction-aware decision write.
    pub async fn set_approval_tx(
        tx: &mut SqliteConnection,
        session_id: &str,
        iteration_num: u32,
        approved: bool,
        reason: &str,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        let current: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT approved FROM iterations WHERE session_id = ?1 AND iteration_num = ?2",
        )
        .bind(session_id)
        .bind(iteration_num as i64)
        .fetch_optional(&mut *tx)
        .await?;

        match current {
            None => {
                return Err(StoreError::not_found(format!(
                    "iteration {iteration_num} of session {session_id}"
                )));
            }
            Some(Some(_)) => {
                return Err(StoreError::AlreadyDecided {
                    session: session_id.to_string(),
                    iteration: iteration_num,
                });
            }
            Some(None) => {}
        }

        sqlx::query(
            r#"
            UPDATE iterations
            SET approved = ?3, decision_reason = ?4, user_note = ?5
            WHERE session_id = ?1 AND iteration_num = ?2
            "#,
        )
        .bind(session_id)
        .bind(iteration_num as i64)
        .bind(approved as i64)
        .bind(reason)
        .bind(note)
        .execute(&mut *tx)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get(
        &self,
        session_id: &str,
        iteration_num: u32,
    ) -> Result<IterationRecord, StoreError> {
        let row = sqlx::query(SELECT_COLUMNS)
            .bind(session_id)
            .bind(iteration_num as i64)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or_else(|| {
                StoreError::not_found(format!(
                    "iteration {iteration_num} of session {session_id}"
                ))
            })?;
        row_to_record(&row)
    }

    /// The stored candidate profile of one iteration, for a feedback
    /// approval bump.
    pub async fn candidate_profile(
        &self,
        session_id: &str,
        iteration_num: u32,
    ) -> Result<StyleProfile, StoreError> {
        let json: Option<String> = sqlx::query_scalar(
            "SELECT candidate_profile_json FROM iterations WHERE session_id = ?1 AND iteration_num = ?2",
        )
        .bind(session_id)
        .bind(iteration_num as i64)
        .fetch_optional(&*self.pool)
        .await?;

        let json = json.ok_or_else(|| {
            StoreError::not_found(format!("iteration {iteration_num} of session {session_id}"))
        })?;
        Ok(StyleProfile::from_json(&json)?)
    }

    /// All iterations of a session, ordered by iteration number.
    pub async fn list(&self, session_id: &str) -> Result<Vec<IterationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, iteration_num, image_blob, prompt, scores_json,
                   preserved_json, lost_json, mutations_json, approved,
                   decision_reason, recovery_guidance, user_note, created_at
            FROM iterations WHERE session_id = ?1 ORDER BY iteration_num ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Scores of the most recent approved iteration, which is the
    /// evaluator's baseline. `None` before the first approval.
    #[instrument(skip(self), err)]
    pub async fn latest_approved_scores(
        &self,
        session_id: &str,
    ) -> Result<Option<ScoreSet>, StoreError> {
        let json: Option<String> = sqlx::query_scalar(
            r#"
            SELECT scores_json FROM iterations
            WHERE session_id = ?1 AND approved = 1
            ORDER BY iteration_num DESC LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&*self.pool)
        .await?;

        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    pub async fn count(&self, session_id: &str) -> Result<u32, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM iterations WHERE session_id = ?1")
                .bind(session_id)
                .fetch_one(&*self.pool)
                .await?;
        Ok(count as u32)
    }

    pub async fn approved_count(&self, session_id: &str) -> Result<u32, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM iterations WHERE session_id = ?1 AND approved = 1",
        )
        .bind(session_id)
        .fetch_one(&*self.pool)
        .await?;
        Ok(count as u32)
    }

    /// Remove every iteration for a session (extractor re-run).
    pub async fn delete_all(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM iterations WHERE session_id = ?1")
            .bind(session_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT session_id, iteration_num, image_blob, prompt, scores_json,
           preserved_json, lost_json, mutations_json, approved,
           decision_reason, recovery_guidance, user_note, created_at
    FROM iterations WHERE session_id = ?1 AND iteration_num = ?2
"#;

fn row_to_record(row: &SqliteRow) -> Result<IterationRecord, StoreError> {
    let scores_json: String = row.get("scores_json");
    let preserved_json: String = row.get("preserved_json");
    let lost_json: String = row.get("lost_json");
    let mutations_json: String = row.get("mutations_json");
    let approved: Option<i64> = row.get("approved");
    let created_at_raw: String = row.get("created_at");

    Ok(IterationRecord {
        session_id: row.get("session_id"),
        iteration_num: row.get::<i64, _>("iteration_num") as u32,
        image_blob: row.get("image_blob"),
        prompt: row.get("prompt"),
        scores: serde_json::from_str(&scores_json)?,
        preserved_traits: serde_json::from_str(&preserved_json)?,
        lost_traits: serde_json::from_str(&lost_json)?,
        interesting_mutations: serde_json::from_str(&mutations_json)?,
        approval: Approval::from_db(approved),
        decision_reason: row.get("decision_reason"),
        recovery_guidance: row.get("recovery_guidance"),
        user_note: row.get("user_note"),
        created_at: DateTime::parse_from_rfc3339(&created_at_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
