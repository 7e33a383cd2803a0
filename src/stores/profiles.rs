//! Append-only versioned storage of style profiles.
//!
//! Versions start at 1 and grow by exactly one per append; a written
//! (session, version) row is never modified. Each row remembers the
//! iteration that produced it (`NULL` for the extractor's v1), which is
//! what anchors [`ProfileStore::get_latest_approved`].

use std::sync::Arc;

use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::instrument;

use super::StoreError;
use crate::profile::StyleProfile;

#[derive(Clone)]
pub struct ProfileStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for ProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileStore").finish()
    }
}

impl ProfileStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Append a new profile version, assigned `max(existing) + 1`
    /// atomically.
    #[instrument(skip(self, profile), err)]
    pub async fn append(
        &self,
        session_id: &str,
        profile: &StyleProfile,
        created_by_iteration: Option<u32>,
    ) -> Result<u32, StoreError> {
        let mut tx = self.pool.begin().await?;
        let version =
            Self::append_tx(&mut tx, session_id, profile, created_by_iteration).await?;
        tx.commit().await?;
        Ok(version)
    }

    /// Transaction-aware append for callers pairing the profile write
    /// with an iteration outcome.
    pub async fn append_tx(
        tx: &mut SqliteConnection,
        session_id: &str,
        profile: &StyleProfile,
        created_by_iteration: Option<u32>,
    ) -> Result<u32, StoreError> {
        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM style_profiles WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;
        let version = (current + 1) as u32;

        sqlx::query(
            r#"
            INSERT INTO style_profiles (session_id, version, profile_json, created_by_iteration)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(session_id)
        .bind(version as i64)
        .bind(profile.to_json()?)
        .bind(created_by_iteration.map(|n| n as i64))
        .execute(&mut *tx)
        .await?;

        Ok(version)
    }

    #[instrument(skip(self), err)]
    pub async fn get_latest(&self, session_id: &str) -> Result<(u32, StyleProfile), StoreError> {
        let row = sqlx::query(
            r#"
            SELECT version, profile_json FROM style_profiles
            WHERE session_id = ?1 ORDER BY version DESC LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("profile for session {session_id}")))?;

        let version: i64 = row.get("version");
        let json: String = row.get("profile_json");
        Ok((version as u32, StyleProfile::from_json(&json)?))
    }

    #[instrument(skip(self), err)]
    pub async fn get_version(
        &self,
        session_id: &str,
        version: u32,
    ) -> Result<StyleProfile, StoreError> {
        let json: Option<String> = sqlx::query_scalar(
            "SELECT profile_json FROM style_profiles WHERE session_id = ?1 AND version = ?2",
        )
        .bind(session_id)
        .bind(version as i64)
        .fetch_optional(&*self.pool)
        .await?;

        let json = json.ok_or_else(|| {
            StoreError::not_found(format!("profile v{version} for session {session_id}"))
        })?;
        Ok(StyleProfile::from_json(&json)?)
    }

    /// The profile version that was current immediately after the most
    /// recent approved iteration; v1 when nothing has been approved yet.
    #[instrument(skip(self), err)]
    pub async fn get_latest_approved(
        &self,
        session_id: &str,
    ) -> Result<(u32, StyleProfile), StoreError> {
        let row = sqlx::query(
            r#"
            SELECT p.version, p.profile_json
            FROM style_profiles p
            JOIN iterations i
              ON i.session_id = p.session_id
             AND i.iteration_num = p.created_by_iteration
            WHERE p.session_id = ?1 AND i.approved = 1
            ORDER BY i.iteration_num DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(row) => {
                let version: i64 = row.get("version");
                let json: String = row.get("profile_json");
                Ok((version as u32, StyleProfile::from_json(&json)?))
            }
            None => {
                let profile = self.get_version(session_id, 1).await?;
                Ok((1, profile))
            }
        }
    }

    pub async fn count(&self, session_id: &str) -> Result<u32, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM style_profiles WHERE session_id = ?1")
                .bind(session_id)
                .fetch_one(&*self.pool)
                .await?;
        Ok(count as u32)
    }

    /// Remove every profile version for a session. Only used when the
    /// extractor re-runs and the profile history restarts at a fresh v1.
    pub async fn delete_all(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM style_profiles WHERE session_id = ?1")
            .bind(session_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}
