//! Session rows: identity, lifecycle status, and the cancellation flag.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use super::StoreError;
use crate::types::{Session, SessionMode, SessionStatus};

#[derive(Clone)]
pub struct SessionStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish()
    }
}

impl SessionStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        mode: SessionMode,
        reference_blob: &str,
        style_hints: Option<&str>,
    ) -> Result<Session, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.create_with_id(&id, name, mode, reference_blob, style_hints)
            .await
    }

    /// Create a session under a caller-chosen id (the engine picks the id
    /// first so the reference blob can be written under it).
    #[instrument(skip(self, reference_blob, style_hints), err)]
    pub async fn create_with_id(
        &self,
        id: &str,
        name: &str,
        mode: SessionMode,
        reference_blob: &str,
        style_hints: Option<&str>,
    ) -> Result<Session, StoreError> {
        let session = Session {
            id: id.to_string(),
            name: name.to_string(),
            mode,
            status: SessionStatus::Created,
            reference_blob: reference_blob.to_string(),
            style_hints: style_hints.map(str::to_string),
            cancelled: false,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (id, name, mode, status, reference_blob, style_hints, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(session.mode.encode())
        .bind(session.status.encode())
        .bind(&session.reference_blob)
        .bind(&session.style_hints)
        .bind(session.created_at.to_rfc3339())
        .execute(&*self.pool)
        .await?;

        Ok(session)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, session_id: &str) -> Result<Session, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, mode, status, reference_blob, style_hints, cancelled, created_at
            FROM sessions WHERE id = ?1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("session {session_id}")))?;

        row_to_session(&row)
    }

    pub async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, mode, status, reference_blob, style_hints, cancelled, created_at
            FROM sessions ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?1
            "#,
        )
        .bind(session_id)
        .bind(status.encode())
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("session {session_id}")));
        }
        Ok(())
    }

    pub async fn set_cancelled(&self, session_id: &str, cancelled: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sessions SET cancelled = ?2 WHERE id = ?1")
            .bind(session_id)
            .bind(cancelled as i64)
            .execute(&*self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("session {session_id}")));
        }
        Ok(())
    }

    /// Delete the session row. Profile and iteration rows cascade via
    /// foreign keys; blobs are the caller's responsibility.
    #[instrument(skip(self), err)]
    pub async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&*self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("session {session_id}")));
        }
        Ok(())
    }
}

fn row_to_session(row: &SqliteRow) -> Result<Session, StoreError> {
    let mode_raw: String = row.get("mode");
    let status_raw: String = row.get("status");
    let created_at_raw: String = row.get("created_at");

    Ok(Session {
        id: row.get("id"),
        name: row.get("name"),
        mode: SessionMode::decode(&mode_raw)
            .ok_or_else(|| StoreError::corrupt(format!("unknown session mode {mode_raw:?}")))?,
        status: SessionStatus::decode(&status_raw)
            .ok_or_else(|| StoreError::corrupt(format!("unknown session status {status_raw:?}")))?,
        reference_blob: row.get("reference_blob"),
        style_hints: row.get("style_hints"),
        cancelled: row.get::<i64, _>("cancelled") != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
