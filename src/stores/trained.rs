//! Exported trained styles: immutable snapshots decoupled from sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use super::StoreError;
use crate::types::{ScoreSet, TrainedStyle};

#[derive(Clone)]
pub struct TrainedStyleStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for TrainedStyleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedStyleStore").finish()
    }
}

/// Input for [`TrainedStyleStore::create`].
#[derive(Clone, Debug)]
pub struct NewTrainedStyle {
    pub source_session: Option<String>,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub iteration_count: u32,
    pub final_scores: ScoreSet,
    pub profile_json: serde_json::Value,
    pub representative_blob: Option<String>,
}

impl TrainedStyleStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, style), fields(name = %style.name), err)]
    pub async fn create(&self, style: NewTrainedStyle) -> Result<TrainedStyle, StoreError> {
        let trained = TrainedStyle {
            id: uuid::Uuid::new_v4().to_string(),
            source_session: style.source_session,
            name: style.name,
            description: style.description,
            tags: style.tags,
            iteration_count: style.iteration_count,
            final_scores: style.final_scores,
            profile_json: style.profile_json,
            representative_blob: style.representative_blob,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO trained_styles (
                id, source_session, name, description, tags_json,
                iteration_count, final_scores_json, profile_json,
                representative_blob, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&trained.id)
        .bind(&trained.source_session)
        .bind(&trained.name)
        .bind(&trained.description)
        .bind(serde_json::to_string(&trained.tags)?)
        .bind(trained.iteration_count as i64)
        .bind(serde_json::to_string(&trained.final_scores)?)
        .bind(trained.profile_json.to_string())
        .bind(&trained.representative_blob)
        .bind(trained.created_at.to_rfc3339())
        .execute(&*self.pool)
        .await?;

        Ok(trained)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, id: &str) -> Result<TrainedStyle, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, source_session, name, description, tags_json, iteration_count,
                   final_scores_json, profile_json, representative_blob, created_at
            FROM trained_styles WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("trained style {id}")))?;

        row_to_style(&row)
    }

    pub async fn list(&self) -> Result<Vec<TrainedStyle>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_session, name, description, tags_json, iteration_count,
                   final_scores_json, profile_json, representative_blob, created_at
            FROM trained_styles ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(row_to_style).collect()
    }
}

fn row_to_style(row: &SqliteRow) -> Result<TrainedStyle, StoreError> {
    let tags_json: String = row.get("tags_json");
    let scores_json: String = row.get("final_scores_json");
    let profile_json: String = row.get("profile_json");
    let created_at_raw: String = row.get("created_at");

    Ok(TrainedStyle {
        id: row.get("id"),
        source_session: row.get("source_session"),
        name: row.get("name"),
        description: row.get("description"),
        tags: serde_json::from_str(&tags_json)?,
        iteration_count: row.get::<i64, _>("iteration_count") as u32,
        final_scores: serde_json::from_str(&scores_json)?,
        profile_json: serde_json::from_str(&profile_json)?,
        representative_blob: row.get("representative_blob"),
        created_at: DateTime::parse_from_rfc3339(&created_at_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
