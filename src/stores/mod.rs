//! Transactional persistence for sessions, profiles, iterations, and
//! trained styles, plus the filesystem blob store for images.
//!
//! All relational stores share one SQLite pool and the [`StoreError`]
//! taxonomy. Schema lives in `migrations/` and is applied on connect.
//!
//! Two writes in this system must be atomic as a pair: recording an
//! approved iteration and appending the profile version it produced. The
//! `*_tx` methods exist for that: the iteration controller opens one
//! transaction per outcome and threads it through both stores.

pub mod blobs;
pub mod iterations;
pub mod profiles;
pub mod sessions;
pub mod trained;

use std::str::FromStr;

use miette::Diagnostic;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use thiserror::Error;

pub use blobs::{BlobError, BlobStore};
pub use iterations::{IterationStore, NewIteration};
pub use profiles::ProfileStore;
pub use sessions::SessionStore;
pub use trained::{NewTrainedStyle, TrainedStyleStore};

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    #[diagnostic(
        code(styleforge::store::sqlx),
        help("Ensure DB_URL points at a valid, writable SQLite database.")
    )]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    #[diagnostic(code(styleforge::store::serde))]
    Serde(#[from] serde_json::Error),

    #[error("{what} not found")]
    #[diagnostic(code(styleforge::store::not_found))]
    NotFound { what: String },

    #[error("iteration {iteration} of session {session} is already decided")]
    #[diagnostic(
        code(styleforge::store::already_decided),
        help("Feedback can only be submitted once per iteration.")
    )]
    AlreadyDecided { session: String, iteration: u32 },

    #[error("corrupt persisted row: {message}")]
    #[diagnostic(code(styleforge::store::corrupt))]
    Corrupt { message: String },
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound { what: what.into() }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        StoreError::Corrupt {
            message: message.into(),
        }
    }
}

/// Connect (or create) the engine database and run embedded migrations.
///
/// Foreign keys are enabled on every connection so session deletion
/// cascades to profile and iteration rows.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::corrupt(format!("migration failure: {e}")))?;
    Ok(pool)
}
