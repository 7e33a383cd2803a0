//! Filesystem blob store for reference and candidate images.
//!
//! Blobs are session-scoped: `<root>/<session_id>/<key>.png`. Handles are
//! the `session/key` pair joined with `/`, which is what the relational
//! rows store. Deleting a session removes its whole directory.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;
use tokio::fs;
use tracing::instrument;

#[derive(Debug, Error, Diagnostic)]
pub enum BlobError {
    #[error("blob I/O error: {source}")]
    #[diagnostic(
        code(styleforge::blobs::io),
        help("Check that BLOB_DIR exists and is writable.")
    )]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid blob handle: {handle}")]
    #[diagnostic(code(styleforge::blobs::handle))]
    InvalidHandle { handle: String },
}

/// The blob key of a session's reference image.
pub const REFERENCE_KEY: &str = "reference";

/// Blob key for iteration `num`'s candidate image.
#[must_use]
pub fn iteration_key(num: u32) -> String {
    format!("iteration_{num:03}")
}

#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, handle: &str) -> Result<PathBuf, BlobError> {
        let (session, key) = handle.split_once('/').ok_or_else(|| BlobError::InvalidHandle {
            handle: handle.to_string(),
        })?;
        if session.is_empty()
            || key.is_empty()
            || session.contains("..")
            || key.contains("..")
            || key.contains('/')
        {
            return Err(BlobError::InvalidHandle {
                handle: handle.to_string(),
            });
        }
        Ok(self.root.join(session).join(format!("{key}.png")))
    }

    /// Store bytes under `session/key`, returning the stable handle.
    #[instrument(skip(self, bytes), fields(len = bytes.len()), err)]
    pub async fn put(&self, session_id: &str, key: &str, bytes: &[u8]) -> Result<String, BlobError> {
        let handle = format!("{session_id}/{key}");
        let path = self.resolve(&handle)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(handle)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, handle: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.resolve(handle)?;
        Ok(fs::read(&path).await?)
    }

    /// Remove every blob belonging to a session. Missing directories are
    /// fine; deletion is idempotent.
    #[instrument(skip(self), err)]
    pub async fn delete_session(&self, session_id: &str) -> Result<(), BlobError> {
        let dir = self.root.join(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
