//! The write side of the progress bus.

use std::fmt;
use thiserror::Error;

use super::event::ProgressEvent;

/// Abstract emitter handed to the iteration controller. Cloneable via
/// `Arc`; emission is synchronous and non-blocking.
pub trait ProgressEmitter: Send + Sync + fmt::Debug {
    fn emit(&self, event: ProgressEvent) -> Result<(), EmitterError>;
}

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("progress hub closed")]
    Closed,
    #[error("progress emission failed: {0}")]
    Other(String),
}

impl EmitterError {
    pub fn other(error: impl Into<String>) -> Self {
        Self::Other(error.into())
    }
}

/// No-op emitter for contexts that do not stream progress (tests,
/// one-shot tools).
#[derive(Clone, Debug, Default)]
pub struct NullEmitter;

impl ProgressEmitter for NullEmitter {
    fn emit(&self, _event: ProgressEvent) -> Result<(), EmitterError> {
        Ok(())
    }
}
