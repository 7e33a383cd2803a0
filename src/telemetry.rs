//! Tracing subscriber setup for binaries and tests.
//!
//! The engine itself only emits `tracing` events; installing a
//! subscriber is the host's decision. This helper wires the usual
//! env-filtered fmt subscriber (`RUST_LOG` controls verbosity, default
//! `styleforge=info`).

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("styleforge=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
