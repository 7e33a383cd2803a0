//! Execution runtime: configuration, the iteration controller, the auto
//! loop, and the engine facade that ties the collaborators together.

pub mod auto_loop;
pub mod config;
pub mod controller;
pub mod engine;

pub use auto_loop::{AutoLoopParams, ConvergenceReason, RefinementReport, run_auto_loop};
pub use config::{ConfigError, EngineConfig};
pub use controller::{IterationController, IterationError, IterationOutcome};
pub use engine::{Engine, EngineError};
