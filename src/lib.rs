//! # Styleforge: Self-Improving Visual-Style Replication
//!
//! Styleforge extracts a structured *style profile* from one reference
//! image, then iteratively drives an external image generator and a
//! vision-language critic until generated candidates converge on the
//! reference's style without losing the subject's structural identity.
//! Converged profiles become reusable trained styles that can be applied
//! to new subjects.
//!
//! ## Core Concepts
//!
//! - **Style profile**: a versioned, append-only description of how the
//!   reference looks, split into a frozen identity zone (never modified
//!   after extraction) and a refinable style zone
//! - **Iteration**: assemble a prompt → generate a candidate → critique
//!   it against the reference → evaluate progress → commit or reject
//! - **Three-tier approval**: quality targets, strong progress, weak
//!   progress; catastrophic single-dimension collapses reject an attempt
//!   regardless of aggregate progress
//! - **Recovery guidance**: rejected iterations feed structured
//!   restoration directives into the next prompt
//! - **Progress bus**: per-session fan-out of structured progress events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use styleforge::runtime::{AutoLoopParams, Engine};
//! use styleforge::types::SessionMode;
//!
//! # async fn example(reference_png: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::from_env().await?;
//!
//! let session = engine
//!     .create_session("ink-cat", SessionMode::Auto, &reference_png, None)
//!     .await?;
//! engine.extract(&session.id, false).await?;
//!
//! let report = engine
//!     .run_auto(&session.id, AutoLoopParams {
//!         max_iterations: 5,
//!         target_score: 85,
//!         ..Default::default()
//!     })
//!     .await?;
//! println!(
//!     "ran {} iterations, converged: {:?}",
//!     report.iterations_run, report.convergence
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Watching progress
//!
//! ```rust,no_run
//! # use styleforge::runtime::Engine;
//! # async fn example(engine: Engine, session_id: String) {
//! let stream = engine.subscribe(&session_id);
//! tokio::spawn(async move {
//!     while let Some(event) = stream.recv().await {
//!         println!("{event}");
//!     }
//! });
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] - Session lifecycle, score dimensions, iteration records
//! - [`profile`] - The style profile data model and frozen-zone helpers
//! - [`color`] - Deterministic palette extraction and comparison
//! - [`gateways`] - VLM and image-generator clients (vendor-agnostic)
//! - [`stores`] - SQLite stores and the filesystem blob store
//! - [`extractor`] - Reference image → profile v1
//! - [`prompts`] - Prompt assets and the feedback-aggregating assembler
//! - [`critic`] - Pairwise critique with frozen-field enforcement
//! - [`evaluator`] - Weighted-delta scoring and the approval decision
//! - [`runtime`] - Controller, auto loop, engine facade, configuration
//! - [`progress`] - Per-session progress event bus
//! - [`telemetry`] - Tracing subscriber setup for hosts

pub mod color;
pub mod critic;
pub mod evaluator;
pub mod extractor;
pub mod gateways;
pub mod profile;
pub mod progress;
pub mod prompts;
pub mod runtime;
pub mod stores;
pub mod telemetry;
pub mod types;
pub mod utils;
