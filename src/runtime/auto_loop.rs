//! The auto loop: N controlled iterations with convergence detection.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::controller::{IterationController, IterationError, IterationOutcome};
use crate::types::{Approval, CancelFlag, Session};

/// Inputs for one auto-refinement run.
#[derive(Clone, Debug)]
pub struct AutoLoopParams {
    pub max_iterations: u32,
    /// Overall score that counts as convergence.
    pub target_score: u8,
    pub creativity_level: u8,
    /// Optional replication subject replacing the profile's baseline
    /// prompt for this run.
    pub subject: Option<String>,
}

impl Default for AutoLoopParams {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            target_score: 85,
            creativity_level: 50,
            subject: None,
        }
    }
}

/// Why the loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceReason {
    TargetReached,
    MaxIterations,
    Error,
    Cancelled,
}

/// Aggregate report of an auto run, including partial results when the
/// loop stopped early.
#[derive(Clone, Debug)]
pub struct RefinementReport {
    pub session_id: String,
    pub iterations_run: u32,
    pub approved_count: u32,
    pub rejected_count: u32,
    pub outcomes: Vec<IterationOutcome>,
    /// Best overall score among approved iterations of this run.
    pub best_approved_overall: Option<u8>,
    pub target_reached: bool,
    pub convergence: ConvergenceReason,
    /// Present when the loop stopped on an iteration error.
    pub error: Option<String>,
}

impl RefinementReport {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            iterations_run: 0,
            approved_count: 0,
            rejected_count: 0,
            outcomes: Vec::new(),
            best_approved_overall: None,
            target_reached: false,
            convergence: ConvergenceReason::MaxIterations,
            error: None,
        }
    }

    fn absorb(&mut self, outcome: IterationOutcome) {
        self.iterations_run += 1;
        match outcome.approval {
            Approval::Approved => {
                self.approved_count += 1;
                let overall = outcome.scores.overall;
                self.best_approved_overall = Some(
                    self.best_approved_overall
                        .map_or(overall, |best| best.max(overall)),
                );
            }
            Approval::Rejected => self.rejected_count += 1,
            Approval::Pending => {}
        }
        self.outcomes.push(outcome);
    }
}

/// Run up to `max_iterations` controller invocations, stopping on target,
/// error, or cancellation.
///
/// Cancellation is cooperative: the flag is checked at iteration
/// boundaries, an in-flight iteration runs to its own cancellation
/// checkpoints, and whatever committed stays committed.
#[instrument(skip_all, fields(session = %session.id, max = params.max_iterations))]
pub async fn run_auto_loop(
    controller: &IterationController,
    session: &Session,
    reference: &[u8],
    params: &AutoLoopParams,
    cancel: &CancelFlag,
) -> RefinementReport {
    let mut report = RefinementReport::new(session.id.clone());

    for n in 1..=params.max_iterations {
        if cancel.is_cancelled() {
            report.convergence = ConvergenceReason::Cancelled;
            return report;
        }

        let outcome = controller
            .run_once(
                session,
                reference,
                params.creativity_level,
                params.subject.as_deref(),
                cancel,
            )
            .await;

        match outcome {
            Ok(outcome) => {
                let approved = outcome.approval == Approval::Approved;
                let overall = outcome.scores.overall;
                report.absorb(outcome);

                if approved && overall >= params.target_score {
                    info!(
                        target: "styleforge::auto_loop",
                        iteration = n,
                        overall,
                        "target score reached"
                    );
                    report.target_reached = true;
                    report.convergence = ConvergenceReason::TargetReached;
                    return report;
                }
            }
            Err(IterationError::Cancelled) => {
                report.convergence = ConvergenceReason::Cancelled;
                return report;
            }
            Err(e) => {
                // Generator/critic exhaustion already recorded a rejected
                // iteration row; count it and stop.
                if e.recorded_failure() {
                    report.iterations_run += 1;
                    report.rejected_count += 1;
                }
                report.convergence = ConvergenceReason::Error;
                report.error = Some(e.to_string());
                return report;
            }
        }
    }

    report.convergence = ConvergenceReason::MaxIterations;
    report
}
