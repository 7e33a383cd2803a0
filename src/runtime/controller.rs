//! The iteration controller: one refinement attempt, start to commit.
//!
//! Exactly one controller invocation may be live per session (the engine
//! enforces this with a per-session mutex). The controller's contract
//! with the stores is strict: an approved iteration and the profile
//! version it produces commit in one transaction, so the store can never
//! hold a half-written pair. Cancellation observed before the commit
//! point discards the attempt entirely; the candidate image blob may be
//! orphaned, which is acceptable, but a dangling iteration row is not.

use std::sync::Arc;

use miette::Diagnostic;
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::critic::{Critic, CriticError, Critique};
use crate::evaluator::{self, EvaluatorConfig};
use crate::gateways::generator::{GeneratorClient, GeneratorError};
use crate::profile::StyleProfile;
use crate::progress::{Phase, ProgressEmitter, ProgressEvent};
use crate::prompts::PromptAssembler;
use crate::stores::{
    BlobError, BlobStore, IterationStore, NewIteration, ProfileStore, StoreError, blobs,
};
use crate::types::{Approval, CancelFlag, ScoreSet, Session, SessionMode};

#[derive(Debug, Error, Diagnostic)]
pub enum IterationError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Critic(#[from] CriticError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Blob(#[from] BlobError),

    #[error("iteration cancelled before commit")]
    #[diagnostic(code(styleforge::controller::cancelled))]
    Cancelled,
}

impl IterationError {
    /// Whether this error already produced an `approved=false` iteration
    /// row (generator/critic exhaustion does; infrastructure errors and
    /// cancellation do not).
    #[must_use]
    pub fn recorded_failure(&self) -> bool {
        matches!(self, IterationError::Generator(_) | IterationError::Critic(_))
    }
}

/// What one controller run produced.
#[derive(Clone, Debug)]
pub struct IterationOutcome {
    pub iteration_num: u32,
    /// `Pending` in training mode until the user submits feedback.
    pub approval: Approval,
    pub scores: ScoreSet,
    pub decision_reason: String,
    /// Set when an approval appended a new profile version.
    pub new_profile_version: Option<u32>,
}

pub struct IterationController {
    pool: Arc<SqlitePool>,
    profiles: ProfileStore,
    iterations: IterationStore,
    blobs: BlobStore,
    generator: Arc<dyn GeneratorClient>,
    critic: Critic,
    emitter: Arc<dyn ProgressEmitter>,
    evaluator: EvaluatorConfig,
    /// Default generator workflow descriptor, opaque to the engine.
    workflow: Option<Value>,
}

impl IterationController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<SqlitePool>,
        profiles: ProfileStore,
        iterations: IterationStore,
        blobs: BlobStore,
        generator: Arc<dyn GeneratorClient>,
        critic: Critic,
        emitter: Arc<dyn ProgressEmitter>,
        evaluator: EvaluatorConfig,
    ) -> Self {
        Self {
            pool,
            profiles,
            iterations,
            blobs,
            generator,
            critic,
            emitter,
            evaluator,
            workflow: None,
        }
    }

    #[must_use]
    pub fn with_workflow(mut self, workflow: Value) -> Self {
        self.workflow = Some(workflow);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        // Best-effort: a closed bus never fails an iteration.
        if let Err(e) = self.emitter.emit(event) {
            warn!(target: "styleforge::controller", error = %e, "progress emission failed");
        }
    }

    /// Run one full iteration for `session`.
    ///
    /// `subject_override` swaps the replication target in the assembled
    /// prompt (used when refining toward a new subject) without touching
    /// the persisted profile.
    #[instrument(skip_all, fields(session = %session.id), err)]
    pub async fn run_once(
        &self,
        session: &Session,
        reference: &[u8],
        creativity_level: u8,
        subject_override: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<IterationOutcome, IterationError> {
        let sid = &session.id;

        if cancel.is_cancelled() {
            return Err(IterationError::Cancelled);
        }

        let iteration_num = self.iterations.count(sid).await? + 1;
        self.emit(ProgressEvent::iteration_start(sid, iteration_num));

        // Assemble.
        self.emit(ProgressEvent::phase(sid, Phase::Assemble));
        let (_, profile) = self.profiles.get_latest(sid).await?;
        let history = self.iterations.list(sid).await?;
        let prompt = match subject_override {
            Some(subject) => {
                let mut assembly_profile = profile.clone();
                assembly_profile.suggested_test_prompt = subject.to_string();
                PromptAssembler::assemble(&assembly_profile, &history, creativity_level)
            }
            None => PromptAssembler::assemble(&profile, &history, creativity_level),
        };

        // Generate.
        if cancel.is_cancelled() {
            return Err(IterationError::Cancelled);
        }
        self.emit(ProgressEvent::phase(sid, Phase::Generate));
        let image = match self.generator.generate(&prompt, self.workflow.as_ref()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Err(self
                    .record_failed_iteration(session, &prompt, String::new(), &profile, &e.to_string())
                    .await
                    .map_or_else(IterationError::Store, |_| IterationError::Generator(e)));
            }
        };

        let image_blob = self
            .blobs
            .put(sid, &blobs::iteration_key(iteration_num), &image)
            .await?;

        // Critique.
        if cancel.is_cancelled() {
            return Err(IterationError::Cancelled);
        }
        self.emit(ProgressEvent::phase(sid, Phase::Critique));
        let critique = match self
            .critic
            .critique(reference, &image, &profile, creativity_level, cancel)
            .await
        {
            Ok(critique) => critique,
            Err(CriticError::Vlm(crate::gateways::vlm::VlmError::Cancelled)) => {
                return Err(IterationError::Cancelled);
            }
            Err(e) => {
                return Err(self
                    .record_failed_iteration(session, &prompt, image_blob, &profile, &e.to_string())
                    .await
                    .map_or_else(IterationError::Store, |_| IterationError::Critic(e)));
            }
        };

        // Evaluate.
        self.emit(ProgressEvent::phase(sid, Phase::Evaluate));
        let baseline = self.iterations.latest_approved_scores(sid).await?;
        let evaluation = evaluator::evaluate(&self.evaluator, &critique.scores, baseline.as_ref());
        let guidance = (!evaluation.approved).then(|| {
            evaluator::recovery_guidance(
                &evaluation,
                &critique.lost_traits,
                &critique.interesting_mutations,
            )
        });

        // Cancellation after this point would lose a finished critique;
        // before it, the attempt is discarded wholesale.
        if cancel.is_cancelled() {
            return Err(IterationError::Cancelled);
        }

        // Commit.
        self.emit(ProgressEvent::phase(sid, Phase::Commit));
        let outcome = self
            .commit_outcome(session, &prompt, image_blob, &critique, &evaluation.reason, evaluation.approved, guidance)
            .await?;

        self.emit(ProgressEvent::iteration_complete(
            sid,
            outcome.iteration_num,
            outcome.approval == Approval::Approved,
            outcome.scores,
            outcome.decision_reason.clone(),
        ));

        Ok(outcome)
    }

    /// Write the iteration row and, on approval, the new profile
    /// version, both inside one transaction.
    #[allow(clippy::too_many_arguments)]
    async fn commit_outcome(
        &self,
        session: &Session,
        prompt: &str,
        image_blob: String,
        critique: &Critique,
        reason: &str,
        approved: bool,
        guidance: Option<String>,
    ) -> Result<IterationOutcome, IterationError> {
        // Training mode records the evaluator's recommendation but leaves
        // the decision to the user.
        let approval = if session.mode == SessionMode::Training {
            Approval::Pending
        } else if approved {
            Approval::Approved
        } else {
            Approval::Rejected
        };

        let new_iteration = NewIteration {
            session_id: session.id.clone(),
            image_blob,
            prompt: prompt.to_string(),
            scores: critique.scores,
            preserved_traits: critique.preserved_traits.clone(),
            lost_traits: critique.lost_traits.clone(),
            interesting_mutations: critique.interesting_mutations.clone(),
            candidate_profile: critique.updated_profile.clone(),
            approval,
            decision_reason: Some(reason.to_string()),
            recovery_guidance: guidance,
        };

        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let iteration_num = IterationStore::append_tx(&mut tx, &new_iteration).await?;
        let new_profile_version = if approval == Approval::Approved {
            Some(
                ProfileStore::append_tx(
                    &mut tx,
                    &session.id,
                    &critique.updated_profile,
                    Some(iteration_num),
                )
                .await?,
            )
        } else {
            None
        };
        tx.commit().await.map_err(StoreError::from)?;

        Ok(IterationOutcome {
            iteration_num,
            approval,
            scores: critique.scores,
            decision_reason: reason.to_string(),
            new_profile_version,
        })
    }

    /// Record a generator/critic exhaustion as a rejected iteration so
    /// the attempt stays visible in the log, then let the error abort the
    /// loop.
    async fn record_failed_iteration(
        &self,
        session: &Session,
        prompt: &str,
        image_blob: String,
        profile: &StyleProfile,
        message: &str,
    ) -> Result<u32, StoreError> {
        let reason = format!("ERROR: {message}");
        self.emit(ProgressEvent::error(&session.id, reason.clone()));

        let record = NewIteration {
            session_id: session.id.clone(),
            image_blob,
            prompt: prompt.to_string(),
            scores: ScoreSet::default(),
            preserved_traits: Vec::new(),
            lost_traits: Vec::new(),
            interesting_mutations: Vec::new(),
            candidate_profile: profile.clone(),
            approval: Approval::Rejected,
            decision_reason: Some(reason.clone()),
            recovery_guidance: None,
        };
        let num = self.iterations.append(&record).await?;
        self.emit(ProgressEvent::iteration_complete(
            &session.id,
            num,
            false,
            ScoreSet::default(),
            reason,
        ));
        Ok(num)
    }
}
