//! The engine facade: session lifecycle, per-session serialization, and
//! the operations a transport adapter exposes.
//!
//! All collaborators are injected explicitly: stores, gateways, and the
//! progress bus arrive through the constructor, and nothing here touches
//! module-level state. At most one extraction or iteration runs per
//! session at any moment; concurrent requests fail fast with
//! [`EngineError::SessionBusy`] instead of queueing.

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use super::auto_loop::{AutoLoopParams, ConvergenceReason, RefinementReport, run_auto_loop};
use super::config::EngineConfig;
use super::controller::{IterationController, IterationError, IterationOutcome};
use crate::critic::Critic;
use crate::extractor::{ExtractError, Extractor};
use crate::gateways::generator::{GeneratorClient, GeneratorError, HttpGeneratorClient};
use crate::gateways::vlm::{HttpVlmClient, VlmClient};
use crate::profile::StyleProfile;
use crate::progress::{
    LogLevel, Phase, ProgressBus, ProgressEmitter, ProgressEvent, SessionStream, StdOutSink,
};
use crate::prompts::PromptAssembler;
use crate::stores::{
    self, BlobError, BlobStore, IterationStore, NewTrainedStyle, ProfileStore, SessionStore,
    StoreError, TrainedStyleStore, blobs,
};
use crate::types::{
    Approval, CancelFlag, IterationRecord, Session, SessionMode, SessionStatus, TrainedStyle,
};

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("validation failed: {message}")]
    #[diagnostic(code(styleforge::engine::validation))]
    Validation { message: String },

    #[error("session {session} already has an iteration in flight")]
    #[diagnostic(
        code(styleforge::engine::busy),
        help("Wait for the running iteration to finish or cancel the session.")
    )]
    SessionBusy { session: String },

    #[error("session {session} is already extracted")]
    #[diagnostic(
        code(styleforge::engine::already_extracted),
        help("Pass force=true to re-extract; this resets profiles and iterations.")
    )]
    AlreadyExtracted { session: String },

    #[error("session {session} is not extracted yet")]
    #[diagnostic(code(styleforge::engine::not_extracted))]
    NotExtracted { session: String },

    #[error("session {session} has no approved iterations to finalize")]
    #[diagnostic(code(styleforge::engine::not_converged))]
    NotConverged { session: String },

    #[error("session {session} cannot iterate from status {status}")]
    #[diagnostic(code(styleforge::engine::bad_status))]
    BadStatus {
        session: String,
        status: SessionStatus,
    },

    #[error("operation cancelled")]
    #[diagnostic(code(styleforge::engine::cancelled))]
    Cancelled,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Iteration(#[from] IterationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Generator(#[from] GeneratorError),
}

impl EngineError {
    fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }
}

pub struct Engine {
    pool: Arc<SqlitePool>,
    sessions: SessionStore,
    profiles: ProfileStore,
    iterations: IterationStore,
    trained: TrainedStyleStore,
    blobs: BlobStore,
    vlm: Arc<dyn VlmClient>,
    generator: Arc<dyn GeneratorClient>,
    bus: Arc<ProgressBus>,
    config: EngineConfig,
    locks: ParkingMutex<FxHashMap<String, Arc<AsyncMutex<()>>>>,
    cancels: ParkingMutex<FxHashMap<String, CancelFlag>>,
}

impl Engine {
    /// Assemble an engine from explicit collaborators.
    pub fn new(
        pool: Arc<SqlitePool>,
        vlm: Arc<dyn VlmClient>,
        generator: Arc<dyn GeneratorClient>,
        bus: Arc<ProgressBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions: SessionStore::new(Arc::clone(&pool)),
            profiles: ProfileStore::new(Arc::clone(&pool)),
            iterations: IterationStore::new(Arc::clone(&pool)),
            trained: TrainedStyleStore::new(Arc::clone(&pool)),
            blobs: BlobStore::new(config.blob_dir.clone()),
            pool,
            vlm,
            generator,
            bus,
            config,
            locks: ParkingMutex::new(FxHashMap::default()),
            cancels: ParkingMutex::new(FxHashMap::default()),
        }
    }

    /// Build a fully wired engine from environment configuration: SQLite
    /// pool with migrations, HTTP gateways, stdout progress sink.
    pub async fn from_env() -> Result<Self, EngineError> {
        let config = super::config::EngineConfig::from_env()
            .map_err(|e| EngineError::validation(e.to_string()))?;
        let pool = Arc::new(stores::connect(&config.db_url).await?);
        let vlm: Arc<dyn VlmClient> = Arc::new(HttpVlmClient::new(
            config.vlm_endpoint.clone(),
            config.vlm_model.clone(),
            config.vlm_timeout,
            config.retries_max,
            config.backoff_base,
        ));
        let generator: Arc<dyn GeneratorClient> = Arc::new(HttpGeneratorClient::new(
            config.generator_endpoint.clone(),
            config.generator_timeout,
        ));
        let bus = Arc::new(ProgressBus::with_sink(StdOutSink::default()));
        bus.listen();
        Ok(Self::new(pool, vlm, generator, bus, config))
    }

    pub fn progress(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    /// Subscribe to one session's progress events.
    pub fn subscribe(&self, session_id: &str) -> SessionStream {
        self.bus.subscribe_session(session_id)
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Ingest a reference image and create a session around it.
    #[instrument(skip(self, reference), fields(len = reference.len()), err)]
    pub async fn create_session(
        &self,
        name: &str,
        mode: SessionMode,
        reference: &[u8],
        style_hints: Option<&str>,
    ) -> Result<Session, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::validation("session name must not be empty"));
        }
        if reference.is_empty() {
            return Err(EngineError::validation("reference image must not be empty"));
        }
        // Fail fast on undecodable references; everything downstream
        // assumes RGB-decodable bytes.
        crate::color::extract_palette(reference)
            .map_err(|e| EngineError::validation(format!("reference image unusable: {e}")))?;

        // Pick the id up front so the reference blob lands under it, then
        // create the row pointing at the stored handle.
        let session_id = uuid::Uuid::new_v4().to_string();
        let handle = self
            .blobs
            .put(&session_id, blobs::REFERENCE_KEY, reference)
            .await?;
        let session = self
            .sessions
            .create_with_id(&session_id, name, mode, &handle, style_hints)
            .await?;
        info!(target: "styleforge::engine", session = %session.id, "session created");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, EngineError> {
        Ok(self.sessions.get(session_id).await?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, EngineError> {
        Ok(self.sessions.list().await?)
    }

    pub async fn iteration_history(
        &self,
        session_id: &str,
    ) -> Result<Vec<IterationRecord>, EngineError> {
        Ok(self.iterations.list(session_id).await?)
    }

    pub async fn latest_profile(
        &self,
        session_id: &str,
    ) -> Result<(u32, StyleProfile), EngineError> {
        Ok(self.profiles.get_latest(session_id).await?)
    }

    /// Delete a session with all its rows and blobs. Trained styles
    /// survive.
    #[instrument(skip(self), err)]
    pub async fn delete_session(&self, session_id: &str) -> Result<(), EngineError> {
        let _guard = self.try_lock(session_id)?;
        self.sessions.delete(session_id).await?;
        self.blobs.delete_session(session_id).await?;
        self.locks.lock().remove(session_id);
        self.cancels.lock().remove(session_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Extraction
    // ------------------------------------------------------------------

    /// Run the extractor and persist profile v1.
    ///
    /// `force` allows re-extraction; it resets the profile history and
    /// iteration log to match the fresh v1.
    #[instrument(skip(self), err)]
    pub async fn extract(
        &self,
        session_id: &str,
        force: bool,
    ) -> Result<(u32, StyleProfile), EngineError> {
        let _guard = self.try_lock(session_id)?;
        let session = self.sessions.get(session_id).await?;

        let already_extracted = self.profiles.count(session_id).await? > 0;
        if already_extracted && !force {
            return Err(EngineError::AlreadyExtracted {
                session: session_id.to_string(),
            });
        }

        self.sessions
            .set_status(session_id, SessionStatus::Extracting)
            .await?;
        self.emit(ProgressEvent::phase(session_id, Phase::Extract));

        let cancel = self.fresh_cancel(session_id).await?;
        let reference = self.blobs.get(&session.reference_blob).await?;
        let extractor = Extractor::new(Arc::clone(&self.vlm));

        let profile = match extractor
            .extract(&reference, session.style_hints.as_deref(), &cancel)
            .await
        {
            Ok(profile) => profile,
            Err(e) => {
                self.sessions
                    .set_status(session_id, SessionStatus::Error)
                    .await?;
                self.emit(ProgressEvent::error(session_id, e.to_string()));
                return Err(e.into());
            }
        };

        if already_extracted {
            // Fresh v1 invalidates everything tied to the old profiles.
            self.iterations.delete_all(session_id).await?;
            self.profiles.delete_all(session_id).await?;
        }
        let version = self.profiles.append(session_id, &profile, None).await?;
        self.sessions
            .set_status(session_id, SessionStatus::Ready)
            .await?;
        self.emit(ProgressEvent::log(
            session_id,
            LogLevel::Info,
            "extract",
            format!("profile v{version} extracted"),
        ));
        Ok((version, profile))
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Run a single refinement iteration.
    #[instrument(skip(self), err)]
    pub async fn iterate_once(
        &self,
        session_id: &str,
        creativity_level: Option<u8>,
    ) -> Result<IterationOutcome, EngineError> {
        let _guard = self.try_lock(session_id)?;
        let session = self.ready_session(session_id).await?;
        let cancel = self.fresh_cancel(session_id).await?;
        let reference = self.blobs.get(&session.reference_blob).await?;
        let creativity = creativity_level
            .unwrap_or(self.config.creativity_default)
            .min(100);

        self.sessions
            .set_status(session_id, SessionStatus::Active)
            .await?;

        let controller = self.controller();
        match controller
            .run_once(&session, &reference, creativity, None, &cancel)
            .await
        {
            Ok(outcome) => {
                self.sessions
                    .set_status(session_id, SessionStatus::Ready)
                    .await?;
                Ok(outcome)
            }
            Err(IterationError::Cancelled) => {
                self.sessions
                    .set_status(session_id, SessionStatus::Cancelled)
                    .await?;
                Err(EngineError::Cancelled)
            }
            Err(e) => {
                self.sessions
                    .set_status(session_id, SessionStatus::Error)
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Run the auto loop and return its aggregate report (partial on
    /// error or cancellation).
    #[instrument(skip(self, params), err)]
    pub async fn run_auto(
        &self,
        session_id: &str,
        params: AutoLoopParams,
    ) -> Result<RefinementReport, EngineError> {
        let _guard = self.try_lock(session_id)?;
        let session = self.ready_session(session_id).await?;
        if session.mode != SessionMode::Auto {
            return Err(EngineError::validation(
                "auto loop requires a session in auto mode",
            ));
        }
        let cancel = self.fresh_cancel(session_id).await?;
        let reference = self.blobs.get(&session.reference_blob).await?;

        let mut params = params;
        params.creativity_level = params.creativity_level.min(100);
        if params.max_iterations == 0 {
            return Err(EngineError::validation("max_iterations must be at least 1"));
        }

        self.sessions
            .set_status(session_id, SessionStatus::Active)
            .await?;

        let controller = self.controller();
        let report = run_auto_loop(&controller, &session, &reference, &params, &cancel).await;

        let final_status = match report.convergence {
            ConvergenceReason::TargetReached => SessionStatus::Completed,
            ConvergenceReason::MaxIterations => SessionStatus::Ready,
            ConvergenceReason::Error => SessionStatus::Error,
            ConvergenceReason::Cancelled => SessionStatus::Cancelled,
        };
        self.sessions.set_status(session_id, final_status).await?;

        if let Some(error) = &report.error {
            self.emit(ProgressEvent::error(session_id, error.clone()));
        }
        self.emit(ProgressEvent::complete(session_id));
        Ok(report)
    }

    /// Decide a pending training-mode iteration. Approval bumps the
    /// profile from the iteration's stored candidate, atomically with
    /// the decision.
    #[instrument(skip(self, note), err)]
    pub async fn submit_feedback(
        &self,
        session_id: &str,
        iteration_num: u32,
        approved: bool,
        note: Option<&str>,
    ) -> Result<Option<u32>, EngineError> {
        let _guard = self.try_lock(session_id)?;
        let session = self.sessions.get(session_id).await?;
        if session.mode != SessionMode::Training {
            return Err(EngineError::validation(
                "feedback applies to training-mode sessions only",
            ));
        }

        let reason = if approved {
            "approved by user"
        } else {
            "rejected by user"
        };

        let candidate = self
            .iterations
            .candidate_profile(session_id, iteration_num)
            .await?;

        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        IterationStore::set_approval_tx(&mut tx, session_id, iteration_num, approved, reason, note)
            .await?;
        let new_version = if approved {
            Some(
                ProfileStore::append_tx(&mut tx, session_id, &candidate, Some(iteration_num))
                    .await?,
            )
        } else {
            None
        };
        tx.commit().await.map_err(StoreError::from)?;

        self.emit(ProgressEvent::log(
            session_id,
            LogLevel::Info,
            "feedback",
            match new_version {
                Some(v) => format!("iteration {iteration_num} approved; profile v{v}"),
                None => format!("iteration {iteration_num} rejected"),
            },
        ));
        Ok(new_version)
    }

    /// Set the session's cancellation flag. The active run observes it at
    /// its next phase boundary.
    #[instrument(skip(self), err)]
    pub async fn cancel(&self, session_id: &str) -> Result<(), EngineError> {
        // Flag first, row second: an active loop polls the flag.
        if let Some(flag) = self.cancels.lock().get(session_id) {
            flag.cancel();
        }
        self.sessions.set_cancelled(session_id, true).await?;
        self.emit(ProgressEvent::log(
            session_id,
            LogLevel::Warn,
            "cancel",
            "cancellation requested",
        ));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Trained styles
    // ------------------------------------------------------------------

    /// Snapshot a converged session into an immutable trained style.
    #[instrument(skip(self, description, tags), err)]
    pub async fn finalize(
        &self,
        session_id: &str,
        name: &str,
        description: &str,
        tags: Vec<String>,
    ) -> Result<TrainedStyle, EngineError> {
        let _guard = self.try_lock(session_id)?;
        self.sessions.get(session_id).await?;

        let approved = self.iterations.approved_count(session_id).await?;
        if approved == 0 {
            return Err(EngineError::NotConverged {
                session: session_id.to_string(),
            });
        }

        let (_, profile) = self.profiles.get_latest(session_id).await?;
        let final_scores = self
            .iterations
            .latest_approved_scores(session_id)
            .await?
            .unwrap_or_default();
        let iteration_count = self.iterations.count(session_id).await?;

        // Representative image: the most recent approved candidate.
        let representative = self
            .iterations
            .list(session_id)
            .await?
            .into_iter()
            .rev()
            .find(|r| r.approval == Approval::Approved)
            .map(|r| r.image_blob);

        let trained = self
            .trained
            .create(NewTrainedStyle {
                source_session: Some(session_id.to_string()),
                name: name.to_string(),
                description: description.to_string(),
                tags,
                iteration_count,
                final_scores,
                profile_json: serde_json::to_value(&profile).map_err(StoreError::from)?,
                representative_blob: representative,
            })
            .await?;

        self.sessions
            .set_status(session_id, SessionStatus::Completed)
            .await?;
        info!(target: "styleforge::engine", style = %trained.id, "trained style exported");
        Ok(trained)
    }

    pub async fn get_trained_style(&self, id: &str) -> Result<TrainedStyle, EngineError> {
        Ok(self.trained.get(id).await?)
    }

    pub async fn list_trained_styles(&self) -> Result<Vec<TrainedStyle>, EngineError> {
        Ok(self.trained.list().await?)
    }

    /// Render a new subject in a trained style: assemble the application
    /// prompt and drive the generator once.
    #[instrument(skip(self, subject), err)]
    pub async fn apply_style(&self, style_id: &str, subject: &str) -> Result<Vec<u8>, EngineError> {
        if subject.trim().is_empty() {
            return Err(EngineError::validation("subject must not be empty"));
        }
        let style = self.trained.get(style_id).await?;
        let profile: StyleProfile =
            serde_json::from_value(style.profile_json).map_err(StoreError::from)?;
        let prompt = PromptAssembler::assemble_application(&profile, subject.trim());
        Ok(self.generator.generate(&prompt, None).await?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn controller(&self) -> IterationController {
        IterationController::new(
            Arc::clone(&self.pool),
            self.profiles.clone(),
            self.iterations.clone(),
            self.blobs.clone(),
            Arc::clone(&self.generator),
            Critic::new(Arc::clone(&self.vlm)),
            self.bus.get_emitter(),
            self.config.evaluator,
        )
    }

    fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.bus.get_emitter().emit(event) {
            warn!(target: "styleforge::engine", error = %e, "progress emission failed");
        }
    }

    /// Acquire the per-session mutex without waiting.
    fn try_lock(&self, session_id: &str) -> Result<OwnedMutexGuard<()>, EngineError> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.try_lock_owned().map_err(|_| EngineError::SessionBusy {
            session: session_id.to_string(),
        })
    }

    /// A session that exists, is extracted, and may iterate.
    async fn ready_session(&self, session_id: &str) -> Result<Session, EngineError> {
        let session = self.sessions.get(session_id).await?;
        if self.profiles.count(session_id).await? == 0 {
            return Err(EngineError::NotExtracted {
                session: session_id.to_string(),
            });
        }
        if !session.status.can_iterate() {
            return Err(EngineError::BadStatus {
                session: session_id.to_string(),
                status: session.status,
            });
        }
        Ok(session)
    }

    /// Install a fresh cancellation flag for a new run and clear the
    /// persisted flag from any previous cancellation.
    async fn fresh_cancel(&self, session_id: &str) -> Result<CancelFlag, EngineError> {
        let flag = CancelFlag::new();
        self.cancels
            .lock()
            .insert(session_id.to_string(), flag.clone());
        self.sessions.set_cancelled(session_id, false).await?;
        Ok(flag)
    }
}
