//! Controller and auto-loop behavior against a live store: cooperative
//! cancellation and atomic outcome commits.

mod common;

use std::sync::Arc;

use common::{
    ScriptedVlm, StubGenerator, candidate_png, critique_payload, reference_png, seed_profile,
    test_pool,
};
use styleforge::critic::Critic;
use styleforge::evaluator::EvaluatorConfig;
use styleforge::progress::{MemorySink, ProgressBus};
use styleforge::runtime::{
    AutoLoopParams, ConvergenceReason, IterationController, run_auto_loop,
};
use styleforge::stores::{
    BlobStore, IterationStore, ProfileStore, SessionStore, blobs,
};
use styleforge::types::{CancelFlag, SessionMode};

struct Rig {
    controller: IterationController,
    sessions: SessionStore,
    profiles: ProfileStore,
    iterations: IterationStore,
    sink: MemorySink,
    // The bus owns the sink workers; it must outlive the controller.
    _bus: ProgressBus,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

/// Wire a controller directly against the stores, bypassing the engine,
/// so the test owns the cancellation flag.
async fn rig(vlm: Arc<ScriptedVlm>, generator: Arc<StubGenerator>) -> Rig {
    let (db_dir, pool) = test_pool().await;
    let blob_dir = tempfile::tempdir().unwrap();

    let sessions = SessionStore::new(pool.clone());
    let profiles = ProfileStore::new(pool.clone());
    let iterations = IterationStore::new(pool.clone());
    let blob_store = BlobStore::new(blob_dir.path());

    let sink = MemorySink::new();
    let bus = ProgressBus::with_sink(sink.clone());
    bus.listen();

    let controller = IterationController::new(
        pool,
        profiles.clone(),
        iterations.clone(),
        blob_store,
        generator,
        Critic::new(vlm),
        bus.get_emitter(),
        EvaluatorConfig::default(),
    );

    Rig {
        controller,
        sessions,
        profiles,
        iterations,
        sink,
        _bus: bus,
        _dirs: (db_dir, blob_dir),
    }
}

#[tokio::test]
async fn cancellation_mid_loop_returns_partial_results() {
    // Iterations 1 and 2 critique fine; the flag flips as generation 3
    // begins, so attempt 3 is discarded before commit.
    let vlm = Arc::new(ScriptedVlm::new(vec![
        critique_payload(70, 75),
        critique_payload(71, 76),
        critique_payload(72, 77),
    ]));
    let cancel = CancelFlag::new();
    let generator =
        Arc::new(StubGenerator::new(candidate_png()).cancelling_on_call(3, cancel.clone()));
    let rig = rig(vlm, generator).await;

    let session = rig
        .sessions
        .create("cancel-me", SessionMode::Auto, "cancel-me/reference", None)
        .await
        .unwrap();
    rig.profiles
        .append(&session.id, &seed_profile(), None)
        .await
        .unwrap();

    let params = AutoLoopParams {
        max_iterations: 5,
        target_score: 100,
        creativity_level: 50,
        subject: None,
    };
    let report = run_auto_loop(
        &rig.controller,
        &session,
        &reference_png(),
        &params,
        &cancel,
    )
    .await;

    assert_eq!(report.convergence, ConvergenceReason::Cancelled);
    assert_eq!(report.iterations_run, 2);
    assert!(!report.target_reached);

    // No iteration 3 committed; numbering stops at 2.
    let history = rig.iterations.list(&session.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.last().unwrap().iteration_num, 2);

    // Both completed iterations bumped the profile: v1 + 2 approvals.
    assert_eq!(rig.profiles.count(&session.id).await.unwrap(), 3);
}

#[tokio::test]
async fn flag_set_before_the_loop_runs_nothing() {
    let vlm = Arc::new(ScriptedVlm::new(vec![]));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let rig = rig(vlm, generator.clone()).await;

    let session = rig
        .sessions
        .create("pre-cancelled", SessionMode::Auto, "pre-cancelled/reference", None)
        .await
        .unwrap();
    rig.profiles
        .append(&session.id, &seed_profile(), None)
        .await
        .unwrap();

    let cancel = CancelFlag::new();
    cancel.cancel();
    let report = run_auto_loop(
        &rig.controller,
        &session,
        &reference_png(),
        &AutoLoopParams::default(),
        &cancel,
    )
    .await;

    assert_eq!(report.convergence, ConvergenceReason::Cancelled);
    assert_eq!(report.iterations_run, 0);
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn controller_emits_phases_in_order() {
    let vlm = Arc::new(ScriptedVlm::new(vec![critique_payload(70, 75)]));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let rig = rig(vlm, generator).await;

    let session = rig
        .sessions
        .create("phases", SessionMode::Auto, "phases/reference", None)
        .await
        .unwrap();
    rig.profiles
        .append(&session.id, &seed_profile(), None)
        .await
        .unwrap();

    let cancel = CancelFlag::new();
    rig.controller
        .run_once(&session, &reference_png(), 50, None, &cancel)
        .await
        .unwrap();

    // Give the sink worker a moment to drain.
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let kinds: Vec<String> = rig
        .sink
        .snapshot()
        .iter()
        .map(|e| match &e.payload {
            styleforge::progress::ProgressPayload::Progress { phase, .. } => {
                format!("phase:{}", phase.as_str())
            }
            _ => e.kind().to_string(),
        })
        .collect();

    assert_eq!(
        kinds,
        vec![
            "iteration_start",
            "phase:assemble",
            "phase:generate",
            "phase:critique",
            "phase:evaluate",
            "phase:commit",
            "iteration_complete",
        ]
    );
}

#[tokio::test]
async fn candidate_blob_is_persisted_under_the_iteration_key() {
    let vlm = Arc::new(ScriptedVlm::new(vec![critique_payload(70, 75)]));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let rig = rig(vlm, generator).await;

    let session = rig
        .sessions
        .create("blobbed", SessionMode::Auto, "blobbed/reference", None)
        .await
        .unwrap();
    rig.profiles
        .append(&session.id, &seed_profile(), None)
        .await
        .unwrap();

    let outcome = rig
        .controller
        .run_once(&session, &reference_png(), 50, None, &CancelFlag::new())
        .await
        .unwrap();

    let record = rig
        .iterations
        .get(&session.id, outcome.iteration_num)
        .await
        .unwrap();
    assert_eq!(
        record.image_blob,
        format!("{}/{}", session.id, blobs::iteration_key(1))
    );
}
