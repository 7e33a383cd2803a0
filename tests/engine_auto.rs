//! Auto-mode engine flows: baseline approval, convergence, invariants,
//! failure handling, and per-session serialization.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    ScriptedVlm, StubGenerator, build_engine, candidate_png, critique_payload,
    critique_payload_with, extraction_payload, reference_png,
};
use serde_json::json;
use styleforge::profile::StyleProfile;
use styleforge::runtime::{AutoLoopParams, ConvergenceReason, EngineError};
use styleforge::types::{Approval, SessionMode};

fn auto_params(max_iterations: u32, target_score: u8) -> AutoLoopParams {
    AutoLoopParams {
        max_iterations,
        target_score,
        creativity_level: 50,
        subject: None,
    }
}

#[tokio::test]
async fn first_iteration_is_approved_as_baseline_and_bumps_the_profile() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CONTAMINATED",
        "A flat black cat.",
    ));
    vlm.push_response(critique_payload(50, 50));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm, generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("baseline", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    engine.extract(&session.id, false).await.unwrap();

    let report = engine
        .run_auto(&session.id, auto_params(1, 90))
        .await
        .unwrap();

    assert_eq!(report.iterations_run, 1);
    assert_eq!(report.approved_count, 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.approval, Approval::Approved);
    assert!(outcome.decision_reason.contains("Baseline"));
    assert_eq!(outcome.new_profile_version, Some(2));

    let (version, _) = engine.latest_profile(&session.id).await.unwrap();
    assert_eq!(version, 2);
}

#[tokio::test]
async fn target_score_stops_the_loop_and_completes_the_session() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CLEAN",
        "A flat black cat.",
    ));
    vlm.push_response(critique_payload(90, 92));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm, generator.clone()).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("converge", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    engine.extract(&session.id, false).await.unwrap();

    let report = engine
        .run_auto(&session.id, auto_params(5, 85))
        .await
        .unwrap();

    assert!(report.target_reached);
    assert_eq!(report.convergence, ConvergenceReason::TargetReached);
    assert_eq!(report.iterations_run, 1);
    assert_eq!(report.best_approved_overall, Some(92));
    assert_eq!(generator.call_count(), 1);

    let session = engine.get_session(&session.id).await.unwrap();
    assert_eq!(session.status.encode(), "completed");
}

#[tokio::test]
async fn profile_count_stays_one_plus_approvals_and_frozen_zone_never_drifts() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CONTAMINATED",
        "A flat black cat.",
    ));
    // Iteration 1: baseline approve. Iteration 2: Tier 2 approve, with a
    // frozen-field edit that must be discarded. Iteration 3: rejected.
    vlm.push_response(critique_payload(70, 75));
    vlm.push_response(
        json!({
            "match_scores": {"palette": 72, "line_and_shape": 72, "texture": 72,
                             "lighting": 72, "composition": 72, "motifs": 72, "overall": 69},
            "preserved_traits": ["flat shading"],
            "lost_traits": [],
            "interesting_mutations": [],
            "updated_style_profile": {
                "core_invariants": ["Abstract composition"],
                "original_subject": "something else entirely",
                "lighting": {"description": "refined", "special_effects": []}
            }
        })
        .to_string(),
    );
    vlm.push_response(critique_payload_with(
        40,
        40,
        &[],
        &["thick outline"],
        &["random sparkles"],
    ));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm, generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("invariants", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    let (_, v1) = engine.extract(&session.id, false).await.unwrap();

    let report = engine
        .run_auto(&session.id, auto_params(3, 100))
        .await
        .unwrap();

    assert_eq!(report.convergence, ConvergenceReason::MaxIterations);
    assert_eq!(report.iterations_run, 3);
    assert_eq!(report.approved_count, 2);
    assert_eq!(report.rejected_count, 1);
    assert_eq!(report.best_approved_overall, Some(75));

    // Invariant: profile versions = 1 + approved iterations.
    let (latest_version, latest_profile) = engine.latest_profile(&session.id).await.unwrap();
    assert_eq!(latest_version, 3);

    // Frozen zone of every version is bit-identical to v1, despite the
    // VLM's attempted rewrite on iteration 2.
    assert!(latest_profile.frozen_zone_matches(&v1));
    assert_eq!(latest_profile.original_subject, v1.original_subject);

    // The rejected iteration carries recovery guidance for the assembler.
    let history = engine.iteration_history(&session.id).await.unwrap();
    assert_eq!(history.len(), 3);
    let rejected = &history[2];
    assert_eq!(rejected.approval, Approval::Rejected);
    let guidance = rejected.recovery_guidance.as_deref().unwrap();
    assert!(guidance.contains("thick outline"));
    assert!(guidance.contains("random sparkles"));

    // Iteration numbering is a gapless prefix of the naturals.
    let nums: Vec<u32> = history.iter().map(|r| r.iteration_num).collect();
    assert_eq!(nums, vec![1, 2, 3]);
}

#[tokio::test]
async fn generator_failure_records_an_error_iteration_and_breaks_the_loop() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CLEAN",
        "A flat black cat.",
    ));
    let generator = Arc::new(StubGenerator::new(candidate_png()).failing_from(1));
    let harness = build_engine(vlm, generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("genfail", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    engine.extract(&session.id, false).await.unwrap();

    let report = engine
        .run_auto(&session.id, auto_params(5, 85))
        .await
        .unwrap();

    assert_eq!(report.convergence, ConvergenceReason::Error);
    assert_eq!(report.iterations_run, 1);
    assert_eq!(report.rejected_count, 1);
    assert!(report.error.is_some());

    let session = engine.get_session(&session.id).await.unwrap();
    assert_eq!(session.status.encode(), "error");

    let history = engine.iteration_history(&session.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].approval, Approval::Rejected);
    assert!(
        history[0]
            .decision_reason
            .as_deref()
            .unwrap()
            .starts_with("ERROR:")
    );

    // No profile bump for an errored iteration.
    let (version, _) = engine.latest_profile(&session.id).await.unwrap();
    assert_eq!(version, 1);
}

#[tokio::test]
async fn concurrent_iteration_requests_get_session_busy() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CLEAN",
        "A flat black cat.",
    ));
    vlm.push_response(critique_payload(70, 75));
    let generator =
        Arc::new(StubGenerator::new(candidate_png()).with_delay(Duration::from_millis(200)));
    let harness = build_engine(vlm, generator).await;
    let engine = Arc::clone(&harness.engine);

    let session = engine
        .create_session("busy", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    engine.extract(&session.id, false).await.unwrap();

    let runner = {
        let engine = Arc::clone(&engine);
        let session_id = session.id.clone();
        tokio::spawn(async move { engine.run_auto(&session_id, auto_params(1, 90)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = engine.iterate_once(&session.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionBusy { .. }));

    let report = runner.await.unwrap().unwrap();
    assert_eq!(report.iterations_run, 1);
}

#[tokio::test]
async fn run_auto_requires_extraction_first() {
    let vlm = Arc::new(ScriptedVlm::new(vec![]));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm, generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("unextracted", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    let err = engine
        .run_auto(&session.id, auto_params(1, 85))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotExtracted { .. }));
}

#[tokio::test]
async fn delete_session_removes_rows_and_blobs() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CLEAN",
        "A flat black cat.",
    ));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm, generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("doomed", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    engine.extract(&session.id, false).await.unwrap();

    engine.delete_session(&session.id).await.unwrap();
    assert!(matches!(
        engine.get_session(&session.id).await.unwrap_err(),
        EngineError::Store(_)
    ));
    // Profiles are gone with the session.
    assert!(engine.latest_profile(&session.id).await.is_err());
}

#[tokio::test]
async fn critique_profiles_persist_refinable_edits() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CLEAN",
        "A flat black cat.",
    ));
    vlm.push_response(critique_payload(70, 75));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm, generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("refinable", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    engine.extract(&session.id, false).await.unwrap();
    engine
        .run_auto(&session.id, auto_params(1, 100))
        .await
        .unwrap();

    let (_, profile): (u32, StyleProfile) = engine.latest_profile(&session.id).await.unwrap();
    // The stubbed critique refines the lighting description, and the
    // palette must reflect the candidate's pixels (solid blue).
    assert_eq!(profile.lighting.description, "refined description");
    assert_eq!(profile.palette.dominant_colors[0], "#1e1ec8");
}
