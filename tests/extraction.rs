//! Extraction flows: pixel-truth palette, baseline validation, motif
//! reset, and re-extraction semantics.

mod common;

use std::sync::Arc;

use common::{
    ScriptedVlm, StubGenerator, build_engine, candidate_png, critique_payload,
    extraction_payload, reference_png,
};
use styleforge::runtime::EngineError;
use styleforge::types::SessionMode;

#[tokio::test]
async fn extraction_grounds_palette_in_pixels_and_resets_motifs() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CONTAMINATED",
        "A flat black cat inside a thin ring.",
    ));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm.clone(), generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("extract", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    let (version, profile) = engine.extract(&session.id, false).await.unwrap();
    assert_eq!(version, 1);

    // The payload claimed teal; the reference is solid red. Pixels win.
    assert_eq!(profile.palette.dominant_colors[0], "#c81e1e");
    assert_ne!(profile.palette.color_descriptions, vec!["hallucinated teal"]);

    // The contaminated suggestion was replaced by the mechanical
    // baseline: subject + framing + structural notes.
    assert_eq!(
        profile.suggested_test_prompt,
        "a black cat sitting inside a ring, centered, cat anchors the circle center"
    );

    // Motifs are discovered, never extracted.
    assert!(profile.motifs.recurring_elements.is_empty());
    assert!(profile.motifs.forbidden_elements.is_empty());

    assert_eq!(
        profile.image_description,
        "A flat black cat inside a thin ring."
    );

    let session = engine.get_session(&session.id).await.unwrap();
    assert_eq!(session.status.encode(), "ready");

    // The critique prompt downstream sees two images, reference first;
    // extraction itself sent one image per analyze call.
    let image_counts: Vec<usize> = vlm.calls().iter().map(|c| c.image_count).collect();
    assert_eq!(image_counts, vec![1, 0, 1]);
}

#[tokio::test]
async fn clean_verdict_keeps_the_suggested_baseline() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CLEAN",
        "A flat black cat.",
    ));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm, generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("clean", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    let (_, profile) = engine.extract(&session.id, false).await.unwrap();

    // The (stub-judged clean) VLM suggestion survives as-is.
    assert_eq!(
        profile.suggested_test_prompt,
        "a moody, glowing black cat painted in ink"
    );
}

#[tokio::test]
async fn second_extract_requires_force_and_resets_state() {
    let vlm = Arc::new(ScriptedVlm::for_extraction(
        extraction_payload(),
        "CLEAN",
        "A flat black cat.",
    ));
    // One critique for the auto run, then a fresh extraction script.
    vlm.push_response(critique_payload(70, 75));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm.clone(), generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("re-extract", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    engine.extract(&session.id, false).await.unwrap();

    let err = engine.extract(&session.id, false).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExtracted { .. }));

    // Approve one iteration so there is state to reset.
    let report = engine
        .run_auto(
            &session.id,
            styleforge::runtime::AutoLoopParams {
                max_iterations: 1,
                target_score: 100,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.approved_count, 1);
    assert_eq!(engine.latest_profile(&session.id).await.unwrap().0, 2);

    // Forced re-extraction: fresh v1, empty iteration log.
    vlm.push_response(extraction_payload());
    vlm.push_response("CLEAN".to_string());
    vlm.push_response("A flat black cat, again.".to_string());

    let (version, _) = engine.extract(&session.id, true).await.unwrap();
    assert_eq!(version, 1);
    assert_eq!(engine.latest_profile(&session.id).await.unwrap().0, 1);
    assert!(engine.iteration_history(&session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_extraction_marks_the_session_errored() {
    // Empty script: the profile analyze call fails immediately.
    let vlm = Arc::new(ScriptedVlm::new(vec![]));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm, generator).await;
    let engine = &harness.engine;

    let session = engine
        .create_session("failing", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap();
    let err = engine.extract(&session.id, false).await.unwrap_err();
    assert!(matches!(err, EngineError::Extract(_)));

    let session = engine.get_session(&session.id).await.unwrap();
    assert_eq!(session.status.encode(), "error");
}

#[tokio::test]
async fn undecodable_reference_is_rejected_at_creation() {
    let vlm = Arc::new(ScriptedVlm::new(vec![]));
    let generator = Arc::new(StubGenerator::new(candidate_png()));
    let harness = build_engine(vlm, generator).await;
    let engine = &harness.engine;

    let err = engine
        .create_session("bad-bytes", SessionMode::Auto, b"not an image", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));

    let err = engine
        .create_session("", SessionMode::Auto, &reference_png(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}
