//! Shared fixtures: images, profiles, critique payloads, databases, and
//! a fully stubbed engine.

use std::io::Cursor;
use std::sync::Arc;

use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use styleforge::gateways::generator::GeneratorClient;
use styleforge::gateways::vlm::VlmClient;
use styleforge::profile::StyleProfile;
use styleforge::progress::{MemorySink, ProgressBus};
use styleforge::runtime::{Engine, EngineConfig};
use styleforge::stores;
use tempfile::TempDir;

/// A solid-color PNG, decodable by the color analyzer.
pub fn solid_png(r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut img = RgbImage::new(32, 32);
    for p in img.pixels_mut() {
        *p = Rgb([r, g, b]);
    }
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Red reference / blue candidate pair used across iteration tests.
pub fn reference_png() -> Vec<u8> {
    solid_png(200, 30, 30)
}

pub fn candidate_png() -> Vec<u8> {
    solid_png(30, 30, 200)
}

/// A fresh file-backed SQLite pool with migrations applied. The tempdir
/// must outlive the pool.
pub async fn test_pool() -> (TempDir, Arc<SqlitePool>) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/test.db", dir.path().display());
    let pool = stores::connect(&url).await.unwrap();
    (dir, Arc::new(pool))
}

/// An engine wired to stub collaborators, with a memory sink capturing
/// every progress event.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub sink: MemorySink,
    _db_dir: TempDir,
    _blob_dir: TempDir,
}

pub async fn build_engine(
    vlm: Arc<dyn VlmClient>,
    generator: Arc<dyn GeneratorClient>,
) -> TestEngine {
    let (db_dir, pool) = test_pool().await;
    let blob_dir = tempfile::tempdir().unwrap();

    let config = EngineConfig {
        blob_dir: blob_dir.path().to_path_buf(),
        ..Default::default()
    };

    let sink = MemorySink::new();
    let bus = Arc::new(ProgressBus::with_sink(sink.clone()));
    bus.listen();

    TestEngine {
        engine: Arc::new(Engine::new(pool, vlm, generator, bus, config)),
        sink,
        _db_dir: db_dir,
        _blob_dir: blob_dir,
    }
}

/// A profile with a fully populated frozen identity zone.
pub fn seed_profile() -> StyleProfile {
    let mut profile = StyleProfile {
        core_invariants: vec![
            "Single subject centered".to_string(),
            "Circular boundary around the subject".to_string(),
            "Subject faces left".to_string(),
        ],
        original_subject: "a black cat sitting inside a ring".to_string(),
        suggested_test_prompt: "a black cat sitting inside a ring, centered".to_string(),
        image_description: "A flat black cat inside a thin ring on parchment.".to_string(),
        ..Default::default()
    };
    profile.composition.framing = "centered".to_string();
    profile.composition.structural_notes = "cat anchors the circle center".to_string();
    profile
}

/// The extractor's expected VLM payload: deliberately wrong palette
/// claims and a style-contaminated baseline, to exercise the overrides.
pub fn extraction_payload() -> String {
    json!({
        "core_invariants": [
            "Single subject centered",
            "Circular boundary around the subject",
            "Subject faces left"
        ],
        "original_subject": "a black cat sitting inside a ring",
        "suggested_test_prompt": "a moody, glowing black cat painted in ink",
        "palette": {
            "dominant_colors": ["#123456", "#abcdef", "#ff00ff"],
            "accents": ["#000000"],
            "color_descriptions": ["hallucinated teal"],
            "saturation": "vibrant",
            "value_range": "wrong"
        },
        "line_and_shape": {"descriptors": ["thick outline"], "geometry_notes": "round forms"},
        "texture": {"descriptors": ["flat"], "noise_level": "clean"},
        "lighting": {"description": "flat ambient", "special_effects": []},
        "composition": {
            "camera": "straight-on",
            "framing": "centered",
            "depth": "flat",
            "negative_space": "generous",
            "structural_notes": "cat anchors the circle center"
        },
        "motifs": {
            "recurring_elements": ["should be cleared"],
            "forbidden_elements": ["should also be cleared"]
        }
    })
    .to_string()
}

/// A critique payload with uniform dimension scores.
pub fn critique_payload(dims: u8, overall: u8) -> String {
    critique_payload_with(dims, overall, &[], &[], &[])
}

pub fn critique_payload_with(
    dims: u8,
    overall: u8,
    preserved: &[&str],
    lost: &[&str],
    mutations: &[&str],
) -> String {
    let listify = |items: &[&str]| Value::Array(
        items.iter().map(|s| Value::String((*s).to_string())).collect(),
    );
    json!({
        "match_scores": {
            "palette": dims,
            "line_and_shape": dims,
            "texture": dims,
            "lighting": dims,
            "composition": dims,
            "motifs": dims,
            "overall": overall
        },
        "preserved_traits": listify(preserved),
        "lost_traits": listify(lost),
        "interesting_mutations": listify(mutations),
        "updated_style_profile": {
            "lighting": {"description": "refined description", "special_effects": []}
        }
    })
    .to_string()
}
