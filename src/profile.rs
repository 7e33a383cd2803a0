//! The versioned style profile: what a reference image looks like, split
//! into a frozen identity zone and a refinable style zone.
//!
//! The frozen zone (`core_invariants`, `original_subject`,
//! `composition.structural_notes`, `suggested_test_prompt`) is pinned at
//! extraction and must be bit-identical across every version of a session.
//! The critic is the only component that merges untrusted edits into a
//! profile, and [`copy_frozen_identity`] is the enforcement point it uses.
//!
//! All fields carry `#[serde(default)]` tolerance: profiles are routinely
//! deserialized from VLM payloads that omit or mangle fields, and a missing
//! field must degrade to an empty value rather than fail the parse.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::color::Saturation;

/// Structured description of a reference image's style.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleProfile {
    // Frozen identity zone. Never modified after v1 under any code path.
    /// 3–5 structural-identity statements pinned at extraction.
    #[serde(default)]
    pub core_invariants: Vec<String>,
    /// Literal scene description of the reference.
    #[serde(default)]
    pub original_subject: String,
    /// Replication baseline prompt, mechanically constructed when the
    /// VLM-suggested one is style-contaminated.
    #[serde(default)]
    pub suggested_test_prompt: String,

    // Refinable style zone.
    #[serde(default)]
    pub palette: PaletteSpec,
    #[serde(default)]
    pub line_and_shape: LineAndShape,
    #[serde(default)]
    pub texture: TextureSpec,
    #[serde(default)]
    pub lighting: LightingSpec,
    #[serde(default)]
    pub composition: CompositionSpec,
    #[serde(default)]
    pub motifs: Motifs,
    #[serde(default)]
    pub feature_registry: FeatureRegistry,

    /// Free-prose description of the reference, produced once at
    /// extraction for downstream critic prompts.
    #[serde(default)]
    pub image_description: String,
}

/// Dominant/accent colors plus derived descriptors. Always overwritten
/// with pixel truth from the color analyzer, never trusted from the VLM.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaletteSpec {
    /// Top three colors by pixel coverage, as `#rrggbb`.
    #[serde(default)]
    pub dominant_colors: Vec<String>,
    /// Up to two accent colors.
    #[serde(default)]
    pub accents: Vec<String>,
    #[serde(default)]
    pub color_descriptions: Vec<String>,
    #[serde(default)]
    pub saturation: Saturation,
    #[serde(default)]
    pub value_range: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LineAndShape {
    #[serde(default)]
    pub descriptors: Vec<String>,
    /// Single free-text field; VLMs occasionally return it as a list,
    /// which the critic comma-joins before the profile parse.
    #[serde(default)]
    pub geometry_notes: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureSpec {
    #[serde(default)]
    pub descriptors: Vec<String>,
    #[serde(default)]
    pub noise_level: NoiseLevel,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseLevel {
    Clean,
    #[default]
    Subtle,
    Grainy,
    Heavy,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LightingSpec {
    #[serde(default)]
    pub description: String,
    /// List field; VLMs occasionally return a comma-separated string,
    /// which the critic splits before the profile parse.
    #[serde(default)]
    pub special_effects: Vec<String>,
}

/// Camera and framing. `structural_notes` belongs to the frozen identity
/// zone; the remaining fields are refinable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositionSpec {
    #[serde(default)]
    pub camera: String,
    #[serde(default)]
    pub framing: String,
    #[serde(default)]
    pub depth: String,
    #[serde(default)]
    pub negative_space: String,
    /// Spatial identity of the reference. Frozen after v1.
    #[serde(default)]
    pub structural_notes: String,
}

/// Two disjoint motif lists. Both start empty: motifs are discovered
/// through iteration, never extracted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Motifs {
    #[serde(default)]
    pub recurring_elements: Vec<String>,
    /// Elements discovered through rejection; the assembler turns these
    /// into negative directives.
    #[serde(default)]
    pub forbidden_elements: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRegistry {
    #[serde(default)]
    pub features: Map<String, Value>,
}

/// Frozen-identity fields that differed between two profiles.
///
/// Produced by [`copy_frozen_identity`]; a non-empty list means the source
/// of the target profile attempted to edit pinned fields and the edits
/// were discarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrozenDrift {
    pub fields: Vec<&'static str>,
}

impl FrozenDrift {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Bit-copy the frozen identity zone from `source` into `target`,
/// discarding whatever `target` held there.
///
/// Returns which fields had drifted. Callers log the drift at warning
/// level; it is corrected silently rather than failing the operation.
pub fn copy_frozen_identity(source: &StyleProfile, target: &mut StyleProfile) -> FrozenDrift {
    let mut drift = FrozenDrift::default();

    if target.core_invariants != source.core_invariants {
        drift.fields.push("core_invariants");
        target.core_invariants = source.core_invariants.clone();
    }
    if target.original_subject != source.original_subject {
        drift.fields.push("original_subject");
        target.original_subject = source.original_subject.clone();
    }
    if target.composition.structural_notes != source.composition.structural_notes {
        drift.fields.push("composition.structural_notes");
        target.composition.structural_notes = source.composition.structural_notes.clone();
    }
    if target.suggested_test_prompt != source.suggested_test_prompt {
        drift.fields.push("suggested_test_prompt");
        target.suggested_test_prompt = source.suggested_test_prompt.clone();
    }

    drift
}

/// The mechanical replication baseline: structural fields only, immune to
/// VLM hallucination of style adjectives.
#[must_use]
pub fn mechanical_baseline(profile: &StyleProfile) -> String {
    let mut parts = vec![profile.original_subject.trim()];
    if !profile.composition.framing.trim().is_empty() {
        parts.push(profile.composition.framing.trim());
    }
    if !profile.composition.structural_notes.trim().is_empty() {
        parts.push(profile.composition.structural_notes.trim());
    }
    parts.retain(|p| !p.is_empty());
    parts.join(", ")
}

impl StyleProfile {
    /// Serialized form stored in `style_profiles.profile_json`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Equality over the frozen identity zone only.
    #[must_use]
    pub fn frozen_zone_matches(&self, other: &StyleProfile) -> bool {
        self.core_invariants == other.core_invariants
            && self.original_subject == other.original_subject
            && self.composition.structural_notes == other.composition.structural_notes
            && self.suggested_test_prompt == other.suggested_test_prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_identity() -> StyleProfile {
        StyleProfile {
            core_invariants: vec![
                "Black cat facing left, centered".into(),
                "Circular boundary".into(),
            ],
            original_subject: "a black cat sitting inside a ring".into(),
            suggested_test_prompt: "a black cat sitting inside a ring, centered".into(),
            composition: CompositionSpec {
                framing: "centered".into(),
                structural_notes: "subject fills the inner circle".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn frozen_copy_discards_edits_and_reports_them() {
        let source = profile_with_identity();
        let mut target = source.clone();
        target.core_invariants = vec!["Abstract composition".into()];
        target.lighting.description = "harsh rim light".into();

        let drift = copy_frozen_identity(&source, &mut target);

        assert_eq!(drift.fields, vec!["core_invariants"]);
        assert_eq!(target.core_invariants, source.core_invariants);
        // Refinable fields are left alone.
        assert_eq!(target.lighting.description, "harsh rim light");
        assert!(target.frozen_zone_matches(&source));
    }

    #[test]
    fn frozen_copy_on_identical_profiles_is_clean() {
        let source = profile_with_identity();
        let mut target = source.clone();
        assert!(copy_frozen_identity(&source, &mut target).is_clean());
    }

    #[test]
    fn mechanical_baseline_joins_structural_fields() {
        let profile = profile_with_identity();
        assert_eq!(
            mechanical_baseline(&profile),
            "a black cat sitting inside a ring, centered, subject fills the inner circle"
        );
    }

    #[test]
    fn mechanical_baseline_skips_empty_fields() {
        let mut profile = profile_with_identity();
        profile.composition.framing = String::new();
        assert_eq!(
            mechanical_baseline(&profile),
            "a black cat sitting inside a ring, subject fills the inner circle"
        );
    }

    #[test]
    fn profile_json_round_trip_is_stable() {
        let profile = profile_with_identity();
        let json = profile.to_json().unwrap();
        let back = StyleProfile::from_json(&json).unwrap();
        assert_eq!(profile, back);
    }

    #[test]
    fn unknown_and_missing_fields_do_not_fail_the_parse() {
        let parsed: StyleProfile =
            serde_json::from_str(r#"{"original_subject": "a lighthouse", "surprise": 42}"#)
                .unwrap();
        assert_eq!(parsed.original_subject, "a lighthouse");
        assert!(parsed.core_invariants.is_empty());
        assert!(parsed.motifs.recurring_elements.is_empty());
    }
}
