//! Prompt templates, loaded at compile time and treated as opaque assets.
//!
//! Placeholders use `{{NAME}}` and are spliced exclusively through
//! [`super::render`].

/// Extraction prompt: turns one reference image into a provisional style
/// profile. The palette section of the answer is later overwritten with
/// pixel truth, and both motif lists are reset: motifs are discovered,
/// not extracted.
pub const EXTRACTOR_PROMPT: &str = r##"You are a visual style analyst. Study the attached image and produce a JSON object describing its style, with exactly these fields:

{
  "core_invariants": ["3 to 5 short statements of structural identity: the subject, its position, orientation, and any boundary shapes. These define what the image IS, not how it is rendered."],
  "original_subject": "one literal sentence describing the scene, no style adjectives",
  "suggested_test_prompt": "a minimal prompt that would reproduce the subject and layout, WITHOUT colors, moods, textures, or rendering verbs",
  "palette": {"dominant_colors": ["#rrggbb"], "accents": ["#rrggbb"], "color_descriptions": ["..."], "saturation": "muted|balanced|vibrant", "value_range": "..."},
  "line_and_shape": {"descriptors": ["..."], "geometry_notes": "..."},
  "texture": {"descriptors": ["..."], "noise_level": "clean|subtle|grainy|heavy"},
  "lighting": {"description": "...", "special_effects": ["..."]},
  "composition": {"camera": "...", "framing": "...", "depth": "...", "negative_space": "...", "structural_notes": "spatial identity: where the subject sits and what anchors it"}
}

Respond with the JSON object only."##;

/// Text-only judge: is a replication baseline contaminated with style
/// vocabulary? Expects a single-word verdict.
pub const BASELINE_JUDGE_PROMPT: &str = r#"A replication baseline prompt must describe only a scene's subject and layout. It is CONTAMINATED if it mentions colors, moods, textures, lighting, or rendering verbs (e.g. "painted", "rendered", "glowing").

Baseline under review:
{{BASELINE}}

Answer with exactly one word: CLEAN or CONTAMINATED."#;

/// Free-prose description of the reference image for downstream critique
/// prompts. Deliberately not JSON.
pub const IMAGE_DESCRIPTION_PROMPT: &str = r#"Describe the attached image in two or three sentences of plain prose: subject, arrangement, palette, and overall rendering character. No lists, no JSON."#;

/// Pairwise critique prompt. Two images are attached: the reference
/// first, the candidate second.
pub const CRITIC_PROMPT: &str = r#"You are judging how faithfully a candidate image (second attachment) replicates the style of a reference image (first attachment), while preserving the subject described by the style profile below.

STYLE PROFILE:
{{PROFILE_JSON}}

REFERENCE DESCRIPTION:
{{IMAGE_DESCRIPTION}}

{{COLOR_COMPARISON}}

Creativity level is {{CREATIVITY_LEVEL}}/100; higher levels permit more stylistic drift but never structural drift.

Score each dimension as an integer 0-100 using this rubric: 90-100 near-perfect match, 70-89 good, 50-69 moderate, 30-49 weak, 0-29 poor. "overall" is your holistic judgement, not an average.

Respond with a JSON object:
{
  "match_scores": {"palette": n, "line_and_shape": n, "texture": n, "lighting": n, "composition": n, "motifs": n, "overall": n},
  "preserved_traits": ["traits of the reference present in the candidate"],
  "lost_traits": ["traits of the reference missing from the candidate"],
  "interesting_mutations": ["new elements the candidate introduced"],
  "updated_style_profile": { the full style profile, with refinable style fields adjusted conservatively toward what the candidate revealed; never touch core_invariants, original_subject, composition.structural_notes, or suggested_test_prompt }
}

Respond with the JSON object only."#;

/// Skeleton of the generator's system prompt. The assembler fills every
/// block.
pub const GENERATION_SYSTEM_TEMPLATE: &str = r#"You write prompts for an image generator. Your goal is to replicate a reference style exactly while preserving the subject's structural identity.

STYLE PROFILE (authoritative):
{{PROFILE_JSON}}

MUST PRESERVE (structural identity, non-negotiable):
{{INVARIANTS_BLOCK}}

{{FEEDBACK_BLOCK}}

{{AVOID_BLOCK}}

Replication target: {{TEST_PROMPT}}

Creativity regime: {{REGIME}}."#;

/// Applies a trained style to a new subject.
pub const STYLE_APPLICATION_TEMPLATE: &str = r#"You write prompts for an image generator. Render the subject below in the trained style described by this profile.

TRAINED STYLE PROFILE:
{{PROFILE_JSON}}

SUBJECT:
{{SUBJECT}}

Preserve every stylistic property of the profile (palette, line, texture, lighting, composition); the subject replaces the original scene entirely."#;
