//! Pairwise critique of (reference, candidate) image pairs.
//!
//! The critic drives one VLM call per attempt and treats everything that
//! comes back as untrusted: scores are clamped, traits are coerced,
//! frozen identity fields are bit-copied back from the input profile, and
//! the palette is overwritten with the color analyzer's measurement of
//! the candidate's actual pixels.
//!
//! A frozen-field edit from the VLM is a protocol violation, but it is
//! corrected silently (with a warning log) rather than failing the
//! iteration; rejection would waste a generation on a recoverable
//! payload defect.

use std::sync::Arc;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::color::{self, ColorError};
use crate::gateways::vlm::{VlmClient, VlmError, VlmRequest};
use crate::profile::{PaletteSpec, StyleProfile, copy_frozen_identity};
use crate::prompts::{CRITIC_PROMPT, render};
use crate::types::{CancelFlag, ScoreSet};
use crate::utils::json_coerce::{parse_score_set, repair_profile_value, string_list};

/// End-to-end parse attempts; each re-issues the full VLM call.
const CRITIQUE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error, Diagnostic)]
pub enum CriticError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Vlm(#[from] VlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Color(#[from] ColorError),

    #[error("critique failed after {attempts} attempts: {message}")]
    #[diagnostic(
        code(styleforge::critic::failed),
        help("The VLM kept returning JSON without a usable match_scores object.")
    )]
    Failed { attempts: u32, message: String },
}

/// The critic's verdict on one candidate image.
#[derive(Clone, Debug, PartialEq)]
pub struct Critique {
    pub scores: ScoreSet,
    pub preserved_traits: Vec<String>,
    pub lost_traits: Vec<String>,
    pub interesting_mutations: Vec<String>,
    /// The refined profile, frozen fields enforced and palette grounded
    /// in candidate pixels.
    pub updated_profile: StyleProfile,
    /// The palette comparison report injected into the prompt, kept for
    /// debug transcripts.
    pub palette_report: String,
}

pub struct Critic {
    vlm: Arc<dyn VlmClient>,
}

impl Critic {
    pub fn new(vlm: Arc<dyn VlmClient>) -> Self {
        Self { vlm }
    }

    /// Critique `candidate` against `reference` under `profile`.
    #[instrument(skip_all, fields(creativity = creativity_level), err)]
    pub async fn critique(
        &self,
        reference: &[u8],
        candidate: &[u8],
        profile: &StyleProfile,
        creativity_level: u8,
        cancel: &CancelFlag,
    ) -> Result<Critique, CriticError> {
        let reference_palette = color::extract_palette(reference)?;
        let candidate_palette = color::extract_palette(candidate)?;
        let palette_report = color::compare_palettes(&reference_palette, &candidate_palette);

        let profile_json =
            serde_json::to_string_pretty(profile).unwrap_or_else(|_| "{}".to_string());
        let prompt = render(
            CRITIC_PROMPT,
            &[
                ("PROFILE_JSON", &profile_json),
                ("IMAGE_DESCRIPTION", &profile.image_description),
                ("COLOR_COMPARISON", &palette_report),
                ("CREATIVITY_LEVEL", &creativity_level.to_string()),
            ],
        );

        let mut last_message = String::new();
        for attempt in 0..CRITIQUE_ATTEMPTS {
            let request = VlmRequest::json(
                prompt.clone(),
                vec![reference.to_vec(), candidate.to_vec()],
            );
            let text = self.vlm.analyze(request, cancel).await?;

            match serde_json::from_str::<Value>(&text) {
                Ok(value) if value.get("match_scores").is_some_and(Value::is_object) => {
                    let mut critique = coerce_critique(&value, profile, &candidate_palette);
                    critique.palette_report = palette_report;
                    return Ok(critique);
                }
                Ok(_) => {
                    warn!(
                        target: "styleforge::critic",
                        attempt,
                        "critique JSON lacked a match_scores object; re-issuing"
                    );
                    last_message = "missing match_scores object".to_string();
                }
                Err(e) => {
                    warn!(target: "styleforge::critic", attempt, error = %e, "critique JSON unparseable; re-issuing");
                    last_message = e.to_string();
                }
            }
        }

        Err(CriticError::Failed {
            attempts: CRITIQUE_ATTEMPTS,
            message: last_message,
        })
    }
}

/// Coerce a raw critique payload into a [`Critique`].
///
/// Pure: all type repairs, frozen-field enforcement, and the palette
/// override happen here so they can be tested without a VLM.
#[must_use]
pub fn coerce_critique(
    value: &Value,
    input_profile: &StyleProfile,
    candidate_palette: &PaletteSpec,
) -> Critique {
    let scores = parse_score_set(value.get("match_scores").unwrap_or(&Value::Null));
    let preserved_traits = string_list(value.get("preserved_traits"));
    let lost_traits = string_list(value.get("lost_traits"));
    let interesting_mutations = string_list(value.get("interesting_mutations"));

    let updated_profile = match value.get("updated_style_profile") {
        Some(raw) if raw.is_object() => {
            let repaired = repair_profile_value(raw.clone());
            match serde_json::from_value::<StyleProfile>(repaired) {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(
                        target: "styleforge::critic",
                        error = %e,
                        "updated_style_profile unusable; keeping input profile"
                    );
                    input_profile.clone()
                }
            }
        }
        _ => {
            warn!(
                target: "styleforge::critic",
                "critique omitted updated_style_profile; keeping input profile"
            );
            input_profile.clone()
        }
    };

    let mut updated_profile = updated_profile;

    // Frozen-field enforcement: identity always comes from the input.
    let drift = copy_frozen_identity(input_profile, &mut updated_profile);
    if !drift.is_clean() {
        warn!(
            target: "styleforge::critic",
            fields = ?drift.fields,
            "VLM edited frozen identity fields; edits discarded"
        );
    }

    // The description is produced once at extraction; refinement never
    // touches it.
    updated_profile.image_description = input_profile.image_description.clone();

    // Palette override: pixel truth wins over whatever the VLM claimed.
    updated_profile.palette = candidate_palette.clone();

    Critique {
        scores,
        preserved_traits,
        lost_traits,
        interesting_mutations,
        updated_profile,
        palette_report: String::new(),
    }
}
