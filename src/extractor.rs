//! Style-profile extraction: reference image in, profile v1 out.
//!
//! The VLM's structural reading and the color analyzer's pixel
//! measurement run in parallel, and wherever they disagree about color,
//! the pixels win. The suggested replication baseline is additionally
//! checked by a text-only judge call; a contaminated (or unjudgeable)
//! baseline is replaced by the mechanical one built from structural
//! fields only.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::color::{self, ColorError};
use crate::gateways::vlm::{VlmClient, VlmError, VlmRequest};
use crate::profile::{StyleProfile, mechanical_baseline};
use crate::prompts::{BASELINE_JUDGE_PROMPT, EXTRACTOR_PROMPT, IMAGE_DESCRIPTION_PROMPT, render};
use crate::types::CancelFlag;
use crate::utils::json_coerce::repair_profile_value;

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Vlm(#[from] VlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Color(#[from] ColorError),

    #[error("extraction response could not be read as a style profile: {message}")]
    #[diagnostic(code(styleforge::extractor::parse))]
    Parse { message: String },
}

pub struct Extractor {
    vlm: Arc<dyn VlmClient>,
}

impl Extractor {
    pub fn new(vlm: Arc<dyn VlmClient>) -> Self {
        Self { vlm }
    }

    /// Produce a fresh profile v1 from the reference image.
    ///
    /// Idempotent under re-run: the frozen zone is stable for a given
    /// reference (modulo VLM nondeterminism), and motif lists always
    /// start empty.
    #[instrument(skip_all, err)]
    pub async fn extract(
        &self,
        reference: &[u8],
        style_hints: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<StyleProfile, ExtractError> {
        let mut prompt = EXTRACTOR_PROMPT.to_string();
        if let Some(hints) = style_hints.filter(|h| !h.trim().is_empty()) {
            prompt.push_str("\n\nUser-provided context about this image:\n");
            prompt.push_str(hints.trim());
        }

        let analyze = self
            .vlm
            .analyze(VlmRequest::json(prompt, vec![reference.to_vec()]), cancel);
        let (palette, analysis) = tokio::join!(
            async { color::extract_palette(reference) },
            analyze
        );
        let palette = palette?;
        let analysis = analysis?;

        let value = serde_json::from_str::<serde_json::Value>(&analysis)
            .map(repair_profile_value)
            .map_err(|e| ExtractError::Parse {
                message: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(ExtractError::Parse {
                message: "profile payload was not a JSON object".to_string(),
            });
        }
        let mut profile: StyleProfile =
            serde_json::from_value(value).map_err(|e| ExtractError::Parse {
                message: e.to_string(),
            })?;

        // Pixel truth wins over the VLM's color description.
        profile.palette = palette;

        profile.suggested_test_prompt = self
            .validated_baseline(&profile, cancel)
            .await;

        // Free-prose description for downstream critique prompts.
        match self
            .vlm
            .analyze(
                VlmRequest {
                    prompt: IMAGE_DESCRIPTION_PROMPT.to_string(),
                    images: vec![reference.to_vec()],
                    ..Default::default()
                },
                cancel,
            )
            .await
        {
            Ok(description) => profile.image_description = description.trim().to_string(),
            Err(VlmError::Cancelled) => return Err(VlmError::Cancelled.into()),
            Err(e) => {
                // Non-fatal: critique prompts degrade to the profile JSON.
                warn!(target: "styleforge::extractor", error = %e, "image description call failed");
            }
        }

        // Motifs are discovered through iteration, never extracted.
        profile.motifs.recurring_elements.clear();
        profile.motifs.forbidden_elements.clear();

        Ok(profile)
    }

    /// Keep the VLM's suggested baseline only when a text-only judge call
    /// confirms it carries no style vocabulary. On a contaminated
    /// verdict, an empty suggestion, or any judge failure, fall back to
    /// the mechanical baseline.
    async fn validated_baseline(&self, profile: &StyleProfile, cancel: &CancelFlag) -> String {
        let suggested = profile.suggested_test_prompt.trim();
        if suggested.is_empty() {
            return mechanical_baseline(profile);
        }

        let judge_prompt = render(BASELINE_JUDGE_PROMPT, &[("BASELINE", suggested)]);
        match self.vlm.generate_text(&judge_prompt, None, cancel).await {
            Ok(verdict) => {
                let verdict = verdict.trim().to_ascii_uppercase();
                if verdict.starts_with("CLEAN") {
                    debug!(target: "styleforge::extractor", "suggested baseline judged clean");
                    suggested.to_string()
                } else {
                    warn!(
                        target: "styleforge::extractor",
                        verdict = %verdict,
                        "suggested baseline judged contaminated; using mechanical baseline"
                    );
                    mechanical_baseline(profile)
                }
            }
            Err(e) => {
                warn!(
                    target: "styleforge::extractor",
                    error = %e,
                    "baseline judge call failed; using mechanical baseline"
                );
                mechanical_baseline(profile)
            }
        }
    }
}
