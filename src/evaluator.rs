//! Weighted-delta evaluation and the three-tier approval decision.
//!
//! This is a pure function over (current scores, baseline scores,
//! first-iteration flag) plus fixed constants: no hidden state, no I/O.
//! Calling it twice with identical inputs yields identical output.
//!
//! Decision ladder, first match wins:
//!
//! 1. first iteration → approve (Baseline)
//! 2. overall ≥ 70 and every dimension ≥ 55 → approve (Tier 1)
//! 3. any dimension at or below its catastrophic threshold → reject
//!    (CATASTROPHIC); this preempts the progress tiers, so a strong
//!    weighted delta can never rescue a collapsed dimension
//! 4. weighted delta ≥ +3.0 → approve (Tier 2)
//! 5. weighted delta ≥ +1.0 → approve (Tier 3)
//! 6. otherwise reject, listing regressed dimensions

use miette::Diagnostic;
use thiserror::Error;
use tracing::warn;

use crate::types::{ScoreDimension, ScoreSet};

/// Tier-1 quality bar.
const QUALITY_OVERALL: u8 = 70;
const QUALITY_DIMENSION_FLOOR: u8 = 55;

/// Progress thresholds for Tiers 2 and 3.
const STRONG_PROGRESS: f64 = 3.0;
const WEAK_PROGRESS: f64 = 1.0;

#[derive(Debug, Error, Diagnostic)]
pub enum EvaluatorConfigError {
    #[error("dimension weight for {dimension} must be positive, got {value}")]
    #[diagnostic(code(styleforge::evaluator::weight))]
    NonPositiveWeight { dimension: &'static str, value: f64 },

    #[error("catastrophic threshold for {dimension} must be 0-100, got {value}")]
    #[diagnostic(code(styleforge::evaluator::threshold))]
    ThresholdOutOfRange { dimension: &'static str, value: i64 },
}

/// Per-dimension weights for the progress delta.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DimensionWeights {
    pub palette: f64,
    pub line_and_shape: f64,
    pub texture: f64,
    pub lighting: f64,
    pub composition: f64,
    pub motifs: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            palette: 1.0,
            line_and_shape: 2.0,
            texture: 1.5,
            lighting: 1.5,
            composition: 2.0,
            motifs: 0.8,
        }
    }
}

impl DimensionWeights {
    #[must_use]
    pub fn get(&self, dim: ScoreDimension) -> f64 {
        match dim {
            ScoreDimension::Palette => self.palette,
            ScoreDimension::LineAndShape => self.line_and_shape,
            ScoreDimension::Texture => self.texture,
            ScoreDimension::Lighting => self.lighting,
            ScoreDimension::Composition => self.composition,
            ScoreDimension::Motifs => self.motifs,
        }
    }

    pub fn set(&mut self, dim: ScoreDimension, value: f64) {
        match dim {
            ScoreDimension::Palette => self.palette = value,
            ScoreDimension::LineAndShape => self.line_and_shape = value,
            ScoreDimension::Texture => self.texture = value,
            ScoreDimension::Lighting => self.lighting = value,
            ScoreDimension::Composition => self.composition = value,
            ScoreDimension::Motifs => self.motifs = value,
        }
    }

    pub fn validate(&self) -> Result<(), EvaluatorConfigError> {
        for dim in ScoreDimension::ALL {
            let value = self.get(dim);
            if value <= 0.0 || !value.is_finite() {
                return Err(EvaluatorConfigError::NonPositiveWeight {
                    dimension: dim.key(),
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Score-or-below triggers for catastrophic rejection. Dimensions without
/// a threshold cannot be catastrophic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatastrophicThresholds {
    pub lighting: u8,
    pub composition: u8,
    pub motifs: u8,
}

impl Default for CatastrophicThresholds {
    fn default() -> Self {
        Self {
            lighting: 20,
            composition: 30,
            motifs: 20,
        }
    }
}

impl CatastrophicThresholds {
    #[must_use]
    pub fn get(&self, dim: ScoreDimension) -> Option<u8> {
        match dim {
            ScoreDimension::Lighting => Some(self.lighting),
            ScoreDimension::Composition => Some(self.composition),
            ScoreDimension::Motifs => Some(self.motifs),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), EvaluatorConfigError> {
        for (dimension, value) in [
            ("lighting", self.lighting),
            ("composition", self.composition),
            ("motifs", self.motifs),
        ] {
            if value > 100 {
                return Err(EvaluatorConfigError::ThresholdOutOfRange {
                    dimension,
                    value: value as i64,
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EvaluatorConfig {
    pub weights: DimensionWeights,
    pub thresholds: CatastrophicThresholds,
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<(), EvaluatorConfigError> {
        self.weights.validate()?;
        self.thresholds.validate()
    }
}

/// Which rule approved an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalTier {
    Baseline,
    Quality,
    StrongProgress,
    WeakProgress,
}

/// Outcome of one evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub approved: bool,
    pub tier: Option<ApprovalTier>,
    pub reason: String,
    /// Dimensions at or below their catastrophic threshold, with scores.
    pub catastrophic: Vec<(ScoreDimension, u8)>,
    /// Present whenever a baseline existed.
    pub weighted_delta: Option<f64>,
}

/// Decide whether an iteration's scores warrant approval.
///
/// `baseline` is the most recent approved iteration's scores; pass `None`
/// only for a session's first iteration, which is always approved.
#[must_use]
pub fn evaluate(
    config: &EvaluatorConfig,
    current: &ScoreSet,
    baseline: Option<&ScoreSet>,
) -> Evaluation {
    let current = clamped(current);

    let Some(baseline) = baseline else {
        return Evaluation {
            approved: true,
            tier: Some(ApprovalTier::Baseline),
            reason: "Baseline: first iteration establishes the reference point".to_string(),
            catastrophic: Vec::new(),
            weighted_delta: None,
        };
    };
    let baseline = clamped(baseline);

    let delta = weighted_delta(&config.weights, &current, &baseline);
    let catastrophic = catastrophic_dimensions(&config.thresholds, &current);

    if current.overall >= QUALITY_OVERALL
        && current.all_dimensions_at_least(QUALITY_DIMENSION_FLOOR)
    {
        return Evaluation {
            approved: true,
            tier: Some(ApprovalTier::Quality),
            reason: format!(
                "Tier 1 (Quality Targets): overall {} >= {QUALITY_OVERALL} with every dimension >= {QUALITY_DIMENSION_FLOOR}",
                current.overall
            ),
            catastrophic,
            weighted_delta: Some(delta),
        };
    }

    // Catastrophic preempts the progress tiers: a collapsed dimension is
    // rejected even when the weighted delta is strongly positive.
    if !catastrophic.is_empty() {
        let listing = catastrophic
            .iter()
            .map(|(dim, score)| format!("{} {}", dim.key(), score))
            .collect::<Vec<_>>()
            .join(", ");
        return Evaluation {
            approved: false,
            tier: None,
            reason: format!("CATASTROPHIC: {listing}; rejected regardless of weighted progress"),
            catastrophic,
            weighted_delta: Some(delta),
        };
    }

    if delta >= STRONG_PROGRESS {
        return Evaluation {
            approved: true,
            tier: Some(ApprovalTier::StrongProgress),
            reason: format!("Tier 2 (Strong Progress): weighted delta {delta:+.1} >= +{STRONG_PROGRESS:.1}"),
            catastrophic,
            weighted_delta: Some(delta),
        };
    }

    if delta >= WEAK_PROGRESS {
        return Evaluation {
            approved: true,
            tier: Some(ApprovalTier::WeakProgress),
            reason: format!("Tier 3 (Weak Progress): weighted delta {delta:+.1} >= +{WEAK_PROGRESS:.1}"),
            catastrophic,
            weighted_delta: Some(delta),
        };
    }

    let regressions = regression_listing(&current, &baseline);
    let reason = if regressions.is_empty() {
        format!("Rejected: weighted delta {delta:+.1} below +{WEAK_PROGRESS:.1}")
    } else {
        format!(
            "Rejected: weighted delta {delta:+.1} below +{WEAK_PROGRESS:.1}; regressed: {regressions}"
        )
    };

    Evaluation {
        approved: false,
        tier: None,
        reason,
        catastrophic,
        weighted_delta: Some(delta),
    }
}

/// Structured recovery block for a rejected iteration, consumed by the
/// prompt assembler on the next attempt.
#[must_use]
pub fn recovery_guidance(
    evaluation: &Evaluation,
    lost_traits: &[String],
    interesting_mutations: &[String],
) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !evaluation.catastrophic.is_empty() {
        let lines: Vec<String> = evaluation
            .catastrophic
            .iter()
            .map(|(dim, score)| {
                format!("- {} collapsed to {score}: restore it from the last approved state", dim.key())
            })
            .collect();
        sections.push(format!("Catastrophic dimensions:\n{}", lines.join("\n")));
    }

    if !lost_traits.is_empty() {
        let lines: Vec<String> = lost_traits.iter().map(|t| format!("- {t}")).collect();
        sections.push(format!("Must restore these lost traits:\n{}", lines.join("\n")));
    }

    if !interesting_mutations.is_empty() {
        let lines: Vec<String> = interesting_mutations
            .iter()
            .map(|m| format!("- {m}"))
            .collect();
        sections.push(format!(
            "Avoid — the previous attempt introduced incompatible elements:\n{}",
            lines.join("\n")
        ));
    }

    if sections.is_empty() {
        "Regenerate closer to the last approved state.".to_string()
    } else {
        sections.join("\n\n")
    }
}

fn weighted_delta(weights: &DimensionWeights, current: &ScoreSet, baseline: &ScoreSet) -> f64 {
    let mut delta = 0.0;
    for dim in ScoreDimension::ALL {
        match (current.get(dim), baseline.get(dim)) {
            (Some(cur), Some(base)) => {
                delta += (cur as f64 - base as f64) * weights.get(dim);
            }
            _ => {
                // A dimension missing on either side contributes nothing;
                // the payload was already warned about at parse time.
                warn!(
                    target: "styleforge::evaluator",
                    dimension = dim.key(),
                    "dimension missing from current or baseline; zero delta contribution"
                );
            }
        }
    }
    delta
}

fn catastrophic_dimensions(
    thresholds: &CatastrophicThresholds,
    scores: &ScoreSet,
) -> Vec<(ScoreDimension, u8)> {
    ScoreDimension::ALL
        .iter()
        .filter_map(|dim| {
            let threshold = thresholds.get(*dim)?;
            let score = scores.get(*dim)?;
            (score <= threshold).then_some((*dim, score))
        })
        .collect()
}

fn regression_listing(current: &ScoreSet, baseline: &ScoreSet) -> String {
    ScoreDimension::ALL
        .iter()
        .filter_map(|dim| match (current.get(*dim), baseline.get(*dim)) {
            (Some(cur), Some(base)) if cur < base => {
                Some(format!("{} {base}->{cur}", dim.key()))
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn clamped(scores: &ScoreSet) -> ScoreSet {
    let mut out = *scores;
    for dim in ScoreDimension::ALL {
        if let Some(v) = out.get(dim) {
            out.set(dim, v.min(100));
        }
    }
    out.overall = out.overall.min(100);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EvaluatorConfig {
        EvaluatorConfig::default()
    }

    fn scores(
        palette: u8,
        line: u8,
        texture: u8,
        lighting: u8,
        composition: u8,
        motifs: u8,
        overall: u8,
    ) -> ScoreSet {
        ScoreSet {
            palette: Some(palette),
            line_and_shape: Some(line),
            texture: Some(texture),
            lighting: Some(lighting),
            composition: Some(composition),
            motifs: Some(motifs),
            overall,
        }
    }

    #[test]
    fn first_iteration_is_always_baseline_approved() {
        let eval = evaluate(&config(), &ScoreSet::uniform(50), None);
        assert!(eval.approved);
        assert_eq!(eval.tier, Some(ApprovalTier::Baseline));
        assert!(eval.reason.contains("Baseline"));
        assert_eq!(eval.weighted_delta, None);
    }

    #[test]
    fn quality_bar_fires_before_progress_tiers() {
        // Big positive delta, but the quality bar wins the reason.
        let baseline = ScoreSet::uniform(60);
        let current = scores(80, 75, 70, 72, 78, 70, 75);
        let eval = evaluate(&config(), &current, Some(&baseline));
        assert!(eval.approved);
        assert_eq!(eval.tier, Some(ApprovalTier::Quality));
        assert_eq!(eval.weighted_delta, Some(127.0));
    }

    #[test]
    fn overall_70_with_floor_55_is_exactly_tier_1() {
        let baseline = ScoreSet::uniform(70);
        let current = scores(55, 55, 55, 55, 55, 55, 70);
        let eval = evaluate(&config(), &current, Some(&baseline));
        assert_eq!(eval.tier, Some(ApprovalTier::Quality));
    }

    #[test]
    fn mixed_regression_rejects_below_weak_threshold() {
        // Gains elsewhere cannot offset a heavy lighting regression.
        let baseline = ScoreSet::uniform(70);
        let current = scores(78, 75, 68, 50, 80, 60, 68);
        let eval = evaluate(&config(), &current, Some(&baseline));
        assert!(!eval.approved);
        assert!(eval.catastrophic.is_empty());
        assert_eq!(eval.weighted_delta, Some(-3.0));
        assert!(eval.reason.contains("lighting 70->50"));
        assert!(!eval.reason.contains("CATASTROPHIC"));
    }

    #[test]
    fn catastrophic_lighting_overrides_strong_delta() {
        // Delta lands at +63.5, but lighting collapsed below threshold.
        let baseline = ScoreSet::uniform(70);
        let current = scores(90, 90, 90, 15, 90, 90, 75);
        let eval = evaluate(&config(), &current, Some(&baseline));
        assert!(!eval.approved);
        assert_eq!(eval.weighted_delta, Some(63.5));
        assert_eq!(
            eval.catastrophic,
            vec![(ScoreDimension::Lighting, 15)]
        );
        assert!(eval.reason.contains("CATASTROPHIC"));
        assert!(eval.reason.contains("lighting 15"));
    }

    #[test]
    fn lighting_exactly_20_is_catastrophic() {
        let baseline = ScoreSet::uniform(70);
        let mut current = ScoreSet::uniform(90);
        current.lighting = Some(20);
        let eval = evaluate(&config(), &current, Some(&baseline));
        assert!(!eval.approved);
        assert!(eval.reason.contains("CATASTROPHIC"));
    }

    #[test]
    fn strong_progress_approves_at_tier_2() {
        let baseline = ScoreSet::uniform(60);
        let mut current = ScoreSet::uniform(60);
        current.composition = Some(62); // +2 * 2.0 = +4.0
        current.overall = 61;
        let eval = evaluate(&config(), &current, Some(&baseline));
        assert!(eval.approved);
        assert_eq!(eval.tier, Some(ApprovalTier::StrongProgress));
    }

    #[test]
    fn weak_progress_approves_at_tier_3() {
        let baseline = ScoreSet::uniform(60);
        let mut current = ScoreSet::uniform(60);
        current.palette = Some(62); // +2 * 1.0 = +2.0
        current.overall = 60;
        let eval = evaluate(&config(), &current, Some(&baseline));
        assert!(eval.approved);
        assert_eq!(eval.tier, Some(ApprovalTier::WeakProgress));
    }

    #[test]
    fn delta_just_below_weak_threshold_rejects() {
        // overall 69 fails Tier 1; +0.8 fails Tier 3.
        let baseline = ScoreSet::uniform(60);
        let mut current = ScoreSet::uniform(60);
        current.motifs = Some(61); // +1 * 0.8
        current.overall = 69;
        let eval = evaluate(&config(), &current, Some(&baseline));
        assert!(!eval.approved);
    }

    #[test]
    fn missing_dimension_contributes_zero_delta() {
        let baseline = ScoreSet::uniform(60);
        let mut current = ScoreSet::uniform(60);
        current.texture = None;
        current.palette = Some(64); // +4 * 1.0
        let eval = evaluate(&config(), &current, Some(&baseline));
        assert_eq!(eval.weighted_delta, Some(4.0));
        assert_eq!(eval.tier, Some(ApprovalTier::StrongProgress));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let baseline = ScoreSet::uniform(64);
        let current = scores(70, 61, 58, 66, 63, 59, 65);
        let a = evaluate(&config(), &current, Some(&baseline));
        let b = evaluate(&config(), &current, Some(&baseline));
        assert_eq!(a, b);
    }

    #[test]
    fn guidance_contains_all_three_sections() {
        let baseline = ScoreSet::uniform(70);
        let current = scores(90, 90, 90, 15, 90, 90, 75);
        let eval = evaluate(&config(), &current, Some(&baseline));
        let guidance = recovery_guidance(
            &eval,
            &["soft vignette".to_string()],
            &["chrome reflections".to_string()],
        );
        assert!(guidance.contains("lighting collapsed to 15"));
        assert!(guidance.contains("Must restore"));
        assert!(guidance.contains("soft vignette"));
        assert!(guidance.contains("incompatible elements"));
        assert!(guidance.contains("chrome reflections"));
    }

    #[test]
    fn config_validation_rejects_bad_overrides() {
        let mut cfg = EvaluatorConfig::default();
        cfg.weights.texture = 0.0;
        assert!(cfg.validate().is_err());

        let cfg = EvaluatorConfig::default();
        assert!(cfg.validate().is_ok());
    }
}
