//! The prompt assembler: profile + iteration history + recovery state in,
//! one generator system prompt out.
//!
//! A pure function of its inputs: no I/O, no clocks. Given identical
//! (profile, history, creativity) it produces identical output, which is
//! what makes prompt assembly testable and replayable.

use std::collections::HashMap;

use crate::profile::StyleProfile;
use crate::types::{Approval, IterationRecord};

use super::assets::{GENERATION_SYSTEM_TEMPLATE, STYLE_APPLICATION_TEMPLATE};
use super::render;

/// Most recent iterations considered for feedback aggregation.
const HISTORY_WINDOW: usize = 10;

/// Most frequent lost traits emitted as EMPHASIZE directives.
const EMPHASIZE_LIMIT: usize = 8;

/// Creativity regimes. The numeric level maps onto three named bands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreativityRegime {
    Fidelity,
    Balanced,
    Exploration,
}

impl CreativityRegime {
    #[must_use]
    pub fn from_level(level: u8) -> Self {
        match level {
            0..=30 => CreativityRegime::Fidelity,
            31..=70 => CreativityRegime::Balanced,
            _ => CreativityRegime::Exploration,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CreativityRegime::Fidelity => "fidelity (replicate exactly, no deviation)",
            CreativityRegime::Balanced => "balanced (replicate style, allow minor variation)",
            CreativityRegime::Exploration => "exploration (style-consistent reinterpretation allowed)",
        }
    }
}

pub struct PromptAssembler;

impl PromptAssembler {
    /// Build the generator's system prompt for the next iteration.
    ///
    /// `history` is the session's iteration log in order; only the most
    /// recent ten entries feed the feedback section.
    #[must_use]
    pub fn assemble(
        profile: &StyleProfile,
        history: &[IterationRecord],
        creativity_level: u8,
    ) -> String {
        let window = &history[history.len().saturating_sub(HISTORY_WINDOW)..];

        let profile_json = serde_json::to_string_pretty(profile)
            .unwrap_or_else(|_| "{}".to_string());

        let invariants_block = if profile.core_invariants.is_empty() {
            "- (none recorded)".to_string()
        } else {
            profile
                .core_invariants
                .iter()
                .map(|inv| format!("- {inv}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let feedback_block = Self::feedback_block(window);
        let avoid_block = Self::avoid_block(profile);

        render(
            GENERATION_SYSTEM_TEMPLATE,
            &[
                ("PROFILE_JSON", &profile_json),
                ("INVARIANTS_BLOCK", &invariants_block),
                ("FEEDBACK_BLOCK", &feedback_block),
                ("AVOID_BLOCK", &avoid_block),
                ("TEST_PROMPT", &profile.suggested_test_prompt),
                (
                    "REGIME",
                    CreativityRegime::from_level(creativity_level).label(),
                ),
            ],
        )
    }

    /// Build a prompt that renders `subject` in an already-trained style.
    #[must_use]
    pub fn assemble_application(profile: &StyleProfile, subject: &str) -> String {
        let profile_json = serde_json::to_string_pretty(profile)
            .unwrap_or_else(|_| "{}".to_string());
        render(
            STYLE_APPLICATION_TEMPLATE,
            &[("PROFILE_JSON", &profile_json), ("SUBJECT", subject)],
        )
    }

    fn feedback_block(window: &[IterationRecord]) -> String {
        let mut sections: Vec<String> = Vec::new();

        // A fresh rejection dominates everything else in the next
        // generation: its recovery guidance leads the feedback section.
        if let Some(last) = window.last() {
            if last.approval == Approval::Rejected {
                if let Some(guidance) = &last.recovery_guidance {
                    sections.push(format!(
                        "RECOVERY NEEDED — these directives override everything below:\n{guidance}"
                    ));
                }
            }
        }

        let emphasize = Self::emphasize_list(window);
        if !emphasize.is_empty() {
            let lines: Vec<String> = emphasize
                .iter()
                .map(|(trait_name, count)| format!("- {trait_name} (lost {count}x previously)"))
                .collect();
            sections.push(format!(
                "EMPHASIZE — repeatedly lost traits, render them explicitly:\n{}",
                lines.join("\n")
            ));
        }

        let preserve = Self::preserve_list(window);
        if !preserve.is_empty() {
            let lines: Vec<String> = preserve.iter().map(|t| format!("- {t}")).collect();
            sections.push(format!(
                "PRESERVE — traits that have held across approved iterations:\n{}",
                lines.join("\n")
            ));
        }

        if sections.is_empty() {
            "FEEDBACK: first attempt, no history yet.".to_string()
        } else {
            sections.join("\n\n")
        }
    }

    /// Lost-trait counter over the window, top entries first. Ties break
    /// alphabetically so assembly stays deterministic.
    fn emphasize_list(window: &[IterationRecord]) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in window {
            for lost in &record.lost_traits {
                *counts.entry(lost.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(EMPHASIZE_LIMIT);
        ranked
    }

    /// Traits preserved in a strict majority of approved iterations.
    fn preserve_list(window: &[IterationRecord]) -> Vec<String> {
        let approved: Vec<&IterationRecord> = window
            .iter()
            .filter(|r| r.approval == Approval::Approved)
            .collect();
        if approved.is_empty() {
            return Vec::new();
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in &approved {
            for preserved in &record.preserved_traits {
                *counts.entry(preserved.as_str()).or_default() += 1;
            }
        }

        let majority = approved.len() / 2 + 1;
        let mut kept: Vec<String> = counts
            .into_iter()
            .filter(|(_, count)| *count >= majority)
            .map(|(t, _)| t.to_string())
            .collect();
        kept.sort();
        kept
    }

    fn avoid_block(profile: &StyleProfile) -> String {
        if profile.motifs.forbidden_elements.is_empty() {
            return String::new();
        }
        let lines: Vec<String> = profile
            .motifs
            .forbidden_elements
            .iter()
            .map(|e| format!("- {e}"))
            .collect();
        format!(
            "AVOID — elements previously rejected as incompatible:\n{}",
            lines.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoreSet;
    use chrono::Utc;

    fn record(num: u32, approval: Approval) -> IterationRecord {
        IterationRecord {
            session_id: "s".into(),
            iteration_num: num,
            image_blob: format!("s/iteration_{num:03}"),
            prompt: String::new(),
            scores: ScoreSet::uniform(70),
            preserved_traits: vec![],
            lost_traits: vec![],
            interesting_mutations: vec![],
            approval,
            decision_reason: None,
            recovery_guidance: None,
            user_note: None,
            created_at: Utc::now(),
        }
    }

    fn profile() -> StyleProfile {
        StyleProfile {
            core_invariants: vec!["Centered subject".into()],
            suggested_test_prompt: "a lighthouse on a cliff".into(),
            ..Default::default()
        }
    }

    #[test]
    fn assembly_is_pure() {
        let history = vec![record(1, Approval::Approved)];
        let a = PromptAssembler::assemble(&profile(), &history, 50);
        let b = PromptAssembler::assemble(&profile(), &history, 50);
        assert_eq!(a, b);
    }

    #[test]
    fn invariants_appear_as_must_preserve() {
        let prompt = PromptAssembler::assemble(&profile(), &[], 50);
        assert!(prompt.contains("MUST PRESERVE"));
        assert!(prompt.contains("- Centered subject"));
        assert!(prompt.contains("a lighthouse on a cliff"));
    }

    #[test]
    fn creativity_regimes_map_to_bands() {
        assert_eq!(CreativityRegime::from_level(0), CreativityRegime::Fidelity);
        assert_eq!(CreativityRegime::from_level(30), CreativityRegime::Fidelity);
        assert_eq!(CreativityRegime::from_level(31), CreativityRegime::Balanced);
        assert_eq!(CreativityRegime::from_level(70), CreativityRegime::Balanced);
        assert_eq!(
            CreativityRegime::from_level(71),
            CreativityRegime::Exploration
        );
        assert_eq!(
            CreativityRegime::from_level(100),
            CreativityRegime::Exploration
        );
    }

    #[test]
    fn lost_traits_rank_by_frequency_and_cap_at_eight() {
        let mut history = Vec::new();
        for n in 1..=3 {
            let mut r = record(n, Approval::Rejected);
            r.lost_traits = vec!["halo glow".into(), format!("unique-{n}")];
            history.push(r);
        }
        // Ten distinct extra traits in one iteration to exceed the cap.
        let mut r = record(4, Approval::Rejected);
        r.lost_traits = (0..10).map(|i| format!("extra-{i}")).collect();
        history.push(r);

        let prompt = PromptAssembler::assemble(&profile(), &history, 50);
        assert!(prompt.contains("halo glow (lost 3x previously)"));
        let emphasize_lines = prompt
            .lines()
            .filter(|l| l.contains("lost ") && l.starts_with('-'))
            .count();
        assert!(emphasize_lines <= 8, "emphasize list must cap at 8");
    }

    #[test]
    fn preserve_requires_majority_of_approved() {
        let mut r1 = record(1, Approval::Approved);
        r1.preserved_traits = vec!["flat shading".into(), "thick outline".into()];
        let mut r2 = record(2, Approval::Approved);
        r2.preserved_traits = vec!["flat shading".into()];
        let mut r3 = record(3, Approval::Approved);
        r3.preserved_traits = vec!["flat shading".into()];

        let prompt = PromptAssembler::assemble(&profile(), &[r1, r2, r3], 50);
        assert!(prompt.contains("- flat shading"));
        // Present in 1 of 3 approved iterations: below majority.
        assert!(!prompt.contains("- thick outline"));
    }

    #[test]
    fn fresh_rejection_puts_recovery_first() {
        let mut rejected = record(2, Approval::Rejected);
        rejected.recovery_guidance = Some("Restore the rim lighting.".into());
        let mut approved = record(1, Approval::Approved);
        approved.preserved_traits = vec!["flat shading".into()];

        let prompt = PromptAssembler::assemble(&profile(), &[approved, rejected], 50);
        let recovery_pos = prompt.find("RECOVERY NEEDED").expect("recovery block");
        let preserve_pos = prompt.find("PRESERVE").expect("preserve block");
        assert!(recovery_pos < preserve_pos);
        assert!(prompt.contains("Restore the rim lighting."));
    }

    #[test]
    fn no_recovery_block_after_approval() {
        let mut rejected = record(1, Approval::Rejected);
        rejected.recovery_guidance = Some("Restore things.".into());
        let approved = record(2, Approval::Approved);

        let prompt = PromptAssembler::assemble(&profile(), &[rejected, approved], 50);
        assert!(!prompt.contains("RECOVERY NEEDED"));
    }

    #[test]
    fn forbidden_motifs_emit_avoid_block() {
        let mut p = profile();
        p.motifs.forbidden_elements = vec!["lens flare".into()];
        let prompt = PromptAssembler::assemble(&p, &[], 50);
        assert!(prompt.contains("AVOID"));
        assert!(prompt.contains("- lens flare"));
    }

    #[test]
    fn application_prompt_carries_subject() {
        let prompt = PromptAssembler::assemble_application(&profile(), "a red bicycle");
        assert!(prompt.contains("a red bicycle"));
        assert!(prompt.contains("TRAINED STYLE PROFILE"));
    }

    #[test]
    fn history_window_is_ten() {
        let mut history = Vec::new();
        for n in 1..=12 {
            let mut r = record(n, Approval::Rejected);
            r.lost_traits = vec![format!("trait-from-{n}")];
            history.push(r);
        }
        let prompt = PromptAssembler::assemble(&profile(), &history, 50);
        // Iterations 1 and 2 fall outside the window.
        assert!(!prompt.contains("trait-from-1 "));
        assert!(prompt.contains("trait-from-12"));
    }
}
