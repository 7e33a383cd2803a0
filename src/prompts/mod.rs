//! Prompt assets and the feedback-aggregating prompt assembler.
//!
//! Templates are opaque string assets with `{{VAR}}` placeholders. The
//! only component allowed to splice values into them is this module,
//! through [`render`]'s fixed name-to-value mapping; nothing else in the
//! engine does string surgery on prompts.

pub mod assembler;
mod assets;

pub use assembler::PromptAssembler;
pub use assets::{
    BASELINE_JUDGE_PROMPT, CRITIC_PROMPT, EXTRACTOR_PROMPT, GENERATION_SYSTEM_TEMPLATE,
    IMAGE_DESCRIPTION_PROMPT, STYLE_APPLICATION_TEMPLATE,
};

use tracing::warn;

/// Splice `vars` into a template's `{{NAME}}` placeholders.
///
/// Unmatched placeholders are left in place and logged: a template/var
/// mismatch is a bug, but prompts keep flowing.
#[must_use]
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    if out.contains("{{") {
        warn!(target: "styleforge::prompts", "rendered template still contains placeholders");
    }
    out
}
