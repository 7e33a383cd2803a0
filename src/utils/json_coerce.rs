//! Tolerant readers for untrusted model-generated JSON.
//!
//! VLM responses are never reflected back into typed structures directly:
//! they get validated and coerced here first. The coercions are small and
//! closed: string-or-list fields, list-or-string fields, score clamping,
//! and a rescue ladder for JSON embedded in prose.

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::types::{ScoreDimension, ScoreSet};

#[derive(Debug, Error, Diagnostic)]
pub enum JsonCoerceError {
    #[error("no JSON object found in response text")]
    #[diagnostic(
        code(styleforge::json::no_object),
        help("Tried strict parse, fenced code block, and greedy brace match.")
    )]
    NoObject,

    #[error("JSON parse error: {source}")]
    #[diagnostic(code(styleforge::json::parse))]
    Parse {
        #[from]
        source: serde_json::Error,
    },
}

/// Pull a JSON value out of model response text.
///
/// The rescue ladder, in order: strict parse of the whole text; the body
/// of the first ```-fenced code block; the widest `{…}` brace match.
pub fn rescue_json(text: &str) -> Result<Value, JsonCoerceError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            return Ok(value);
        }
    }

    if let Some(braced) = greedy_brace_match(trimmed) {
        return serde_json::from_str::<Value>(braced).map_err(Into::into);
    }

    Err(JsonCoerceError::NoObject)
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn greedy_brace_match(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Read a field that must end up a `String`, comma-joining a list if the
/// model returned one.
#[must_use]
pub fn string_or_join(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
}

/// Read a field that must end up a `Vec<String>`, comma-splitting a bare
/// string if the model returned one.
#[must_use]
pub fn list_or_split(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
        ),
        Value::String(s) => Some(
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    }
}

/// Clamp an untrusted score to 0–100, accepting integers, floats, and
/// numeric strings. Out-of-range values are clamped with a warning rather
/// than rejected.
#[must_use]
pub fn clamp_score(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    if !(0.0..=100.0).contains(&raw) {
        warn!(
            target: "styleforge::json",
            raw,
            "score outside 0-100; clamping"
        );
    }
    Some(raw.clamp(0.0, 100.0).round() as u8)
}

/// Parse a `match_scores` mapping into a [`ScoreSet`], clamping each entry
/// and leaving unparseable or missing dimensions absent.
#[must_use]
pub fn parse_score_set(value: &Value) -> ScoreSet {
    let mut scores = ScoreSet::default();
    let Some(map) = value.as_object() else {
        warn!(target: "styleforge::json", "match_scores is not an object");
        return scores;
    };

    for dim in ScoreDimension::ALL {
        match map.get(dim.key()).and_then(clamp_score) {
            Some(v) => scores.set(dim, v),
            None => {
                warn!(
                    target: "styleforge::json",
                    dimension = dim.key(),
                    "missing or unparseable score dimension"
                );
            }
        }
    }
    scores.overall = map.get("overall").and_then(clamp_score).unwrap_or_else(|| {
        warn!(target: "styleforge::json", "missing overall score; defaulting to 0");
        0
    });
    scores
}

/// Repair the known VLM type confusions in a style-profile payload before
/// the serde parse: list-where-string (`geometry_notes`), string-where-
/// list (`special_effects`), and a non-mapping feature registry.
#[must_use]
pub fn repair_profile_value(mut value: Value) -> Value {
    if let Some(geometry) = value
        .pointer("/line_and_shape/geometry_notes")
        .filter(|v| v.is_array())
    {
        let joined = string_or_join(geometry).unwrap_or_default();
        if let Some(slot) = value.pointer_mut("/line_and_shape/geometry_notes") {
            *slot = Value::String(joined);
        }
    }

    if let Some(effects) = value
        .pointer("/lighting/special_effects")
        .filter(|v| v.is_string())
    {
        let split = list_or_split(effects).unwrap_or_default();
        if let Some(slot) = value.pointer_mut("/lighting/special_effects") {
            *slot = Value::Array(split.into_iter().map(Value::String).collect());
        }
    }

    if let Some(features) = value.pointer("/feature_registry/features") {
        if !features.is_object() {
            warn!(
                target: "styleforge::json",
                "feature_registry.features was not a mapping; coercing to empty"
            );
            if let Some(slot) = value.pointer_mut("/feature_registry/features") {
                *slot = Value::Object(serde_json::Map::new());
            }
        }
    }

    value
}

/// Read a list of strings, dropping non-string entries.
#[must_use]
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| list_or_split(v))
        .unwrap_or_default()
}
