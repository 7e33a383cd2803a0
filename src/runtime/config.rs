//! Engine configuration, resolved from the environment with defaults.
//!
//! Evaluator overrides are validated eagerly: a non-positive dimension
//! weight or an out-of-range catastrophic threshold rejects the whole
//! config at load time rather than surfacing mid-iteration.

use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::evaluator::{EvaluatorConfig, EvaluatorConfigError};
use crate::types::ScoreDimension;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    #[diagnostic(code(styleforge::config::invalid))]
    Invalid { key: &'static str, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Evaluator(#[from] EvaluatorConfigError),
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub vlm_endpoint: String,
    pub vlm_model: String,
    pub vlm_timeout: Duration,
    pub generator_endpoint: String,
    pub generator_timeout: Duration,
    pub blob_dir: PathBuf,
    pub db_url: String,
    pub retries_max: u32,
    pub backoff_base: Duration,
    pub creativity_default: u8,
    pub evaluator: EvaluatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vlm_endpoint: "http://localhost:11434/api/vlm".to_string(),
            vlm_model: "default-vlm".to_string(),
            vlm_timeout: Duration::from_secs(300),
            generator_endpoint: "http://localhost:8188".to_string(),
            generator_timeout: Duration::from_secs(600),
            blob_dir: PathBuf::from("blobs"),
            db_url: "sqlite://styleforge.db".to_string(),
            retries_max: 3,
            backoff_base: Duration::from_secs(1),
            creativity_default: 50,
            evaluator: EvaluatorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Resolve from environment variables (with `.env` support), falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(v) = std::env::var("VLM_ENDPOINT") {
            config.vlm_endpoint = v;
        }
        if let Ok(v) = std::env::var("VLM_MODEL") {
            config.vlm_model = v;
        }
        if let Ok(v) = std::env::var("VLM_TIMEOUT_S") {
            config.vlm_timeout = Duration::from_secs(parse_u64("VLM_TIMEOUT_S", &v)?);
        }
        if let Ok(v) = std::env::var("GENERATOR_ENDPOINT") {
            config.generator_endpoint = v;
        }
        if let Ok(v) = std::env::var("GENERATOR_TIMEOUT_S") {
            config.generator_timeout = Duration::from_secs(parse_u64("GENERATOR_TIMEOUT_S", &v)?);
        }
        if let Ok(v) = std::env::var("BLOB_DIR") {
            config.blob_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DB_URL") {
            config.db_url = v;
        }
        if let Ok(v) = std::env::var("RETRIES_MAX") {
            config.retries_max = parse_u64("RETRIES_MAX", &v)? as u32;
        }
        if let Ok(v) = std::env::var("BACKOFF_BASE_S") {
            let secs: f64 = v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "BACKOFF_BASE_S",
                message: format!("not a number: {v:?}"),
            })?;
            if !(secs > 0.0) {
                return Err(ConfigError::Invalid {
                    key: "BACKOFF_BASE_S",
                    message: "must be positive".to_string(),
                });
            }
            config.backoff_base = Duration::from_secs_f64(secs);
        }
        if let Ok(v) = std::env::var("CREATIVITY_DEFAULT") {
            let level = parse_u64("CREATIVITY_DEFAULT", &v)?;
            if level > 100 {
                return Err(ConfigError::Invalid {
                    key: "CREATIVITY_DEFAULT",
                    message: format!("must be 0-100, got {level}"),
                });
            }
            config.creativity_default = level as u8;
        }
        if let Ok(v) = std::env::var("DIMENSION_WEIGHTS") {
            apply_weight_overrides(&mut config.evaluator, &v)?;
        }
        if let Ok(v) = std::env::var("CATASTROPHIC_THRESHOLDS") {
            apply_threshold_overrides(&mut config.evaluator, &v)?;
        }

        config.evaluator.validate()?;
        Ok(config)
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        message: format!("not an integer: {value:?}"),
    })
}

/// Parse `dim=weight` pairs like
/// `composition=2.0,lighting=1.5`. Partial overrides are allowed; unknown
/// dimensions are not.
fn apply_weight_overrides(evaluator: &mut EvaluatorConfig, spec: &str) -> Result<(), ConfigError> {
    for (key, raw) in parse_pairs("DIMENSION_WEIGHTS", spec)? {
        let dim = dimension_by_key(&key).ok_or_else(|| ConfigError::Invalid {
            key: "DIMENSION_WEIGHTS",
            message: format!("unknown dimension {key:?}"),
        })?;
        let weight: f64 = raw.parse().map_err(|_| ConfigError::Invalid {
            key: "DIMENSION_WEIGHTS",
            message: format!("not a number: {raw:?}"),
        })?;
        evaluator.weights.set(dim, weight);
    }
    Ok(())
}

/// Parse `dim=threshold` pairs for the three catastrophic dimensions.
fn apply_threshold_overrides(
    evaluator: &mut EvaluatorConfig,
    spec: &str,
) -> Result<(), ConfigError> {
    for (key, raw) in parse_pairs("CATASTROPHIC_THRESHOLDS", spec)? {
        let value: i64 = raw.parse().map_err(|_| ConfigError::Invalid {
            key: "CATASTROPHIC_THRESHOLDS",
            message: format!("not an integer: {raw:?}"),
        })?;
        if !(0..=100).contains(&value) {
            return Err(ConfigError::Invalid {
                key: "CATASTROPHIC_THRESHOLDS",
                message: format!("threshold must be 0-100, got {value}"),
            });
        }
        match key.as_str() {
            "lighting" => evaluator.thresholds.lighting = value as u8,
            "composition" => evaluator.thresholds.composition = value as u8,
            "motifs" => evaluator.thresholds.motifs = value as u8,
            other => {
                return Err(ConfigError::Invalid {
                    key: "CATASTROPHIC_THRESHOLDS",
                    message: format!("dimension {other:?} has no catastrophic threshold"),
                });
            }
        }
    }
    Ok(())
}

fn parse_pairs(
    key: &'static str,
    spec: &str,
) -> Result<Vec<(String, String)>, ConfigError> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| ConfigError::Invalid {
                    key,
                    message: format!("expected name=value, got {pair:?}"),
                })
        })
        .collect()
}

fn dimension_by_key(key: &str) -> Option<ScoreDimension> {
    ScoreDimension::ALL.iter().copied().find(|d| d.key() == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_overrides_apply_partially() {
        let mut evaluator = EvaluatorConfig::default();
        apply_weight_overrides(&mut evaluator, "texture=3.0, motifs=0.5").unwrap();
        assert_eq!(evaluator.weights.texture, 3.0);
        assert_eq!(evaluator.weights.motifs, 0.5);
        // Untouched dimensions keep their defaults.
        assert_eq!(evaluator.weights.composition, 2.0);
    }

    #[test]
    fn zero_weight_fails_validation() {
        let mut evaluator = EvaluatorConfig::default();
        apply_weight_overrides(&mut evaluator, "palette=0").unwrap();
        assert!(evaluator.validate().is_err());
    }

    #[test]
    fn unknown_dimension_is_rejected() {
        let mut evaluator = EvaluatorConfig::default();
        assert!(apply_weight_overrides(&mut evaluator, "vibes=1.0").is_err());
    }

    #[test]
    fn threshold_overrides_validate_range() {
        let mut evaluator = EvaluatorConfig::default();
        apply_threshold_overrides(&mut evaluator, "lighting=25").unwrap();
        assert_eq!(evaluator.thresholds.lighting, 25);
        assert!(apply_threshold_overrides(&mut evaluator, "lighting=101").is_err());
        assert!(apply_threshold_overrides(&mut evaluator, "palette=10").is_err());
    }
}
