//! Vision-language model gateway.
//!
//! Wraps the underlying text+image model behind a retrying, JSON-rescuing
//! client. The wire contract is deliberately small: one POST carrying
//! `{model, system?, prompt, images[base64], force_json}`, one text body
//! back. Everything vendor-specific stays on the far side of that line.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::types::CancelFlag;
use crate::utils::json_coerce::{JsonCoerceError, rescue_json};

#[derive(Debug, Error, Diagnostic)]
pub enum VlmError {
    #[error("VLM transport error: {message}")]
    #[diagnostic(
        code(styleforge::vlm::transport),
        help("Check VLM_ENDPOINT and that the service is reachable.")
    )]
    Transport { message: String },

    #[error("VLM call timed out after {seconds}s")]
    #[diagnostic(code(styleforge::vlm::timeout))]
    Timeout { seconds: u64 },

    #[error("VLM response was not parseable JSON after all attempts: {source}")]
    #[diagnostic(
        code(styleforge::vlm::parse),
        help("force_json responses go through strict parse, fenced-block, and brace-match rescue.")
    )]
    Parse {
        #[from]
        source: JsonCoerceError,
    },

    #[error("VLM call cancelled")]
    #[diagnostic(code(styleforge::vlm::cancelled))]
    Cancelled,
}

/// One analysis request: a prompt, zero or more images, and whether the
/// response must be JSON.
#[derive(Clone, Debug, Default)]
pub struct VlmRequest {
    pub prompt: String,
    /// Raw image bytes, attached in order. For pairwise critique the
    /// reference comes first.
    pub images: Vec<Vec<u8>>,
    pub system: Option<String>,
    pub force_json: bool,
    /// Optional per-call model override.
    pub model_hint: Option<String>,
    /// Optional per-call wall-clock override of the client timeout.
    pub timeout: Option<Duration>,
}

impl VlmRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn json(prompt: impl Into<String>, images: Vec<Vec<u8>>) -> Self {
        Self {
            prompt: prompt.into(),
            images,
            force_json: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Abstraction over the vision-language model.
///
/// For `force_json` requests, implementations return the rescued JSON
/// text, so callers can parse it strictly.
#[async_trait]
pub trait VlmClient: Send + Sync {
    async fn analyze(&self, request: VlmRequest, cancel: &CancelFlag)
    -> Result<String, VlmError>;

    /// Text-only convenience call.
    async fn generate_text(
        &self,
        prompt: &str,
        system: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<String, VlmError> {
        let mut request = VlmRequest::text(prompt);
        request.system = system.map(str::to_string);
        self.analyze(request, cancel).await
    }
}

#[derive(Serialize)]
struct WirePayload<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    prompt: &'a str,
    images: Vec<String>,
    force_json: bool,
}

/// HTTP implementation of [`VlmClient`].
///
/// Transport and timeout failures get `retries_max` retries after the
/// initial attempt, with doubling backoff (1s, 2s, 4s at the default
/// base); cancellation is never retried. Parse failures under
/// `force_json` consume a retry and re-issue the call.
pub struct HttpVlmClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
    retries_max: u32,
    backoff_base: Duration,
}

impl HttpVlmClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        retries_max: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            timeout,
            retries_max,
            backoff_base,
        }
    }

    async fn single_attempt(&self, request: &VlmRequest) -> Result<String, VlmError> {
        let images: Vec<String> = request.images.iter().map(|b| BASE64.encode(b)).collect();
        let payload = WirePayload {
            model: request.model_hint.as_deref().unwrap_or(&self.model),
            system: request.system.as_deref(),
            prompt: &request.prompt,
            images,
            force_json: request.force_json,
        };

        let send = async {
            let response = self
                .http
                .post(&self.endpoint)
                .json(&payload)
                .send()
                .await
                .map_err(|e| VlmError::Transport {
                    message: e.to_string(),
                })?;
            let response = response.error_for_status().map_err(|e| VlmError::Transport {
                message: e.to_string(),
            })?;
            response.text().await.map_err(|e| VlmError::Transport {
                message: e.to_string(),
            })
        };

        let timeout = request.timeout.unwrap_or(self.timeout);
        match tokio::time::timeout(timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(VlmError::Timeout {
                seconds: timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl VlmClient for HttpVlmClient {
    #[instrument(skip(self, request, cancel), fields(images = request.images.len(), force_json = request.force_json))]
    async fn analyze(
        &self,
        request: VlmRequest,
        cancel: &CancelFlag,
    ) -> Result<String, VlmError> {
        let mut last_error = None;

        // Attempt 0 is the initial call; attempts 1..=retries_max are
        // retries, delayed by base * {1, 2, 4, ...}.
        for attempt in 0..=self.retries_max {
            if cancel.is_cancelled() {
                return Err(VlmError::Cancelled);
            }
            if attempt > 0 {
                let delay = self.backoff_base * 2u32.pow(attempt - 1);
                debug!(
                    target: "styleforge::vlm",
                    retry = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying VLM call"
                );
                tokio::time::sleep(delay).await;
                if cancel.is_cancelled() {
                    return Err(VlmError::Cancelled);
                }
            }

            match self.single_attempt(&request).await {
                Ok(text) => {
                    if !request.force_json {
                        return Ok(text);
                    }
                    // Parse failure does not retry within this attempt; it
                    // spends the attempt and triggers a fresh call.
                    match rescue_json(&text) {
                        Ok(value) => return Ok(value.to_string()),
                        Err(e) => {
                            warn!(
                                target: "styleforge::vlm",
                                attempt,
                                "response failed JSON rescue"
                            );
                            last_error = Some(VlmError::from(e));
                        }
                    }
                }
                Err(e @ (VlmError::Transport { .. } | VlmError::Timeout { .. })) => {
                    warn!(target: "styleforge::vlm", attempt, error = %e, "VLM attempt failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(VlmError::Transport {
            message: "no attempts were made".to_string(),
        }))
    }
}
