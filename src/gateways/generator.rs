//! Image-generator gateway: submit a workflow, poll, download.
//!
//! The workflow descriptor is an opaque JSON mapping owned by the caller;
//! the gateway only splices the assembled prompt into it and drives the
//! submit/status/result endpoints. A generation gets a single attempt
//! with a bounded total wait; generator failures are never retried, they
//! fail the iteration.

use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error, Diagnostic)]
pub enum GeneratorError {
    #[error("generation did not complete within {seconds}s")]
    #[diagnostic(
        code(styleforge::generator::timeout),
        help("Raise GENERATOR_TIMEOUT_S or check the generator's queue.")
    )]
    Timeout { seconds: u64 },

    #[error("generation failed: {message}")]
    #[diagnostic(code(styleforge::generator::failed))]
    Failed { message: String },
}

/// Abstraction over the external image-generation service.
#[async_trait]
pub trait GeneratorClient: Send + Sync {
    /// Generate one image for `prompt`, returning raw PNG bytes.
    async fn generate(
        &self,
        prompt: &str,
        workflow: Option<&Value>,
    ) -> Result<Vec<u8>, GeneratorError>;
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP implementation: POST `/jobs`, poll `/jobs/{id}`, GET
/// `/jobs/{id}/image`.
pub struct HttpGeneratorClient {
    http: reqwest::Client,
    endpoint: String,
    total_timeout: Duration,
    poll_interval: Duration,
}

impl HttpGeneratorClient {
    pub fn new(endpoint: impl Into<String>, total_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            total_timeout,
            poll_interval: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn failed(message: impl Into<String>) -> GeneratorError {
        GeneratorError::Failed {
            message: message.into(),
        }
    }

    async fn submit(&self, prompt: &str, workflow: Option<&Value>) -> Result<String, GeneratorError> {
        let mut body = workflow.cloned().unwrap_or_else(|| json!({}));
        if let Some(map) = body.as_object_mut() {
            map.insert("prompt".to_string(), json!(prompt));
        } else {
            body = json!({ "prompt": prompt });
        }

        let response = self
            .http
            .post(format!("{}/jobs", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::failed(format!("submit: {e}")))?
            .error_for_status()
            .map_err(|e| Self::failed(format!("submit: {e}")))?;

        let submit: SubmitResponse = response
            .json()
            .await
            .map_err(|e| Self::failed(format!("submit response: {e}")))?;
        Ok(submit.job_id)
    }

    async fn poll_status(&self, job_id: &str) -> Result<StatusResponse, GeneratorError> {
        self.http
            .get(format!("{}/jobs/{}", self.endpoint, job_id))
            .send()
            .await
            .map_err(|e| Self::failed(format!("status: {e}")))?
            .error_for_status()
            .map_err(|e| Self::failed(format!("status: {e}")))?
            .json()
            .await
            .map_err(|e| Self::failed(format!("status response: {e}")))
    }

    async fn download(&self, job_id: &str) -> Result<Vec<u8>, GeneratorError> {
        let bytes = self
            .http
            .get(format!("{}/jobs/{}/image", self.endpoint, job_id))
            .send()
            .await
            .map_err(|e| Self::failed(format!("download: {e}")))?
            .error_for_status()
            .map_err(|e| Self::failed(format!("download: {e}")))?
            .bytes()
            .await
            .map_err(|e| Self::failed(format!("download body: {e}")))?;
        if bytes.is_empty() {
            return Err(Self::failed("generator returned an empty image"));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl GeneratorClient for HttpGeneratorClient {
    #[instrument(skip(self, prompt, workflow), fields(prompt_len = prompt.len()))]
    async fn generate(
        &self,
        prompt: &str,
        workflow: Option<&Value>,
    ) -> Result<Vec<u8>, GeneratorError> {
        let deadline = tokio::time::Instant::now() + self.total_timeout;
        let job_id = self.submit(prompt, workflow).await?;
        debug!(target: "styleforge::generator", %job_id, "workflow submitted");

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(GeneratorError::Timeout {
                    seconds: self.total_timeout.as_secs(),
                });
            }

            let status = self.poll_status(&job_id).await?;
            match status.status.as_str() {
                "completed" => return self.download(&job_id).await,
                "failed" => {
                    return Err(Self::failed(
                        status.error.unwrap_or_else(|| "unspecified".to_string()),
                    ));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}
