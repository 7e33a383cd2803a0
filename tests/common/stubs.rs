//! Stub collaborators standing in for the VLM and generator services.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use styleforge::gateways::generator::{GeneratorClient, GeneratorError};
use styleforge::gateways::vlm::{VlmClient, VlmError, VlmRequest};
use styleforge::types::CancelFlag;

/// Serves a fixed script of responses, in order. An exhausted script
/// fails with a transport error, which doubles as the error-path stub.
pub struct ScriptedVlm {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// What a stubbed VLM call looked like, for assertions.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub prompt: String,
    pub image_count: usize,
    pub force_json: bool,
}

impl ScriptedVlm {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script for one extraction: profile payload, baseline verdict,
    /// image description.
    pub fn for_extraction(profile_payload: String, verdict: &str, description: &str) -> Self {
        Self::new(vec![
            profile_payload,
            verdict.to_string(),
            description.to_string(),
        ])
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn push_response(&self, response: String) {
        self.responses.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl VlmClient for ScriptedVlm {
    async fn analyze(
        &self,
        request: VlmRequest,
        cancel: &CancelFlag,
    ) -> Result<String, VlmError> {
        if cancel.is_cancelled() {
            return Err(VlmError::Cancelled);
        }
        self.calls.lock().unwrap().push(RecordedCall {
            prompt: request.prompt.clone(),
            image_count: request.images.len(),
            force_json: request.force_json,
        });
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(text) if request.force_json => {
                // Mirror the HTTP gateway's contract: force_json calls
                // hand back validated JSON text.
                let value: Value = serde_json::from_str(&text).map_err(|_| VlmError::Transport {
                    message: "stub response was not JSON".to_string(),
                })?;
                Ok(value.to_string())
            }
            Some(text) => Ok(text),
            None => Err(VlmError::Transport {
                message: "stub script exhausted".to_string(),
            }),
        }
    }
}

/// Configurable generator stub: fixed image bytes, optional latency,
/// optional scripted failure, optional cancellation trigger.
pub struct StubGenerator {
    image: Vec<u8>,
    calls: AtomicUsize,
    fail_from_call: Option<usize>,
    delay: Option<Duration>,
    cancel_on_call: Option<(usize, CancelFlag)>,
}

impl StubGenerator {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            calls: AtomicUsize::new(0),
            fail_from_call: None,
            delay: None,
            cancel_on_call: None,
        }
    }

    /// Fail every call from the `n`-th (1-based) onward.
    pub fn failing_from(mut self, n: usize) -> Self {
        self.fail_from_call = Some(n);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set `flag` when the `n`-th (1-based) call begins, simulating a
    /// user cancelling while a later iteration is in flight.
    pub fn cancelling_on_call(mut self, n: usize, flag: CancelFlag) -> Self {
        self.cancel_on_call = Some((n, flag));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeneratorClient for StubGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _workflow: Option<&Value>,
    ) -> Result<Vec<u8>, GeneratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, flag)) = &self.cancel_on_call {
            if call == *n {
                flag.cancel();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_from_call.is_some_and(|n| call >= n) {
            return Err(GeneratorError::Failed {
                message: format!("stub generator failed on call {call}"),
            });
        }
        Ok(self.image.clone())
    }
}
