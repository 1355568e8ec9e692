//! Inference client for a local Ollama-compatible model server.
//!
//! The only blocking stage of a run. Failure policy:
//! - connection refused / unreachable: fail fast, no retry
//! - timeout: one retry with the same prompt, then [`TriageError::InferenceTimeout`]
//! - non-2xx status: [`TriageError::InferenceProtocol`] with status and body
//!
//! Streaming is disabled so text is all-or-nothing.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Result, TriageError};
use crate::obs;

/// Default local Ollama endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
/// Default model name.
pub const DEFAULT_MODEL: &str = "llama3.2";
/// Default per-attempt timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default ceiling on prompt size, in characters.
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 32_000;

/// Retries allowed after a timed-out attempt.
const TIMEOUT_RETRIES: u32 = 1;

/// Options sent with every completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// A prompt plus the options to run it with.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub prompt: String,
    pub options: InferenceOptions,
}

/// Inference service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// Base URL of the model server.
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
    /// Largest prompt the server is asked to accept.
    pub max_prompt_chars: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        InferenceConfig {
            endpoint: std::env::var("TRIAGE_ENDPOINT")
                .or_else(|_| std::env::var("OLLAMA_HOST"))
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            model: std::env::var("TRIAGE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            timeout_secs: std::env::var("TRIAGE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            temperature: None,
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
        }
    }
}

impl InferenceConfig {
    /// Create a config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Options for a completion request under this config.
    pub fn options(&self) -> InferenceOptions {
        InferenceOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Anything that turns a prompt into text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Human-readable identity used in logs (endpoint, fake name, ...).
    fn describe(&self) -> String;

    /// Run one completion. Resolves only with the full generated text.
    async fn complete(&self, request: &InferenceRequest) -> Result<String>;
}

#[derive(Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

/// How a transport-level failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Service reachable but too slow; retryable once.
    Timeout,
    /// Service not reachable; fail fast.
    Unavailable,
}

/// Classify a transport error. Timeouts win over connect errors.
pub fn classify(err: &reqwest::Error) -> FailureClass {
    if err.is_timeout() {
        FailureClass::Timeout
    } else {
        FailureClass::Unavailable
    }
}

/// Ollama HTTP client.
pub struct OllamaClient {
    endpoint: String,
    http_client: reqwest::Client,
    retry_backoff: Duration,
}

impl OllamaClient {
    /// Create a client for `endpoint` (e.g. `http://localhost:11434`).
    pub fn new(endpoint: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("triage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TriageError::InferenceUnavailable {
                endpoint: endpoint.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(OllamaClient {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http_client,
            retry_backoff: Duration::from_millis(500),
        })
    }

    /// Override the pause before the timeout retry.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn unavailable(&self, err: &reqwest::Error) -> TriageError {
        TriageError::InferenceUnavailable {
            endpoint: self.endpoint.clone(),
            reason: err.to_string(),
        }
    }

    /// List installed models. Used as a fast preflight before collection.
    pub async fn ping(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.endpoint);
        let response = self
            .http_client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.unavailable(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.unavailable(&e))?;
        if !status.is_success() {
            return Err(TriageError::InferenceProtocol {
                status: status.as_u16(),
                body,
            });
        }
        let tags: TagsResponse =
            serde_json::from_str(&body).map_err(|e| TriageError::InferenceProtocol {
                status: status.as_u16(),
                body: format!("unexpected /api/tags body ({e}): {body}"),
            })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn attempt(&self, request: &InferenceRequest) -> std::result::Result<String, AttemptError> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = GenerateRequest {
            model: &request.options.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.options.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .timeout(request.options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        let text = response.text().await.map_err(AttemptError::Transport)?;
        if !status.is_success() {
            return Err(AttemptError::Final(TriageError::InferenceProtocol {
                status: status.as_u16(),
                body: text,
            }));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text).map_err(|e| {
            AttemptError::Final(TriageError::InferenceProtocol {
                status: status.as_u16(),
                body: format!("unexpected /api/generate body ({e}): {text}"),
            })
        })?;
        Ok(parsed.response)
    }
}

enum AttemptError {
    Transport(reqwest::Error),
    Final(TriageError),
}

#[async_trait]
impl CompletionBackend for OllamaClient {
    fn describe(&self) -> String {
        format!("ollama at {}", self.endpoint)
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<String> {
        let max_attempts = 1 + TIMEOUT_RETRIES;
        let mut attempt = 1;
        loop {
            debug!(
                endpoint = %self.endpoint,
                model = %request.options.model,
                attempt,
                prompt_chars = request.prompt.len(),
                "sending completion request"
            );
            match self.attempt(request).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Final(err)) => return Err(err),
                Err(AttemptError::Transport(err)) => match classify(&err) {
                    FailureClass::Unavailable => return Err(self.unavailable(&err)),
                    FailureClass::Timeout if attempt < max_attempts => {
                        obs::emit_inference_retry(attempt, request.options.timeout.as_secs());
                        tokio::time::sleep(self.retry_backoff).await;
                        attempt += 1;
                    }
                    FailureClass::Timeout => {
                        warn!(attempts = attempt, "inference timed out");
                        return Err(TriageError::InferenceTimeout {
                            attempts: attempt,
                            timeout_secs: request.options.timeout.as_secs(),
                        });
                    }
                },
            }
        }
    }
}
