//! The narrow interface through which the Stage Runner talks to a remote
//! language model provider.
//!
//! Generalises the teacher's `pipeline/llm.rs::process_page` (per-page VLM
//! call, retry loop with exponential backoff) from one image-in/markdown-out
//! call to one prompt-in/typed-JSON-out call, and mirrors the narrow
//! single-method shape of `edgequake_llm::LLMProvider` without depending on
//! that crate — this system's provider surface has no notion of images or
//! chat history, just a system/user prompt pair and an optional schema.

use crate::error::ModelClientError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// A single structured-generation call and its result.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Generate text (and, if `text_format` is given, a parsed JSON object
    /// matching it) from a system/user prompt pair.
    ///
    /// `text_format`, when present, is a JSON Schema describing the expected
    /// shape; the implementation is responsible for instructing the
    /// provider to emit matching JSON and for validating the result before
    /// returning `parsed`.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ModelClientError>;
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_output_tokens: u32,
    pub effort_level: Option<String>,
    pub text_format: Option<Value>,
}

/// Raw response from [`ModelClient::generate`]. Stage code converts the raw
/// `parsed` value into one of the typed schemas in [`crate::schemas`] and
/// reports a `llm_invalid_json` [`crate::error::StageError`] on mismatch.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: Option<u64>,
    pub finish_reason: String,
    pub parsed: Option<Value>,
    /// Parsed from the provider's rate-limit header (case-insensitive
    /// lookup of e.g. `x-ratelimit-remaining-tokens`), feeding the Stage
    /// Runner's backoff check.
    pub remaining_tokens: Option<u64>,
    pub duration_seconds: f64,
}

impl GenerateResponse {
    /// Deserialize `parsed` into `T`, mapping a missing/malformed payload to
    /// [`ModelClientError::SchemaMismatch`].
    pub fn parsed_as<T: DeserializeOwned>(&self) -> Result<T, ModelClientError> {
        let value = self
            .parsed
            .clone()
            .ok_or_else(|| ModelClientError::SchemaMismatch("no structured output returned".into()))?;
        serde_json::from_value(value).map_err(|e| ModelClientError::SchemaMismatch(e.to_string()))
    }
}

/// An HTTP-backed [`ModelClient`] speaking a generic bearer-token JSON API:
/// POST `{base_url}/responses` with `{ model, input, max_output_tokens,
/// text, reasoning }`, matching the shape of an OpenAI-style Responses API.
/// Retries transient failures with the teacher's backoff formula
/// (`retry_backoff_ms * 2^(attempt-1)`).
pub struct HttpModelClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl HttpModelClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            max_retries: 2,
            retry_backoff_ms: 500,
            timeout_secs: 120,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }

    fn parse_remaining_tokens(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        headers.iter().find_map(|(name, value)| {
            if name.as_str().to_ascii_lowercase().contains("ratelimit-remaining-tokens") {
                value.to_str().ok()?.parse::<u64>().ok()
            } else {
                None
            }
        })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ModelClientError> {
        let body = serde_json::json!({
            "model": self.model,
            "system": request.system_prompt,
            "input": request.user_prompt,
            "max_output_tokens": request.max_output_tokens,
            "reasoning": request.effort_level.as_ref().map(|e| serde_json::json!({"effort": e})),
            "text": request.text_format.as_ref().map(|schema| serde_json::json!({"format": schema})),
        });

        let started = std::time::Instant::now();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let mut req = self.client.post(format!("{}/responses", self.base_url)).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let remaining_tokens = Self::parse_remaining_tokens(resp.headers());
                    if !status.is_success() {
                        last_err = Some(ModelClientError::RequestFailed(format!(
                            "provider returned HTTP {status}"
                        )));
                        continue;
                    }
                    let payload: Value = resp
                        .json()
                        .await
                        .map_err(|e| ModelClientError::RequestFailed(e.to_string()))?;
                    return Self::parse_response(payload, remaining_tokens, started.elapsed());
                }
                Err(e) if e.is_timeout() => {
                    return Err(ModelClientError::Timeout(self.timeout_secs));
                }
                Err(e) => {
                    warn!("model client attempt {} failed: {}", attempt, e);
                    last_err = Some(ModelClientError::RequestFailed(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or(ModelClientError::RequestFailed("exhausted retries".into())))
    }
}

impl HttpModelClient {
    fn parse_response(
        payload: Value,
        remaining_tokens: Option<u64>,
        elapsed: Duration,
    ) -> Result<GenerateResponse, ModelClientError> {
        let text = payload
            .get("output_text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let parsed = payload.get("parsed").cloned();

        if text.is_empty() && parsed.is_none() {
            return Err(ModelClientError::EmptyOutput);
        }

        Ok(GenerateResponse {
            text,
            model: payload
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            input_tokens: payload
                .get("usage")
                .and_then(|u| u.get("input_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: payload
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            reasoning_tokens: payload
                .get("usage")
                .and_then(|u| u.get("reasoning_tokens"))
                .and_then(Value::as_u64),
            finish_reason: payload
                .get("finish_reason")
                .and_then(Value::as_str)
                .unwrap_or("stop")
                .to_string(),
            parsed,
            remaining_tokens,
            duration_seconds: elapsed.as_secs_f64(),
        })
    }
}
