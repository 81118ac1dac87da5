//! HTTP backend adapter.
//!
//! # Responsibilities
//! - POST an opaque JSON payload to the configured backend URL
//! - Bound each call by the remaining budget and the backend's own cap
//! - Map transport and status failures onto [`InvokeErrorKind`]
//! - Read token usage from OpenAI- or Anthropic-style `usage` blocks
//!
//! # Design Decisions
//! - The payload is built by the caller and passed through untouched
//! - Failure bodies are kept as the error message and truncated later

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::attempts::TokenUsage;
use crate::config::BackendConfig;
use crate::execution::{InvokeError, InvokeErrorKind, Invoker, RawResponse};

/// Error codes some providers return with 400 for moderation refusals.
const POLICY_CODES: &[&str] = &["content_filter", "content_policy_violation"];

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    api_key: Option<String>,
    request_timeout: Option<Duration>,
}

/// [`Invoker`] that calls backends over HTTP.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
    endpoints: HashMap<String, Endpoint>,
    payload: Value,
}

impl HttpInvoker {
    /// Resolve endpoints and bearer tokens for `backends`. Tokens are read
    /// from the environment once, here.
    pub fn new(backends: &[BackendConfig], payload: Value) -> Self {
        let endpoints = backends
            .iter()
            .map(|b| {
                let api_key = b.api_key_env.as_ref().and_then(|var| match std::env::var(var) {
                    Ok(key) => Some(key),
                    Err(_) => {
                        tracing::warn!(backend = %b.id, env = %var, "API key variable not set");
                        None
                    }
                });
                let endpoint = Endpoint {
                    url: b.url.clone(),
                    api_key,
                    request_timeout: b.request_timeout_ms.map(Duration::from_millis),
                };
                (b.id.clone(), endpoint)
            })
            .collect();
        Self {
            client: reqwest::Client::new(),
            endpoints,
            payload,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    async fn call(&self, endpoint: &Endpoint, timeout: Duration) -> Result<RawResponse, InvokeError> {
        let mut request = self
            .client
            .post(&endpoint.url)
            .timeout(timeout)
            .json(&self.payload);
        if let Some(key) = &endpoint.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let status = response.status();

        if status.is_success() {
            let body: Value = response.json().await.map_err(|e| {
                if e.is_timeout() {
                    InvokeError::deadline_exceeded(timeout)
                } else {
                    InvokeError::new(InvokeErrorKind::Decode, e.to_string())
                }
            })?;
            let usage = parse_usage(&body);
            let mut raw = RawResponse::new(body, usage);
            if let Some(cost) = raw.body.pointer("/usage/cost").and_then(Value::as_f64) {
                raw = raw.with_cost(cost);
            }
            return Ok(raw);
        }

        let text = response.text().await.unwrap_or_default();
        Err(error_for_status(status.as_u16(), &text))
    }
}

impl Invoker for HttpInvoker {
    async fn invoke(&self, backend: &str, remaining: Duration) -> Result<RawResponse, InvokeError> {
        let Some(endpoint) = self.endpoints.get(backend) else {
            return Err(InvokeError::transport(format!(
                "no endpoint configured for backend '{}'",
                backend
            )));
        };

        let timeout = endpoint
            .request_timeout
            .map_or(remaining, |cap| cap.min(remaining));
        if timeout.is_zero() {
            return Err(InvokeError::deadline_exceeded(timeout));
        }

        tracing::debug!(
            backend = %backend,
            url = %endpoint.url,
            timeout_ms = timeout.as_millis() as u64,
            "Sending backend request"
        );
        self.call(endpoint, timeout).await
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> InvokeError {
    if e.is_timeout() {
        InvokeError::deadline_exceeded(timeout)
    } else {
        InvokeError::transport(e.to_string())
    }
}

/// Map a non-success response onto an invocation error.
pub fn error_for_status(status: u16, body: &str) -> InvokeError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let usage = parsed.as_ref().map(parse_usage).unwrap_or_default();
    let code = parsed.as_ref().and_then(|v| {
        v.pointer("/error/code")
            .or_else(|| v.pointer("/error/type"))
            .and_then(Value::as_str)
    });
    let message = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        body.to_string()
    };

    let kind = match status {
        429 => InvokeErrorKind::RateLimited,
        402 => InvokeErrorKind::BudgetExceeded,
        403 => InvokeErrorKind::PolicyViolation,
        400 | 422 if code.is_some_and(|c| POLICY_CODES.contains(&c)) => {
            InvokeErrorKind::PolicyViolation
        }
        400 | 422 => InvokeErrorKind::InvalidRequest,
        other => InvokeErrorKind::Status(other),
    };
    InvokeError::new(kind, message).with_usage(usage)
}

/// Read token counts from a response body's `usage` block.
pub fn parse_usage(body: &Value) -> TokenUsage {
    let Some(usage) = body.get("usage") else {
        return TokenUsage::default();
    };
    let field = |key: &str| usage.get(key).and_then(Value::as_u64);

    let input = field("prompt_tokens").or_else(|| field("input_tokens"));
    let output = field("completion_tokens").or_else(|| field("output_tokens"));
    let cached = usage
        .pointer("/prompt_tokens_details/cached_tokens")
        .and_then(Value::as_u64)
        .or_else(|| field("cache_read_input_tokens"));

    TokenUsage::new(input.unwrap_or(0), output.unwrap_or(0)).with_cached(cached.unwrap_or(0))
}
