//! Backend invocation capability.
//!
//! The engine never builds requests or parses content; it only calls an
//! [`Invoker`] with a backend identifier and the time that backend may use.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attempts::TokenUsage;

/// What a backend returned on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    /// Opaque response body, handed back to the caller untouched.
    pub body: serde_json::Value,
    pub usage: TokenUsage,
    /// Cost reported by the backend itself, if any.
    pub cost: Option<f64>,
}

impl RawResponse {
    pub fn new(body: serde_json::Value, usage: TokenUsage) -> Self {
        Self {
            body,
            usage,
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Raw failure categories an invoker can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeErrorKind {
    /// The call did not finish within the time it was given.
    DeadlineExceeded,
    RateLimited,
    /// Non-success HTTP status not covered by a more specific kind.
    Status(u16),
    /// Connection, DNS or I/O failure.
    Transport,
    InvalidRequest,
    PolicyViolation,
    BudgetExceeded,
    /// Backend answered but the response could not be read.
    Decode,
}

impl InvokeErrorKind {
    /// Stable class name recorded on attempt records.
    pub fn class_name(self) -> &'static str {
        match self {
            InvokeErrorKind::DeadlineExceeded => "DeadlineExceeded",
            InvokeErrorKind::RateLimited => "RateLimited",
            InvokeErrorKind::Status(_) => "HttpStatus",
            InvokeErrorKind::Transport => "Transport",
            InvokeErrorKind::InvalidRequest => "InvalidRequest",
            InvokeErrorKind::PolicyViolation => "PolicyViolation",
            InvokeErrorKind::BudgetExceeded => "BudgetExceeded",
            InvokeErrorKind::Decode => "Decode",
        }
    }
}

impl std::fmt::Display for InvokeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvokeErrorKind::Status(code) => write!(f, "HTTP {}", code),
            other => f.write_str(other.class_name()),
        }
    }
}

/// A failed backend call.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct InvokeError {
    kind: InvokeErrorKind,
    message: String,
    usage: TokenUsage,
}

impl InvokeError {
    pub fn new(kind: InvokeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            usage: TokenUsage::default(),
        }
    }

    /// Tokens the backend consumed before failing.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn deadline_exceeded(after: Duration) -> Self {
        Self::new(
            InvokeErrorKind::DeadlineExceeded,
            format!("no response after {}ms", after.as_millis()),
        )
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(InvokeErrorKind::RateLimited, message)
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::new(InvokeErrorKind::Status(code), message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(InvokeErrorKind::Transport, message)
    }

    pub fn kind(&self) -> InvokeErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }
}

/// Performs one backend call.
///
/// `remaining` is the upper bound the call may take. Implementations should
/// stop on their own and return [`InvokeErrorKind::DeadlineExceeded`]; the
/// executor also drops the returned future once the total budget expires.
pub trait Invoker: Send + Sync {
    fn invoke(
        &self,
        backend: &str,
        remaining: Duration,
    ) -> impl Future<Output = Result<RawResponse, InvokeError>> + Send;
}

impl<F, Fut> Invoker for F
where
    F: Fn(String, Duration) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RawResponse, InvokeError>> + Send,
{
    fn invoke(
        &self,
        backend: &str,
        remaining: Duration,
    ) -> impl Future<Output = Result<RawResponse, InvokeError>> + Send {
        self(backend.to_string(), remaining)
    }
}
