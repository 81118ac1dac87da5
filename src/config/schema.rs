//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the failover engine.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the failover engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FailoverConfig {
    /// Candidate list and total deadline.
    pub execution: ExecutionConfig,

    /// Per-backend circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Tracking-record persistence.
    pub tracking: TrackingConfig,

    /// Backend definitions (only needed by the HTTP invoker).
    pub backends: Vec<BackendConfig>,
}

impl FailoverConfig {
    /// Find a backend definition by identifier.
    pub fn backend(&self, id: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// Pricing for a backend, if one is configured.
    pub fn pricing(&self, id: &str) -> Option<Pricing> {
        self.backend(id).and_then(|b| b.pricing)
    }
}

/// Execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Ordered candidate backends: primary first, then fallbacks.
    pub candidates: Vec<String>,

    /// Wall-clock ceiling across all attempts, in milliseconds.
    pub total_timeout_ms: u64,

    /// Attempt error messages longer than this are truncated.
    pub max_error_message_len: usize,
}

impl ExecutionConfig {
    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            total_timeout_ms: 60_000,
            max_error_message_len: 1_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls before allowing a trial, in seconds.
    pub cooldown_secs: u64,

    /// Failures older than this window stop counting (None = no window).
    pub window_secs: Option<u64>,
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn window(&self) -> Option<Duration> {
        self.window_secs.map(Duration::from_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
            window_secs: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the pretty format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Tracking store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TrackingConfig {
    /// JSON file the in-memory store is loaded from and saved to.
    pub persistence_path: Option<String>,
}

/// Backend definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier, as referenced by `execution.candidates`.
    pub id: String,

    /// Completion endpoint URL.
    pub url: String,

    /// Environment variable holding the bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Per-call cap applied on top of the remaining total budget.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Token prices used when the backend does not report cost.
    #[serde(default)]
    pub pricing: Option<Pricing>,
}

/// Token prices in currency units per million tokens.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cached_per_million: f64,
}

impl Pricing {
    /// Estimate the cost of one call from its token counts.
    pub fn cost(&self, input: u64, output: u64, cached: u64) -> f64 {
        (input as f64 * self.input_per_million
            + output as f64 * self.output_per_million
            + cached as f64 * self.cached_per_million)
            / 1_000_000.0
    }
}
