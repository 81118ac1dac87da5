//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (candidates reference defined backends)
//! - Validate value ranges (timeouts > 0, thresholds > 0, prices >= 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FailoverConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::FailoverConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("execution.candidates must not be empty")]
    NoCandidates,

    #[error("candidate '{0}' is listed more than once")]
    DuplicateCandidate(String),

    #[error("candidate '{0}' has no [[backends]] entry")]
    UnknownCandidate(String),

    #[error("execution.total_timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("execution.max_error_message_len must be at least 3")]
    MessageLimitTooSmall,

    #[error("circuit_breaker.failure_threshold must be at least 1")]
    ZeroThreshold,

    #[error("circuit_breaker.cooldown_secs must be greater than zero")]
    ZeroCooldown,

    #[error("backend '{0}' is defined more than once")]
    DuplicateBackend(String),

    #[error("backend '{id}' has an invalid url '{url}'")]
    InvalidUrl { id: String, url: String },

    #[error("backend '{0}' has a negative price")]
    NegativePrice(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &FailoverConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let execution = &config.execution;
    if execution.candidates.is_empty() {
        errors.push(ValidationError::NoCandidates);
    }

    let mut seen = HashSet::new();
    for candidate in &execution.candidates {
        if !seen.insert(candidate.as_str()) {
            errors.push(ValidationError::DuplicateCandidate(candidate.clone()));
        }
    }

    if execution.total_timeout_ms == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }
    if execution.max_error_message_len < 3 {
        errors.push(ValidationError::MessageLimitTooSmall);
    }
    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::ZeroThreshold);
    }
    if config.circuit_breaker.cooldown_secs == 0 {
        errors.push(ValidationError::ZeroCooldown);
    }

    let mut backend_ids = HashSet::new();
    for backend in &config.backends {
        if !backend_ids.insert(backend.id.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.id.clone()));
        }
        if Url::parse(&backend.url).is_err() {
            errors.push(ValidationError::InvalidUrl {
                id: backend.id.clone(),
                url: backend.url.clone(),
            });
        }
        if let Some(p) = backend.pricing {
            if p.input_per_million < 0.0 || p.output_per_million < 0.0 || p.cached_per_million < 0.0 {
                errors.push(ValidationError::NegativePrice(backend.id.clone()));
            }
        }
    }

    // Library callers may inject their own invoker and skip the backend table.
    if !config.backends.is_empty() {
        for candidate in &execution.candidates {
            if !backend_ids.contains(candidate.as_str()) {
                errors.push(ValidationError::UnknownCandidate(candidate.clone()));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
