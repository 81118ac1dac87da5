//! Caller-visible execution errors.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::attempts::{AttemptRecord, AttemptTracker};

/// The two ways an execution can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    AllBackendsFailed,
    TotalTimeoutExceeded,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::AllBackendsFailed => "AllBackendsFailed",
            FailureKind::TotalTimeoutExceeded => "TotalTimeoutExceeded",
        }
    }
}

/// A failed execution. Both variants carry the attempts made so far.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// Every candidate was attempted or skipped, or a fatal failure stopped the run.
    #[error(
        "all backends failed: {} attempted, {} skipped with open circuit",
        .attempts.attempts_count(),
        .attempts.skipped_backends().len()
    )]
    AllBackendsFailed { attempts: AttemptTracker },

    /// The total deadline ran out.
    #[error("total timeout of {}ms exceeded after {}ms", .budget.as_millis(), .elapsed.as_millis())]
    TotalTimeoutExceeded {
        elapsed: Duration,
        budget: Duration,
        attempts: AttemptTracker,
    },
}

impl ExecutionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecutionError::AllBackendsFailed { .. } => FailureKind::AllBackendsFailed,
            ExecutionError::TotalTimeoutExceeded { .. } => FailureKind::TotalTimeoutExceeded,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == FailureKind::TotalTimeoutExceeded
    }

    pub fn attempts(&self) -> &AttemptTracker {
        match self {
            ExecutionError::AllBackendsFailed { attempts }
            | ExecutionError::TotalTimeoutExceeded { attempts, .. } => attempts,
        }
    }

    pub fn failed_attempts(&self) -> Vec<&AttemptRecord> {
        self.attempts().failed_attempts()
    }

    /// Error class and message of the failure that ended the run, for bookkeeping.
    pub fn cause(&self) -> (String, String) {
        match self.attempts().last_failure() {
            Some(last) if !self.is_timeout() => (
                last.error_class().unwrap_or(self.kind().as_str()).to_string(),
                last.error_message().unwrap_or_default().to_string(),
            ),
            _ => (self.kind().as_str().to_string(), self.to_string()),
        }
    }
}
