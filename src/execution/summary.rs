//! Flat, serializable view of a finished execution.

use serde::Serialize;

use crate::attempts::{AttemptRecord, AttemptTracker, TokenUsage};
use crate::error::{ExecutionError, FailureKind};
use crate::execution::executor::ExecutionOutcome;

/// What a caller or operator sees once an execution is done.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub success: bool,
    pub chosen_backend: Option<String>,
    pub attempts_count: usize,
    pub used_fallback: bool,
    pub usage: TokenUsage,
    pub cost: f64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub failed_attempts: Vec<AttemptRecord>,
    pub skipped_backends: Vec<String>,
}

impl ExecutionSummary {
    pub fn from_result(result: &Result<ExecutionOutcome, ExecutionError>) -> Self {
        match result {
            Ok(outcome) => Self::build(outcome.attempts(), None, None, outcome.elapsed().as_millis() as u64),
            Err(err) => {
                let duration_ms = match err {
                    ExecutionError::TotalTimeoutExceeded { elapsed, .. } => elapsed.as_millis() as u64,
                    ExecutionError::AllBackendsFailed { attempts } => {
                        attempts.attempts().iter().map(|a| a.duration_ms()).sum()
                    }
                };
                Self::build(err.attempts(), Some(err.kind()), Some(err.to_string()), duration_ms)
            }
        }
    }

    fn build(
        tracker: &AttemptTracker,
        failure: Option<FailureKind>,
        error: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: failure.is_none(),
            chosen_backend: tracker.chosen_backend().map(str::to_string),
            attempts_count: tracker.attempts_count(),
            used_fallback: tracker.used_fallback(),
            usage: tracker.usage(),
            cost: tracker.total_cost(),
            duration_ms,
            failure,
            error,
            failed_attempts: tracker.failed_attempts().into_iter().cloned().collect(),
            skipped_backends: tracker.skipped_backends().to_vec(),
        }
    }
}
