//! Tracking record schema and the updates applied to it.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attempts::record::{rounded_millis, unix_millis};
use crate::attempts::{AttemptRecord, AttemptTracker, TokenUsage};
use crate::error::ExecutionError;
use crate::execution::ExecutionOutcome;

pub type RecordId = Uuid;

/// Lifecycle status of a tracking record. Only `Running` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Running,
    Success,
    Error,
    Timeout,
}

impl TrackingStatus {
    pub fn is_terminal(self) -> bool {
        self != TrackingStatus::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackingStatus::Running => "running",
            TrackingStatus::Success => "success",
            TrackingStatus::Error => "error",
            TrackingStatus::Timeout => "timeout",
        }
    }

    /// Terminal status for an executor result.
    pub fn of(result: &Result<ExecutionOutcome, ExecutionError>) -> Self {
        match result {
            Ok(_) => TrackingStatus::Success,
            Err(err) if err.is_timeout() => TrackingStatus::Timeout,
            Err(_) => TrackingStatus::Error,
        }
    }
}

impl std::fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields supplied when a record is created.
#[derive(Debug, Clone)]
pub struct NewTrackingRecord {
    pub candidates: Vec<String>,
    pub started_at: u64,
}

impl NewTrackingRecord {
    pub fn new(candidates: &[String]) -> Self {
        Self {
            candidates: candidates.to_vec(),
            started_at: unix_millis(SystemTime::now()),
        }
    }
}

/// Per-backend aggregates copied from an [`AttemptTracker`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    pub chosen_backend: Option<String>,
    pub attempts_count: usize,
    pub used_fallback: bool,
    pub usage: TokenUsage,
    pub cost: f64,
    pub failed_attempts: Vec<AttemptRecord>,
    pub skipped_backends: Vec<String>,
}

impl Aggregates {
    pub fn from_tracker(tracker: &AttemptTracker) -> Self {
        Self {
            chosen_backend: tracker.chosen_backend().map(str::to_string),
            attempts_count: tracker.attempts_count(),
            used_fallback: tracker.used_fallback(),
            usage: tracker.usage(),
            cost: tracker.total_cost(),
            failed_attempts: tracker.failed_attempts().into_iter().cloned().collect(),
            skipped_backends: tracker.skipped_backends().to_vec(),
        }
    }
}

/// A terminal update for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalization {
    pub status: TrackingStatus,
    pub completed_at: u64,
    pub duration_ms: u64,
    /// Absent on emergency updates issued without a tracker.
    pub aggregates: Option<Aggregates>,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
}

impl Finalization {
    /// Regular finalize from the executor's result.
    pub fn from_result(
        result: &Result<ExecutionOutcome, ExecutionError>,
        duration: Duration,
    ) -> Self {
        let status = TrackingStatus::of(result);
        let (aggregates, error_class, error_message) = match result {
            Ok(outcome) => (Aggregates::from_tracker(outcome.attempts()), None, None),
            Err(err) => {
                let (class, message) = err.cause();
                (Aggregates::from_tracker(err.attempts()), Some(class), Some(message))
            }
        };
        Self {
            status,
            completed_at: unix_millis(SystemTime::now()),
            duration_ms: rounded_millis(duration),
            aggregates: Some(aggregates),
            error_class,
            error_message,
        }
    }

    /// Minimal error update used when regular finalization did not complete.
    pub fn emergency(
        error_class: impl Into<String>,
        error_message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            status: TrackingStatus::Error,
            completed_at: unix_millis(SystemTime::now()),
            duration_ms: rounded_millis(duration),
            aggregates: None,
            error_class: Some(error_class.into()),
            error_message: Some(error_message.into()),
        }
    }
}

/// One row per top-level call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrackingRecord {
    pub id: RecordId,
    pub status: TrackingStatus,
    pub candidates: Vec<String>,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub duration_ms: Option<u64>,
    #[serde(flatten)]
    pub aggregates: Aggregates,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
}

impl ExecutionTrackingRecord {
    pub fn running(id: RecordId, fields: NewTrackingRecord) -> Self {
        Self {
            id,
            status: TrackingStatus::Running,
            candidates: fields.candidates,
            started_at: fields.started_at,
            completed_at: None,
            duration_ms: None,
            aggregates: Aggregates::default(),
            error_class: None,
            error_message: None,
        }
    }

    /// Write a terminal update onto this record. Aggregates already on the
    /// record survive an update that carries none.
    pub fn apply(&mut self, update: &Finalization) {
        self.status = update.status;
        self.completed_at = Some(update.completed_at);
        self.duration_ms = Some(update.duration_ms);
        if let Some(aggregates) = &update.aggregates {
            self.aggregates = aggregates.clone();
        }
        self.error_class = update.error_class.clone();
        self.error_message = update.error_message.clone();
    }
}
