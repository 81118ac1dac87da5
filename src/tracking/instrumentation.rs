//! Exactly-once finalization of tracking records.
//!
//! # State Machine
//! ```text
//!             create ok
//! (start) ───────────────▶ Running ──finalize ok──▶ Finalized(success | error | timeout)
//!    │                        │  │
//!    │ create failed          │  └─already terminal──▶ AlreadyFinalized (no write)
//!    │                        │
//!    │                        │ finalize failed / future dropped
//!    ▼                        ▼
//! Untracked              Emergency (conditional: error only if still running)
//! ```
//!
//! # Design Decisions
//! - `finalized` flips only after the finalize write returned Ok
//! - Both the regular and the emergency update are conditional, so whichever
//!   finalizer runs second is a no-op
//! - Bookkeeping failures are logged, never returned to the caller
//! - A drop guard covers a caller that abandons the future mid-run

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::error::ExecutionError;
use crate::execution::{Classifier, DefaultClassifier, ExecutionOutcome, Invoker, ReliabilityExecutor};
use crate::observability::metrics;
use crate::tracking::record::{Finalization, NewTrackingRecord, RecordId, TrackingStatus};
use crate::tracking::store::TrackingStore;

/// How the tracking record of one execution ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Regular finalize succeeded with this status.
    Finalized(TrackingStatus),
    /// Regular finalize failed; `applied` tells whether the conditional
    /// emergency update changed the record.
    Emergency { applied: bool },
    /// The record was already terminal when the regular finalize ran, so it
    /// was left untouched.
    AlreadyFinalized,
    /// The record could not be created; nothing was tracked.
    Untracked,
}

/// Result of a tracked execution.
#[derive(Debug)]
pub struct TrackedRun {
    pub record_id: Option<RecordId>,
    pub completion: Completion,
    pub result: Result<ExecutionOutcome, ExecutionError>,
}

/// Wraps a [`ReliabilityExecutor`] with tracking-record bookkeeping.
#[derive(Debug)]
pub struct CompletionStateMachine<S, C = DefaultClassifier> {
    store: Arc<S>,
    executor: ReliabilityExecutor<C>,
}

impl<S, C> CompletionStateMachine<S, C>
where
    S: TrackingStore + 'static,
    C: Classifier,
{
    pub fn new(store: Arc<S>, executor: ReliabilityExecutor<C>) -> Self {
        Self { store, executor }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn executor(&self) -> &ReliabilityExecutor<C> {
        &self.executor
    }

    /// Run one execution and return the caller-visible result.
    pub async fn run<I>(
        &self,
        candidates: &[String],
        invoker: &I,
    ) -> Result<ExecutionOutcome, ExecutionError>
    where
        I: Invoker + ?Sized,
    {
        self.run_tracked(candidates, invoker).await.result
    }

    /// Run one execution and also report what happened to its record.
    pub async fn run_tracked<I>(&self, candidates: &[String], invoker: &I) -> TrackedRun
    where
        I: Invoker + ?Sized,
    {
        let started = Instant::now();

        let record_id = match self.store.create(NewTrackingRecord::new(candidates)).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create tracking record, continuing untracked");
                None
            }
        };
        let mut guard = record_id.map(|id| DropGuard::arm(self.store.clone(), id, started));

        let span = match record_id {
            Some(id) => tracing::info_span!("execution", record_id = %id),
            None => tracing::info_span!("execution", record_id = "untracked"),
        };
        let result = self.executor.run(candidates, invoker).instrument(span).await;
        let status = TrackingStatus::of(&result);

        let Some(id) = record_id else {
            record_outcome(status, &result);
            return TrackedRun {
                record_id: None,
                completion: Completion::Untracked,
                result,
            };
        };

        let duration = started.elapsed();
        let finalization = Finalization::from_result(&result, duration);

        let mut finalized = false;
        let mut already_terminal = false;
        let mut origin = None;
        match self.store.update_if_running(id, &finalization).await {
            Ok(true) => finalized = true,
            Ok(false) => already_terminal = true,
            Err(e) => {
                tracing::warn!(record_id = %id, status = %status, error = %e, "Finalize failed");
                origin = Some(match &result {
                    Ok(_) => ("TrackingStoreError".to_string(), e.to_string()),
                    Err(err) => err.cause(),
                });
            }
        }

        let completion = if finalized {
            tracing::debug!(record_id = %id, status = %status, "Tracking record finalized");
            Completion::Finalized(status)
        } else if already_terminal {
            tracing::warn!(record_id = %id, status = %status, "Record already terminal, finalize skipped");
            Completion::AlreadyFinalized
        } else {
            let applied = emergency_finalize(self.store.as_ref(), id, duration, origin).await;
            Completion::Emergency { applied }
        };

        if let Some(guard) = guard.as_mut() {
            guard.disarm();
        }
        record_outcome(status, &result);

        TrackedRun {
            record_id: Some(id),
            completion,
            result,
        }
    }
}

fn record_outcome(status: TrackingStatus, result: &Result<ExecutionOutcome, ExecutionError>) {
    let tracker = match result {
        Ok(outcome) => outcome.attempts(),
        Err(err) => err.attempts(),
    };
    metrics::record_execution(status.as_str(), tracker.chosen_backend(), tracker.total_cost());
}

/// Conditionally mark the record as errored.
///
/// `origin` is the class and message of the failure that led here. Without
/// one, a placeholder carrying the current backtrace is recorded instead.
async fn emergency_finalize<S>(
    store: &S,
    id: RecordId,
    duration: Duration,
    origin: Option<(String, String)>,
) -> bool
where
    S: TrackingStore + ?Sized,
{
    metrics::record_emergency_finalize();
    let (class, message) = origin.unwrap_or_else(|| {
        (
            "MissingError".to_string(),
            format!(
                "execution ended without a recorded error\n{}",
                Backtrace::force_capture()
            ),
        )
    });
    tracing::warn!(record_id = %id, error_class = %class, "Emergency finalize");

    let update = Finalization::emergency(class, message, duration);
    match store.update_if_running(id, &update).await {
        Ok(applied) => {
            if !applied {
                tracing::debug!(record_id = %id, "Record already terminal, emergency update skipped");
            }
            applied
        }
        Err(e) => {
            tracing::error!(record_id = %id, error = %e, "Emergency finalize failed, record may remain running");
            false
        }
    }
}

/// Finalizes the record if the execution future is dropped before it
/// reaches its own finalize.
struct DropGuard<S: TrackingStore + 'static> {
    store: Arc<S>,
    id: RecordId,
    started: Instant,
    armed: bool,
}

impl<S: TrackingStore + 'static> DropGuard<S> {
    fn arm(store: Arc<S>, id: RecordId, started: Instant) -> Self {
        Self {
            store,
            id,
            started,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S: TrackingStore + 'static> Drop for DropGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let id = self.id;
        let duration = self.started.elapsed();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(record_id = %id, "Execution dropped before completion");
                handle.spawn(async move {
                    emergency_finalize(store.as_ref(), id, duration, None).await;
                });
            }
            Err(_) => {
                tracing::error!(record_id = %id, "Execution dropped outside a runtime, record left running");
            }
        }
    }
}
