//! Completion state machine tests: fallback scenarios, deadline handling and
//! exactly-once finalization under bookkeeping failures.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use llm_failover::attempts::{OutcomeKind, TokenUsage};
use llm_failover::execution::{InvokeError, InvokeErrorKind, RawResponse, ReliabilityExecutor};
use llm_failover::resilience::{CircuitBreakerStore, InMemoryCircuitBreakerStore};
use llm_failover::routing::FallbackPlanner;
use llm_failover::tracking::{
    Completion, CompletionStateMachine, ExecutionTrackingRecord, Finalization, InMemoryTrackingStore,
    NewTrackingRecord, RecordId, StoreError, TrackingStatus, TrackingStore,
};
use llm_failover::{ExecutionError, FailureKind};

mod common;

use common::{breaker_config, ids};

/// Store wrapper whose writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryTrackingStore,
    fail_create: AtomicBool,
    /// Number of upcoming conditional updates to reject.
    conditional_failures: AtomicU32,
    conditional_calls: AtomicU32,
}

impl FlakyStore {
    fn only_record(&self) -> ExecutionTrackingRecord {
        let records = self.inner.records();
        assert_eq!(records.len(), 1);
        records.into_iter().next().unwrap()
    }
}

impl TrackingStore for FlakyStore {
    async fn create(&self, fields: NewTrackingRecord) -> Result<RecordId, StoreError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("create rejected".into()));
        }
        self.inner.create(fields).await
    }

    async fn update_if_running(
        &self,
        id: RecordId,
        update: &Finalization,
    ) -> Result<bool, StoreError> {
        self.conditional_calls.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .conditional_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(StoreError::Unavailable("conditional update rejected".into()));
        }
        self.inner.update_if_running(id, update).await
    }

    async fn update(&self, id: RecordId, update: &Finalization) -> Result<(), StoreError> {
        self.inner.update(id, update).await
    }
}

fn engine(
    store: Arc<FlakyStore>,
    total_timeout: Duration,
) -> (CompletionStateMachine<FlakyStore>, Arc<InMemoryCircuitBreakerStore>) {
    let breakers = Arc::new(InMemoryCircuitBreakerStore::new(breaker_config(3, 30)));
    let executor = ReliabilityExecutor::new(FallbackPlanner::new(breakers.clone()), total_timeout);
    (CompletionStateMachine::new(store, executor), breakers)
}

fn ok(backend: &str, usage: TokenUsage) -> Result<RawResponse, InvokeError> {
    Ok(RawResponse::new(serde_json::json!({ "backend": backend }), usage))
}

/// X fails with 503 after consuming tokens, everything else succeeds.
async fn x_fails(backend: String, _remaining: Duration) -> Result<RawResponse, InvokeError> {
    if backend == "X" {
        Err(InvokeError::status(503, "overloaded").with_usage(TokenUsage::new(40, 0)))
    } else {
        ok(&backend, TokenUsage::new(50, 10))
    }
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_falls_back() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _) = engine(store.clone(), Duration::from_secs(30));

    let run = engine.run_tracked(&ids(&["X", "Y"]), &x_fails).await;
    assert_eq!(run.completion, Completion::Finalized(TrackingStatus::Success));

    let outcome = run.result.unwrap();
    assert_eq!(outcome.backend(), "Y");
    assert_eq!(outcome.attempts().attempts_count(), 2);
    assert!(outcome.attempts().used_fallback());

    let record = store.only_record();
    assert_eq!(record.status, TrackingStatus::Success);
    assert_eq!(record.aggregates.attempts_count, 2);
    assert!(record.aggregates.used_fallback);
    assert_eq!(record.aggregates.usage, TokenUsage::new(90, 10));
    assert!(record.error_class.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failure_ends_run() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _) = engine(store.clone(), Duration::from_secs(30));
    let invoker = |_backend: String, _remaining: Duration| async move {
        Err::<RawResponse, _>(InvokeError::new(InvokeErrorKind::InvalidRequest, "missing messages"))
    };

    let err = engine.run(&ids(&["X"]), &invoker).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::AllBackendsFailed);
    assert_eq!(err.attempts().attempts_count(), 1);
    assert_eq!(err.attempts().attempts()[0].outcome(), OutcomeKind::Fatal);

    let record = store.only_record();
    assert_eq!(record.status, TrackingStatus::Error);
    assert_eq!(record.error_class.as_deref(), Some("InvalidRequest"));
    assert_eq!(record.error_message.as_deref(), Some("missing messages"));
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_is_skipped() {
    let store = Arc::new(FlakyStore::default());
    let (engine, breakers) = engine(store.clone(), Duration::from_secs(30));
    for _ in 0..3 {
        breakers.record_failure("X");
    }
    let calls = Arc::new(AtomicU32::new(0));
    let invoker = {
        let calls = calls.clone();
        move |backend: String, _remaining: Duration| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { ok(&backend, TokenUsage::default()) }
        }
    };

    let outcome = engine.run(&ids(&["X", "Y"]), &invoker).await.unwrap();
    assert_eq!(outcome.attempts().attempts_count(), 1);
    assert!(outcome.attempts().attempts().iter().all(|a| a.backend() != "X"));
    assert_eq!(outcome.attempts().skipped_backends(), ["X".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let record = store.only_record();
    assert_eq!(record.aggregates.skipped_backends, vec!["X".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_total_timeout_cancels_call() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _) = engine(store.clone(), Duration::from_secs(5));
    let finished = Arc::new(AtomicBool::new(false));
    let invoker = {
        let finished = finished.clone();
        move |backend: String, _remaining: Duration| {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(6)).await;
                finished.store(true, Ordering::SeqCst);
                ok(&backend, TokenUsage::default())
            }
        }
    };

    let run = engine.run_tracked(&ids(&["X", "Y"]), &invoker).await;
    assert_eq!(run.completion, Completion::Finalized(TrackingStatus::Timeout));
    match run.result.unwrap_err() {
        ExecutionError::TotalTimeoutExceeded { elapsed, budget, attempts } => {
            assert_eq!(budget, Duration::from_secs(5));
            assert_eq!(elapsed, Duration::from_secs(5));
            assert_eq!(attempts.attempts_count(), 1);
            assert_eq!(attempts.attempts()[0].outcome(), OutcomeKind::Timeout);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // the in-flight call was dropped, not awaited
    assert!(!finished.load(Ordering::SeqCst));

    let record = store.only_record();
    assert_eq!(record.status, TrackingStatus::Timeout);
    assert_eq!(record.duration_ms, Some(5_000));
}

#[tokio::test(start_paused = true)]
async fn test_success_finalize_failure_takes_emergency_path() {
    let store = Arc::new(FlakyStore::default());
    store.conditional_failures.store(1, Ordering::SeqCst);
    let (engine, _) = engine(store.clone(), Duration::from_secs(30));

    let run = engine.run_tracked(&ids(&["X", "Y"]), &x_fails).await;
    // the business call succeeded and stays successful
    assert!(run.result.is_ok());
    assert_eq!(run.completion, Completion::Emergency { applied: true });
    // the rejected finalize, then the emergency update
    assert_eq!(store.conditional_calls.load(Ordering::SeqCst), 2);

    let record = store.only_record();
    assert_eq!(record.status, TrackingStatus::Error);
    assert_eq!(record.error_class.as_deref(), Some("TrackingStoreError"));

    // a later finalize attempt is a no-op
    let again = Finalization::emergency("Late", "late", Duration::ZERO);
    assert!(!store.update_if_running(record.id, &again).await.unwrap());
    assert_eq!(store.only_record().error_class.as_deref(), Some("TrackingStoreError"));
}

#[tokio::test(start_paused = true)]
async fn test_failure_finalize_fails_keeps_original_error() {
    let store = Arc::new(FlakyStore::default());
    store.conditional_failures.store(1, Ordering::SeqCst);
    let (engine, _) = engine(store.clone(), Duration::from_secs(30));

    let run = engine.run_tracked(&ids(&["X"]), &x_fails).await;
    let err = run.result.unwrap_err();
    assert_eq!(err.kind(), FailureKind::AllBackendsFailed);
    assert_eq!(run.completion, Completion::Emergency { applied: true });

    let record = store.only_record();
    assert_eq!(record.status, TrackingStatus::Error);
    assert_eq!(record.error_class.as_deref(), Some("HttpStatus"));
    assert_eq!(record.error_message.as_deref(), Some("overloaded"));
}

#[tokio::test(start_paused = true)]
async fn test_every_write_failing_never_reaches_caller() {
    let store = Arc::new(FlakyStore::default());
    store.conditional_failures.store(u32::MAX, Ordering::SeqCst);
    let (engine, _) = engine(store.clone(), Duration::from_secs(30));

    let run = engine.run_tracked(&ids(&["X", "Y"]), &x_fails).await;
    assert_eq!(run.result.unwrap().backend(), "Y");
    assert_eq!(run.completion, Completion::Emergency { applied: false });
}

#[tokio::test(start_paused = true)]
async fn test_create_failure_runs_untracked() {
    let store = Arc::new(FlakyStore::default());
    store.fail_create.store(true, Ordering::SeqCst);
    let (engine, _) = engine(store.clone(), Duration::from_secs(30));

    let run = engine.run_tracked(&ids(&["X", "Y"]), &x_fails).await;
    assert!(run.result.is_ok());
    assert!(run.record_id.is_none());
    assert_eq!(run.completion, Completion::Untracked);
    assert!(store.inner.is_empty());
    assert_eq!(store.conditional_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_execution_is_finalized() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _) = engine(store.clone(), Duration::from_secs(60));
    let invoker = |backend: String, _remaining: Duration| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        ok(&backend, TokenUsage::default())
    };

    let candidates = ids(&["X"]);
    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), engine.run(&candidates, &invoker)).await;
    assert!(abandoned.is_err());

    // let the spawned emergency update run
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let record = store.only_record();
    assert_eq!(record.status, TrackingStatus::Error);
    assert_eq!(record.error_class.as_deref(), Some("MissingError"));
    assert!(record
        .error_message
        .as_deref()
        .unwrap_or_default()
        .starts_with("execution ended without a recorded error"));
    assert_eq!(record.duration_ms, Some(1_000));
}

#[tokio::test(start_paused = true)]
async fn test_attempts_bounded_by_candidates() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _) = engine(store.clone(), Duration::from_secs(30));
    let calls = Arc::new(AtomicU32::new(0));
    let invoker = {
        let calls = calls.clone();
        move |_backend: String, _remaining: Duration| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<RawResponse, _>(InvokeError::transport("connection reset")) }
        }
    };

    let err = engine
        .run(&ids(&["A", "B", "A", "C", "B"]), &invoker)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::AllBackendsFailed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let backends: Vec<&str> = err.attempts().attempts().iter().map(|a| a.backend()).collect();
    assert_eq!(backends, vec!["A", "B", "C"]);
    let sequences: Vec<u32> = err.attempts().attempts().iter().map(|a| a.sequence()).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_no_attempt_starts_after_deadline() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _) = engine(store.clone(), Duration::from_secs(5));
    let invoker = |_backend: String, _remaining: Duration| async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Err::<RawResponse, _>(InvokeError::status(502, "bad gateway"))
    };

    let err = engine
        .run(&ids(&["A", "B", "C", "D", "E"]), &invoker)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    // attempts start at 0s, 2s and 4s; the third is cut at 5s
    let attempts = err.attempts().attempts();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[2].outcome(), OutcomeKind::Timeout);
    assert_eq!(attempts[2].duration_ms(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_aggregates_include_failed_attempts() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _) = engine(store.clone(), Duration::from_secs(30));
    let invoker = |backend: String, _remaining: Duration| async move {
        match backend.as_str() {
            "A" => Err(InvokeError::rate_limited("quota").with_usage(TokenUsage::new(5, 0).with_cached(2))),
            "B" => Err(InvokeError::status(500, "boom").with_usage(TokenUsage::new(7, 1))),
            _ => Ok(RawResponse::new(serde_json::Value::Null, TokenUsage::new(11, 3)).with_cost(0.25)),
        }
    };

    let outcome = engine.run(&ids(&["A", "B", "C"]), &invoker).await.unwrap();
    let tracker = outcome.attempts();
    assert_eq!(tracker.usage(), TokenUsage::new(23, 4).with_cached(2));
    assert!((tracker.total_cost() - 0.25).abs() < 1e-9);
    assert_eq!(tracker.failed_attempts().len(), 2);
    assert_eq!(tracker.chosen_backend(), Some("C"));

    let record = store.only_record();
    assert_eq!(record.aggregates.usage, tracker.usage());
    assert_eq!(record.aggregates.failed_attempts.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_finalize_leaves_terminal_record_alone() {
    let store = Arc::new(FlakyStore::default());
    let (engine, _) = engine(store.clone(), Duration::from_secs(30));
    // another finalizer closes the record while the call is in flight
    let invoker = {
        let store = store.clone();
        move |backend: String, _remaining: Duration| {
            let store = store.clone();
            async move {
                let id = store.only_record().id;
                let external = Finalization::emergency("Cancelled", "closed elsewhere", Duration::ZERO);
                assert!(store.inner.update_if_running(id, &external).await.unwrap());
                ok(&backend, TokenUsage::new(3, 1))
            }
        }
    };

    let run = engine.run_tracked(&ids(&["X"]), &invoker).await;
    assert!(run.result.is_ok());
    assert_eq!(run.completion, Completion::AlreadyFinalized);

    let record = store.only_record();
    assert_eq!(record.status, TrackingStatus::Error);
    assert_eq!(record.error_class.as_deref(), Some("Cancelled"));
    assert_eq!(record.aggregates.attempts_count, 0);
}
