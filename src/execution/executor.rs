//! The ordered-attempt fallback loop.
//!
//! # State Machine
//! ```text
//! Planning ──(deadline expired)──────────────▶ Done(TotalTimeoutExceeded)
//!    │ ──(no eligible candidate)────────────▶ Done(AllBackendsFailed)
//!    ▼
//! Invoking ──(budget ran out mid-call)──────▶ Done(TotalTimeoutExceeded)
//!    ▼
//! Classifying
//!    ├─ success ────────────────────────────▶ Done(success)
//!    ├─ retryable / rate-limited / timeout ─▶ Planning (next candidate)
//!    └─ fatal ──────────────────────────────▶ Done(AllBackendsFailed)
//! ```
//!
//! Each candidate gets at most one attempt per execution, so the attempt
//! count is bounded by the candidate list length.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;

use crate::attempts::record::truncate_message;
use crate::attempts::{AttemptRecord, AttemptTiming, AttemptTracker, OutcomeKind, TokenUsage};
use crate::config::{FailoverConfig, Pricing};
use crate::error::ExecutionError;
use crate::execution::invoker::{InvokeError, Invoker, RawResponse};
use crate::execution::outcome::{Classifier, DefaultClassifier};
use crate::observability::metrics;
use crate::resilience::DeadlineBudget;
use crate::routing::{FallbackPlanner, Plan};

/// A successful execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    response: RawResponse,
    backend: String,
    attempts: AttemptTracker,
    elapsed: Duration,
}

impl ExecutionOutcome {
    pub fn response(&self) -> &RawResponse {
        &self.response
    }

    pub fn into_response(self) -> RawResponse {
        self.response
    }

    /// The backend that produced the response.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn attempts(&self) -> &AttemptTracker {
        &self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Runs the fallback loop for one execution at a time; cheap to share.
#[derive(Debug, Clone)]
pub struct ReliabilityExecutor<C = DefaultClassifier> {
    planner: FallbackPlanner,
    classifier: C,
    total_timeout: Duration,
    max_error_message_len: usize,
    pricing: HashMap<String, Pricing>,
}

impl ReliabilityExecutor<DefaultClassifier> {
    pub fn new(planner: FallbackPlanner, total_timeout: Duration) -> Self {
        Self {
            planner,
            classifier: DefaultClassifier,
            total_timeout,
            max_error_message_len: 1_000,
            pricing: HashMap::new(),
        }
    }

    /// Build from configuration, taking deadline, truncation and pricing from it.
    pub fn from_config(config: &FailoverConfig, planner: FallbackPlanner) -> Self {
        let pricing = config
            .backends
            .iter()
            .filter_map(|b| b.pricing.map(|p| (b.id.clone(), p)))
            .collect();
        Self {
            planner,
            classifier: DefaultClassifier,
            total_timeout: config.execution.total_timeout(),
            max_error_message_len: config.execution.max_error_message_len,
            pricing,
        }
    }
}

impl<C: Classifier> ReliabilityExecutor<C> {
    /// Replace the outcome classifier.
    pub fn with_classifier<C2: Classifier>(self, classifier: C2) -> ReliabilityExecutor<C2> {
        ReliabilityExecutor {
            planner: self.planner,
            classifier,
            total_timeout: self.total_timeout,
            max_error_message_len: self.max_error_message_len,
            pricing: self.pricing,
        }
    }

    pub fn with_pricing(mut self, backend: impl Into<String>, pricing: Pricing) -> Self {
        self.pricing.insert(backend.into(), pricing);
        self
    }

    pub fn with_max_error_message_len(mut self, len: usize) -> Self {
        self.max_error_message_len = len;
        self
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    /// Try candidates in order until one succeeds, a fatal failure occurs,
    /// candidates run out, or the total deadline expires.
    pub async fn run<I>(
        &self,
        candidates: &[String],
        invoker: &I,
    ) -> Result<ExecutionOutcome, ExecutionError>
    where
        I: Invoker + ?Sized,
    {
        let budget = DeadlineBudget::start(self.total_timeout);
        let breakers = self.planner.breakers();
        let mut tracker = AttemptTracker::new(candidates);
        let mut considered: HashSet<String> = HashSet::new();

        loop {
            // Planning
            if budget.expired() {
                return Err(self.timed_out(&budget, tracker));
            }

            let step = self.planner.next(candidates, &considered);
            for skipped in step.skipped {
                considered.insert(skipped.clone());
                tracker.note_skipped(skipped);
            }
            let backend = match step.plan {
                Plan::Attempt(backend) => backend,
                Plan::Exhausted => {
                    tracing::warn!(
                        attempts = tracker.attempts_count(),
                        skipped = tracker.skipped_backends().len(),
                        "All candidate backends exhausted"
                    );
                    return Err(ExecutionError::AllBackendsFailed { attempts: tracker });
                }
            };
            considered.insert(backend.clone());

            // Invoking
            let sequence = tracker.next_sequence();
            let remaining = budget.remaining();
            tracing::debug!(
                backend = %backend,
                attempt = sequence,
                remaining_ms = remaining.as_millis() as u64,
                "Invoking backend"
            );

            let started_at = SystemTime::now();
            let clock = Instant::now();
            let result =
                tokio::time::timeout_at(budget.deadline(), invoker.invoke(&backend, remaining))
                    .await;
            let timing = AttemptTiming {
                started_at,
                duration: clock.elapsed(),
            };

            // Classifying
            match result {
                Ok(Ok(response)) => {
                    let cost = response
                        .cost
                        .unwrap_or_else(|| self.estimate_cost(&backend, response.usage));
                    tracker.push(AttemptRecord::success(
                        backend.clone(),
                        sequence,
                        timing,
                        response.usage,
                        cost,
                    ));
                    breakers.record_success(&backend);
                    metrics::record_attempt(&backend, OutcomeKind::Success.as_str(), timing.duration);
                    tracing::info!(
                        backend = %backend,
                        attempt = sequence,
                        duration_ms = timing.duration.as_millis() as u64,
                        "Backend attempt succeeded"
                    );
                    return Ok(ExecutionOutcome {
                        response,
                        backend,
                        attempts: tracker,
                        elapsed: budget.elapsed(),
                    });
                }
                Ok(Err(error)) => {
                    let outcome = match self.classifier.classify(&error) {
                        OutcomeKind::Success => OutcomeKind::Retryable,
                        kind => kind,
                    };
                    self.record_failure(&mut tracker, &backend, sequence, timing, outcome, &error);

                    if outcome.is_fatal() {
                        breakers.release_trial(&backend);
                        tracing::warn!(
                            backend = %backend,
                            attempt = sequence,
                            error = %error,
                            "Fatal failure, not trying further candidates"
                        );
                        return Err(ExecutionError::AllBackendsFailed { attempts: tracker });
                    }

                    breakers.record_failure(&backend);
                    tracing::warn!(
                        backend = %backend,
                        attempt = sequence,
                        outcome = %outcome,
                        error = %error,
                        "Backend attempt failed, advancing to next candidate"
                    );
                }
                Err(_) => {
                    // The invocation future was dropped at the deadline.
                    let error = InvokeError::deadline_exceeded(timing.duration);
                    self.record_failure(
                        &mut tracker,
                        &backend,
                        sequence,
                        timing,
                        OutcomeKind::Timeout,
                        &error,
                    );
                    breakers.record_failure(&backend);
                    tracing::warn!(
                        backend = %backend,
                        attempt = sequence,
                        "Total timeout reached mid-call, attempt cancelled"
                    );
                    return Err(self.timed_out(&budget, tracker));
                }
            }
        }
    }

    fn record_failure(
        &self,
        tracker: &mut AttemptTracker,
        backend: &str,
        sequence: u32,
        timing: AttemptTiming,
        outcome: OutcomeKind,
        error: &InvokeError,
    ) {
        let usage = error.usage();
        tracker.push(AttemptRecord::failure(
            backend,
            sequence,
            timing,
            outcome,
            usage,
            self.estimate_cost(backend, usage),
            error.class_name(),
            truncate_message(error.message(), self.max_error_message_len),
        ));
        metrics::record_attempt(backend, outcome.as_str(), timing.duration);
    }

    fn estimate_cost(&self, backend: &str, usage: TokenUsage) -> f64 {
        self.pricing.get(backend).map_or(0.0, |p| {
            p.cost(usage.input_tokens, usage.output_tokens, usage.cached_tokens)
        })
    }

    fn timed_out(&self, budget: &DeadlineBudget, attempts: AttemptTracker) -> ExecutionError {
        let elapsed = budget.elapsed();
        tracing::warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            budget_ms = budget.total().as_millis() as u64,
            attempts = attempts.attempts_count(),
            "Total timeout exceeded"
        );
        ExecutionError::TotalTimeoutExceeded {
            elapsed,
            budget: budget.total(),
            attempts,
        }
    }
}
