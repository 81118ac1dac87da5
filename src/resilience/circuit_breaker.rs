//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, attempts pass through
//! - Open: backend assumed down, planning skips it
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold (within window, if configured)
//! Open → Half-Open: after cool-down elapses
//! Half-Open → Closed: trial attempt succeeds
//! Half-Open → Open: trial attempt fails
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global), shared process-wide
//! - Transitions happen under the per-key DashMap lock
//! - Single trial in Half-Open (prevents hammering recovering backend)
//! - A trial left dangling for a full cool-down no longer blocks a new one
//! - With a window, only failures younger than the window are counted

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit state for one backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a backend's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub trial_in_flight: bool,
}

/// Process-wide breaker state keyed by backend identifier.
///
/// Implementations must apply each transition atomically per backend.
/// None of these operations fail.
pub trait CircuitBreakerStore: Send + Sync + std::fmt::Debug {
    /// Whether an attempt against `backend` may start now.
    fn allow(&self, backend: &str) -> bool;

    fn record_success(&self, backend: &str);

    fn record_failure(&self, backend: &str);

    /// Give up a half-open trial without judging the backend.
    fn release_trial(&self, backend: &str);

    fn snapshot(&self, backend: &str) -> CircuitSnapshot;
}

#[derive(Debug, Default)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    /// Timestamps of the counted failures, oldest first. Only kept when a
    /// window is configured, and never longer than the threshold.
    recent_failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

impl BreakerEntry {
    fn transition(&mut self, backend: &str, to: CircuitState, now: Instant) {
        let from = self.state;
        self.state = to;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.trial_started_at = None;
            }
            CircuitState::HalfOpen => {
                self.trial_started_at = Some(now);
            }
            CircuitState::Closed => {
                self.opened_at = None;
                self.trial_started_at = None;
            }
        }
        tracing::info!(
            backend = %backend,
            from = from.as_str(),
            to = to.as_str(),
            consecutive_failures = self.consecutive_failures,
            "Circuit state changed"
        );
        metrics::record_circuit_transition(backend, to.as_str());
    }
}

/// In-memory breaker store for single-process deployments.
#[derive(Debug)]
pub struct InMemoryCircuitBreakerStore {
    config: CircuitBreakerConfig,
    entries: DashMap<String, BreakerEntry>,
}

impl InMemoryCircuitBreakerStore {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Number of backends referenced so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CircuitBreakerStore for InMemoryCircuitBreakerStore {
    fn allow(&self, backend: &str) -> bool {
        let now = Instant::now();
        let cooldown = self.config.cooldown();
        let mut entry = self.entries.entry(backend.to_string()).or_default();

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = entry
                    .opened_at
                    .map_or(true, |opened| now.duration_since(opened) >= cooldown);
                if cooled {
                    entry.transition(backend, CircuitState::HalfOpen, now);
                }
                cooled
            }
            CircuitState::HalfOpen => match entry.trial_started_at {
                Some(started) if now.duration_since(started) < cooldown => false,
                _ => {
                    entry.trial_started_at = Some(now);
                    true
                }
            },
        }
    }

    fn record_success(&self, backend: &str) {
        let now = Instant::now();
        let mut entry = self.entries.entry(backend.to_string()).or_default();
        entry.consecutive_failures = 0;
        entry.recent_failures.clear();
        if entry.state == CircuitState::HalfOpen {
            entry.transition(backend, CircuitState::Closed, now);
        }
    }

    fn record_failure(&self, backend: &str) {
        let now = Instant::now();
        let threshold = self.config.failure_threshold.max(1);
        let window = self.config.window();
        let mut entry = self.entries.entry(backend.to_string()).or_default();

        match window {
            Some(window) => {
                let recent = &mut entry.recent_failures;
                while recent.front().is_some_and(|t| now.duration_since(*t) > window) {
                    recent.pop_front();
                }
                if recent.len() >= threshold as usize {
                    recent.pop_front();
                }
                recent.push_back(now);
                let counted = recent.len() as u32;
                entry.consecutive_failures = counted;
            }
            None => {
                entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            }
        }

        match entry.state {
            CircuitState::HalfOpen => entry.transition(backend, CircuitState::Open, now),
            CircuitState::Closed if entry.consecutive_failures >= threshold => {
                entry.transition(backend, CircuitState::Open, now)
            }
            _ => {}
        }
    }

    fn release_trial(&self, backend: &str) {
        if let Some(mut entry) = self.entries.get_mut(backend) {
            if entry.state == CircuitState::HalfOpen {
                entry.trial_started_at = None;
            }
        }
    }

    fn snapshot(&self, backend: &str) -> CircuitSnapshot {
        match self.entries.get(backend) {
            Some(entry) => CircuitSnapshot {
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
                trial_in_flight: entry.trial_started_at.is_some(),
            },
            None => CircuitSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                trial_in_flight: false,
            },
        }
    }
}
