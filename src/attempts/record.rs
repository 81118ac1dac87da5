//! Immutable record of a single backend invocation.

use std::ops::{Add, AddAssign};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Token consumption reported for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cached_tokens: 0,
        }
    }

    pub fn with_cached(mut self, cached_tokens: u64) -> Self {
        self.cached_tokens = cached_tokens;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            cached_tokens: self.cached_tokens.saturating_add(other.cached_tokens),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: TokenUsage) {
        *self = *self + other;
    }
}

/// Closed outcome taxonomy for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    /// Transient network or 5xx-class failure.
    Retryable,
    RateLimited,
    /// The call did not finish within its allotted time.
    Timeout,
    /// Validation, content-policy or budget failure; no other backend can fix it.
    Fatal,
}

impl OutcomeKind {
    pub fn is_success(self) -> bool {
        self == OutcomeKind::Success
    }

    /// Failures that advance to the next candidate.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            OutcomeKind::Retryable | OutcomeKind::RateLimited | OutcomeKind::Timeout
        )
    }

    pub fn is_fatal(self) -> bool {
        self == OutcomeKind::Fatal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Retryable => "retryable",
            OutcomeKind::RateLimited => "rate_limited",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock bounds of one attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptTiming {
    pub started_at: SystemTime,
    pub duration: Duration,
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Duration in whole milliseconds, rounded to nearest.
pub fn rounded_millis(d: Duration) -> u64 {
    (d.as_secs_f64() * 1000.0).round() as u64
}

/// Truncate to at most `max` characters, marking the cut with `...` when
/// there is room for it.
pub fn truncate_message(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    if max < 3 {
        return message.chars().take(max).collect();
    }
    let mut out: String = message.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

/// Outcome of one backend invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    backend: String,
    sequence: u32,
    started_at: u64,
    completed_at: u64,
    duration_ms: u64,
    outcome: OutcomeKind,
    usage: TokenUsage,
    cost: f64,
    error_class: Option<String>,
    error_message: Option<String>,
    rate_limited: bool,
    retryable: bool,
}

impl AttemptRecord {
    /// Record a successful attempt.
    pub fn success(
        backend: impl Into<String>,
        sequence: u32,
        timing: AttemptTiming,
        usage: TokenUsage,
        cost: f64,
    ) -> Self {
        Self::build(backend.into(), sequence, timing, OutcomeKind::Success, usage, cost, None, None)
    }

    /// Record a failed attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn failure(
        backend: impl Into<String>,
        sequence: u32,
        timing: AttemptTiming,
        outcome: OutcomeKind,
        usage: TokenUsage,
        cost: f64,
        error_class: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self::build(
            backend.into(),
            sequence,
            timing,
            outcome,
            usage,
            cost,
            Some(error_class.into()),
            Some(error_message.into()),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        backend: String,
        sequence: u32,
        timing: AttemptTiming,
        outcome: OutcomeKind,
        usage: TokenUsage,
        cost: f64,
        error_class: Option<String>,
        error_message: Option<String>,
    ) -> Self {
        let started_at = unix_millis(timing.started_at);
        let duration_ms = rounded_millis(timing.duration);
        Self {
            backend,
            sequence,
            started_at,
            completed_at: started_at.saturating_add(duration_ms),
            duration_ms,
            outcome,
            usage,
            cost,
            error_class,
            error_message,
            rate_limited: outcome == OutcomeKind::RateLimited,
            retryable: outcome.is_retryable(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// 1-based position within the execution.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn completed_at(&self) -> u64 {
        self.completed_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn outcome(&self) -> OutcomeKind {
        self.outcome
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn error_class(&self) -> Option<&str> {
        self.error_class.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(ms: u64) -> AttemptTiming {
        AttemptTiming {
            started_at: UNIX_EPOCH + Duration::from_secs(1_000),
            duration: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_usage_sum() {
        let mut total = TokenUsage::new(10, 5);
        total += TokenUsage::new(3, 0).with_cached(7);
        assert_eq!(total, TokenUsage { input_tokens: 13, output_tokens: 5, cached_tokens: 7 });
        assert!(TokenUsage::default().is_empty());
    }

    #[test]
    fn test_usage_sum_saturates() {
        let total = TokenUsage::new(u64::MAX, 0) + TokenUsage::new(1, 2).with_cached(3);
        assert_eq!(total.input_tokens, u64::MAX);
        assert_eq!(total.output_tokens, 2);
        assert_eq!(total.cached_tokens, 3);
    }

    #[test]
    fn test_success_record() {
        let record = AttemptRecord::success("x", 1, timing(250), TokenUsage::new(100, 20), 0.01);
        assert!(record.succeeded());
        assert_eq!(record.started_at(), 1_000_000);
        assert_eq!(record.completed_at(), 1_000_250);
        assert!(record.error_class().is_none());
        assert!(!record.is_retryable());
    }

    #[test]
    fn test_failure_flags() {
        let record = AttemptRecord::failure(
            "x",
            2,
            timing(10),
            OutcomeKind::RateLimited,
            TokenUsage::default(),
            0.0,
            "RateLimited",
            "slow down",
        );
        assert!(record.is_rate_limited());
        assert!(record.is_retryable());
        assert_eq!(record.error_class(), Some("RateLimited"));

        let fatal = AttemptRecord::failure(
            "x", 1, timing(10), OutcomeKind::Fatal, TokenUsage::default(), 0.0, "PolicyViolation", "no",
        );
        assert!(!fatal.is_retryable());
        assert!(!fatal.is_rate_limited());
    }

    #[test]
    fn test_duration_rounding() {
        assert_eq!(rounded_millis(Duration::from_micros(1_499)), 1);
        assert_eq!(rounded_millis(Duration::from_micros(1_500)), 2);
    }

    #[test]
    fn test_truncate_message() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("abcdefghijkl", 8), "abcde...");
        // Multi-byte characters are never split.
        assert_eq!(truncate_message("ééééé", 4), "é...");
    }

    #[test]
    fn test_truncate_below_marker_length() {
        assert_eq!(truncate_message("abcdef", 3), "...");
        assert_eq!(truncate_message("abcdef", 2), "ab");
        assert_eq!(truncate_message("abcdef", 0), "");
    }
}
