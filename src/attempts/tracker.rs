//! Aggregation over one execution's attempt sequence.

use serde::Serialize;

use crate::attempts::record::{AttemptRecord, TokenUsage};

/// Append-only attempt log for a single execution.
///
/// Every aggregate is recomputed from the sequence on read.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttemptTracker {
    candidates: Vec<String>,
    attempts: Vec<AttemptRecord>,
    skipped: Vec<String>,
}

impl AttemptTracker {
    pub fn new(candidates: &[String]) -> Self {
        Self {
            candidates: candidates.to_vec(),
            attempts: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn push(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    /// Note a candidate passed over at planning time (open circuit).
    pub fn note_skipped(&mut self, backend: impl Into<String>) {
        self.skipped.push(backend.into());
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn attempts_count(&self) -> usize {
        self.attempts.len()
    }

    /// Sequence number the next attempt will carry.
    pub fn next_sequence(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn skipped_backends(&self) -> &[String] {
        &self.skipped
    }

    pub fn was_attempted(&self, backend: &str) -> bool {
        self.attempts.iter().any(|a| a.backend() == backend)
    }

    pub fn succeeded(&self) -> bool {
        self.attempts.iter().any(AttemptRecord::succeeded)
    }

    /// The backend whose attempt succeeded, or the last one attempted.
    pub fn chosen_backend(&self) -> Option<&str> {
        self.attempts
            .iter()
            .find(|a| a.succeeded())
            .or_else(|| self.attempts.last())
            .map(AttemptRecord::backend)
    }

    pub fn used_fallback(&self) -> bool {
        match (self.chosen_backend(), self.candidates.first()) {
            (Some(chosen), Some(first)) => chosen != first,
            _ => false,
        }
    }

    /// Token totals over every attempt, failed ones included.
    pub fn usage(&self) -> TokenUsage {
        self.attempts
            .iter()
            .fold(TokenUsage::default(), |acc, a| acc + a.usage())
    }

    pub fn total_cost(&self) -> f64 {
        self.attempts.iter().map(AttemptRecord::cost).sum()
    }

    pub fn failed_attempts(&self) -> Vec<&AttemptRecord> {
        self.attempts.iter().filter(|a| !a.succeeded()).collect()
    }

    pub fn last_failure(&self) -> Option<&AttemptRecord> {
        self.attempts.iter().rev().find(|a| !a.succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempts::record::{AttemptTiming, OutcomeKind};
    use std::time::{Duration, SystemTime};

    fn timing() -> AttemptTiming {
        AttemptTiming {
            started_at: SystemTime::now(),
            duration: Duration::from_millis(5),
        }
    }

    fn candidates() -> Vec<String> {
        vec!["x".to_string(), "y".to_string(), "z".to_string()]
    }

    #[test]
    fn test_empty_tracker() {
        let tracker = AttemptTracker::new(&candidates());
        assert_eq!(tracker.attempts_count(), 0);
        assert_eq!(tracker.next_sequence(), 1);
        assert!(tracker.chosen_backend().is_none());
        assert!(!tracker.used_fallback());
        assert!(tracker.usage().is_empty());
    }

    #[test]
    fn test_aggregates_include_failed_attempts() {
        let mut tracker = AttemptTracker::new(&candidates());
        tracker.push(AttemptRecord::failure(
            "x",
            1,
            timing(),
            OutcomeKind::Retryable,
            TokenUsage::new(40, 0),
            0.25,
            "Status",
            "HTTP 503",
        ));
        tracker.push(AttemptRecord::success(
            "y",
            2,
            timing(),
            TokenUsage::new(40, 12).with_cached(8),
            0.5,
        ));

        assert_eq!(tracker.attempts_count(), 2);
        assert_eq!(tracker.usage(), TokenUsage::new(80, 12).with_cached(8));
        assert!((tracker.total_cost() - 0.75).abs() < 1e-9);
        assert_eq!(tracker.chosen_backend(), Some("y"));
        assert!(tracker.used_fallback());
        assert!(tracker.succeeded());
        assert_eq!(tracker.failed_attempts().len(), 1);
        assert_eq!(tracker.last_failure().map(|a| a.backend()), Some("x"));
    }

    #[test]
    fn test_usage_saturates_on_huge_counts() {
        let mut tracker = AttemptTracker::new(&candidates());
        tracker.push(AttemptRecord::failure(
            "x",
            1,
            timing(),
            OutcomeKind::Retryable,
            TokenUsage::new(u64::MAX, 0),
            0.0,
            "Status",
            "HTTP 502",
        ));
        tracker.push(AttemptRecord::success("y", 2, timing(), TokenUsage::new(1, 0), 0.0));

        assert_eq!(tracker.usage(), TokenUsage::new(u64::MAX, 0));
    }

    #[test]
    fn test_chosen_is_last_attempt_when_all_failed() {
        let mut tracker = AttemptTracker::new(&candidates());
        for (i, b) in ["x", "y"].iter().enumerate() {
            tracker.push(AttemptRecord::failure(
                *b,
                i as u32 + 1,
                timing(),
                OutcomeKind::Timeout,
                TokenUsage::default(),
                0.0,
                "DeadlineExceeded",
                "timed out",
            ));
        }
        assert_eq!(tracker.chosen_backend(), Some("y"));
        assert!(!tracker.succeeded());
        assert!(tracker.was_attempted("x"));
        assert!(!tracker.was_attempted("z"));
    }

    #[test]
    fn test_primary_success_is_not_fallback() {
        let mut tracker = AttemptTracker::new(&candidates());
        tracker.note_skipped("w");
        tracker.push(AttemptRecord::success("x", 1, timing(), TokenUsage::default(), 0.0));
        assert!(!tracker.used_fallback());
        assert_eq!(tracker.skipped_backends(), ["w".to_string()]);
    }
}
