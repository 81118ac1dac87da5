//! Fallback planning.
//!
//! # Responsibilities
//! - Walk the candidate list in declaration order
//! - Skip candidates already considered in this execution
//! - Skip candidates whose circuit refuses an attempt
//!
//! # Design Decisions
//! - A candidate skipped for an open circuit is never reconsidered in the
//!   same execution, even if its circuit closes before the deadline
//! - Duplicate identifiers in the candidate list are considered once

use std::collections::HashSet;
use std::sync::Arc;

use crate::resilience::CircuitBreakerStore;

/// What to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Attempt(String),
    Exhausted,
}

/// One planning decision plus the candidates passed over to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub plan: Plan,
    /// Candidates skipped because their circuit refused the attempt.
    pub skipped: Vec<String>,
}

/// Picks the next eligible backend.
#[derive(Debug, Clone)]
pub struct FallbackPlanner {
    breakers: Arc<dyn CircuitBreakerStore>,
}

impl FallbackPlanner {
    pub fn new(breakers: Arc<dyn CircuitBreakerStore>) -> Self {
        Self { breakers }
    }

    pub fn breakers(&self) -> &Arc<dyn CircuitBreakerStore> {
        &self.breakers
    }

    /// Choose the first candidate not yet considered whose circuit allows an attempt.
    ///
    /// The caller must add both the chosen and the skipped candidates to
    /// `considered` before planning again.
    pub fn next(&self, candidates: &[String], considered: &HashSet<String>) -> PlanStep {
        let mut skipped: Vec<String> = Vec::new();

        for candidate in candidates {
            if considered.contains(candidate) || skipped.contains(candidate) {
                continue;
            }
            if self.breakers.allow(candidate) {
                return PlanStep {
                    plan: Plan::Attempt(candidate.clone()),
                    skipped,
                };
            }
            tracing::debug!(backend = %candidate, "Circuit open, skipping candidate");
            skipped.push(candidate.clone());
        }

        PlanStep {
            plan: Plan::Exhausted,
            skipped,
        }
    }
}
