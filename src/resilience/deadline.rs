//! Total-timeout enforcement.
//!
//! # Responsibilities
//! - Track the wall-clock budget shared by every attempt of one execution
//! - Hand each attempt the time it has left
//!
//! # Design Decisions
//! - Uses Tokio's clock so paused-time tests drive it deterministically
//! - Remaining time is recomputed on every call, never cached

use std::time::Duration;

use tokio::time::Instant;

/// Wall-clock budget for one execution.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineBudget {
    total: Duration,
    started: Instant,
}

impl DeadlineBudget {
    /// Start the clock now.
    pub fn start(total: Duration) -> Self {
        Self {
            total,
            started: Instant::now(),
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The instant at which the budget runs out.
    pub fn deadline(&self) -> Instant {
        self.started + self.total
    }
}
