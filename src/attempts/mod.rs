//! Attempt bookkeeping.
//!
//! # Data Flow
//! ```text
//! Executor finishes one backend call
//!     → record.rs (immutable AttemptRecord: timing, outcome, tokens, cost)
//!     → tracker.rs (append to the execution's AttemptTracker)
//!     → aggregates read by the tracking layer on finalize
//! ```
//!
//! # Design Decisions
//! - One record per invocation, never mutated
//! - Aggregates are derived on read, not cached
//! - A tracker belongs to exactly one execution

pub mod record;
pub mod tracker;

pub use record::{AttemptRecord, AttemptTiming, OutcomeKind, TokenUsage};
pub use tracker::AttemptTracker;
