//! Candidate routing subsystem.
//!
//! # Data Flow
//! ```text
//! Ordered candidates (primary first, then fallbacks)
//!     → planner.rs (skip considered, skip open circuits)
//!     → next backend to attempt, or Exhausted
//! ```
//!
//! # Design Decisions
//! - Planner holds no per-execution state; the executor owns "considered"
//! - Order is the declaration order, no load balancing across candidates

pub mod planner;

pub use planner::{FallbackPlanner, Plan, PlanStep};
