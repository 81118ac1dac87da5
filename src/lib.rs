//! Reliability execution engine for LLM backends.
//!
//! Calls an ordered list of candidate backends with fallback, isolates
//! failing backends behind per-backend circuit breakers, bounds every
//! execution by a total deadline and finalizes a tracking record exactly
//! once per execution.

pub mod attempts;
pub mod config;
pub mod error;
pub mod execution;
pub mod http;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod tracking;

pub use config::FailoverConfig;
pub use error::{ExecutionError, FailureKind};
pub use execution::{ExecutionOutcome, ExecutionSummary, ReliabilityExecutor};
pub use tracking::CompletionStateMachine;
