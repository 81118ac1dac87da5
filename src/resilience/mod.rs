//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt against a backend:
//!     → circuit_breaker.rs (may this backend be tried at all?)
//!     → deadline.rs (how much of the total budget is left?)
//!     → after the call: circuit_breaker.rs records success/failure
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every execution has a total deadline
//! - Circuit breaker state is the only state shared across executions
//! - Breaker store is a trait so a shared cache can replace the in-memory map

pub mod circuit_breaker;
pub mod deadline;

pub use circuit_breaker::{
    CircuitBreakerStore, CircuitSnapshot, CircuitState, InMemoryCircuitBreakerStore,
};
pub use deadline::DeadlineBudget;
