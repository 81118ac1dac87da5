//! Execution subsystem.
//!
//! # Data Flow
//! ```text
//! candidates + Invoker
//!     → executor.rs (plan, check deadline, invoke, classify, record)
//!     → outcome.rs (InvokeError → OutcomeKind)
//!     → ExecutionOutcome or ExecutionError, both carrying the AttemptTracker
//!     → summary.rs (flat view for logs and operators)
//! ```
//!
//! # Design Decisions
//! - The engine never builds prompts or parses content; both sides of the
//!   call are injected through `Invoker` and `Classifier`
//! - Strictly sequential: one backend call in flight per execution

pub mod executor;
pub mod invoker;
pub mod outcome;
pub mod summary;

pub use executor::{ExecutionOutcome, ReliabilityExecutor};
pub use invoker::{InvokeError, InvokeErrorKind, Invoker, RawResponse};
pub use outcome::{Classifier, DefaultClassifier};
pub use summary::ExecutionSummary;
