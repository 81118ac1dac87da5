//! Execution tracking subsystem.
//!
//! # Data Flow
//! ```text
//! instrumentation.rs
//!     → store.create (record in Running)
//!     → ReliabilityExecutor::run
//!     → store.update (terminal status + aggregates from record.rs)
//!     → on failure: store.update_if_running (emergency, status=error)
//! ```

pub mod instrumentation;
pub mod record;
pub mod store;

pub use instrumentation::{Completion, CompletionStateMachine, TrackedRun};
pub use record::{
    Aggregates, ExecutionTrackingRecord, Finalization, NewTrackingRecord, RecordId, TrackingStatus,
};
pub use store::{InMemoryTrackingStore, StoreError, TrackingStore};
