//! HTTP backend subsystem.
//!
//! # Data Flow
//! ```text
//! ReliabilityExecutor
//!     → client.rs (POST payload, timeout = min(remaining, backend cap))
//!     → backend
//!     → RawResponse with parsed usage, or InvokeError by status
//! ```

pub mod client;

pub use client::HttpInvoker;
