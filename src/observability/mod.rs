//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine components produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stderr, JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Tracking record id is attached to every log line of one run
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
