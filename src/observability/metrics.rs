//! Metrics collection and exposition.
//!
//! # Metrics
//! - `failover_attempts_total` (counter): attempts by backend, outcome
//! - `failover_attempt_duration_seconds` (histogram): per-attempt latency
//! - `failover_circuit_transitions_total` (counter): breaker transitions by backend, new state
//! - `failover_executions_total` (counter): finalized executions by status
//! - `failover_execution_cost_total` (counter): cost in micro-units by chosen backend
//! - `failover_emergency_finalize_total` (counter): emergency path activations
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter is optional and installed once at startup

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one finished attempt.
pub fn record_attempt(backend: &str, outcome: &'static str, duration: Duration) {
    counter!(
        "failover_attempts_total",
        "backend" => backend.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "failover_attempt_duration_seconds",
        "backend" => backend.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a circuit breaker state change.
pub fn record_circuit_transition(backend: &str, state: &'static str) {
    counter!(
        "failover_circuit_transitions_total",
        "backend" => backend.to_string(),
        "state" => state
    )
    .increment(1);
}

/// Record a finalized execution.
pub fn record_execution(status: &'static str, backend: Option<&str>, cost: f64) {
    counter!("failover_executions_total", "status" => status).increment(1);
    if let Some(backend) = backend {
        // Counters are integral; cost is tracked in micro-units.
        let micros = (cost * 1_000_000.0).round().max(0.0) as u64;
        counter!(
            "failover_execution_cost_total",
            "backend" => backend.to_string()
        )
        .increment(micros);
    }
}

/// Record an emergency finalize.
pub fn record_emergency_finalize() {
    counter!("failover_emergency_finalize_total").increment(1);
}
