//! Metrics collection and exposition.
//!
//! # Metrics
//! - `outcome_breaker_requests_total` (counter): calls to `execute` by service
//! - `outcome_breaker_failures_total` (counter): failures by service, kind
//! - `outcome_breaker_timeouts_total` (counter): execution timeouts by service
//! - `outcome_breaker_fallbacks_total` (counter): fallbacks by service, operation type, reason
//! - `outcome_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `outcome_breaker_alerts_total` (counter): alerts by service, kind
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Reasons from arbitrary error messages are collapsed to keep label
//!   cardinality bounded

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::classify::FailureKind;
use crate::resilience::events::AlertKind;
use crate::resilience::fallback::reason;
use crate::resilience::status::CircuitState;

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}

pub fn record_request(service: &str) {
    counter!("outcome_breaker_requests_total", "service" => service.to_string()).increment(1);
}

pub fn record_failure(service: &str, kind: FailureKind, timed_out: bool) {
    counter!(
        "outcome_breaker_failures_total",
        "service" => service.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);

    if timed_out {
        counter!("outcome_breaker_timeouts_total", "service" => service.to_string()).increment(1);
    }
}

pub fn record_fallback(service: &str, operation_type: &str, why: &str) {
    counter!(
        "outcome_breaker_fallbacks_total",
        "service" => service.to_string(),
        "operation_type" => operation_type.to_string(),
        "reason" => reason_label(why)
    )
    .increment(1);
}

pub fn record_state(service: &str, state: CircuitState) {
    gauge!("outcome_breaker_state", "service" => service.to_string()).set(state.gauge_value());
}

pub fn record_alert(service: &str, kind: AlertKind) {
    counter!(
        "outcome_breaker_alerts_total",
        "service" => service.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

fn reason_label(why: &str) -> &'static str {
    match why {
        reason::CIRCUIT_OPEN => "circuit_open",
        reason::OPERATION_TIMEOUT => "timeout",
        _ => "failure",
    }
}
