//! Shared utilities for integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use outcome_breaker::resilience::{BreakerEvent, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Breaker config without background monitoring.
pub fn quiet_config(name: &str, failure_threshold: u32, success_threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        service_name: name.to_string(),
        failure_threshold,
        success_threshold,
        open_timeout: Duration::from_millis(1000),
        monitor_window: Duration::from_millis(60_000),
        execution_timeout: Duration::from_millis(1000),
        enable_monitoring: false,
        health_check_interval: Duration::from_secs(30),
    }
}

/// Operation that counts its invocations and fails while `failing` is set.
#[derive(Clone, Default)]
pub struct ProgrammableBackend {
    pub calls: Arc<AtomicU32>,
    failing: Arc<std::sync::atomic::AtomicBool>,
}

#[allow(dead_code)]
impl ProgrammableBackend {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Run one call through `breaker` as `operation_type`.
    pub async fn call(&self, breaker: &CircuitBreaker, operation_type: &str) -> Value {
        let calls = self.calls.clone();
        let failing = self.failing.load(Ordering::SeqCst);

        breaker
            .execute(
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if failing {
                            Err("ECONNREFUSED backend refused connection")
                        } else {
                            Ok(json!({ "ok": true }))
                        }
                    }
                },
                operation_type,
                json!({ "patient_id": "p-1" }),
            )
            .await
            .unwrap()
    }
}

/// Drain every pending state change as `(from, to)` pairs.
#[allow(dead_code)]
pub fn drain_transitions(events: &mut broadcast::Receiver<BreakerEvent>) -> Vec<(CircuitState, CircuitState)> {
    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BreakerEvent::StateChange(change) = event {
            transitions.push((change.from, change.to));
        }
    }
    transitions
}
