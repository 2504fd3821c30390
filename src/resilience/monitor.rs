//! Background monitoring for a breaker.
//!
//! # Responsibilities
//! - Periodic health tick publishing a status snapshot
//! - Alert rules reacting to state changes and failures
//!
//! # Design Decisions
//! - Alert rules are a pure function of one event; they never touch the breaker
//! - The health task holds a weak reference so a dropped breaker ends it
//! - Both tasks stop on the same shutdown signal

use std::sync::Weak;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::events::{AlertEvent, AlertKind, BreakerEvent, EventBus};
use crate::resilience::status::CircuitState;

/// Share of `failure_threshold` at which a high failure rate alert fires.
const HIGH_FAILURE_RATIO: f64 = 0.8;

/// Running monitor tasks. Dropping the handle stops them.
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal both tasks to exit. They finish on their own; nothing is awaited.
    pub fn stop(self) {
        self.shutdown.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the health tick and alert rule tasks for `breaker`.
pub(crate) fn spawn(
    breaker: Weak<CircuitBreaker>,
    bus: &EventBus,
    config: &CircuitBreakerConfig,
) -> MonitorHandle {
    let shutdown = Shutdown::new();
    let rules = AlertRules::new(&config.service_name, config.failure_threshold);

    tracing::info!(
        service = %config.service_name,
        interval_ms = config.health_check_interval.as_millis() as u64,
        "Circuit breaker monitor starting"
    );

    let health = tokio::spawn(run_health_checks(
        breaker,
        config.health_check_interval,
        shutdown.subscribe(),
    ));
    let alerts = tokio::spawn(run_alert_rules(
        rules,
        bus.subscribe(),
        bus.clone(),
        shutdown.subscribe(),
    ));

    MonitorHandle {
        shutdown,
        tasks: vec![health, alerts],
    }
}

async fn run_health_checks(
    breaker: Weak<CircuitBreaker>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = interval.max(Duration::from_millis(1));
    // first tick one interval from now, not immediately
    let mut ticker = time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(breaker) = breaker.upgrade() else {
                    break;
                };
                breaker.health_check();
            }
            _ = shutdown.recv() => {
                tracing::debug!("Health check loop received shutdown signal");
                break;
            }
        }
    }
}

async fn run_alert_rules(
    rules: AlertRules,
    mut events: broadcast::Receiver<BreakerEvent>,
    bus: EventBus,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    if let Some(alert) = rules.evaluate(&event) {
                        raise(&bus, alert);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(service = %rules.service, skipped, "Alert listener lagged behind breaker events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = shutdown.recv() => {
                tracing::debug!(service = %rules.service, "Alert listener detached");
                break;
            }
        }
    }
}

fn raise(bus: &EventBus, alert: AlertEvent) {
    match alert.kind {
        AlertKind::CircuitClosed => tracing::info!(
            service = %alert.service,
            alert = alert.kind.as_str(),
            "Service recovered"
        ),
        _ => tracing::warn!(
            service = %alert.service,
            alert = alert.kind.as_str(),
            details = %alert.details,
            "Circuit breaker alert"
        ),
    }
    metrics::record_alert(&alert.service, alert.kind);
    bus.emit(BreakerEvent::Alert(alert));
}

/// Maps breaker events to alerts.
#[derive(Debug, Clone)]
pub struct AlertRules {
    service: String,
    failure_threshold: u32,
}

impl AlertRules {
    pub fn new(service: &str, failure_threshold: u32) -> Self {
        Self {
            service: service.to_string(),
            failure_threshold,
        }
    }

    pub fn evaluate(&self, event: &BreakerEvent) -> Option<AlertEvent> {
        match event {
            BreakerEvent::StateChange(change) if change.to == CircuitState::Open => Some(self.alert(
                AlertKind::CircuitOpened,
                json!({
                    "from": change.from,
                    "failure_count": change.failure_count,
                    "message": format!("Circuit opened for {}", self.service),
                }),
            )),
            BreakerEvent::StateChange(change)
                if change.from == CircuitState::HalfOpen && change.to == CircuitState::Closed =>
            {
                Some(self.alert(
                    AlertKind::CircuitClosed,
                    json!({ "message": format!("{} service recovered", self.service) }),
                ))
            }
            BreakerEvent::Failure(failure)
                if failure.failure_count as f64
                    >= f64::from(self.failure_threshold) * HIGH_FAILURE_RATIO =>
            {
                Some(self.alert(
                    AlertKind::HighFailureRate,
                    json!({
                        "failure_count": failure.failure_count,
                        "failure_threshold": self.failure_threshold,
                        "kind": failure.kind,
                        "error": failure.error,
                    }),
                ))
            }
            _ => None,
        }
    }

    fn alert(&self, kind: AlertKind, details: serde_json::Value) -> AlertEvent {
        AlertEvent {
            kind,
            service: self.service.clone(),
            timestamp: Utc::now(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::classify::FailureKind;
    use crate::resilience::events::{FailureEvent, StateChangeEvent};
    use std::sync::Arc;

    fn change(from: CircuitState, to: CircuitState) -> BreakerEvent {
        BreakerEvent::StateChange(StateChangeEvent {
            from,
            to,
            timestamp: Utc::now(),
            failure_count: 0,
        })
    }

    fn failure(count: usize) -> BreakerEvent {
        BreakerEvent::Failure(FailureEvent {
            error: "boom".into(),
            kind: FailureKind::Unknown,
            state: CircuitState::Closed,
            failure_count: count,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_state_change_rules() {
        let rules = AlertRules::new("ai_service", 5);

        let opened = rules.evaluate(&change(CircuitState::Closed, CircuitState::Open)).unwrap();
        assert_eq!(opened.kind, AlertKind::CircuitOpened);
        assert_eq!(opened.service, "ai_service");

        let recovered = rules.evaluate(&change(CircuitState::HalfOpen, CircuitState::Closed)).unwrap();
        assert_eq!(recovered.kind, AlertKind::CircuitClosed);

        // forced close from open is not a recovery
        assert!(rules.evaluate(&change(CircuitState::Open, CircuitState::Closed)).is_none());
        assert!(rules.evaluate(&change(CircuitState::Open, CircuitState::HalfOpen)).is_none());
    }

    #[test]
    fn test_high_failure_rate_at_eighty_percent() {
        let rules = AlertRules::new("database", 5);
        assert!(rules.evaluate(&failure(3)).is_none());

        let alert = rules.evaluate(&failure(4)).unwrap();
        assert_eq!(alert.kind, AlertKind::HighFailureRate);
        assert_eq!(alert.details["failure_threshold"], 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_publishes_health_checks_and_alerts() {
        let config = CircuitBreakerConfig {
            service_name: "cache".into(),
            failure_threshold: 1,
            health_check_interval: Duration::from_secs(10),
            ..CircuitBreakerConfig::default()
        };
        let breaker = CircuitBreaker::spawn(config);
        let mut events = breaker.subscribe();

        let _: serde_json::Value = breaker
            .execute(|| async { Err::<serde_json::Value, _>("cache down") }, "cache_operation", json!({}))
            .await
            .unwrap();

        let mut saw_open_alert = false;
        let mut saw_health_check = false;
        tokio::time::timeout(Duration::from_secs(11), async {
            while let Ok(event) = events.recv().await {
                match event {
                    BreakerEvent::Alert(a) if a.kind == AlertKind::CircuitOpened => saw_open_alert = true,
                    BreakerEvent::HealthCheck(status) => {
                        assert_eq!(status.state, CircuitState::Open);
                        assert!(!status.is_healthy);
                        saw_health_check = true;
                    }
                    _ => {}
                }
                if saw_open_alert && saw_health_check {
                    break;
                }
            }
        })
        .await
        .unwrap();

        assert!(saw_open_alert);
        assert!(saw_health_check);
        breaker.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_stops_tasks() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        };
        let breaker = Arc::new(CircuitBreaker::new(config));
        let mut events = breaker.subscribe();
        breaker.start_monitoring();
        breaker.destroy();

        // give the tasks a chance to observe the signal
        tokio::time::sleep(Duration::from_millis(10)).await;

        breaker.force_state(CircuitState::Open);
        tokio::time::sleep(Duration::from_secs(60)).await;

        let mut alerts = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, BreakerEvent::Alert(_) | BreakerEvent::HealthCheck(_)) {
                alerts += 1;
            }
        }
        assert_eq!(alerts, 0);
    }
}
