//! Circuit breaker for outcome measures services.
//!
//! # States
//! - Closed: normal operation, operations run under the execution timeout
//! - Open: service assumed down, calls are served by fallbacks immediately
//! - Half-Open: trial calls run to probe recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures within monitor window >= failure_threshold
//! Open → Half-Open: first call after next_attempt_time (checked on entry to execute)
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - One breaker per protected service, never global
//! - Every mutation happens under a single mutex that is never held across an await
//! - Protected failures never reach the caller; they become fallback results
//! - Events are published after the lock is released

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::resilience::classify::classify_error;
use crate::resilience::events::{
    BreakerEvent, EventBus, FailureEvent, FallbackEvent, StateChangeEvent,
};
use crate::resilience::fallback::{reason, FallbackRegistry};
use crate::resilience::monitor::{self, MonitorHandle};
use crate::resilience::status::{self, serialize_millis, BreakerStatus, CircuitState, Statistics};
use crate::resilience::timeouts::{race_with_timeout, RaceOutcome};
use crate::resilience::window::{FailureRecord, FailureWindow};

/// Circuit breaker configuration. Immutable once the breaker is built.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerConfig {
    /// Label used in logs, alerts and metric labels.
    pub service_name: String,
    /// Failures within `monitor_window` that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,
    /// Time spent open before a trial call is allowed.
    #[serde(rename = "open_timeout_ms", serialize_with = "serialize_millis")]
    pub open_timeout: Duration,
    /// Sliding window for failure counting.
    #[serde(rename = "monitor_window_ms", serialize_with = "serialize_millis")]
    pub monitor_window: Duration,
    /// Deadline for a single operation.
    #[serde(rename = "execution_timeout_ms", serialize_with = "serialize_millis")]
    pub execution_timeout: Duration,
    /// Run the background health tick and alert rules.
    pub enable_monitoring: bool,
    #[serde(rename = "health_check_interval_ms", serialize_with = "serialize_millis")]
    pub health_check_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            service_name: "outcome-measures".to_string(),
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(60),
            monitor_window: Duration::from_secs(300),
            execution_timeout: Duration::from_secs(30),
            enable_monitoring: true,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn named(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }
}

/// Errors `execute` can return to its caller.
///
/// Protected operation failures are never reported here; they are absorbed
/// into fallback results.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The fallback strategy produced a value the caller's type cannot hold.
    #[error("fallback for '{operation_type}' does not match the expected result type: {source}")]
    FallbackDecode {
        operation_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: FailureWindow,
    consecutive_successes: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt: Option<Instant>,
    stats: Statistics,
}

/// Circuit breaker guarding one logical service.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    fallbacks: FallbackRegistry,
    events: EventBus,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl CircuitBreaker {
    /// Create a breaker with the built-in fallback strategies and no
    /// background monitoring.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let fallbacks = FallbackRegistry::with_builtin(config.open_timeout);
        Self::with_fallbacks(config, fallbacks)
    }

    pub fn with_fallbacks(config: CircuitBreakerConfig, fallbacks: FallbackRegistry) -> Self {
        tracing::info!(
            service = %config.service_name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            open_timeout_ms = config.open_timeout.as_millis() as u64,
            execution_timeout_ms = config.execution_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );
        metrics::record_state(&config.service_name, CircuitState::Closed);

        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: FailureWindow::new(config.monitor_window),
                consecutive_successes: 0,
                last_failure_time: None,
                next_attempt: None,
                stats: Statistics::new(Utc::now()),
            }),
            config,
            fallbacks,
            events: EventBus::new(),
            monitor: Mutex::new(None),
        }
    }

    /// Create a shared breaker, starting monitoring if the config enables it.
    pub fn spawn(config: CircuitBreakerConfig) -> Arc<Self> {
        let breaker = Arc::new(Self::new(config));
        if breaker.config.enable_monitoring {
            breaker.start_monitoring();
        }
        breaker
    }

    pub fn name(&self) -> &str {
        &self.config.service_name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Fallback strategies for this breaker; register custom ones here.
    pub fn fallbacks(&self) -> &FallbackRegistry {
        &self.fallbacks
    }

    /// Listen to state changes, failures, fallbacks, health checks and alerts.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Run `operation` under the breaker.
    ///
    /// Returns the operation's value on success. On rejection, failure or
    /// timeout, returns the fallback for `operation_type` decoded as `T`.
    ///
    /// A timed-out operation is not cancelled; it runs to completion in the
    /// background and its result is dropped.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: F,
        operation_type: &str,
        context: Value,
    ) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
    {
        metrics::record_request(self.name());

        if !self.admit() {
            tracing::debug!(
                service = %self.name(),
                operation_type,
                "Circuit open, serving fallback"
            );
            return self.fallback_as(operation_type, &context, reason::CIRCUIT_OPEN);
        }

        match race_with_timeout(operation(), self.config.execution_timeout).await {
            RaceOutcome::Completed(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            RaceOutcome::Completed(Err(e)) => {
                let message = e.to_string();
                let why = if message.trim().is_empty() {
                    reason::OPERATION_FAILED.to_string()
                } else {
                    message
                };
                self.on_failure(&why, false);
                self.fallback_as(operation_type, &context, &why)
            }
            RaceOutcome::TimedOut => {
                self.on_failure(reason::OPERATION_TIMEOUT, true);
                self.fallback_as(operation_type, &context, reason::OPERATION_TIMEOUT)
            }
            RaceOutcome::Aborted(why) => {
                self.on_failure(&why, false);
                self.fallback_as(operation_type, &context, &why)
            }
        }
    }

    /// Invoke the strategy for `operation_type` (or the default one).
    ///
    /// Does not touch the counters; `execute` accounts for its own fallbacks.
    pub fn execute_fallback(&self, operation_type: &str, context: &Value, reason: &str) -> Value {
        let strategy = self.fallbacks.resolve(operation_type);
        let result = strategy(context, reason);

        tracing::warn!(
            service = %self.name(),
            operation_type,
            reason,
            "Fallback executed"
        );
        metrics::record_fallback(self.name(), operation_type, reason);

        self.events.emit(BreakerEvent::Fallback(FallbackEvent {
            operation_type: operation_type.to_string(),
            reason: reason.to_string(),
            context: context.clone(),
            result: result.clone(),
            timestamp: Utc::now(),
        }));

        result
    }

    fn fallback_as<T: DeserializeOwned>(
        &self,
        operation_type: &str,
        context: &Value,
        reason: &str,
    ) -> Result<T, BreakerError> {
        let result = self.execute_fallback(operation_type, context, reason);
        serde_json::from_value(result).map_err(|source| {
            tracing::error!(
                service = %self.name(),
                operation_type,
                error = %source,
                "Fallback result does not match caller type"
            );
            BreakerError::FallbackDecode {
                operation_type: operation_type.to_string(),
                source,
            }
        })
    }

    /// Count the request and decide whether the operation may run.
    fn admit(&self) -> bool {
        let now = Instant::now();
        let mut events = Vec::new();

        let allowed = {
            let mut inner = self.lock();
            inner.stats.total_requests += 1;

            if inner.state != CircuitState::Open {
                true
            } else if inner.next_attempt.map_or(true, |at| now >= at) {
                events.extend(self.transition(&mut inner, CircuitState::HalfOpen, now));
                true
            } else {
                inner.stats.total_fallbacks += 1;
                false
            }
        };

        self.publish(events);
        allowed
    }

    fn on_success(&self) {
        let now = Instant::now();
        let mut events = Vec::new();

        {
            let mut inner = self.lock();
            inner.stats.total_successes += 1;

            let state = inner.state;
            match state {
                CircuitState::Closed => inner.failures.prune(now),
                CircuitState::HalfOpen => {
                    inner.consecutive_successes += 1;
                    tracing::debug!(
                        service = %self.name(),
                        consecutive_successes = inner.consecutive_successes,
                        success_threshold = self.config.success_threshold,
                        "Trial call succeeded"
                    );
                    if inner.consecutive_successes >= self.config.success_threshold {
                        events.extend(self.transition(&mut inner, CircuitState::Closed, now));
                    }
                }
                CircuitState::Open => {
                    // A call admitted before another caller reopened the circuit.
                    tracing::debug!(service = %self.name(), "Success recorded while circuit is open");
                }
            }
        }

        self.publish(events);
    }

    fn on_failure(&self, message: &str, timed_out: bool) {
        let now = Instant::now();
        let timestamp = Utc::now();
        let kind = classify_error(message);
        let mut events = Vec::new();

        {
            let mut inner = self.lock();
            inner.stats.total_failures += 1;
            inner.stats.total_fallbacks += 1;
            if timed_out {
                inner.stats.total_timeouts += 1;
            }

            inner.failures.prune(now);
            inner.failures.push(FailureRecord {
                recorded_at: now,
                timestamp,
                error_message: message.to_string(),
                kind,
            });
            inner.last_failure_time = Some(timestamp);
            let failure_count = inner.failures.len();

            tracing::warn!(
                service = %self.name(),
                state = %inner.state,
                kind = %kind,
                failure_count,
                failure_threshold = self.config.failure_threshold,
                error = message,
                "Protected operation failed"
            );

            events.push(BreakerEvent::Failure(FailureEvent {
                error: message.to_string(),
                kind,
                state: inner.state,
                failure_count,
                timestamp,
            }));

            let state = inner.state;
            match state {
                CircuitState::Closed if failure_count >= self.config.failure_threshold as usize => {
                    events.extend(self.transition(&mut inner, CircuitState::Open, now));
                }
                CircuitState::HalfOpen => {
                    events.extend(self.transition(&mut inner, CircuitState::Open, now));
                }
                _ => {}
            }
        }

        metrics::record_failure(self.name(), kind, timed_out);
        self.publish(events);
    }

    /// The only place state changes. Applies entry actions even when the
    /// target equals the current state; only real changes are counted.
    fn transition(
        &self,
        inner: &mut BreakerInner,
        to: CircuitState,
        now: Instant,
    ) -> Option<BreakerEvent> {
        let from = inner.state;

        if to != CircuitState::HalfOpen {
            inner.consecutive_successes = 0;
        }
        match to {
            CircuitState::Open => inner.next_attempt = Some(now + self.config.open_timeout),
            CircuitState::Closed => {
                inner.failures.clear();
                inner.next_attempt = None;
            }
            CircuitState::HalfOpen => {}
        }

        if from == to {
            return None;
        }

        let timestamp = Utc::now();
        inner.state = to;
        inner.stats.state_changes += 1;
        inner.stats.last_state_change_time = Some(timestamp);
        let failure_count = inner.failures.len();

        match to {
            CircuitState::Open => tracing::error!(
                service = %self.name(),
                from = %from,
                failure_count,
                open_timeout_ms = self.config.open_timeout.as_millis() as u64,
                "Circuit breaker opened (failing fast)"
            ),
            CircuitState::HalfOpen => tracing::info!(
                service = %self.name(),
                from = %from,
                "Circuit breaker half-open (testing recovery)"
            ),
            CircuitState::Closed => tracing::info!(
                service = %self.name(),
                from = %from,
                "Circuit breaker closed"
            ),
        }
        metrics::record_state(self.name(), to);

        Some(BreakerEvent::StateChange(StateChangeEvent {
            from,
            to,
            timestamp,
            failure_count,
        }))
    }

    /// Snapshot of the breaker. Does not prune the failure window.
    pub fn status(&self) -> BreakerStatus {
        let now = Instant::now();
        let wall = Utc::now();
        let inner = self.lock();

        let next_attempt_time = inner.next_attempt.map(|at| {
            wall + TimeDelta::from_std(at.saturating_duration_since(now)).unwrap_or_else(|_| TimeDelta::zero())
        });
        let uptime = (wall - inner.stats.start_time).to_std().unwrap_or_default();
        let failure_count = inner.failures.len();

        BreakerStatus {
            service_name: self.config.service_name.clone(),
            state: inner.state,
            failure_count,
            consecutive_successes: inner.consecutive_successes,
            last_failure_time: inner.last_failure_time,
            next_attempt_time,
            statistics: inner.stats.clone(),
            config: self.config.clone(),
            is_healthy: status::is_healthy(inner.state, failure_count, self.config.failure_threshold),
            uptime,
        }
    }

    pub fn is_healthy(&self) -> bool {
        let inner = self.lock();
        status::is_healthy(inner.state, inner.failures.len(), self.config.failure_threshold)
    }

    /// Compute a snapshot and publish it as a health check event.
    pub fn health_check(&self) -> BreakerStatus {
        let snapshot = self.status();
        if !snapshot.is_healthy {
            tracing::warn!(
                service = %snapshot.service_name,
                state = %snapshot.state,
                failure_count = snapshot.failure_count,
                "Circuit breaker unhealthy"
            );
        }
        self.events.emit(BreakerEvent::HealthCheck(Box::new(snapshot.clone())));
        snapshot
    }

    /// Move to `state` regardless of counters.
    pub fn force_state(&self, state: CircuitState) {
        let events = {
            let mut inner = self.lock();
            tracing::warn!(service = %self.name(), from = %inner.state, to = %state, "Circuit breaker state forced");
            self.transition(&mut inner, state, Instant::now())
        };
        self.publish(events);
    }

    /// Force a state given by name. Unknown names are ignored.
    pub fn force_state_named(&self, state: &str) -> bool {
        match state.parse::<CircuitState>() {
            Ok(state) => {
                self.force_state(state);
                true
            }
            Err(e) => {
                tracing::debug!(service = %self.name(), error = %e, "Ignoring force of unknown state");
                false
            }
        }
    }

    /// Close the circuit, drop failure history and zero every counter except
    /// the start time.
    pub fn reset(&self) {
        let events = {
            let mut inner = self.lock();
            let event = self.transition(&mut inner, CircuitState::Closed, Instant::now());
            inner.failures.clear();
            inner.consecutive_successes = 0;
            inner.last_failure_time = None;
            inner.next_attempt = None;
            inner.stats.reset();
            event
        };
        tracing::info!(service = %self.name(), "Circuit breaker reset");
        self.publish(events);
    }

    /// Start the health tick and alert rules. No-op if already running or if
    /// called outside a Tokio runtime.
    pub fn start_monitoring(self: &Arc<Self>) {
        let mut slot = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(service = %self.name(), "No Tokio runtime, monitoring not started");
            return;
        }
        *slot = Some(monitor::spawn(Arc::downgrade(self), &self.events, &self.config));
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop background monitoring and detach its listeners. Idempotent.
    pub fn destroy(&self) {
        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop();
            tracing::info!(service = %self.name(), "Circuit breaker monitoring stopped");
        }
    }

    fn publish(&self, events: impl IntoIterator<Item = BreakerEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("inner", &*self.lock())
            .field("fallbacks", &self.fallbacks)
            .finish()
    }
}
