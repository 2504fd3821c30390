//! Breaker notifications.
//!
//! # Data Flow
//! ```text
//! CircuitBreaker (state mutation, lock released)
//!     → EventBus::emit
//!     → broadcast channel
//!     → subscribers (monitor alert rules, external observers)
//! ```
//!
//! # Design Decisions
//! - Events are emitted after the state lock is dropped; subscribers only see
//!   copies and have no handle back into the breaker
//! - Slow subscribers lag and lose events instead of blocking callers

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::resilience::classify::FailureKind;
use crate::resilience::status::{BreakerStatus, CircuitState};

const EVENT_CAPACITY: usize = 256;

/// Everything a breaker reports to the outside world.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BreakerEvent {
    StateChange(StateChangeEvent),
    Failure(FailureEvent),
    Fallback(FallbackEvent),
    HealthCheck(Box<BreakerStatus>),
    Alert(AlertEvent),
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChangeEvent {
    pub from: CircuitState,
    pub to: CircuitState,
    pub timestamp: DateTime<Utc>,
    pub failure_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureEvent {
    pub error: String,
    pub kind: FailureKind,
    pub state: CircuitState,
    /// Post-pruning count, including this failure.
    pub failure_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackEvent {
    pub operation_type: String,
    pub reason: String,
    pub context: Value,
    pub result: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    CircuitOpened,
    CircuitClosed,
    HighFailureRate,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::CircuitOpened => "CIRCUIT_OPENED",
            AlertKind::CircuitClosed => "CIRCUIT_CLOSED",
            AlertKind::HighFailureRate => "HIGH_FAILURE_RATE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

/// Broadcast bus owned by a single breaker.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BreakerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Attach a new listener. It only sees events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn emit(&self, event: BreakerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
