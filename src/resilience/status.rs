//! Breaker state, statistics and status snapshots.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::resilience::circuit_breaker::CircuitBreakerConfig;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow to the protected service.
    Closed,
    /// Calls are rejected and served by fallbacks.
    Open,
    /// Trial calls are let through to probe recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Numeric value used for the state gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognized state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown circuit state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for CircuitState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" | "HALFOPEN" => Ok(CircuitState::HalfOpen),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

/// Lifetime counters for one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_fallbacks: u64,
    pub state_changes: u64,
    pub last_state_change_time: Option<DateTime<Utc>>,
    /// Survives `reset()`.
    pub start_time: DateTime<Utc>,
}

impl Statistics {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            total_timeouts: 0,
            total_fallbacks: 0,
            state_changes: 0,
            last_state_change_time: None,
            start_time,
        }
    }

    /// Zero every counter, keeping the original start time.
    pub fn reset(&mut self) {
        *self = Self::new(self.start_time);
    }
}

/// Read-only view of a breaker at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub service_name: String,
    pub state: CircuitState,
    /// Count as of the last prune; may include records that have since expired.
    pub failure_count: usize,
    pub consecutive_successes: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub statistics: Statistics,
    pub config: CircuitBreakerConfig,
    pub is_healthy: bool,
    #[serde(rename = "uptime_ms", serialize_with = "serialize_millis")]
    pub uptime: Duration,
}

/// Closed, and fewer failures than half the threshold.
pub fn is_healthy(state: CircuitState, failure_count: usize, failure_threshold: u32) -> bool {
    state == CircuitState::Closed && (failure_count as f64) < f64::from(failure_threshold) / 2.0
}

pub(crate) fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state_names() {
        assert_eq!("closed".parse::<CircuitState>(), Ok(CircuitState::Closed));
        assert_eq!("OPEN".parse::<CircuitState>(), Ok(CircuitState::Open));
        assert_eq!("half-open".parse::<CircuitState>(), Ok(CircuitState::HalfOpen));
        assert_eq!("HALF_OPEN".parse::<CircuitState>(), Ok(CircuitState::HalfOpen));
        assert!("ajar".parse::<CircuitState>().is_err());
    }

    #[test]
    fn test_health_rule() {
        assert!(is_healthy(CircuitState::Closed, 2, 5));
        // 3 is not below 2.5
        assert!(!is_healthy(CircuitState::Closed, 3, 5));
        assert!(!is_healthy(CircuitState::HalfOpen, 0, 5));
        assert!(!is_healthy(CircuitState::Open, 0, 5));
    }

    #[test]
    fn test_statistics_reset_keeps_start_time() {
        let start = Utc::now();
        let mut stats = Statistics::new(start);
        stats.total_requests = 10;
        stats.total_failures = 4;
        stats.state_changes = 2;
        stats.last_state_change_time = Some(Utc::now());

        stats.reset();

        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_failures, 0);
        assert_eq!(stats.state_changes, 0);
        assert!(stats.last_state_change_time.is_none());
        assert_eq!(stats.start_time, start);
    }
}
