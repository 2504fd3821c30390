//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Durations are
//! written in milliseconds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::CircuitBreakerConfig;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Per-service circuit breaker settings.
    pub breakers: BreakersConfig,
}

/// Breaker settings keyed by service name.
///
/// ```toml
/// [breakers.default]
/// failure_threshold = 5
///
/// [breakers.ai_service]
/// execution_timeout_ms = 45000
/// ```
///
/// A named section does not inherit from `default`; omitted fields take the
/// built-in defaults. `default` applies to services with no section at all.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BreakersConfig {
    #[serde(default)]
    pub default: BreakerSettings,

    #[serde(flatten)]
    pub services: BTreeMap<String, BreakerSettings>,
}

impl BreakersConfig {
    /// Settings for `service`, falling back to the default section.
    pub fn settings_for(&self, service: &str) -> &BreakerSettings {
        self.services.get(service).unwrap_or(&self.default)
    }
}

/// Circuit breaker settings for one service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    /// Failures within the monitor window that open the circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,

    /// Time the circuit stays open before a trial call, in milliseconds.
    pub open_timeout_ms: u64,

    /// Sliding failure window, in milliseconds.
    pub monitor_window_ms: u64,

    /// Deadline for a single protected operation, in milliseconds.
    pub execution_timeout_ms: u64,

    /// Run the periodic health check and alert rules.
    pub enable_monitoring: bool,

    /// Health check period, in milliseconds.
    pub health_check_interval_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout_ms: 60_000,
            monitor_window_ms: 300_000,
            execution_timeout_ms: 30_000,
            enable_monitoring: true,
            health_check_interval_ms: 30_000,
        }
    }
}

impl BreakerSettings {
    /// Runtime breaker config for `service_name`.
    pub fn to_breaker_config(&self, service_name: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            service_name: service_name.to_string(),
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            monitor_window: Duration::from_millis(self.monitor_window_ms),
            execution_timeout: Duration::from_millis(self.execution_timeout_ms),
            enable_monitoring: self.enable_monitoring,
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
