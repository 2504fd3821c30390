//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, durations > 0)
//! - Validate observability settings (log level, metrics address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{AppConfig, BreakerSettings};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check every section, collecting all problems.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    validate_breaker("breakers.default", &config.breakers.default, &mut errors);
    for (name, settings) in &config.breakers.services {
        if name.trim().is_empty() {
            errors.push(ValidationError::new("breakers", "service name must not be empty"));
        }
        validate_breaker(&format!("breakers.{}", name), settings, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(prefix: &str, settings: &BreakerSettings, errors: &mut Vec<ValidationError>) {
    if settings.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{}.failure_threshold", prefix),
            "must be at least 1",
        ));
    }
    if settings.success_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{}.success_threshold", prefix),
            "must be at least 1",
        ));
    }

    let durations = [
        ("open_timeout_ms", settings.open_timeout_ms),
        ("monitor_window_ms", settings.monitor_window_ms),
        ("execution_timeout_ms", settings.execution_timeout_ms),
    ];
    for (field, value) in durations {
        if value == 0 {
            errors.push(ValidationError::new(format!("{}.{}", prefix, field), "must be greater than 0"));
        }
    }

    if settings.enable_monitoring && settings.health_check_interval_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.health_check_interval_ms", prefix),
            "must be greater than 0 when monitoring is enabled",
        ));
    }
}
