//! Circuit breaking for outcome measures backends.
//!
//! Wraps fragile downstream calls (assessment database, outcome prediction
//! service, measure cache) in per-service circuit breakers that fail fast,
//! time out slow calls and serve typed fallback results.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod services;

pub use config::schema::AppConfig;
pub use lifecycle::Shutdown;
pub use resilience::{
    BreakerError, BreakerEvent, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    Guarded,
};
pub use services::OutcomeMeasuresService;
