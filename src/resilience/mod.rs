//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an outcome measures backend:
//!     → circuit_breaker.rs (admit or reject based on state)
//!     → timeouts.rs (race the operation against its deadline)
//!     → On failure: classify.rs (label the error), window.rs (count it)
//!     → fallback.rs (degraded result for the operation type)
//!     → events.rs (state changes, failures, fallbacks to subscribers)
//!
//! Background, per breaker:
//!     monitor.rs (health tick, alert rules)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every protected call has a deadline
//! - One breaker per backend service, shared through registry.rs
//! - Callers always get a result; degraded results are marked as fallbacks

pub mod circuit_breaker;
pub mod classify;
pub mod events;
pub mod fallback;
pub mod monitor;
pub mod registry;
pub mod status;
pub mod timeouts;
pub mod window;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
pub use classify::{classify_error, FailureKind};
pub use events::{AlertEvent, AlertKind, BreakerEvent};
pub use fallback::{FallbackRegistry, FallbackResponse, Guarded};
pub use registry::BreakerRegistry;
pub use status::{BreakerStatus, CircuitState, Statistics};
