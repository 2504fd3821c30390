//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! CircuitBreaker::start_monitoring
//!     → Shutdown (one per monitor)
//!     → health tick + alert listener subscribe
//!
//! CircuitBreaker::destroy / MonitorHandle drop
//!     → Shutdown::trigger → tasks exit
//!
//! CLI:
//!     SIGTERM/SIGINT → signals.rs → Shutdown::trigger → simulation stops
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
