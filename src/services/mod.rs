//! Outcome measures backends, guarded by circuit breakers.
//!
//! # Data Flow
//! ```text
//! caller
//!     → OutcomeMeasuresService method
//!     → BreakerRegistry::get("database" | "ai_service" | "cache")
//!     → CircuitBreaker::execute(collaborator call, operation type, context)
//!     → Guarded<T> (real value or fallback payload)
//! ```

pub mod outcome_measures;

pub use outcome_measures::{
    Assessment, AssessmentStore, MeasureCache, OutcomeMeasuresService, OutcomePrediction,
    OutcomePredictor,
};
