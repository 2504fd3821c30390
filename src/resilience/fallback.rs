//! Fallback strategies.
//!
//! # Responsibilities
//! - Map operation types to degraded-response builders
//! - Always resolve: unknown types use the `"default"` strategy
//! - Provide the built-in strategies for the outcome measures services
//!
//! # Design Decisions
//! - Strategies are plain `Fn(&context, reason) -> Value`; they cannot fail
//! - The registry is concurrent so strategies can be registered while the
//!   breaker is serving traffic
//! - Every built-in result carries `success: false, fallback: true, reason`

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Operation type used when the caller has none.
pub const DEFAULT_OPERATION: &str = "default";

/// Reasons passed to fallback strategies.
pub mod reason {
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const OPERATION_TIMEOUT: &str = "OPERATION_TIMEOUT";
    pub const OPERATION_FAILED: &str = "OPERATION_FAILED";
}

/// A degraded-response builder: `(context, reason) -> result`.
pub type FallbackStrategy = Arc<dyn Fn(&Value, &str) -> Value + Send + Sync>;

/// Per-breaker registry of fallback strategies.
pub struct FallbackRegistry {
    strategies: DashMap<String, FallbackStrategy>,
}

impl FallbackRegistry {
    /// Registry holding only the generic `"default"` strategy.
    pub fn new() -> Self {
        let strategies: DashMap<String, FallbackStrategy> = DashMap::new();
        strategies.insert(DEFAULT_OPERATION.to_string(), Arc::new(default_response));
        Self { strategies }
    }

    /// Registry preloaded with the outcome measures strategies.
    ///
    /// `retry_after` is advertised by the report strategy; it should match
    /// the breaker's open timeout.
    pub fn with_builtin(retry_after: Duration) -> Self {
        let registry = Self::new();
        registry.register("database_query", database_query);
        registry.register("assessment_lookup", assessment_lookup);
        registry.register("ai_prediction", ai_prediction);
        registry.register("quality_indicators", quality_indicators);
        registry.register("cache_operation", cache_operation);

        let retry_after_secs = retry_after.as_secs();
        registry.register("report_generation", move |ctx, reason| {
            let mut body = base_response(reason, "Report generation is temporarily unavailable");
            body.insert("report".into(), Value::Null);
            body.insert("retry_after_secs".into(), json!(retry_after_secs));
            with_context(body, ctx)
        });

        registry
    }

    /// Register or replace the strategy for `operation_type`.
    pub fn register<F>(&self, operation_type: impl Into<String>, strategy: F)
    where
        F: Fn(&Value, &str) -> Value + Send + Sync + 'static,
    {
        self.strategies.insert(operation_type.into(), Arc::new(strategy));
    }

    /// Remove a strategy. The `"default"` entry cannot be removed.
    pub fn unregister(&self, operation_type: &str) -> bool {
        if operation_type == DEFAULT_OPERATION {
            tracing::warn!("Refusing to remove the default fallback strategy");
            return false;
        }
        self.strategies.remove(operation_type).is_some()
    }

    pub fn contains(&self, operation_type: &str) -> bool {
        self.strategies.contains_key(operation_type)
    }

    /// Registered operation types, sorted.
    pub fn operation_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.strategies.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Strategy for `operation_type`, or the default one.
    ///
    /// The returned handle is detached from the map so the strategy runs
    /// without holding a shard lock.
    pub fn resolve(&self, operation_type: &str) -> FallbackStrategy {
        self.strategies
            .get(operation_type)
            .or_else(|| self.strategies.get(DEFAULT_OPERATION))
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::new(default_response))
    }
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackRegistry")
            .field("operation_types", &self.operation_types())
            .finish()
    }
}

/// Shape produced by the built-in strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub success: bool,
    pub fallback: bool,
    pub reason: String,
    pub message: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Either a real result or a fallback payload.
///
/// Operations return `Guarded::Value`; fallback payloads decode into
/// `Guarded::Fallback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Guarded<T> {
    Fallback(FallbackResponse),
    Value(T),
}

impl<T> Guarded<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Guarded::Fallback(_))
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Guarded::Fallback(fb) => Some(fb.reason.as_str()),
            Guarded::Value(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Guarded::Value(v) => Some(v),
            Guarded::Fallback(_) => None,
        }
    }
}

fn base_response(reason: &str, message: &str) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("success".into(), Value::Bool(false));
    body.insert("fallback".into(), Value::Bool(true));
    body.insert("reason".into(), Value::String(reason.to_string()));
    body.insert("message".into(), Value::String(message.to_string()));
    body
}

/// Echo identifying context fields back so callers can correlate.
fn with_context(mut body: Map<String, Value>, ctx: &Value) -> Value {
    for key in ["patient_id", "assessment_id", "episode_id", "cache_key"] {
        if let Some(v) = ctx.get(key) {
            body.insert(key.into(), v.clone());
        }
    }
    Value::Object(body)
}

fn default_response(ctx: &Value, reason: &str) -> Value {
    let body = base_response(reason, "Service temporarily unavailable");
    with_context(body, ctx)
}

fn database_query(ctx: &Value, reason: &str) -> Value {
    let mut body = base_response(reason, "Database unavailable, returning empty result set");
    body.insert("data".into(), json!([]));
    body.insert("source".into(), json!("fallback"));
    with_context(body, ctx)
}

fn assessment_lookup(ctx: &Value, reason: &str) -> Value {
    let mut body = base_response(reason, "Assessment data unavailable");
    body.insert("assessment".into(), Value::Null);
    body.insert("requires_manual_entry".into(), Value::Bool(true));
    with_context(body, ctx)
}

fn ai_prediction(ctx: &Value, reason: &str) -> Value {
    let mut body = base_response(reason, "Outcome prediction unavailable, manual review required");
    body.insert("predictions".into(), json!([]));
    body.insert("confidence".into(), json!(0.0));
    body.insert("requires_manual_review".into(), Value::Bool(true));
    with_context(body, ctx)
}

fn quality_indicators(ctx: &Value, reason: &str) -> Value {
    let mut body = base_response(reason, "Quality indicators could not be computed");
    body.insert("indicators".into(), json!({}));
    body.insert("partial".into(), Value::Bool(true));
    with_context(body, ctx)
}

fn cache_operation(ctx: &Value, reason: &str) -> Value {
    let mut body = base_response(reason, "Cache unavailable");
    body.insert("hit".into(), Value::Bool(false));
    body.insert("value".into(), Value::Null);
    with_context(body, ctx)
}
