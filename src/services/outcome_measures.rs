//! Protected calls to the assessment store, outcome predictor and measure cache.
//!
//! The collaborators are traits; this module only routes their calls through
//! the matching breaker and operation type. Scoring and prediction logic live
//! behind the traits.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::resilience::{BreakerError, BreakerRegistry, BreakerStatus, CircuitBreaker, Guarded};

pub const DATABASE_SERVICE: &str = "database";
pub const AI_SERVICE: &str = "ai_service";
pub const CACHE_SERVICE: &str = "cache";

/// A completed clinical assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub assessment_id: String,
    pub patient_id: String,
    #[serde(default)]
    pub episode_id: Option<String>,
    /// Assessment instrument, e.g. `"OASIS-E"`.
    pub instrument: String,
    /// Item code to recorded score.
    pub scores: BTreeMap<String, f64>,
    pub completed_at: DateTime<Utc>,
}

/// Predicted outcome measures for one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomePrediction {
    pub patient_id: String,
    pub assessment_id: String,
    /// Measure name to predicted value.
    pub measures: BTreeMap<String, f64>,
    pub confidence: f64,
}

/// Source of stored assessments.
pub trait AssessmentStore: Send + Sync + 'static {
    type Error: Display + Send + 'static;

    fn load_assessment(
        &self,
        assessment_id: &str,
    ) -> impl Future<Output = Result<Assessment, Self::Error>> + Send;
}

/// External outcome prediction provider.
pub trait OutcomePredictor: Send + Sync + 'static {
    type Error: Display + Send + 'static;

    fn predict(
        &self,
        assessment: &Assessment,
    ) -> impl Future<Output = Result<OutcomePrediction, Self::Error>> + Send;
}

/// Cache of previously computed measures.
pub trait MeasureCache: Send + Sync + 'static {
    type Error: Display + Send + 'static;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send;
}

/// Outcome measures backends wrapped in per-service breakers.
pub struct OutcomeMeasuresService<S, P, C> {
    store: Arc<S>,
    predictor: Arc<P>,
    cache: Arc<C>,
    database: Arc<CircuitBreaker>,
    ai_service: Arc<CircuitBreaker>,
    cache_breaker: Arc<CircuitBreaker>,
}

impl<S, P, C> OutcomeMeasuresService<S, P, C>
where
    S: AssessmentStore,
    P: OutcomePredictor,
    C: MeasureCache,
{
    pub fn new(registry: &BreakerRegistry, store: S, predictor: P, cache: C) -> Self {
        Self {
            store: Arc::new(store),
            predictor: Arc::new(predictor),
            cache: Arc::new(cache),
            database: registry.get(DATABASE_SERVICE),
            ai_service: registry.get(AI_SERVICE),
            cache_breaker: registry.get(CACHE_SERVICE),
        }
    }

    /// Load an assessment. Falls back to an `assessment_lookup` payload
    /// asking for manual entry.
    pub async fn fetch_assessment(
        &self,
        assessment_id: &str,
    ) -> Result<Guarded<Assessment>, BreakerError> {
        let store = self.store.clone();
        let id = assessment_id.to_string();

        self.database
            .execute(
                move || async move { store.load_assessment(&id).await.map(Guarded::Value) },
                "assessment_lookup",
                json!({ "assessment_id": assessment_id }),
            )
            .await
    }

    /// Predict outcomes for `assessment`. Falls back to an empty prediction
    /// flagged for manual review.
    pub async fn predict_outcomes(
        &self,
        assessment: &Assessment,
    ) -> Result<Guarded<OutcomePrediction>, BreakerError> {
        let predictor = self.predictor.clone();
        let input = assessment.clone();

        self.ai_service
            .execute(
                move || async move { predictor.predict(&input).await.map(Guarded::Value) },
                "ai_prediction",
                json!({
                    "patient_id": assessment.patient_id,
                    "assessment_id": assessment.assessment_id,
                    "episode_id": assessment.episode_id,
                }),
            )
            .await
    }

    /// Look up cached measures. A cache miss is a real `None`, not a fallback.
    pub async fn cached_measures(&self, key: &str) -> Result<Guarded<Option<Value>>, BreakerError> {
        let cache = self.cache.clone();
        let cache_key = key.to_string();

        self.cache_breaker
            .execute(
                move || async move { cache.get(&cache_key).await.map(Guarded::Value) },
                "cache_operation",
                json!({ "cache_key": key }),
            )
            .await
    }

    /// Status of the three backing breakers.
    pub fn status(&self) -> Vec<BreakerStatus> {
        vec![
            self.database.status(),
            self.ai_service.status(),
            self.cache_breaker.status(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BreakerSettings, BreakersConfig};
    use crate::resilience::CircuitState;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn sample_assessment() -> Assessment {
        Assessment {
            assessment_id: "a-1".into(),
            patient_id: "p-1".into(),
            episode_id: Some("e-1".into()),
            instrument: "OASIS-E".into(),
            scores: BTreeMap::from([("M1800".to_string(), 2.0)]),
            completed_at: Utc::now(),
        }
    }

    struct Store {
        down: AtomicBool,
    }

    impl AssessmentStore for Store {
        type Error = String;

        async fn load_assessment(&self, assessment_id: &str) -> Result<Assessment, String> {
            if self.down.load(Ordering::SeqCst) {
                return Err("connection pool exhausted: ECONNREFUSED".into());
            }
            Ok(Assessment {
                assessment_id: assessment_id.to_string(),
                ..sample_assessment()
            })
        }
    }

    struct SlowPredictor;

    impl OutcomePredictor for SlowPredictor {
        type Error = String;

        async fn predict(&self, assessment: &Assessment) -> Result<OutcomePrediction, String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(OutcomePrediction {
                patient_id: assessment.patient_id.clone(),
                assessment_id: assessment.assessment_id.clone(),
                measures: BTreeMap::new(),
                confidence: 0.9,
            })
        }
    }

    struct EmptyCache;

    impl MeasureCache for EmptyCache {
        type Error = String;

        async fn get(&self, _key: &str) -> Result<Option<Value>, String> {
            Ok(None)
        }
    }

    fn registry() -> BreakerRegistry {
        let settings = BreakerSettings {
            failure_threshold: 2,
            execution_timeout_ms: 1_000,
            enable_monitoring: false,
            ..BreakerSettings::default()
        };
        BreakerRegistry::from_config(BreakersConfig {
            default: settings,
            services: BTreeMap::new(),
        })
    }

    fn service(
        registry: &BreakerRegistry,
        store_down: bool,
    ) -> OutcomeMeasuresService<Store, SlowPredictor, EmptyCache> {
        OutcomeMeasuresService::new(
            registry,
            Store {
                down: AtomicBool::new(store_down),
            },
            SlowPredictor,
            EmptyCache,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_assessment_passes_through() {
        let registry = registry();
        let service = service(&registry, false);

        let result = service.fetch_assessment("a-42").await.unwrap();
        let assessment = result.into_value().unwrap();
        assert_eq!(assessment.assessment_id, "a-42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_database_outage_opens_database_breaker_only() {
        let registry = registry();
        let service = service(&registry, true);

        for _ in 0..2 {
            let result = service.fetch_assessment("a-1").await.unwrap();
            match result {
                Guarded::Fallback(fb) => {
                    assert_eq!(fb.data["requires_manual_entry"], true);
                    assert_eq!(fb.data["assessment_id"], "a-1");
                }
                Guarded::Value(_) => panic!("expected fallback"),
            }
        }

        assert_eq!(registry.get(DATABASE_SERVICE).state(), CircuitState::Open);
        assert_eq!(registry.get(CACHE_SERVICE).state(), CircuitState::Closed);

        let result = service.fetch_assessment("a-1").await.unwrap();
        assert_eq!(result.fallback_reason(), Some("CIRCUIT_OPEN"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_prediction_times_out() {
        let registry = registry();
        let service = service(&registry, false);

        let result = service.predict_outcomes(&sample_assessment()).await.unwrap();
        match result {
            Guarded::Fallback(fb) => {
                assert_eq!(fb.reason, "OPERATION_TIMEOUT");
                assert_eq!(fb.data["requires_manual_review"], true);
                assert_eq!(fb.data["patient_id"], "p-1");
            }
            Guarded::Value(_) => panic!("expected fallback"),
        }
        assert_eq!(registry.get(AI_SERVICE).status().statistics.total_timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_miss_is_not_a_fallback() {
        let registry = registry();
        let service = service(&registry, false);

        let result = service.cached_measures("measures:p-1").await.unwrap();
        assert_eq!(result, Guarded::Value(None));
        assert_eq!(service.status().len(), 3);
    }
}
