//! Config file → registry → protected service.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::Utc;
use outcome_breaker::config::load_config;
use outcome_breaker::resilience::{BreakerRegistry, CircuitState, Guarded};
use outcome_breaker::services::{
    Assessment, AssessmentStore, MeasureCache, OutcomeMeasuresService, OutcomePrediction,
    OutcomePredictor,
};
use serde_json::{json, Value};

struct DownStore;

impl AssessmentStore for DownStore {
    type Error = String;

    async fn load_assessment(&self, _assessment_id: &str) -> Result<Assessment, String> {
        Err("sql deadlock detected".into())
    }
}

struct FixedPredictor;

impl OutcomePredictor for FixedPredictor {
    type Error = String;

    async fn predict(&self, assessment: &Assessment) -> Result<OutcomePrediction, String> {
        Ok(OutcomePrediction {
            patient_id: assessment.patient_id.clone(),
            assessment_id: assessment.assessment_id.clone(),
            measures: BTreeMap::from([("ambulation_improvement".to_string(), 0.72)]),
            confidence: 0.81,
        })
    }
}

struct WarmCache;

impl MeasureCache for WarmCache {
    type Error = String;

    async fn get(&self, key: &str) -> Result<Option<Value>, String> {
        Ok(Some(json!({ "key": key, "measures": { "dyspnea": 1 } })))
    }
}

#[tokio::test(start_paused = true)]
async fn test_configured_thresholds_apply_per_service() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[breakers.default]
enable_monitoring = false

[breakers.database]
failure_threshold = 2
enable_monitoring = false
"#
    )
    .unwrap();

    let config = load_config(file.path()).unwrap();
    let registry = BreakerRegistry::from_config(config.breakers);
    let service = OutcomeMeasuresService::new(&registry, DownStore, FixedPredictor, WarmCache);

    for _ in 0..2 {
        let result = service.fetch_assessment("a-9").await.unwrap();
        assert!(result.is_fallback());
    }
    assert_eq!(registry.get("database").state(), CircuitState::Open);
    assert_eq!(registry.get("database").config().failure_threshold, 2);

    let assessment = Assessment {
        assessment_id: "a-9".into(),
        patient_id: "p-3".into(),
        episode_id: None,
        instrument: "OASIS-E".into(),
        scores: BTreeMap::new(),
        completed_at: Utc::now(),
    };
    let prediction = service.predict_outcomes(&assessment).await.unwrap();
    match prediction {
        Guarded::Value(p) => assert_eq!(p.confidence, 0.81),
        Guarded::Fallback(fb) => panic!("unexpected fallback: {}", fb.reason),
    }

    let cached = service.cached_measures("measures:p-3").await.unwrap();
    assert_eq!(cached.into_value().flatten().unwrap()["key"], "measures:p-3");

    assert_eq!(registry.list_services(), vec!["ai_service", "cache", "database"]);
    assert!((registry.health_score() - 2.0 / 3.0).abs() < f64::EPSILON);

    registry.destroy_all();
}
