//! Shared breakers keyed by backend service.
//!
//! # Responsibilities
//! - Create one breaker per service on first use, from configuration
//! - Aggregate status and a system health score across services
//! - Tear every breaker down on shutdown

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::schema::BreakersConfig;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::status::BreakerStatus;

/// Registry of circuit breakers, one per backend service.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakersConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn from_config(config: BreakersConfig) -> Self {
        tracing::info!(
            configured_services = config.services.len(),
            "Circuit breaker registry created"
        );
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `service`, created on first use.
    ///
    /// Services with their own section use it; everything else gets
    /// `[breakers.default]`.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.value().clone();
        }

        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                let settings = self.config.settings_for(service);
                tracing::debug!(service, "Creating circuit breaker");
                CircuitBreaker::spawn(settings.to_breaker_config(service))
            })
            .value()
            .clone()
    }

    /// Insert a breaker built elsewhere, replacing any existing one.
    pub fn insert(&self, breaker: Arc<CircuitBreaker>) {
        if let Some(previous) = self.breakers.insert(breaker.name().to_string(), breaker) {
            previous.destroy();
        }
    }

    /// Names of services with a live breaker, sorted.
    pub fn list_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Status of every breaker, sorted by service name.
    pub fn all_status(&self) -> Vec<BreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();
        let mut statuses: Vec<BreakerStatus> = breakers.iter().map(|b| b.status()).collect();
        statuses.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        statuses
    }

    /// Share of healthy breakers in `[0.0, 1.0]`; `1.0` when there are none.
    pub fn health_score(&self) -> f64 {
        let total = self.breakers.len();
        if total == 0 {
            return 1.0;
        }
        let healthy = self.breakers.iter().filter(|e| e.value().is_healthy()).count();
        healthy as f64 / total as f64
    }

    /// Stop monitoring on every breaker and forget them.
    pub fn destroy_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();
        self.breakers.clear();
        for breaker in &breakers {
            breaker.destroy();
        }
        tracing::info!(count = breakers.len(), "All circuit breakers destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BreakerSettings;
    use crate::resilience::status::CircuitState;

    fn registry() -> BreakerRegistry {
        let mut config = BreakersConfig::default();
        config.default.enable_monitoring = false;
        config.services.insert(
            "database".into(),
            BreakerSettings {
                failure_threshold: 2,
                enable_monitoring: false,
                ..BreakerSettings::default()
            },
        );
        BreakerRegistry::from_config(config)
    }

    #[test]
    fn test_get_reuses_breakers() {
        let registry = registry();
        let a = registry.get("database");
        let b = registry.get("database");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.config().failure_threshold, 2);

        let cache = registry.get("cache");
        assert_eq!(cache.config().failure_threshold, 5);
        assert_eq!(cache.name(), "cache");

        assert_eq!(registry.list_services(), vec!["cache", "database"]);
    }

    #[test]
    fn test_health_score() {
        let registry = registry();
        assert_eq!(registry.health_score(), 1.0);

        registry.get("database");
        registry.get("cache").force_state(CircuitState::Open);
        assert_eq!(registry.health_score(), 0.5);

        let statuses = registry.all_status();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].service_name, "cache");
        assert!(!statuses[0].is_healthy);
    }

    #[tokio::test]
    async fn test_destroy_all_clears_registry() {
        let mut config = BreakersConfig::default();
        config.default.enable_monitoring = true;
        let registry = BreakerRegistry::from_config(config);

        let breaker = registry.get("ai_service");
        assert!(breaker.is_monitoring());

        registry.destroy_all();
        assert!(!breaker.is_monitoring());
        assert!(registry.list_services().is_empty());
    }
}
