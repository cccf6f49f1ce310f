//! Named rate limiters sharing configurations.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::config::RateLimiterConfig;
use super::limiter::RateLimiter;
use crate::config::GateSettings;
use crate::error::{GateError, Result};

/// Hands out one [`RateLimiter`] per name.
///
/// Lookups create the limiter on first use. Creation goes through the map's
/// entry API, so concurrent callers asking for the same name all receive the
/// same instance.
pub struct RateLimiterRegistry {
    /// Config for limiters created without an explicit one
    default_config: Arc<RateLimiterConfig>,
    /// Named shared configurations
    configurations: DashMap<String, Arc<RateLimiterConfig>>,
    /// Limiters indexed by name
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    /// Create a registry whose limiters default to `config`.
    pub fn of(config: impl Into<Arc<RateLimiterConfig>>) -> Self {
        Self {
            default_config: config.into(),
            configurations: DashMap::new(),
            limiters: DashMap::new(),
        }
    }

    pub fn of_defaults() -> Self {
        Self::of(RateLimiterConfig::of_defaults())
    }

    /// Build a registry from settings, creating every listed limiter.
    pub fn from_settings(settings: &GateSettings) -> Result<Self> {
        let registry = Self::of(settings.defaults.to_config()?);

        for (name, config) in &settings.configs {
            registry.add_configuration(name, config.to_config()?);
        }

        for (name, entry) in &settings.limiters {
            let base = match &entry.base_config {
                Some(config_name) => registry
                    .configuration(config_name)
                    .ok_or_else(|| GateError::UnknownConfiguration(config_name.clone()))?,
                None => Arc::clone(&registry.default_config),
            };

            if entry.is_shared() {
                registry.rate_limiter_with_config(name, base);
            } else {
                registry.rate_limiter_with_config(name, entry.resolve(&base)?);
            }
        }

        info!(
            configurations = registry.configurations.len(),
            limiters = registry.limiters.len(),
            "Rate limiter registry built from settings"
        );
        Ok(registry)
    }

    /// Get the limiter for `name`, creating it with the default config if absent.
    pub fn rate_limiter(&self, name: &str) -> Arc<RateLimiter> {
        self.rate_limiter_with_config(name, Arc::clone(&self.default_config))
    }

    /// Get the limiter for `name`, creating it with `config` if absent.
    ///
    /// An existing limiter is returned unchanged, whatever config it was created with.
    pub fn rate_limiter_with_config(
        &self,
        name: &str,
        config: impl Into<Arc<RateLimiterConfig>>,
    ) -> Arc<RateLimiter> {
        let entry = self.limiters.entry(name.to_string()).or_insert_with(|| {
            debug!(limiter = %name, "Registering rate limiter");
            Arc::new(RateLimiter::new(name, config))
        });
        Arc::clone(entry.value())
    }

    /// Get the limiter for `name`, creating it with a named configuration if absent.
    pub fn rate_limiter_with_config_name(
        &self,
        name: &str,
        config_name: &str,
    ) -> Result<Arc<RateLimiter>> {
        let config = self
            .configuration(config_name)
            .ok_or_else(|| GateError::UnknownConfiguration(config_name.to_string()))?;
        Ok(self.rate_limiter_with_config(name, config))
    }

    /// Register a shared configuration under `name`, replacing any previous one.
    ///
    /// Limiters already created keep the config they were built with.
    pub fn add_configuration(&self, name: &str, config: impl Into<Arc<RateLimiterConfig>>) {
        self.configurations.insert(name.to_string(), config.into());
    }

    pub fn configuration(&self, name: &str) -> Option<Arc<RateLimiterConfig>> {
        self.configurations.get(name).map(|c| Arc::clone(c.value()))
    }

    pub fn default_config(&self) -> &Arc<RateLimiterConfig> {
        &self.default_config
    }

    /// Look up a limiter without creating it.
    pub fn find(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name).map(|l| Arc::clone(l.value()))
    }

    /// Forget a limiter. Holders of the returned `Arc` may keep using it.
    pub fn remove(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.remove(name).map(|(_, limiter)| limiter)
    }

    /// All registered limiters, ordered by name.
    pub fn all_rate_limiters(&self) -> Vec<Arc<RateLimiter>> {
        let mut limiters: Vec<_> = self
            .limiters
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        limiters.sort_by(|a, b| a.name().cmp(b.name()));
        limiters
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::of_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn strict() -> RateLimiterConfig {
        RateLimiterConfig::new(1, Duration::from_secs(1), Duration::from_millis(250)).unwrap()
    }

    #[test]
    fn test_same_name_returns_same_instance() {
        let registry = RateLimiterRegistry::of(strict());

        let a = registry.rate_limiter("flightSearchService");
        let b = registry.rate_limiter("flightSearchService");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.all_rate_limiters().len(), 1);
    }

    #[test]
    fn test_limiters_share_default_config() {
        let registry = RateLimiterRegistry::of(strict());

        let a = registry.rate_limiter("a");
        let b = registry.rate_limiter("b");

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(a.config(), registry.default_config()));
        assert!(Arc::ptr_eq(b.config(), registry.default_config()));
    }

    #[test]
    fn test_existing_limiter_keeps_its_config() {
        let registry = RateLimiterRegistry::of_defaults();

        let first = registry.rate_limiter_with_config("svc", strict());
        let second = registry.rate_limiter("svc");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().limit_for_period(), 1);
    }

    #[test]
    fn test_concurrent_lookup_creates_one_instance() {
        let registry = Arc::new(RateLimiterRegistry::of_defaults());
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.rate_limiter("contended")
                })
            })
            .collect();

        let limiters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(limiters.iter().all(|l| Arc::ptr_eq(l, &limiters[0])));
        assert_eq!(registry.all_rate_limiters().len(), 1);
    }

    #[test]
    fn test_named_configuration() {
        let registry = RateLimiterRegistry::of_defaults();
        registry.add_configuration("strict", strict());

        let limiter = registry.rate_limiter_with_config_name("svc", "strict").unwrap();
        assert_eq!(limiter.config().timeout_duration(), Duration::from_millis(250));

        let missing = registry.rate_limiter_with_config_name("other", "relaxed");
        assert!(matches!(missing, Err(GateError::UnknownConfiguration(ref n)) if n == "relaxed"));
        assert!(registry.find("other").is_none());
    }

    #[test]
    fn test_find_and_remove() {
        let registry = RateLimiterRegistry::of_defaults();
        assert!(registry.find("svc").is_none());

        let created = registry.rate_limiter("svc");
        assert!(Arc::ptr_eq(&registry.find("svc").unwrap(), &created));

        let removed = registry.remove("svc").unwrap();
        assert!(Arc::ptr_eq(&removed, &created));
        assert!(registry.find("svc").is_none());

        let recreated = registry.rate_limiter("svc");
        assert!(!Arc::ptr_eq(&recreated, &created));
    }

    #[test]
    fn test_all_rate_limiters_sorted() {
        let registry = RateLimiterRegistry::of_defaults();
        registry.rate_limiter("charlie");
        registry.rate_limiter("alpha");
        registry.rate_limiter("bravo");

        let names: Vec<String> = registry
            .all_rate_limiters()
            .iter()
            .map(|l| l.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn test_from_settings() {
        let yaml = r#"
defaults:
  limit_for_period: 10
configs:
  strict:
    limit_for_period: 1
    limit_refresh_period_ms: 1000
    timeout_ms: 250
limiters:
  flightSearchService:
    base_config: strict
  bookingService:
    base_config: strict
    timeout_ms: 0
  inventoryService: {}
"#;
        let settings = GateSettings::from_yaml(yaml).unwrap();
        let registry = RateLimiterRegistry::from_settings(&settings).unwrap();

        let flight = registry.find("flightSearchService").unwrap();
        assert!(Arc::ptr_eq(flight.config(), &registry.configuration("strict").unwrap()));

        let booking = registry.find("bookingService").unwrap();
        assert_eq!(booking.config().limit_for_period(), 1);
        assert_eq!(booking.config().timeout_duration(), Duration::ZERO);

        let inventory = registry.find("inventoryService").unwrap();
        assert!(Arc::ptr_eq(inventory.config(), registry.default_config()));
        assert_eq!(inventory.config().limit_for_period(), 10);
    }

    #[test]
    fn test_from_settings_unknown_base_config() {
        let yaml = r#"
limiters:
  flightSearchService:
    base_config: missing
"#;
        let settings = GateSettings::from_yaml(yaml).unwrap();
        let result = RateLimiterRegistry::from_settings(&settings);
        assert!(matches!(result, Err(GateError::UnknownConfiguration(_))));
    }

    #[test]
    fn test_from_settings_invalid_defaults() {
        let yaml = "defaults:\n  limit_for_period: 0\n";
        let settings = GateSettings::from_yaml(yaml).unwrap();
        let result = RateLimiterRegistry::from_settings(&settings);
        assert!(matches!(result, Err(GateError::InvalidConfiguration(_))));
    }
}
