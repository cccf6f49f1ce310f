//! File-based settings for rate limiters.
//!
//! Settings are plain YAML. Every numeric field is a signed integer so that a
//! negative value reaches validation and is reported as an invalid
//! configuration instead of a parse failure.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GateError, Result};
use crate::ratelimit::config::{
    DEFAULT_LIMIT_FOR_PERIOD, DEFAULT_LIMIT_REFRESH_PERIOD, DEFAULT_TIMEOUT_DURATION,
};
use crate::ratelimit::RateLimiterConfig;

/// Top-level settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSettings {
    /// Config used by limiters that do not name another one
    #[serde(default)]
    pub defaults: LimiterSettings,

    /// Named shared configurations
    #[serde(default)]
    pub configs: HashMap<String, LimiterSettings>,

    /// Limiters to create up front, keyed by name
    #[serde(default)]
    pub limiters: HashMap<String, LimiterEntry>,
}

/// A complete set of limiter parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterSettings {
    #[serde(default = "default_limit_for_period")]
    pub limit_for_period: i64,

    #[serde(default = "default_limit_refresh_period_ms")]
    pub limit_refresh_period_ms: i64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            limit_for_period: default_limit_for_period(),
            limit_refresh_period_ms: default_limit_refresh_period_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_limit_for_period() -> i64 {
    DEFAULT_LIMIT_FOR_PERIOD as i64
}

fn default_limit_refresh_period_ms() -> i64 {
    DEFAULT_LIMIT_REFRESH_PERIOD.as_millis() as i64
}

fn default_timeout_ms() -> i64 {
    DEFAULT_TIMEOUT_DURATION.as_millis() as i64
}

impl LimiterSettings {
    /// Validate into a [`RateLimiterConfig`].
    pub fn to_config(&self) -> Result<RateLimiterConfig> {
        RateLimiterConfig::custom()
            .limit_for_period(permits(self.limit_for_period, "limit_for_period")?)
            .limit_refresh_period(millis(self.limit_refresh_period_ms, "limit_refresh_period_ms")?)
            .timeout_duration(millis(self.timeout_ms, "timeout_ms")?)
            .build()
    }
}

/// Settings for one named limiter.
///
/// The limiter starts from `base_config` (a key of [`GateSettings::configs`])
/// or from the defaults, and any field given here overrides the base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterEntry {
    #[serde(default)]
    pub base_config: Option<String>,

    #[serde(default)]
    pub limit_for_period: Option<i64>,

    #[serde(default)]
    pub limit_refresh_period_ms: Option<i64>,

    #[serde(default)]
    pub timeout_ms: Option<i64>,
}

impl LimiterEntry {
    /// Apply this entry's overrides on top of `base`.
    pub fn resolve(&self, base: &RateLimiterConfig) -> Result<RateLimiterConfig> {
        let mut builder = RateLimiterConfig::from_config(base);
        if let Some(limit) = self.limit_for_period {
            builder = builder.limit_for_period(permits(limit, "limit_for_period")?);
        }
        if let Some(period) = self.limit_refresh_period_ms {
            builder = builder.limit_refresh_period(millis(period, "limit_refresh_period_ms")?);
        }
        if let Some(timeout) = self.timeout_ms {
            builder = builder.timeout_duration(millis(timeout, "timeout_ms")?);
        }
        builder.build()
    }

    /// Whether the entry only points at a shared config without changing it.
    pub fn is_shared(&self) -> bool {
        self.limit_for_period.is_none()
            && self.limit_refresh_period_ms.is_none()
            && self.timeout_ms.is_none()
    }
}

fn permits(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        GateError::InvalidConfiguration(format!("{} must be between 1 and {}, got {}", field, u32::MAX, value))
    })
}

fn millis(value: i64, field: &str) -> Result<Duration> {
    u64::try_from(value)
        .map(Duration::from_millis)
        .map_err(|_| GateError::InvalidConfiguration(format!("{} must not be negative, got {}", field, value)))
}

impl GateSettings {
    /// Load settings from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limiter settings");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse rate limiter settings: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = GateSettings::from_yaml("{}").unwrap();
        assert!(settings.configs.is_empty());
        assert!(settings.limiters.is_empty());
        assert_eq!(settings.defaults.to_config().unwrap(), RateLimiterConfig::of_defaults());
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
defaults:
  limit_for_period: 10
  limit_refresh_period_ms: 1000
  timeout_ms: 0
configs:
  strict:
    limit_for_period: 1
    limit_refresh_period_ms: 1000
    timeout_ms: 250
limiters:
  flightSearchService:
    base_config: strict
  bookingService:
    limit_for_period: 20
"#;
        let settings = GateSettings::from_yaml(yaml).unwrap();

        let defaults = settings.defaults.to_config().unwrap();
        assert_eq!(defaults.limit_for_period(), 10);
        assert_eq!(defaults.timeout_duration(), Duration::ZERO);

        let strict = settings.configs["strict"].to_config().unwrap();
        assert_eq!(strict.timeout_duration(), Duration::from_millis(250));

        let flight = &settings.limiters["flightSearchService"];
        assert_eq!(flight.base_config.as_deref(), Some("strict"));
        assert!(flight.is_shared());

        let booking = &settings.limiters["bookingService"];
        assert!(!booking.is_shared());
        let resolved = booking.resolve(&defaults).unwrap();
        assert_eq!(resolved.limit_for_period(), 20);
        assert_eq!(resolved.limit_refresh_period(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings = GateSettings::from_yaml("defaults:\n  limit_for_period: 3\n").unwrap();
        let config = settings.defaults.to_config().unwrap();
        assert_eq!(config.limit_for_period(), 3);
        assert_eq!(config.limit_refresh_period(), Duration::from_millis(500));
        assert_eq!(config.timeout_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_negative_timeout_is_invalid_configuration() {
        let settings = LimiterSettings {
            timeout_ms: -1,
            ..LimiterSettings::default()
        };
        assert!(matches!(settings.to_config(), Err(GateError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_non_positive_limit_and_period_are_invalid() {
        let zero_limit = LimiterSettings {
            limit_for_period: 0,
            ..LimiterSettings::default()
        };
        assert!(matches!(zero_limit.to_config(), Err(GateError::InvalidConfiguration(_))));

        let negative_period = LimiterSettings {
            limit_refresh_period_ms: -500,
            ..LimiterSettings::default()
        };
        assert!(matches!(negative_period.to_config(), Err(GateError::InvalidConfiguration(_))));

        let entry = LimiterEntry {
            limit_for_period: Some(-3),
            ..LimiterEntry::default()
        };
        assert!(matches!(
            entry.resolve(&RateLimiterConfig::of_defaults()),
            Err(GateError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let result = GateSettings::from_yaml("defaults: [not, a, map]");
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_misspelled_field_is_config_error() {
        // `timeout` instead of `timeout_ms` must not fall back to the default.
        let result = GateSettings::from_yaml("defaults:\n  timeout: 0\n");
        assert!(matches!(result, Err(GateError::Config(_))));

        let result = GateSettings::from_yaml("limiters:\n  svc:\n    limit: 5\n");
        assert!(matches!(result, Err(GateError::Config(_))));

        let result = GateSettings::from_yaml("limters: {}\n");
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = GateSettings::from_file("/nonexistent/permit-gate.yaml");
        assert!(matches!(result, Err(GateError::Io(_))));
    }
}
