//! Rate limiter configuration.

use std::time::{Duration, Instant};

use crate::error::{GateError, Result};

/// Default number of permits granted per refresh period.
pub const DEFAULT_LIMIT_FOR_PERIOD: u32 = 50;
/// Default length of a refresh period.
pub const DEFAULT_LIMIT_REFRESH_PERIOD: Duration = Duration::from_millis(500);
/// Default time a caller waits for a permit.
pub const DEFAULT_TIMEOUT_DURATION: Duration = Duration::from_secs(5);

/// Immutable parameters of a rate limiter.
///
/// A config is built once and then shared (usually behind an `Arc`) by every
/// limiter created from it. None of its fields can change after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    limit_for_period: u32,
    limit_refresh_period: Duration,
    timeout_duration: Duration,
}

impl RateLimiterConfig {
    /// Config with 50 permits per 500 ms period and a 5 s timeout.
    pub fn of_defaults() -> Self {
        Self {
            limit_for_period: DEFAULT_LIMIT_FOR_PERIOD,
            limit_refresh_period: DEFAULT_LIMIT_REFRESH_PERIOD,
            timeout_duration: DEFAULT_TIMEOUT_DURATION,
        }
    }

    /// Create a validated config from its three parameters.
    pub fn new(
        limit_for_period: u32,
        limit_refresh_period: Duration,
        timeout_duration: Duration,
    ) -> Result<Self> {
        Self::custom()
            .limit_for_period(limit_for_period)
            .limit_refresh_period(limit_refresh_period)
            .timeout_duration(timeout_duration)
            .build()
    }

    /// Start a builder seeded with the defaults.
    pub fn custom() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::default()
    }

    /// Start a builder seeded with the values of an existing config.
    pub fn from_config(base: &RateLimiterConfig) -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder {
            limit_for_period: base.limit_for_period,
            limit_refresh_period: base.limit_refresh_period,
            timeout_duration: base.timeout_duration,
        }
    }

    /// Permits granted per refresh period.
    pub fn limit_for_period(&self) -> u32 {
        self.limit_for_period
    }

    /// Length of one refresh period.
    pub fn limit_refresh_period(&self) -> Duration {
        self.limit_refresh_period
    }

    /// Maximum time a caller waits for a permit.
    pub fn timeout_duration(&self) -> Duration {
        self.timeout_duration
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::of_defaults()
    }
}

/// Builder for [`RateLimiterConfig`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RateLimiterConfigBuilder {
    limit_for_period: u32,
    limit_refresh_period: Duration,
    timeout_duration: Duration,
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        RateLimiterConfig::from_config(&RateLimiterConfig::of_defaults())
    }
}

impl RateLimiterConfigBuilder {
    pub fn limit_for_period(mut self, limit_for_period: u32) -> Self {
        self.limit_for_period = limit_for_period;
        self
    }

    pub fn limit_refresh_period(mut self, limit_refresh_period: Duration) -> Self {
        self.limit_refresh_period = limit_refresh_period;
        self
    }

    pub fn timeout_duration(mut self, timeout_duration: Duration) -> Self {
        self.timeout_duration = timeout_duration;
        self
    }

    /// Validate the parameters and produce the config.
    ///
    /// Fails with [`GateError::InvalidConfiguration`] when the limit or the
    /// refresh period is zero, or when the refresh period is too large to
    /// compute a cycle end on the monotonic clock.
    pub fn build(self) -> Result<RateLimiterConfig> {
        if self.limit_for_period == 0 {
            return Err(GateError::InvalidConfiguration(
                "limit_for_period must be greater than 0".to_string(),
            ));
        }

        if self.limit_refresh_period.is_zero() {
            return Err(GateError::InvalidConfiguration(
                "limit_refresh_period must be greater than 0".to_string(),
            ));
        }

        if Instant::now().checked_add(self.limit_refresh_period).is_none() {
            return Err(GateError::InvalidConfiguration(format!(
                "limit_refresh_period {:?} is too large",
                self.limit_refresh_period
            )));
        }

        Ok(RateLimiterConfig {
            limit_for_period: self.limit_for_period,
            limit_refresh_period: self.limit_refresh_period,
            timeout_duration: self.timeout_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RateLimiterConfig::of_defaults();
        assert_eq!(config.limit_for_period(), 50);
        assert_eq!(config.limit_refresh_period(), Duration::from_millis(500));
        assert_eq!(config.timeout_duration(), Duration::from_secs(5));
        assert_eq!(config, RateLimiterConfig::default());
    }

    #[test]
    fn test_custom_config() {
        let config = RateLimiterConfig::custom()
            .limit_for_period(1)
            .limit_refresh_period(Duration::from_secs(1))
            .timeout_duration(Duration::from_millis(250))
            .build()
            .unwrap();

        assert_eq!(config.limit_for_period(), 1);
        assert_eq!(config.limit_refresh_period(), Duration::from_secs(1));
        assert_eq!(config.timeout_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_timeout_is_valid() {
        let config = RateLimiterConfig::new(10, Duration::from_secs(1), Duration::ZERO).unwrap();
        assert_eq!(config.timeout_duration(), Duration::ZERO);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let result = RateLimiterConfig::new(0, Duration::from_secs(1), Duration::ZERO);
        assert!(matches!(result, Err(GateError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_refresh_period_rejected() {
        let result = RateLimiterConfig::custom()
            .limit_refresh_period(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(GateError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_unrepresentable_refresh_period_rejected() {
        let result = RateLimiterConfig::custom()
            .limit_refresh_period(Duration::MAX)
            .build();
        assert!(matches!(result, Err(GateError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_from_config_overrides_single_field() {
        let base = RateLimiterConfig::new(5, Duration::from_secs(2), Duration::from_secs(1)).unwrap();
        let derived = RateLimiterConfig::from_config(&base)
            .timeout_duration(Duration::ZERO)
            .build()
            .unwrap();

        assert_eq!(derived.limit_for_period(), 5);
        assert_eq!(derived.limit_refresh_period(), Duration::from_secs(2));
        assert_eq!(derived.timeout_duration(), Duration::ZERO);
    }
}
