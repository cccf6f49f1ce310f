//! Rate limiting logic and state management.

pub mod config;
mod decorate;
mod limiter;
mod metrics;
mod registry;

pub use config::{RateLimiterConfig, RateLimiterConfigBuilder};
pub use limiter::RateLimiter;
pub use metrics::Metrics;
pub use registry::RateLimiterRegistry;
