//! Error types for the permit gate.

use thiserror::Error;

/// Main error type for permit gate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// A rate limiter configuration failed validation
    #[error("Invalid rate limiter configuration: {0}")]
    InvalidConfiguration(String),

    /// A decorated call was throttled
    #[error(transparent)]
    RequestNotPermitted(#[from] RequestNotPermitted),

    /// A settings file could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A named configuration was requested from a registry that does not hold it
    #[error("Unknown rate limiter configuration: {0}")]
    UnknownConfiguration(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised by a decorated operation when its limiter did not grant a permit
/// within the wait budget.
///
/// This is an expected outcome under load, not a bug. Callers usually retry
/// later, shed the request or fall back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("RateLimiter '{limiter_name}' does not permit further calls")]
pub struct RequestNotPermitted {
    limiter_name: String,
}

impl RequestNotPermitted {
    /// Create the rejection for the named limiter.
    pub fn new(limiter_name: impl Into<String>) -> Self {
        Self {
            limiter_name: limiter_name.into(),
        }
    }

    /// Name of the limiter that rejected the call.
    pub fn limiter_name(&self) -> &str {
        &self.limiter_name
    }
}

/// Result type alias for permit gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
