//! Permit Gate - In-Process Rate Limiting
//!
//! This crate bounds how many operations may proceed per refresh period
//! within a single process. Callers that find no permit left can wait for
//! the next period, up to a configurable timeout, instead of failing at once.
//! Operations can be wrapped so that a refused permit surfaces as
//! [`RequestNotPermitted`].

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{GateError, RequestNotPermitted, Result};
pub use ratelimit::{Metrics, RateLimiter, RateLimiterConfig, RateLimiterRegistry};
