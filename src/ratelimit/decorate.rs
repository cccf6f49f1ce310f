//! Wrapping operations with a permit check.
//!
//! Decorated operations acquire a permit before running. When the limiter
//! refuses, the operation is not invoked and the call fails with
//! [`RequestNotPermitted`]. Whatever the operation itself returns, including
//! its own errors, is passed through untouched.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use super::limiter::RateLimiter;
use crate::error::RequestNotPermitted;

impl RateLimiter {
    /// Wrap an infallible operation.
    pub fn decorate<F, T>(self: &Arc<Self>, operation: F) -> impl Fn() -> Result<T, RequestNotPermitted>
    where
        F: Fn() -> T,
    {
        let limiter = Arc::clone(self);
        move || limiter.execute(&operation)
    }

    /// Wrap an operation that has its own error type.
    ///
    /// The error type only needs to be able to represent a rejection; the
    /// operation's own errors are returned as-is.
    pub fn decorate_fallible<F, T, E>(self: &Arc<Self>, operation: F) -> impl Fn() -> Result<T, E>
    where
        F: Fn() -> Result<T, E>,
        E: From<RequestNotPermitted>,
    {
        let limiter = Arc::clone(self);
        move || limiter.execute_fallible(&operation)
    }

    /// Run `operation` once if a permit is granted.
    pub fn execute<F, T>(&self, operation: F) -> Result<T, RequestNotPermitted>
    where
        F: FnOnce() -> T,
    {
        self.check_permission()?;
        Ok(operation())
    }

    /// Run a fallible `operation` once if a permit is granted.
    pub fn execute_fallible<F, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<RequestNotPermitted>,
    {
        self.check_permission()?;
        operation()
    }

    /// Await `operation` once a permit is granted, without blocking the runtime.
    pub async fn execute_async<Fut, T>(&self, operation: Fut) -> Result<T, RequestNotPermitted>
    where
        Fut: Future<Output = T>,
    {
        if !self.acquire_permission_async().await {
            return Err(self.reject());
        }
        Ok(operation.await)
    }

    /// Async form of [`execute_fallible`](Self::execute_fallible).
    pub async fn execute_fallible_async<Fut, T, E>(&self, operation: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<RequestNotPermitted>,
    {
        if !self.acquire_permission_async().await {
            return Err(self.reject().into());
        }
        operation.await
    }

    fn check_permission(&self) -> Result<(), RequestNotPermitted> {
        if self.acquire_permission() {
            Ok(())
        } else {
            Err(self.reject())
        }
    }

    fn reject(&self) -> RequestNotPermitted {
        debug!(limiter = %self.name(), "Call not permitted");
        RequestNotPermitted::new(self.name())
    }
}
