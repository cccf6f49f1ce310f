//! Core rate limiter implementation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::config::RateLimiterConfig;
use super::metrics::Metrics;

/// Upper bound used when `now + duration` cannot be represented.
const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// A gate that admits up to `limit_for_period` permits per refresh period.
///
/// Permits are refreshed lazily: the first caller that observes an elapsed
/// cycle resets the counter and starts the next cycle, so no background
/// timer is involved. Callers that find no permit left may wait for the next
/// cycle, bounded by their timeout.
///
/// Waiting callers are served in FIFO order. Permits still needed by queued
/// callers are reserved for them, and any caller may take what is left over
/// after the demand queued ahead of it. A steady stream of new arrivals
/// therefore cannot starve a waiter, and free permits beyond the queued
/// demand are never held back. A caller whose request cannot be met before
/// its timeout does not join the queue; it sleeps out the timeout instead.
///
/// The blocking methods park the current thread and must not be called from
/// an async task; use the `_async` variants there.
pub struct RateLimiter {
    /// Name used for registry lookup and reporting
    name: String,
    /// Shared, immutable parameters
    config: Arc<RateLimiterConfig>,
    /// Permit counter, cycle deadline and wait queue
    state: Mutex<CycleState>,
    /// Wakes blocked threads when the wait queue or the cycle changes
    queue_changed: Condvar,
    /// Async counterpart of `queue_changed`
    queue_changed_async: Notify,
}

struct CycleState {
    available_permits: u32,
    cycle_end: Instant,
    waiters: VecDeque<Waiter>,
    /// Sum of the permits requested by `waiters`
    queued_demand: u64,
    next_waiter_id: u64,
}

struct Waiter {
    id: u64,
    permits: u32,
}

impl CycleState {
    /// Start a new cycle if the current one has elapsed.
    fn refresh(&mut self, config: &RateLimiterConfig, now: Instant) -> bool {
        if now < self.cycle_end {
            return false;
        }
        self.available_permits = config.limit_for_period();
        self.cycle_end = advance(now, config.limit_refresh_period());
        true
    }

    /// Permits as they would be seen by the next caller, without refreshing.
    fn available_at(&self, config: &RateLimiterConfig, now: Instant) -> u32 {
        if now >= self.cycle_end {
            config.limit_for_period()
        } else {
            self.available_permits
        }
    }

    /// Permits requested by the callers queued ahead of `id`.
    fn demand_ahead(&self, id: u64) -> Option<u64> {
        let mut demand = 0;
        for waiter in &self.waiters {
            if waiter.id == id {
                return Some(demand);
            }
            demand += u64::from(waiter.permits);
        }
        None
    }

    /// Whether `permits` fit in what is left after the demand reserved ahead.
    ///
    /// `None` stands for a caller outside the queue, which comes after every
    /// queued caller.
    fn can_take(&self, waiter: Option<u64>, permits: u32) -> bool {
        let reserved = match waiter {
            None => self.queued_demand,
            Some(id) => match self.demand_ahead(id) {
                Some(demand) => demand,
                None => return false,
            },
        };
        u64::from(self.available_permits) >= reserved + u64::from(permits)
    }

    fn enqueue(&mut self, permits: u32) -> u64 {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiters.push_back(Waiter { id, permits });
        self.queued_demand += u64::from(permits);
        id
    }

    fn remove(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                if let Some(waiter) = self.waiters.remove(index) {
                    self.queued_demand -= u64::from(waiter.permits);
                }
                true
            }
            None => false,
        }
    }
}

/// Outcome of a caller's first look at the limiter.
enum Admission {
    Granted,
    Rejected,
    /// Not enough permits before the current cycle outlasts the timeout
    OutOfReach,
    Queued(u64),
}

/// Outcome of one look at the limiter by a queued async caller.
enum Attempt {
    Granted,
    Expired,
    WaitUntil(Instant),
}

impl RateLimiter {
    /// Create a limiter whose first cycle starts now with a full set of permits.
    pub fn new(name: impl Into<String>, config: impl Into<Arc<RateLimiterConfig>>) -> Self {
        let name = name.into();
        let config = config.into();
        debug!(
            limiter = %name,
            limit_for_period = config.limit_for_period(),
            limit_refresh_period = ?config.limit_refresh_period(),
            timeout_duration = ?config.timeout_duration(),
            "Creating rate limiter"
        );

        let state = CycleState {
            available_permits: config.limit_for_period(),
            cycle_end: advance(Instant::now(), config.limit_refresh_period()),
            waiters: VecDeque::new(),
            queued_demand: 0,
            next_waiter_id: 0,
        };

        Self {
            name,
            config,
            state: Mutex::new(state),
            queue_changed: Condvar::new(),
            queue_changed_async: Notify::new(),
        }
    }

    /// Create a limiter with [`RateLimiterConfig::of_defaults`].
    pub fn of_defaults(name: impl Into<String>) -> Self {
        Self::new(name, RateLimiterConfig::of_defaults())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Arc<RateLimiterConfig> {
        &self.config
    }

    /// Acquire one permit, waiting at most the configured timeout.
    ///
    /// Returns `false` when no permit could be granted in time. Running out
    /// of permits is a normal outcome and never an error.
    pub fn acquire_permission(&self) -> bool {
        self.acquire_permissions(1, self.config.timeout_duration())
    }

    /// Acquire one permit, waiting at most `timeout` instead of the configured value.
    pub fn acquire_permission_with_timeout(&self, timeout: Duration) -> bool {
        self.acquire_permissions(1, timeout)
    }

    /// Acquire one permit only if it is available right now.
    pub fn try_acquire_permission(&self) -> bool {
        self.acquire_permissions(1, Duration::ZERO)
    }

    /// Acquire `permits` permits at once, waiting at most `timeout`.
    ///
    /// Asking for zero permits always succeeds. Asking for more than
    /// `limit_for_period` can never succeed and fails without waiting.
    ///
    /// When the permits are not available the caller joins the wait queue
    /// and sleeps until the current cycle ends or its timeout expires,
    /// whichever comes first. A caller that cannot be served before its
    /// timeout stays out of the queue but still waits out the timeout before
    /// returning `false`.
    pub fn acquire_permissions(&self, permits: u32, timeout: Duration) -> bool {
        if let Some(outcome) = self.trivial_outcome(permits) {
            return outcome;
        }

        let start = Instant::now();
        let deadline = advance(start, timeout);
        let mut state = self.state.lock();

        let id = match self.admit(&mut state, permits, timeout, deadline, start) {
            Admission::Granted => return true,
            Admission::Rejected => return false,
            Admission::OutOfReach => {
                drop(state);
                std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                return false;
            }
            Admission::Queued(id) => id,
        };

        loop {
            let wake_at = state.cycle_end.min(deadline);
            self.queue_changed.wait_until(&mut state, wake_at);

            let now = Instant::now();
            if self.try_take(&mut state, Some(id), permits, now) {
                self.wake_waiters();
                debug!(
                    limiter = %self.name,
                    permits = permits,
                    waited = ?now.duration_since(start),
                    "Permits granted after waiting"
                );
                return true;
            }

            if now >= deadline {
                state.remove(id);
                self.wake_waiters();
                debug!(
                    limiter = %self.name,
                    permits = permits,
                    timeout = ?timeout,
                    "Timed out waiting for permits"
                );
                return false;
            }
        }
    }

    /// Async form of [`acquire_permission`](Self::acquire_permission).
    pub async fn acquire_permission_async(&self) -> bool {
        self.acquire_permissions_async(1, self.config.timeout_duration())
            .await
    }

    /// Async form of [`acquire_permissions`](Self::acquire_permissions).
    ///
    /// Dropping the returned future while it waits abandons the wait: the
    /// caller leaves the queue and no permit is consumed.
    pub async fn acquire_permissions_async(&self, permits: u32, timeout: Duration) -> bool {
        if let Some(outcome) = self.trivial_outcome(permits) {
            return outcome;
        }

        let start = Instant::now();
        let deadline = advance(start, timeout);

        let admission = {
            let mut state = self.state.lock();
            self.admit(&mut state, permits, timeout, deadline, start)
        };
        let id = match admission {
            Admission::Granted => return true,
            Admission::Rejected => return false,
            Admission::OutOfReach => {
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                return false;
            }
            Admission::Queued(id) => id,
        };

        // Leaves the queue on timeout and on cancellation.
        let _slot = QueueSlot { limiter: self, id };

        loop {
            let notified = self.queue_changed_async.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let attempt = {
                let mut state = self.state.lock();
                let now = Instant::now();
                if self.try_take(&mut state, Some(id), permits, now) {
                    Attempt::Granted
                } else if now >= deadline {
                    Attempt::Expired
                } else {
                    Attempt::WaitUntil(state.cycle_end.min(deadline))
                }
            };

            match attempt {
                Attempt::Granted => {
                    self.wake_waiters();
                    debug!(
                        limiter = %self.name,
                        permits = permits,
                        waited = ?start.elapsed(),
                        "Permits granted after waiting"
                    );
                    return true;
                }
                Attempt::Expired => {
                    debug!(
                        limiter = %self.name,
                        permits = permits,
                        timeout = ?timeout,
                        "Timed out waiting for permits"
                    );
                    return false;
                }
                Attempt::WaitUntil(wake_at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at)) => {}
                        _ = &mut notified => {}
                    }
                }
            }
        }
    }

    /// Take every permit left in the current cycle, returning how many were taken.
    pub fn drain_permissions(&self) -> u32 {
        let mut state = self.state.lock();
        state.refresh(&self.config, Instant::now());
        let drained = state.available_permits;
        state.available_permits = 0;
        debug!(limiter = %self.name, drained = drained, "Drained permits");
        drained
    }

    /// Permits the next caller would find, accounting for an elapsed cycle.
    pub fn available_permits(&self) -> u32 {
        let state = self.state.lock();
        state.available_at(&self.config, Instant::now())
    }

    /// End of the current cycle.
    ///
    /// A value in the past means the cycle has elapsed and will be refreshed
    /// by the next acquisition.
    pub fn cycle_end_time(&self) -> Instant {
        self.state.lock().cycle_end
    }

    /// Number of callers currently queued for permits.
    ///
    /// Callers sleeping out a timeout they cannot beat are not counted.
    pub fn number_of_waiting_threads(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Consistent snapshot of the introspection values.
    pub fn metrics(&self) -> Metrics {
        let state = self.state.lock();
        let now = Instant::now();
        Metrics {
            name: self.name.clone(),
            available_permissions: state.available_at(&self.config, now),
            number_of_waiting_threads: state.waiters.len(),
            nanos_to_cycle_end: state
                .cycle_end
                .saturating_duration_since(now)
                .as_nanos()
                .try_into()
                .unwrap_or(u64::MAX),
        }
    }

    fn trivial_outcome(&self, permits: u32) -> Option<bool> {
        if permits == 0 {
            return Some(true);
        }
        if permits > self.config.limit_for_period() {
            debug!(
                limiter = %self.name,
                permits = permits,
                limit_for_period = self.config.limit_for_period(),
                "Requested permits exceed the limit for period"
            );
            return Some(false);
        }
        None
    }

    /// Decide whether a new caller is granted, rejected, left to sleep out its
    /// timeout, or queued.
    fn admit(
        &self,
        state: &mut CycleState,
        permits: u32,
        timeout: Duration,
        deadline: Instant,
        now: Instant,
    ) -> Admission {
        if self.try_take(state, None, permits, now) {
            trace!(
                limiter = %self.name,
                permits = permits,
                remaining = state.available_permits,
                "Permits granted"
            );
            return Admission::Granted;
        }

        if timeout.is_zero() {
            debug!(limiter = %self.name, permits = permits, "Permits not available");
            return Admission::Rejected;
        }

        // Permits only grow at the cycle end.
        if state.cycle_end > deadline && state.available_permits < permits {
            debug!(
                limiter = %self.name,
                permits = permits,
                timeout = ?timeout,
                "Permits cannot be granted before the timeout"
            );
            return Admission::OutOfReach;
        }

        let id = state.enqueue(permits);
        debug!(
            limiter = %self.name,
            permits = permits,
            waiting = state.waiters.len(),
            "Waiting for permits"
        );
        Admission::Queued(id)
    }

    /// Refresh the cycle if due, then take `permits` if they fit after the
    /// demand reserved ahead of `waiter`.
    fn try_take(
        &self,
        state: &mut CycleState,
        waiter: Option<u64>,
        permits: u32,
        now: Instant,
    ) -> bool {
        if state.refresh(&self.config, now) {
            trace!(limiter = %self.name, "Permit cycle refreshed");
            if !state.waiters.is_empty() {
                self.wake_waiters();
            }
        }

        if !state.can_take(waiter, permits) {
            return false;
        }

        state.available_permits -= permits;
        if let Some(id) = waiter {
            state.remove(id);
        }
        true
    }

    fn wake_waiters(&self) {
        self.queue_changed.notify_all();
        self.queue_changed_async.notify_waiters();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Queue membership of an async waiter.
struct QueueSlot<'a> {
    limiter: &'a RateLimiter,
    id: u64,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.limiter.state.lock();
        // Granted waiters were already removed from the queue.
        if state.remove(self.id) {
            drop(state);
            self.limiter.wake_waiters();
            debug!(limiter = %self.limiter.name, "Stopped waiting for permits");
        }
    }
}

/// `start + by`, capped when the sum cannot be represented.
fn advance(start: Instant, by: Duration) -> Instant {
    start
        .checked_add(by)
        .unwrap_or_else(|| start + MAX_WAIT)
}
