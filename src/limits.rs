//! Request throttling: a per-client sliding-window rate limiter and a
//! bounded concurrency admission policy.
//!
//! Both are injectable trait objects so the server can be tested with a
//! manual clock and small limits instead of wall-clock time. They are the
//! only cross-request shared state in the service.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Time source seam so tests can drive the window deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Per-client request-rate policy.
pub trait RateLimitPolicy: Send + Sync {
    /// Record one request for `key`. Returns `false` when the client has
    /// exhausted its window.
    fn check(&self, key: &str) -> bool;
}

/// Sliding-window limiter: keeps the timestamps of each key's recent
/// requests and admits a request only while fewer than `max_requests`
/// fall inside the window.
pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_requests: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(
            max_requests as usize,
            Duration::from_secs(60),
            Arc::new(SystemClock),
        )
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.lock().expect("rate limiter lock").len()
    }
}

impl RateLimitPolicy for SlidingWindowRateLimiter {
    fn check(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut windows = self.windows.lock().expect("rate limiter lock");

        // Prune every key and drop the drained ones so the map stays
        // bounded by the keys active within the current window.
        windows.retain(|_, timestamps| {
            while let Some(&oldest) = timestamps.front() {
                if now.duration_since(oldest) >= self.window {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }
            !timestamps.is_empty()
        });

        let timestamps = windows.entry(key.to_string()).or_default();
        if timestamps.len() >= self.max_requests {
            return false;
        }
        timestamps.push_back(now);
        true
    }
}

/// Held while an analysis is in flight; releases the slot on drop.
pub struct AdmissionGuard {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Bounded-concurrency policy. Requests beyond the bound are rejected
/// immediately rather than queued, so they fail fast instead of sitting
/// out the request deadline.
pub trait AdmissionPolicy: Send + Sync {
    fn try_acquire(&self) -> Option<AdmissionGuard>;
}

/// Semaphore-backed admission with a fixed number of analysis slots.
pub struct SemaphoreAdmission {
    slots: Arc<Semaphore>,
}

impl SemaphoreAdmission {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
        }
    }
}

impl AdmissionPolicy for SemaphoreAdmission {
    fn try_acquire(&self) -> Option<AdmissionGuard> {
        self.slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionGuard {
                _permit: Some(permit),
            })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ManualClock;
    use super::*;

    #[test]
    fn rate_limiter_rejects_after_window_fills() {
        let clock = Arc::new(ManualClock::new());
        let limiter =
            SlidingWindowRateLimiter::new(2, Duration::from_secs(60), clock.clone());

        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
    }

    #[test]
    fn rate_limiter_is_per_key() {
        let clock = Arc::new(ManualClock::new());
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(60), clock);

        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
    }

    #[test]
    fn rate_limiter_window_slides() {
        let clock = Arc::new(ManualClock::new());
        let limiter =
            SlidingWindowRateLimiter::new(2, Duration::from_secs(60), clock.clone());

        assert!(limiter.check("client"));
        clock.advance(Duration::from_secs(30));
        assert!(limiter.check("client"));
        assert!(!limiter.check("client"));

        // First request falls out of the window; one slot frees up.
        clock.advance(Duration::from_secs(31));
        assert!(limiter.check("client"));
        assert!(!limiter.check("client"));
    }

    #[test]
    fn rate_limiter_drops_keys_with_drained_windows() {
        let clock = Arc::new(ManualClock::new());
        let limiter =
            SlidingWindowRateLimiter::new(2, Duration::from_secs(60), clock.clone());

        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
        assert_eq!(limiter.tracked_keys(), 2);

        clock.advance(Duration::from_secs(61));
        assert!(limiter.check("10.0.0.3"));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn admission_rejects_beyond_bound_and_frees_on_drop() {
        let admission = SemaphoreAdmission::new(2);

        let first = admission.try_acquire().expect("slot 1");
        let _second = admission.try_acquire().expect("slot 2");
        assert!(admission.try_acquire().is_none());

        drop(first);
        assert!(admission.try_acquire().is_some());
    }
}
