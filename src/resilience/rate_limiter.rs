//! Token-bucket request rate limiting, built on `governor`, with optional
//! adaptive adjustment from provider-advertised `X-RateLimit-*` headers.

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::num::NonZeroU32;
use std::sync::RwLock;
use std::time::Duration;

/// A single target's rate limiter. Wraps a `governor` token bucket behind
/// an `RwLock` so the quota can be swapped in place when a provider
/// response reports a different remaining-budget than what we assumed.
pub struct RateLimiter {
    inner: RwLock<GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    configured_rps: RwLock<u32>,
}

impl RateLimiter {
    /// Builds a limiter allowing `requests_per_second` sustained, with a
    /// burst capacity equal to the same figure (no separate burst config
    /// is exposed; simplicity over tunability here mirrors most
    /// providers' own advertised limits).
    #[must_use]
    pub fn new(requests_per_second: u32) -> Self {
        let quota = quota_for(requests_per_second);
        Self {
            inner: RwLock::new(GovernorLimiter::direct(quota)),
            configured_rps: RwLock::new(requests_per_second),
        }
    }

    /// Attempts to admit one request immediately, returning `false` if the
    /// bucket is currently empty (caller should queue or back off).
    pub fn try_acquire(&self) -> bool {
        self.inner.read().expect("rate limiter lock poisoned").check().is_ok()
    }

    /// Duration until the next token would be available, if `try_acquire`
    /// would currently fail; `None` if a token is available now.
    #[must_use]
    pub fn wait_time(&self) -> Option<Duration> {
        let limiter = self.inner.read().expect("rate limiter lock poisoned");
        match limiter.check() {
            Ok(()) => None,
            Err(not_until) => Some(not_until.wait_time_from(DefaultClock::default().now())),
        }
    }

    /// Replaces the effective rate with one derived from a provider's
    /// advertised remaining budget and reset window, e.g. from
    /// `X-RateLimit-Remaining` and `X-RateLimit-Reset` response headers.
    /// Never raises the configured rate above what the caller originally
    /// set; only tightens it when the provider reports less headroom.
    pub fn adapt_from_headers(&self, remaining: u32, reset_in: Duration) {
        if reset_in.is_zero() {
            return;
        }
        let implied_rps = (remaining as f64 / reset_in.as_secs_f64()).floor().max(1.0) as u32;
        let configured = *self.configured_rps.read().expect("rate limiter lock poisoned");
        let effective = implied_rps.min(configured);
        let mut inner = self.inner.write().expect("rate limiter lock poisoned");
        *inner = GovernorLimiter::direct(quota_for(effective));
    }
}

fn quota_for(requests_per_second: u32) -> Quota {
    let rps = NonZeroU32::new(requests_per_second.max(1)).expect("requests_per_second is clamped to >= 1");
    Quota::per_second(rps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_configured_rate() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_exhausted_bucket_reports_wait_time() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(limiter.wait_time().is_some());
    }

    #[test]
    fn test_adapt_from_headers_tightens_but_never_loosens() {
        let limiter = RateLimiter::new(100);
        limiter.adapt_from_headers(5, Duration::from_secs(10));
        assert_eq!(*limiter.configured_rps.read().unwrap(), 100);
        let inner = limiter.inner.read().unwrap();
        assert!(inner.check().is_ok());
    }

    #[test]
    fn test_adapt_from_headers_ignores_zero_window() {
        let limiter = RateLimiter::new(10);
        limiter.adapt_from_headers(0, Duration::ZERO);
        assert!(limiter.try_acquire());
    }
}
