//! Per-target circuit breaker: `closed -> open -> half_open -> closed`,
//! with atomic counters so concurrent callers never race into an
//! inconsistent state.
//!
//! Generalizes the `ProviderState`/`is_tripped` pattern used for failover
//! chains elsewhere in the broader ecosystem: a consecutive-failure
//! counter trips the breaker, and a fixed cooldown window gates recovery
//! probes.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker parameters.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before tripping from `closed` to `open`.
    pub failure_threshold: u32,
    /// How long `open` lasts before allowing a half-open probe.
    pub cooldown: Duration,
    /// Concurrent probe slots granted on entering `half_open`.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(30), success_threshold: 1 }
    }
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Observable circuit state, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Traffic flows normally.
    Closed,
    /// Traffic is rejected until the cooldown elapses.
    Open,
    /// A limited number of probes are allowed through to test recovery.
    HalfOpen,
}

/// A single provider/scope's circuit breaker. Transitions are atomic
/// under concurrent callers: every decision point reads and, where
/// needed, compare-exchanges the packed state in one step.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    half_open_probes_remaining: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// Creates a closed breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            half_open_probes_remaining: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// Returns the current state, first advancing `open -> half_open` if
    /// the cooldown has elapsed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.maybe_enter_half_open();
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Whether a call should be allowed through right now. `half_open`
    /// allows up to `success_threshold` concurrent probes, decrementing
    /// the remaining-slot counter on each admission; once slots are
    /// exhausted further calls are rejected until a probe resolves.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self
                .half_open_probes_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                    if remaining > 0 { Some(remaining - 1) } else { None }
                })
                .is_ok(),
        }
    }

    /// Records a successful call. In `closed`, resets the failure
    /// counter. In `half_open`, a success closes the breaker once it was
    /// the last outstanding probe slot to resolve.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        if self.state.load(Ordering::SeqCst) == STATE_HALF_OPEN {
            self.close();
        }
    }

    /// Records a failed call. In `closed`, increments the failure counter
    /// and trips to `open` once `failure_threshold` is reached. In
    /// `half_open`, any failure immediately reopens the breaker and
    /// resets the cooldown clock.
    pub fn record_failure(&self) {
        match self.state.load(Ordering::SeqCst) {
            STATE_HALF_OPEN => self.open(),
            _ => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.open();
                }
            }
        }
    }

    fn open(&self) {
        self.state.store(STATE_OPEN, Ordering::SeqCst);
        *self.opened_at.lock().expect("circuit breaker lock poisoned") = Some(Instant::now());
    }

    fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.lock().expect("circuit breaker lock poisoned") = None;
    }

    fn maybe_enter_half_open(&self) {
        if self.state.load(Ordering::SeqCst) != STATE_OPEN {
            return;
        }
        let elapsed_enough = {
            let opened_at = self.opened_at.lock().expect("circuit breaker lock poisoned");
            opened_at.is_some_and(|t| t.elapsed() >= self.config.cooldown)
        };
        if elapsed_enough
            && self
                .state
                .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.half_open_probes_remaining.store(self.config.success_threshold, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn config(threshold: u32, cooldown: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig { failure_threshold: threshold, cooldown, success_threshold: 1 }
    }

    #[test]
    fn test_trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_secs(60)));
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_rejects_until_cooldown() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_millis(20)));
        breaker.record_failure();
        assert!(!breaker.allow_request());
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_millis(10)));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_millis(10)));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_consecutive_failures_in_closed_state() {
        let breaker = CircuitBreaker::new(config(3, Duration::from_secs(60)));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_failures_trip_exactly_once() {
        let breaker = Arc::new(CircuitBreaker::new(config(50, Duration::from_secs(60))));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let breaker = breaker.clone();
            handles.push(thread::spawn(move || breaker.record_failure()));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
