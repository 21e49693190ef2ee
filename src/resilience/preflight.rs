//! Preflight admission gate: `circuit -> limiter -> backpressure`, in that
//! fixed order, so a tripped circuit short-circuits before burning a rate
//! limiter token or a backpressure slot.

use std::time::Duration;

use crate::error::{CoreError, ErrorContext, ErrorKind};
use crate::resilience::backpressure::Backpressure;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::rate_limiter::RateLimiter;

/// Per-target admission control, composing a circuit breaker, a rate
/// limiter, and a backpressure semaphore.
pub struct PreflightChecker {
    circuit: CircuitBreaker,
    limiter: RateLimiter,
    backpressure: Backpressure,
}

impl PreflightChecker {
    /// Assembles the three gates for one target.
    #[must_use]
    pub fn new(circuit: CircuitBreaker, limiter: RateLimiter, backpressure: Backpressure) -> Self {
        Self { circuit, limiter, backpressure }
    }

    /// Runs all three gates in fixed order, holding the backpressure
    /// permit across the caller's subsequent attempt: `circuit -> limiter
    /// -> backpressure`. Returns the held permit on success, letting the
    /// caller release it simply by dropping the returned guard.
    pub async fn admit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, CoreError> {
        if !self.circuit.allow_request() {
            return Err(CoreError::classified(
                ErrorKind::Overloaded,
                ErrorContext { message: "circuit breaker is open for this target".to_string(), ..Default::default() },
            ));
        }
        if !self.limiter.try_acquire() {
            let wait = self.limiter.wait_time().unwrap_or(Duration::ZERO);
            return Err(CoreError::classified(
                ErrorKind::RateLimited,
                ErrorContext {
                    retry_after: Some(wait),
                    message: "local rate limit exceeded for this target".to_string(),
                    ..Default::default()
                },
            ));
        }
        self.backpressure.acquire().await
    }

    /// Reports a call outcome to the circuit breaker. Must be called
    /// exactly once per admitted call.
    pub fn record_outcome(&self, succeeded: bool) {
        if succeeded {
            self.circuit.record_success();
        } else {
            self.circuit.record_failure();
        }
    }

    /// The circuit breaker's current state, for diagnostics and tests.
    /// Does not consume a half-open probe slot.
    #[must_use]
    pub fn circuit_state(&self) -> crate::resilience::circuit_breaker::CircuitState {
        self.circuit.state()
    }
}
