//! Exponential backoff with jitter, honoring server-provided `Retry-After`
//! hints.

use rand::Rng;
use std::time::Duration;

/// How jitter is applied to the computed base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No jitter; use the base delay exactly.
    None,
    /// Uniform random delay in `[0, base_delay]`.
    Full,
    /// Uniform random delay in `[base_delay/2, base_delay]`.
    #[default]
    Equal,
}

/// Retry policy parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts against a single target (including the
    /// first, non-retry attempt).
    pub max_attempts: u32,
    /// Minimum delay before the first retry.
    pub min_delay: Duration,
    /// Delay ceiling; backoff and `retry_after` hints are both clamped to it.
    pub max_delay: Duration,
    /// Jitter strategy applied to the computed base delay.
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: Jitter::Equal,
        }
    }
}

impl RetryPolicy {
    /// Whether attempt number `attempt` (0-indexed, the attempt about to be
    /// made) is still within budget.
    #[must_use]
    pub fn within_budget(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Computes the unjittered base delay for retry number `retry_number`
    /// (1 for the first retry, 2 for the second, ...): `min(max_delay,
    /// min_delay * 2^retry_number)`. Monotonically non-decreasing and
    /// bounded by `max_delay`.
    #[must_use]
    pub fn base_delay(&self, retry_number: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_number).unwrap_or(u64::MAX);
        let scaled = self.min_delay.as_millis().saturating_mul(u128::from(factor));
        let scaled = Duration::from_millis(scaled.min(u128::from(u64::MAX)) as u64);
        scaled.min(self.max_delay)
    }

    /// Computes the delay to actually wait before retry number
    /// `retry_number`. If `retry_after` is `Some`, it overrides the
    /// computed backoff but is still clamped to `max_delay`; jitter is
    /// never applied to a server-provided hint.
    #[must_use]
    pub fn delay_for(&self, retry_number: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }
        let base = self.base_delay(retry_number);
        apply_jitter(base, self.jitter)
    }
}

fn apply_jitter(base: Duration, jitter: Jitter) -> Duration {
    match jitter {
        Jitter::None => base,
        Jitter::Full => {
            let millis = base.as_millis().min(u128::from(u64::MAX)) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis.max(1)))
        }
        Jitter::Equal => {
            let millis = base.as_millis().min(u128::from(u64::MAX)) as u64;
            let half = millis / 2;
            Duration::from_millis(half + rand::thread_rng().gen_range(0..=(millis - half).max(1)))
        }
    }
}
