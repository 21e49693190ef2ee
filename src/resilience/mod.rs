//! Resilience: retry, rate limiting, circuit breaking, backpressure,
//! fallback chains, and the admission gate and executor that compose them.

pub mod backpressure;
pub mod circuit_breaker;
pub mod executor;
pub mod fallback;
pub mod preflight;
pub mod rate_limiter;
pub mod retry;

pub use backpressure::Backpressure;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use executor::{CallOptions, CallOutcome, ResilientExecutor};
pub use fallback::{FallbackChain, WeightedTarget};
pub use preflight::PreflightChecker;
pub use rate_limiter::RateLimiter;
pub use retry::{Jitter, RetryPolicy};
