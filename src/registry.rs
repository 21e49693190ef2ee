//! Process-wide registry tying together the manifest cache and each
//! provider's admission-control state (circuit breaker, rate limiter,
//! backpressure semaphore).
//!
//! A single [`Registry`] is meant to be constructed once per process and
//! shared (behind an `Arc`) across every call the host application makes;
//! per-target state must outlive any individual call for the circuit
//! breaker and rate limiter to mean anything.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::manifest::ManifestLoader;
use crate::resilience::backpressure::Backpressure;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::preflight::PreflightChecker;
use crate::resilience::rate_limiter::RateLimiter;

/// Tunables applied uniformly to every target's admission gate. Providers
/// that need different limits get their own [`Registry`].
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Sustained requests per second per target.
    pub requests_per_second: u32,
    /// Circuit breaker parameters per target.
    pub breaker: CircuitBreakerConfig,
    /// Maximum concurrent in-flight calls per target.
    pub max_inflight: usize,
    /// Maximum time a call waits for a backpressure slot.
    pub backpressure_queue_wait: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            breaker: CircuitBreakerConfig::default(),
            max_inflight: 64,
            backpressure_queue_wait: Duration::from_secs(5),
        }
    }
}

/// Process-wide shared state: the manifest cache, plus one admission gate
/// per provider id, created lazily on first use.
pub struct Registry {
    manifests: Arc<ManifestLoader>,
    config: RegistryConfig,
    preflight: RwLock<HashMap<String, Arc<PreflightChecker>>>,
}

impl Registry {
    /// Builds a registry around an existing manifest loader.
    #[must_use]
    pub fn new(manifests: Arc<ManifestLoader>, config: RegistryConfig) -> Self {
        Self { manifests, config, preflight: RwLock::new(HashMap::new()) }
    }

    /// The shared manifest loader.
    #[must_use]
    pub fn manifests(&self) -> &Arc<ManifestLoader> {
        &self.manifests
    }

    /// Returns the admission gate for `provider_id`, creating one with the
    /// registry's configured defaults on first access.
    #[must_use]
    pub fn preflight_for(&self, provider_id: &str) -> Arc<PreflightChecker> {
        if let Some(existing) = self.preflight.read().expect("registry lock poisoned").get(provider_id) {
            return existing.clone();
        }
        let mut guard = self.preflight.write().expect("registry lock poisoned");
        guard
            .entry(provider_id.to_string())
            .or_insert_with(|| {
                Arc::new(PreflightChecker::new(
                    CircuitBreaker::new(self.config.breaker),
                    RateLimiter::new(self.config.requests_per_second),
                    Backpressure::new(self.config.max_inflight, self.config.backpressure_queue_wait),
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(Arc::new(ManifestLoader::new(vec![], false)), RegistryConfig::default())
    }

    #[test]
    fn test_preflight_for_is_stable_per_provider() {
        let registry = registry();
        let first = registry.preflight_for("openai");
        let second = registry.preflight_for("openai");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_preflight_for_is_distinct_per_provider() {
        let registry = registry();
        let openai = registry.preflight_for("openai");
        let anthropic = registry.preflight_for("anthropic");
        assert!(!Arc::ptr_eq(&openai, &anthropic));
    }
}
