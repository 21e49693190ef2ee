//! Runtime configuration assembled from environment variables, mirroring
//! the env-driven setup used for connection/timeout tunables elsewhere in
//! this codebase.

use std::path::PathBuf;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::registry::RegistryConfig;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_INFLIGHT: usize = 64;
const DEFAULT_RPS: u32 = 10;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 30;

/// Fully resolved runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `$AI_PROTOCOL_PATH`: extra root to search for manifests before the
    /// built-in well-known directories.
    pub protocol_path: Option<PathBuf>,
    /// `$AI_HTTP_TIMEOUT_SECS`: connect and request timeout for the shared transport.
    pub http_timeout: Duration,
    /// `$AI_HTTP_TRUST_ENV`: whether to honor `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY`.
    pub http_trust_env: bool,
    /// `$AI_LIB_STRICT_STREAMING`: whether manifest validation rejects
    /// missing `content_path` on streaming-capable manifests.
    pub strict_streaming: bool,
    /// Derived admission-control defaults for [`crate::registry::Registry`].
    pub registry: RegistryConfig,
}

impl RuntimeConfig {
    /// Reads configuration from the process environment, falling back to
    /// documented defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let http_timeout_secs = env_parsed("AI_HTTP_TIMEOUT_SECS").unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        let max_inflight = env_parsed("AI_LIB_MAX_INFLIGHT").unwrap_or(DEFAULT_MAX_INFLIGHT);
        let requests_per_second = env_parsed("AI_LIB_RPS").unwrap_or(DEFAULT_RPS);
        let failure_threshold =
            env_parsed("AI_LIB_BREAKER_FAILURE_THRESHOLD").unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD);
        let cooldown_secs = env_parsed("AI_LIB_BREAKER_COOLDOWN_SECS").unwrap_or(DEFAULT_BREAKER_COOLDOWN_SECS);

        Self {
            protocol_path: std::env::var_os("AI_PROTOCOL_PATH").map(PathBuf::from),
            http_timeout: Duration::from_secs(http_timeout_secs),
            http_trust_env: env_bool("AI_HTTP_TRUST_ENV").unwrap_or(false),
            strict_streaming: env_bool("AI_LIB_STRICT_STREAMING").unwrap_or(false),
            registry: RegistryConfig {
                requests_per_second,
                breaker: CircuitBreakerConfig {
                    failure_threshold,
                    cooldown: Duration::from_secs(cooldown_secs),
                    success_threshold: 1,
                },
                max_inflight,
                backpressure_queue_wait: Duration::from_secs(5),
            },
        }
    }

    /// Resolves `$<PROVIDER_ID>_API_KEY` for a given provider id, e.g.
    /// `resolve_provider_key("anthropic")` reads `ANTHROPIC_API_KEY`.
    #[must_use]
    pub fn resolve_provider_key(provider_id: &str) -> Option<String> {
        let var_name = format!("{}_API_KEY", provider_id.to_uppercase());
        std::env::var(var_name).ok()
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        std::env::remove_var("AI_HTTP_TIMEOUT_SECS");
        std::env::remove_var("AI_LIB_RPS");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.http_timeout, Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
        assert_eq!(config.registry.requests_per_second, DEFAULT_RPS);
        assert!(!config.strict_streaming);
    }

    #[test]
    #[serial]
    fn test_overrides_are_applied() {
        std::env::set_var("AI_HTTP_TIMEOUT_SECS", "15");
        std::env::set_var("AI_LIB_STRICT_STREAMING", "true");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.http_timeout, Duration::from_secs(15));
        assert!(config.strict_streaming);
        std::env::remove_var("AI_HTTP_TIMEOUT_SECS");
        std::env::remove_var("AI_LIB_STRICT_STREAMING");
    }

    #[test]
    #[serial]
    fn test_resolve_provider_key_uppercases_and_suffixes() {
        std::env::set_var("ANTHROPIC_API_KEY", "sk-test");
        assert_eq!(RuntimeConfig::resolve_provider_key("anthropic").as_deref(), Some("sk-test"));
        std::env::remove_var("ANTHROPIC_API_KEY");
    }
}
