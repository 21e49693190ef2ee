//! `CallStats` — the per-call accounting record the executor assembles as a
//! request moves through retries, fallbacks, and the streaming pipeline.

use crate::types::target::ProviderTarget;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Accounting for a single logical call, including whatever retries and
/// fallback hops it took.
///
/// The executor owns the only mutable reference to this struct while a
/// call is in flight; everything else (pipeline, retry policy, circuit
/// breaker) reports back into it through the executor rather than holding
/// a reference of their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStats {
    /// Unique id for this logical call, stable across retries and fallback hops.
    pub request_id: Uuid,
    /// Total wall-clock time from call start to terminal event, in milliseconds.
    pub latency_ms: u64,
    /// Time from call start to the first pipeline event, in milliseconds, if
    /// the call produced at least one event.
    pub time_to_first_event_ms: Option<u64>,
    /// Number of retry attempts made against the winning target (excludes
    /// fallback hops to other targets).
    pub retry_count: u32,
    /// Number of distinct targets attempted before success or exhaustion.
    pub fallback_hops: u32,
    /// The target that ultimately served the call (or the last one tried,
    /// on total failure).
    pub target_used: ProviderTarget,
    /// Reported input token count, if the provider sent usage data.
    pub tokens_in: Option<u64>,
    /// Reported output token count, if the provider sent usage data.
    pub tokens_out: Option<u64>,
}

impl CallStats {
    /// Starts a fresh stats record for a call about to be attempted against
    /// `target`. All counters start at zero; `latency_ms` is filled in once
    /// the call reaches a terminal state.
    #[must_use]
    pub fn new(request_id: Uuid, target: ProviderTarget) -> Self {
        Self {
            request_id,
            latency_ms: 0,
            time_to_first_event_ms: None,
            retry_count: 0,
            fallback_hops: 0,
            target_used: target,
            tokens_in: None,
            tokens_out: None,
        }
    }

    /// Records that a fallback hop moved the call to `target`, resetting the
    /// per-target retry counter (retries are scoped to the current target).
    pub fn record_fallback(&mut self, target: ProviderTarget) {
        self.fallback_hops += 1;
        self.retry_count = 0;
        self.target_used = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_starts_at_zero() {
        let stats = CallStats::new(Uuid::nil(), ProviderTarget::new("anthropic", "claude-3-5-sonnet"));
        assert_eq!(stats.retry_count, 0);
        assert_eq!(stats.fallback_hops, 0);
        assert!(stats.tokens_in.is_none());
    }

    #[test]
    fn test_record_fallback_resets_retry_count_and_bumps_hops() {
        let mut stats = CallStats::new(Uuid::nil(), ProviderTarget::new("anthropic", "claude-3-5-sonnet"));
        stats.retry_count = 2;
        stats.record_fallback(ProviderTarget::new("openai", "gpt-4o"));
        assert_eq!(stats.retry_count, 0);
        assert_eq!(stats.fallback_hops, 1);
        assert_eq!(stats.target_used.provider_id, "openai");
    }
}
