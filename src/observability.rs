//! Structured observability events, emitted at admission, retry, fallback,
//! and terminal-event boundaries. Generalizes the `tracing::debug!`/`warn!`
//! call-site pattern used throughout this codebase into a typed event with
//! a pluggable sink, so a host application can also ship events somewhere
//! other than its log stream without this crate depending on that
//! destination directly.

use std::collections::HashMap;

use serde_json::Value;

/// Severity of an observability event, mirroring `tracing::Level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Fine-grained internal detail.
    Debug,
    /// Normal operational event.
    Info,
    /// Unexpected but recovered-from condition.
    Warn,
    /// Operation failed.
    Error,
}

/// A single structured event describing something the runtime did.
#[derive(Debug, Clone)]
pub struct ObservabilityEvent {
    /// Milliseconds since the Unix epoch, stamped by the caller (this
    /// module never calls a clock itself, so it stays deterministic and
    /// testable).
    pub ts_millis: u64,
    /// Severity.
    pub level: Level,
    /// Stable event name (e.g. `"request_start"`, `"retry"`, `"fallback"`, `"circuit_state_change"`).
    pub event_name: &'static str,
    /// Structured attributes. Known-sensitive keys (`api_key`, `authorization`,
    /// `secret`) are redacted before being handed to a sink.
    pub attributes: HashMap<String, Value>,
}

const SENSITIVE_KEYS: &[&str] = &["api_key", "authorization", "secret", "token"];

impl ObservabilityEvent {
    /// Builds an event, redacting any attribute whose key case-insensitively
    /// matches a known-sensitive name.
    #[must_use]
    pub fn new(ts_millis: u64, level: Level, event_name: &'static str, attributes: HashMap<String, Value>) -> Self {
        let attributes = attributes
            .into_iter()
            .map(|(key, value)| {
                if SENSITIVE_KEYS.iter().any(|s| key.to_lowercase().contains(s)) {
                    (key, Value::String("[REDACTED]".to_string()))
                } else {
                    (key, value)
                }
            })
            .collect();
        Self { ts_millis, level, event_name, attributes }
    }
}

/// Receives observability events. Implementations must not block the
/// caller for long; the executor emits events inline on its own task.
pub trait Sink: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: &ObservabilityEvent);
}

/// Default sink: forwards every event to `tracing` at its matching level,
/// with attributes flattened as structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn emit(&self, event: &ObservabilityEvent) {
        let attrs = serde_json::to_string(&event.attributes).unwrap_or_default();
        match event.level {
            Level::Debug => tracing::debug!(event = event.event_name, attributes = %attrs, "runtime event"),
            Level::Info => tracing::info!(event = event.event_name, attributes = %attrs, "runtime event"),
            Level::Warn => tracing::warn!(event = event.event_name, attributes = %attrs, "runtime event"),
            Level::Error => tracing::error!(event = event.event_name, attributes = %attrs, "runtime event"),
        }
    }
}
