//! Protocol-driven, provider-agnostic runtime core for LLM API clients.
//!
//! A manifest describes how to talk to one provider's wire format; this
//! crate turns a [`types::request::CanonicalRequest`] plus a manifest into
//! an HTTP call, decodes whatever streaming format the provider uses back
//! into a canonical event sequence, and wraps the whole thing in retry,
//! fallback, and circuit-breaking policy so callers write against one API
//! regardless of which provider answers.

pub mod cancellation;
pub mod config;
pub mod error;
pub mod manifest;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod request_builder;
pub mod resilience;
pub mod transport;
pub mod types;

pub use cancellation::{CancelReason, CancelToken};
pub use config::RuntimeConfig;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use observability::{ObservabilityEvent, Sink, TracingSink};
pub use registry::{Registry, RegistryConfig};
pub use resilience::{CallOptions, CallOutcome, ResilientExecutor};
pub use types::event::CanonicalEvent;
pub use types::request::CanonicalRequest;
pub use types::target::ProviderTarget;
