//! `ProviderTarget` — the `(provider, model)` tuple a caller names, plus the
//! optional per-call overrides that travel with it.

use secrecy::SecretString;
use std::fmt;

/// Where a target's API key should come from.
///
/// The resolution order in [`crate::request_builder::build_wire_request`]
/// is: explicit per-call key -> per-target key -> `$<PROVIDER_ID>_API_KEY`
/// env var -> failure. `Debug` never prints the secret, mirroring the
/// `SecretString`/`fmt::Debug` redaction pattern used for credentials
/// throughout this codebase.
#[derive(Clone)]
pub enum ApiKeySource {
    /// Key supplied directly for this call.
    Explicit(SecretString),
    /// Look up `$<name>` at request-build time.
    Env(String),
}

impl fmt::Debug for ApiKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(_) => f.debug_tuple("Explicit").field(&"[REDACTED]").finish(),
            Self::Env(name) => f.debug_tuple("Env").field(name).finish(),
        }
    }
}

/// A single entry in a fallback chain: which provider/model to call, and
/// any overrides for that specific target.
///
/// Immutable once constructed; the executor never mutates a target, it
/// only advances through a list of them.
#[derive(Clone)]
pub struct ProviderTarget {
    /// Manifest id for the provider (e.g. `"anthropic"`, `"openai"`).
    pub provider_id: String,
    /// Model id to place in the wire request (e.g. `"claude-3-5-sonnet"`).
    pub model_id: String,
    /// Overrides the manifest's `endpoint.base_url` for this target, if set.
    pub base_url_override: Option<String>,
    /// Overrides the manifest's default key resolution for this target, if set.
    pub api_key_override: Option<ApiKeySource>,
}

impl fmt::Debug for ProviderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTarget")
            .field("provider_id", &self.provider_id)
            .field("model_id", &self.model_id)
            .field("base_url_override", &self.base_url_override)
            .field("api_key_override", &self.api_key_override)
            .finish()
    }
}

impl ProviderTarget {
    /// Creates a target with no overrides.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            base_url_override: None,
            api_key_override: None,
        }
    }

    /// Sets an explicit base URL override, returning `self` for chaining.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    /// Sets an explicit API key source override, returning `self` for chaining.
    #[must_use]
    pub fn with_api_key(mut self, source: ApiKeySource) -> Self {
        self.api_key_override = Some(source);
        self
    }

    /// Formats this target as the `provider/model` string used in stats,
    /// observability attributes, and error context.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_id)
    }
}

impl fmt::Display for ProviderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
