//! `ProtocolManifest` — the validated, per-provider data model describing
//! one upstream's endpoints, auth scheme, request/streaming shape, error
//! mapping, and capabilities.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Manifest protocol versions this build understands.
///
/// `protocol_version` must fall in this set or the manifest fails
/// validation (or, outside strict mode, loads with a logged deprecation).
pub const KNOWN_PROTOCOL_VERSIONS: &[&str] = &["1.0", "1.1", "2.0"];

/// How a manifest declares the upstream authenticates requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// An arbitrary header name carries the key.
    Header,
    /// The key rides in a query parameter.
    Query,
    /// No authentication.
    None,
}

/// Auth configuration for a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Which scheme applies.
    pub scheme: AuthScheme,
    /// Header name to use, required when `scheme == Header` (or as the
    /// carrier name for `Bearer`'s `Authorization` header override).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
    /// Name of the environment variable holding the default API key
    /// (e.g. `"ANTHROPIC_API_KEY"`). Must be non-empty unless `scheme ==
    /// None`.
    pub env_var_name: String,
    /// Optional prefix prepended to the key value (e.g. `"Bearer "`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Endpoint paths for a manifest, keyed by operation name (`"chat"`,
/// `"embedding"`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Scheme+host+optional-path-prefix all requests are built against.
    pub base_url: String,
    /// Operation name -> path, joined onto `base_url`.
    pub paths: HashMap<String, String>,
}

/// Canonical-to-wire request transformation rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Maps canonical role strings (`"system"`, `"user"`, ...) to the
    /// wire role string this provider expects. Absent entries pass the
    /// canonical role through unchanged.
    #[serde(default)]
    pub role_map: HashMap<String, String>,
    /// Tool-serialization dialect (`"openai"`, `"anthropic"`, `"gemini"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_dialect: Option<String>,
    /// Name of the field holding the model id in the wire body.
    #[serde(default = "default_model_field")]
    pub model_field: String,
}

fn default_model_field() -> String {
    "model".to_string()
}

/// Which streaming wire format a manifest declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamDecoderKind {
    /// Generic Server-Sent Events.
    Sse,
    /// Newline-delimited JSON.
    Ndjson,
    /// SSE with Anthropic's named content-block event routing.
    AnthropicSse,
}

/// Streaming configuration: decoder choice plus the JSONPath-like
/// selectors the pipeline evaluates against each decoded frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Which decoder to use.
    pub decoder: StreamDecoderKind,
    /// Selector for visible content deltas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    /// Selector for tool-call fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_path: Option<String>,
    /// Selector for the role field, when present per-frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_path: Option<String>,
    /// Selector for the terminal finish/stop reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason_path: Option<String>,
    /// Selector for usage/token accounting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_path: Option<String>,
    /// Selector for a multi-candidate array, enabling FanOut.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_out_path: Option<String>,
}

impl StreamingConfig {
    /// Returns every non-empty selector path this config declares, for
    /// syntactic validation.
    fn declared_paths(&self) -> Vec<(&'static str, &str)> {
        let mut paths = Vec::new();
        if let Some(p) = &self.content_path {
            paths.push(("content_path", p.as_str()));
        }
        if let Some(p) = &self.tool_call_path {
            paths.push(("tool_call_path", p.as_str()));
        }
        if let Some(p) = &self.role_path {
            paths.push(("role_path", p.as_str()));
        }
        if let Some(p) = &self.finish_reason_path {
            paths.push(("finish_reason_path", p.as_str()));
        }
        if let Some(p) = &self.usage_path {
            paths.push(("usage_path", p.as_str()));
        }
        if let Some(p) = &self.fan_out_path {
            paths.push(("fan_out_path", p.as_str()));
        }
        paths
    }
}

/// Declared provider capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Supports server-streamed responses.
    #[serde(default)]
    pub streaming: bool,
    /// Supports tool/function calling.
    #[serde(default)]
    pub tools: bool,
    /// Supports image inputs.
    #[serde(default)]
    pub vision: bool,
    /// Supports audio inputs.
    #[serde(default)]
    pub audio: bool,
    /// Supports a strict JSON-mode output constraint.
    #[serde(default)]
    pub json_mode: bool,
}

/// A fully validated protocol manifest for one `(provider)` id.
///
/// Construct via [`ProtocolManifest::validate`] rather than directly
/// deserializing and trusting the result — raw deserialization only
/// checks structural shape, not the semantic invariants in §3 of the
/// runtime's data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolManifest {
    /// Provider id this manifest describes (e.g. `"anthropic"`).
    pub id: String,
    /// Manifest schema version; must be in [`KNOWN_PROTOCOL_VERSIONS`].
    pub protocol_version: String,
    /// Endpoint configuration.
    pub endpoint: EndpointConfig,
    /// Auth configuration.
    pub auth: AuthConfig,
    /// Canonical-to-wire request transform rules.
    #[serde(default)]
    pub request: RequestConfig,
    /// Streaming configuration, required when `capabilities.streaming` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<StreamingConfig>,
    /// Provider-specific error-code overrides: provider error code -> the
    /// stable lowercase [`crate::error::ErrorKind`] code (see
    /// [`crate::error::ErrorKind::code`]) it maps to. Resolved through
    /// [`crate::error::classify`] via [`crate::error::ClassifyInput::error_mapping`].
    #[serde(default)]
    pub error_mapping: HashMap<String, String>,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl ProtocolManifest {
    /// Runs the full structural + semantic validation pass required before
    /// a manifest is cached or used to build requests.
    ///
    /// `strict_streaming` mirrors `AI_LIB_STRICT_STREAMING`: when set, a
    /// manifest that advertises streaming but omits `content_path` fails
    /// validation instead of merely warning.
    pub fn validate(&self, strict_streaming: bool) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::manifest_invalid("id", "must be non-empty"));
        }
        if !KNOWN_PROTOCOL_VERSIONS.contains(&self.protocol_version.as_str()) {
            return Err(CoreError::manifest_invalid(
                "protocol_version",
                format!(
                    "'{}' is not a known protocol version (expected one of {:?})",
                    self.protocol_version, KNOWN_PROTOCOL_VERSIONS
                ),
            ));
        }
        if self.endpoint.base_url.trim().is_empty() {
            return Err(CoreError::manifest_invalid("endpoint.base_url", "must be non-empty"));
        }
        if self.endpoint.paths.is_empty() {
            return Err(CoreError::manifest_invalid(
                "endpoint.paths",
                "must declare at least one operation path",
            ));
        }
        if self.auth.scheme != AuthScheme::None && self.auth.env_var_name.trim().is_empty() {
            return Err(CoreError::manifest_invalid(
                "auth.env_var_name",
                "must be non-empty unless auth.scheme is 'none'",
            ));
        }
        if self.auth.scheme == AuthScheme::Header && self.auth.header_name.is_none() {
            return Err(CoreError::manifest_invalid(
                "auth.header_name",
                "required when auth.scheme is 'header'",
            ));
        }

        match &self.streaming {
            Some(streaming) => {
                for (field, path) in streaming.declared_paths() {
                    validate_path_syntax(field, path)?;
                }
                if strict_streaming && streaming.content_path.is_none() {
                    return Err(CoreError::manifest_invalid(
                        "streaming.content_path",
                        "required under strict streaming validation",
                    ));
                }
            }
            None if self.capabilities.streaming => {
                return Err(CoreError::manifest_invalid(
                    "streaming",
                    "required when capabilities.streaming is true",
                ));
            }
            None => {}
        }

        Ok(())
    }

    /// Returns the wire path for a named operation (`"chat"`, `"embedding"`, ...).
    pub fn operation_path(&self, operation: &str) -> Result<&str, CoreError> {
        self.endpoint.paths.get(operation).map(String::as_str).ok_or_else(|| {
            CoreError::manifest_invalid(
                format!("endpoint.paths.{operation}"),
                "no path declared for this operation",
            )
        })
    }
}

/// Checks that a JSONPath-like selector is at least syntactically sane:
/// non-empty, starts with `$`, and has no empty segments between dots.
fn validate_path_syntax(field: &'static str, path: &str) -> Result<(), CoreError> {
    if !path.starts_with('$') {
        return Err(CoreError::manifest_invalid(field, format!("selector '{path}' must start with '$'")));
    }
    let body = &path[1..];
    if body.contains("..") {
        return Err(CoreError::manifest_invalid(field, format!("selector '{path}' has an empty path segment")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn valid_manifest() -> ProtocolManifest {
        ProtocolManifest {
            id: "anthropic".into(),
            protocol_version: "2.0".into(),
            endpoint: EndpointConfig {
                base_url: "https://api.anthropic.com".into(),
                paths: HashMap::from([("chat".into(), "/v1/messages".into())]),
            },
            auth: AuthConfig {
                scheme: AuthScheme::Header,
                header_name: Some("x-api-key".into()),
                env_var_name: "ANTHROPIC_API_KEY".into(),
                prefix: None,
            },
            request: RequestConfig::default(),
            streaming: Some(StreamingConfig {
                decoder: StreamDecoderKind::AnthropicSse,
                content_path: Some("$.delta.text".into()),
                tool_call_path: Some("$.content_block.input".into()),
                role_path: None,
                finish_reason_path: Some("$.delta.stop_reason".into()),
                usage_path: Some("$.usage".into()),
                fan_out_path: None,
            }),
            error_mapping: HashMap::new(),
            capabilities: Capabilities {
                streaming: true,
                tools: true,
                vision: true,
                audio: false,
                json_mode: false,
            },
        }
    }

    #[test]
    fn test_valid_manifest_passes() {
        assert!(valid_manifest().validate(true).is_ok());
    }

    #[test]
    fn test_unknown_protocol_version_rejected() {
        let mut manifest = valid_manifest();
        manifest.protocol_version = "99.9".into();
        let err = manifest.validate(false).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidRequest));
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut manifest = valid_manifest();
        manifest.id = String::new();
        assert!(manifest.validate(false).is_err());
    }

    #[test]
    fn test_streaming_required_when_capability_set() {
        let mut manifest = valid_manifest();
        manifest.streaming = None;
        assert!(manifest.validate(false).is_err());
    }

    #[test]
    fn test_strict_mode_requires_content_path() {
        let mut manifest = valid_manifest();
        manifest.streaming.as_mut().unwrap().content_path = None;
        assert!(manifest.validate(true).is_err());
        assert!(manifest.validate(false).is_ok());
    }

    #[test]
    fn test_header_scheme_requires_header_name() {
        let mut manifest = valid_manifest();
        manifest.auth.header_name = None;
        assert!(manifest.validate(false).is_err());
    }

    #[test]
    fn test_invalid_selector_syntax_rejected() {
        let mut manifest = valid_manifest();
        manifest.streaming.as_mut().unwrap().content_path = Some("delta.text".into());
        assert!(manifest.validate(false).is_err());
    }

    #[test]
    fn test_operation_path_lookup() {
        let manifest = valid_manifest();
        assert_eq!(manifest.operation_path("chat").unwrap(), "/v1/messages");
        assert!(manifest.operation_path("embedding").is_err());
    }
}
