//! Centralized error types for the protocol runtime.
//!
//! This module provides a unified error type (`CoreError`) and the fixed
//! `ErrorKind` taxonomy used throughout the runtime. Every fallible
//! operation ultimately surfaces one of the thirteen `ErrorKind`s so that
//! retry, fallback, and circuit-breaking policy can be driven off a single
//! closed enumeration instead of ad-hoc string matching.
//!
//! # Example
//!
//! ```
//! use ai_protocol_core::error::{classify, ClassifyInput};
//!
//! let kind = classify(&ClassifyInput {
//!     http_status: Some(429),
//!     ..Default::default()
//! });
//! assert!(kind.retryable());
//! assert!(kind.fallbackable());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

/// The fixed, closed taxonomy of error kinds the runtime ever surfaces.
///
/// Every kind carries static `retryable`/`fallbackable` bits (see
/// [`ErrorKind::retryable`], [`ErrorKind::fallbackable`]) that drive retry,
/// fallback, and circuit-breaker policy. The set is intentionally closed:
/// adding a fourteenth kind is a breaking change to every policy that
/// matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or semantically invalid request (manifest-level or caller-level).
    InvalidRequest,
    /// Missing, expired, or rejected credentials.
    Authentication,
    /// Credentials valid but insufficient for the requested operation.
    PermissionDenied,
    /// The resource (model, endpoint) does not exist.
    NotFound,
    /// The request payload exceeded a provider-enforced size limit.
    RequestTooLarge,
    /// Provider-side rate limit exceeded (HTTP 429 or local token bucket).
    RateLimited,
    /// Account-level quota or billing limit exhausted.
    QuotaExhausted,
    /// Generic provider-side server error (5xx).
    ServerError,
    /// Provider reports itself as overloaded, or the circuit breaker is open.
    Overloaded,
    /// Deadline exceeded: connect timeout, request timeout, or idle-stream timeout.
    Timeout,
    /// Conflicting state on the provider side (HTTP 409).
    Conflict,
    /// The caller cancelled the operation.
    Cancelled,
    /// Anything that does not fit another kind.
    Unknown,
}

impl ErrorKind {
    /// Whether a retry against the *same* target is worth attempting.
    #[must_use]
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Overloaded | Self::Timeout | Self::Conflict
        )
    }

    /// Whether the executor should advance to the next fallback target.
    #[must_use]
    pub fn fallbackable(self) -> bool {
        matches!(
            self,
            Self::Authentication
                | Self::RateLimited
                | Self::QuotaExhausted
                | Self::ServerError
                | Self::Overloaded
                | Self::Timeout
        )
    }

    /// Stable lowercase code for this kind, used in manifest `error_mapping`
    /// overrides and in structured observability attributes.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a manifest-declared `error_mapping` value back into a kind.
    ///
    /// Unknown strings map to `None` so callers can fall back to the fixed
    /// HTTP table rather than silently swallowing a typo in a manifest.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "invalid_request" => Self::InvalidRequest,
            "authentication" => Self::Authentication,
            "permission_denied" => Self::PermissionDenied,
            "not_found" => Self::NotFound,
            "request_too_large" => Self::RequestTooLarge,
            "rate_limited" => Self::RateLimited,
            "quota_exhausted" => Self::QuotaExhausted,
            "server_error" => Self::ServerError,
            "overloaded" => Self::Overloaded,
            "timeout" => Self::Timeout,
            "conflict" => Self::Conflict,
            "cancelled" => Self::Cancelled,
            "unknown" => Self::Unknown,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Whether the originating failure was a transport-level failure (connect,
/// DNS, read timeout) rather than an HTTP response with a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The operation's deadline elapsed.
    DeadlineExceeded,
    /// Connection could not be established, was reset, or I/O failed.
    Io,
    /// The caller's cancel token fired mid-request.
    Cancelled,
}

/// Input to [`classify`]. All fields are optional; the classifier applies
/// its priority pipeline over whichever subset is present.
#[derive(Debug, Clone, Default)]
pub struct ClassifyInput<'a> {
    /// HTTP status code of the response, if one was received.
    pub http_status: Option<u16>,
    /// Provider-specific error code extracted from the response body, if any.
    pub provider_error_code: Option<&'a str>,
    /// Set when the failure never reached a parsed HTTP response.
    pub transport_error: Option<TransportFailure>,
    /// Manifest-declared `error_mapping` table: provider code -> kind.
    pub error_mapping: Option<&'a std::collections::HashMap<String, String>>,
}

/// Classifies a failure into one of the thirteen [`ErrorKind`]s.
///
/// Applies the fixed priority pipeline from the protocol specification:
/// 1. Transport-level failure (connect/DNS/read timeout) short-circuits.
/// 2. A manifest `error_mapping` override for the provider's own error code.
/// 3. The fixed HTTP status table.
/// 4. `Unknown` if nothing else matched.
///
/// This function is pure and total: it never panics and always returns
/// exactly one kind.
#[must_use]
pub fn classify(input: &ClassifyInput<'_>) -> ErrorKind {
    if let Some(failure) = input.transport_error {
        return match failure {
            TransportFailure::Cancelled => ErrorKind::Cancelled,
            TransportFailure::DeadlineExceeded => ErrorKind::Timeout,
            TransportFailure::Io => ErrorKind::ServerError,
        };
    }

    if let (Some(code), Some(mapping)) = (input.provider_error_code, input.error_mapping) {
        if let Some(mapped) = mapping.get(code).and_then(|s| ErrorKind::from_code(s)) {
            return mapped;
        }
    }

    if let Some(status) = input.http_status {
        return classify_http_status(status);
    }

    ErrorKind::Unknown
}

/// The fixed HTTP status -> `ErrorKind` table from the protocol specification.
#[must_use]
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::InvalidRequest,
        401 => ErrorKind::Authentication,
        403 => ErrorKind::PermissionDenied,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::Timeout,
        409 => ErrorKind::Conflict,
        413 => ErrorKind::RequestTooLarge,
        429 => ErrorKind::RateLimited,
        500 | 502 | 504 => ErrorKind::ServerError,
        503 | 529 => ErrorKind::Overloaded,
        _ => ErrorKind::Unknown,
    }
}

/// Structured context attached to every surfaced error, sufficient for a
/// caller to understand why a particular attempt against a particular
/// target failed.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code, if the failure came from a parsed response.
    pub http_status: Option<u16>,
    /// Raw provider-specific error code, if present in the response body.
    pub provider_code: Option<String>,
    /// Server-provided retry hint (`Retry-After` header or equivalent field).
    pub retry_after: Option<std::time::Duration>,
    /// `provider/model` string this attempt targeted.
    pub target: Option<String>,
    /// 0-indexed attempt number within the current target.
    pub attempt: u32,
    /// Request id this error is associated with.
    pub request_id: Option<uuid::Uuid>,
    /// Human-readable detail message.
    pub message: String,
}

/// Centralized error type for the protocol runtime.
///
/// Every variant maps to exactly one [`ErrorKind`] via [`CoreError::kind`].
/// Construction goes through the category constructor functions below,
/// mirroring the module/category pattern used elsewhere in this codebase.
#[derive(Debug)]
pub enum CoreError {
    /// A classified failure carrying full context.
    Classified {
        /// The classified kind.
        kind: ErrorKind,
        /// Structured context describing the failure.
        context: ErrorContext,
    },

    /// Manifest failed structural or semantic validation.
    ManifestInvalid {
        /// Dotted path to the offending field (e.g. `streaming.content_path`).
        field_path: String,
        /// Description of why the field is invalid.
        message: String,
    },

    /// No manifest could be resolved for the requested provider/model.
    ManifestNotFound {
        /// The provider or model id that was requested.
        id: String,
    },

    /// The fallback chain was exhausted; carries the per-target attempt history.
    FallbackExhausted {
        /// One entry per target attempted, in order.
        history: Vec<ErrorContext>,
    },

    /// Error from anyhow or other sources, wrapped for propagation.
    Other {
        /// The wrapped error message.
        message: String,
    },
}

impl CoreError {
    /// Constructs a classified error from a kind and its context.
    #[must_use]
    pub fn classified(kind: ErrorKind, context: ErrorContext) -> Self {
        Self::Classified { kind, context }
    }

    /// Constructs a manifest validation error.
    #[must_use]
    pub fn manifest_invalid(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    /// Constructs a manifest-not-found error.
    #[must_use]
    pub fn manifest_not_found(id: impl Into<String>) -> Self {
        Self::ManifestNotFound { id: id.into() }
    }

    /// Constructs a fallback-chain-exhausted error from the accumulated history.
    #[must_use]
    pub fn fallback_exhausted(history: Vec<ErrorContext>) -> Self {
        Self::FallbackExhausted { history }
    }

    /// Returns the [`ErrorKind`] for this error, if it carries one.
    ///
    /// Manifest errors always classify as `InvalidRequest` (never retried);
    /// a fallback-exhausted error reuses the kind of its final attempt.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Classified { kind, .. } => *kind,
            Self::ManifestInvalid { .. } | Self::ManifestNotFound { .. } => ErrorKind::InvalidRequest,
            Self::FallbackExhausted { history } => history
                .last()
                .and_then(|ctx| ctx.http_status)
                .map(classify_http_status)
                .unwrap_or(ErrorKind::Unknown),
            Self::Other { .. } => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classified { kind, context } => {
                write!(f, "{kind}: {}", context.message)
            }
            Self::ManifestInvalid { field_path, message } => {
                write!(f, "manifest: invalid field '{field_path}': {message}")
            }
            Self::ManifestNotFound { id } => {
                write!(f, "manifest: no manifest found for '{id}'")
            }
            Self::FallbackExhausted { history } => {
                write!(
                    f,
                    "all {} fallback target(s) failed; last error: {}",
                    history.len(),
                    history.last().map(|c| c.message.as_str()).unwrap_or("unknown")
                )
            }
            Self::Other { message } => write!(f, "error: {message}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            message: format!("{err:#}"),
        }
    }
}
