//! Protocol manifests: the declarative, per-provider description of an
//! upstream's endpoints, auth, request/streaming shape, and error mapping.

pub mod loader;
pub mod schema;

pub use loader::{ManifestLoader, ManifestSource};
pub use schema::{
    AuthConfig, AuthScheme, Capabilities, EndpointConfig, ProtocolManifest, RequestConfig,
    StreamDecoderKind, StreamingConfig, KNOWN_PROTOCOL_VERSIONS,
};
