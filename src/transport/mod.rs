//! Async HTTP transport — issues the wire request a [`crate::request_builder`]
//! produced, returning either a buffered response or a live byte stream.

use crate::error::{classify, ClassifyInput, CoreError, ErrorContext, ErrorKind, TransportFailure};
use crate::types::target::ProviderTarget;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

/// A fully-built HTTP request ready to send, produced by the request builder.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// Absolute URL to send to.
    pub url: String,
    /// Header name/value pairs, including auth.
    pub headers: Vec<(String, String)>,
    /// Serialized request body.
    pub body: Vec<u8>,
}

/// A byte stream from an in-flight streaming response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, CoreError>> + Send>>;

/// Either shape a transport call can return.
pub enum TransportResponse {
    /// A single buffered JSON body (non-streaming call).
    Full {
        /// HTTP status code.
        status: u16,
        /// Response headers relevant to adaptive rate limiting.
        headers: Vec<(String, String)>,
        /// Raw response body bytes.
        body: Bytes,
    },
    /// A live byte stream (streaming call).
    Stream {
        /// HTTP status code.
        status: u16,
        /// Response headers relevant to adaptive rate limiting.
        headers: Vec<(String, String)>,
        /// The body as a stream of chunks.
        body: ByteStream,
    },
}

impl TransportResponse {
    /// Returns the HTTP status code regardless of response shape.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Full { status, .. } => *status,
            Self::Stream { status, .. } => *status,
        }
    }

    /// Returns the response headers regardless of response shape.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        match self {
            Self::Full { headers, .. } => headers,
            Self::Stream { headers, .. } => headers,
        }
    }
}

/// Async HTTP issuer. Wraps a single pooled [`reqwest::Client`] shared
/// across every target; pooling, HTTP/2 negotiation, and proxy handling are
/// reqwest's concern, not this module's.
pub struct Transport {
    client: Client,
}

impl Transport {
    /// Builds a transport with the given connect/request timeouts.
    ///
    /// `trust_env` mirrors `AI_HTTP_TRUST_ENV`: whether to honor `HTTP_PROXY`
    /// / `HTTPS_PROXY` / `NO_PROXY`.
    pub fn new(connect_timeout: Duration, request_timeout: Duration, trust_env: bool) -> Result<Self, CoreError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .trust_env(trust_env)
            .build()
            .map_err(|e| CoreError::Other { message: format!("failed to build HTTP client: {e}") })?;
        Ok(Self { client })
    }

    /// Issues `request` against `target`, returning a buffered response.
    pub async fn send(
        &self,
        request: &WireRequest,
        target: &ProviderTarget,
        request_id: Uuid,
        attempt: u32,
    ) -> Result<TransportResponse, CoreError> {
        let mut builder = self.client.post(&request.url).body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| self.classify_send_error(&e, target, request_id, attempt))?;
        let status = response.status().as_u16();
        let headers = extract_headers(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify_send_error(&e, target, request_id, attempt))?;
        Ok(TransportResponse::Full { status, headers, body })
    }

    /// Issues `request` against `target`, returning a live byte stream for
    /// the pipeline's decoder to consume.
    pub async fn send_stream(
        &self,
        request: &WireRequest,
        target: &ProviderTarget,
        request_id: Uuid,
        attempt: u32,
    ) -> Result<TransportResponse, CoreError> {
        let mut builder = self.client.post(&request.url).body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| self.classify_send_error(&e, target, request_id, attempt))?;
        let status = response.status().as_u16();
        let headers = extract_headers(&response);

        let target = target.clone();
        let request_id_for_stream = request_id;
        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| {
                let failure = if e.is_timeout() {
                    TransportFailure::DeadlineExceeded
                } else {
                    TransportFailure::Io
                };
                let kind = classify(&ClassifyInput {
                    transport_error: Some(failure),
                    ..Default::default()
                });
                CoreError::classified(
                    kind,
                    ErrorContext {
                        target: Some(target.label()),
                        attempt,
                        request_id: Some(request_id_for_stream),
                        message: e.to_string(),
                        ..Default::default()
                    },
                )
            })
        });

        Ok(TransportResponse::Stream { status, headers, body: Box::pin(stream) })
    }

    fn classify_send_error(
        &self,
        error: &reqwest::Error,
        target: &ProviderTarget,
        request_id: Uuid,
        attempt: u32,
    ) -> CoreError {
        let failure = if error.is_timeout() {
            TransportFailure::DeadlineExceeded
        } else {
            TransportFailure::Io
        };
        let kind = classify(&ClassifyInput {
            transport_error: Some(failure),
            ..Default::default()
        });
        CoreError::classified(
            kind,
            ErrorContext {
                target: Some(target.label()),
                attempt,
                request_id: Some(request_id),
                message: error.to_string(),
                ..Default::default()
            },
        )
    }
}

/// Classifies an already-received HTTP status into an [`ErrorKind`],
/// honoring manifest error-mapping overrides when a provider error code
/// was also extracted from the body.
#[must_use]
pub fn classify_response_status(status: u16, provider_error_code: Option<&str>) -> ErrorKind {
    classify(&ClassifyInput {
        http_status: Some(status),
        provider_error_code,
        ..Default::default()
    })
}

fn extract_headers(response: &reqwest::Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect()
}
