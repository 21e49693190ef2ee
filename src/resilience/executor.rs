//! `ResilientExecutor` — drives a request through admission control,
//! retries, and fallback hops, handing off to the streaming pipeline once
//! a target accepts the call. The only component that mutates
//! [`CallStats`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::cancellation::CancelToken;
use crate::error::{CoreError, ErrorContext, ErrorKind};
use crate::manifest::schema::ProtocolManifest;
use crate::observability::{Level, ObservabilityEvent, Sink};
use crate::pipeline::{map_stream_error, Pipeline, Selector};
use crate::registry::Registry;
use crate::request_builder::build_wire_request;
use crate::resilience::fallback::FallbackChain;
use crate::resilience::retry::RetryPolicy;
use crate::transport::{Transport, TransportResponse};
use crate::types::event::CanonicalEvent;
use crate::types::request::CanonicalRequest;
use crate::types::stats::CallStats;
use crate::types::target::{ApiKeySource, ProviderTarget};

/// A live event stream handed back to the caller.
pub type EventStream = Pin<Box<dyn Stream<Item = CanonicalEvent> + Send>>;

/// Per-call options threaded through the executor.
pub struct CallOptions {
    /// Which manifest endpoint operation to call (e.g. `"chat"`).
    pub operation: String,
    /// Whether to use the provider's streaming endpoint.
    pub streaming: bool,
    /// Explicit API key for this call, overriding manifest/env resolution.
    pub api_key: Option<ApiKeySource>,
    /// Cooperative cancel signal, checked at every await point.
    pub cancel: CancelToken,
}

impl CallOptions {
    /// Convenience constructor for a streaming call with no key override.
    #[must_use]
    pub fn streaming(operation: impl Into<String>) -> Self {
        Self { operation: operation.into(), streaming: true, api_key: None, cancel: CancelToken::new() }
    }
}

/// Either shape a successful call can produce.
pub enum CallOutcome {
    /// A live stream of canonical events.
    Streaming(EventStream),
    /// A fully buffered, already-complete event sequence (non-streaming call).
    Complete(Vec<CanonicalEvent>),
}

/// Executes a [`CanonicalRequest`] against an ordered [`FallbackChain`],
/// applying the registry's admission control and a [`RetryPolicy`] within
/// each target before advancing to the next.
pub struct ResilientExecutor {
    transport: Transport,
    registry: std::sync::Arc<Registry>,
    retry_policy: RetryPolicy,
    sink: Option<Arc<dyn Sink>>,
}

impl ResilientExecutor {
    /// Builds an executor around a transport, shared registry, and retry policy.
    /// No sink is registered by default; callers wire one with [`Self::with_sink`].
    #[must_use]
    pub fn new(transport: Transport, registry: std::sync::Arc<Registry>, retry_policy: RetryPolicy) -> Self {
        Self { transport, registry, retry_policy, sink: None }
    }

    /// Registers an observability sink to receive this executor's events:
    /// `request_start`, `preflight_gate_result`, `transport_request`,
    /// `transport_response`, `stream_first_event`, `retry`, `fallback`,
    /// `circuit_state_change`, and `request_end`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn emit(&self, level: Level, event_name: &'static str, attributes: HashMap<String, serde_json::Value>) {
        if let Some(sink) = &self.sink {
            let ts_millis = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0);
            sink.emit(&ObservabilityEvent::new(ts_millis, level, event_name, attributes));
        }
    }

    fn emit_request_end(&self, request_id: Uuid, outcome: &str) {
        self.emit(
            if outcome == "ok" { Level::Info } else { Level::Error },
            "request_end",
            HashMap::from([
                ("request_id".to_string(), serde_json::Value::String(request_id.to_string())),
                ("outcome".to_string(), serde_json::Value::String(outcome.to_string())),
            ]),
        );
    }

    /// Records a call outcome against the target's circuit breaker and
    /// emits `circuit_state_change` if that transitioned its state.
    fn record_outcome_with_circuit_event(
        &self,
        preflight: &crate::resilience::preflight::PreflightChecker,
        succeeded: bool,
        target: &ProviderTarget,
        request_id: Uuid,
    ) {
        let before = preflight.circuit_state();
        preflight.record_outcome(succeeded);
        let after = preflight.circuit_state();
        if before != after {
            self.emit(
                Level::Warn,
                "circuit_state_change",
                HashMap::from([
                    ("request_id".to_string(), serde_json::Value::String(request_id.to_string())),
                    ("target".to_string(), serde_json::Value::String(target.label())),
                    ("from".to_string(), serde_json::Value::String(format!("{before:?}"))),
                    ("to".to_string(), serde_json::Value::String(format!("{after:?}"))),
                ]),
            );
        }
    }

    /// Wraps a streaming outcome so the first event pulled from it emits
    /// `stream_first_event`; non-streaming outcomes pass through untouched.
    fn instrument_first_event(&self, outcome: CallOutcome, request_id: Uuid) -> CallOutcome {
        match outcome {
            CallOutcome::Complete(events) => CallOutcome::Complete(events),
            CallOutcome::Streaming(stream) => {
                let state = FirstEventState { inner: stream, first: true, sink: self.sink.clone(), request_id };
                CallOutcome::Streaming(Box::pin(futures::stream::unfold(state, |mut state| async move {
                    let item = state.inner.next().await?;
                    if state.first {
                        state.first = false;
                        if let Some(sink) = &state.sink {
                            let ts_millis =
                                SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0);
                            sink.emit(&ObservabilityEvent::new(
                                ts_millis,
                                Level::Debug,
                                "stream_first_event",
                                HashMap::from([(
                                    "request_id".to_string(),
                                    serde_json::Value::String(state.request_id.to_string()),
                                )]),
                            ));
                        }
                    }
                    Some((item, state))
                })))
            }
        }
    }

    /// Executes `request` against `targets` in order, returning the
    /// outcome and the accounting record for the call.
    pub async fn execute(
        &self,
        targets: &FallbackChain,
        request: &CanonicalRequest,
        options: CallOptions,
    ) -> (Result<CallOutcome, CoreError>, CallStats) {
        let request_id = Uuid::new_v4();
        let started_at = Instant::now();

        self.emit(
            Level::Info,
            "request_start",
            HashMap::from([("request_id".to_string(), serde_json::Value::String(request_id.to_string()))]),
        );

        let Some(first_target) = targets.first() else {
            let stats = CallStats::new(request_id, ProviderTarget::new("", ""));
            self.emit_request_end(request_id, "error");
            return (Err(CoreError::fallback_exhausted(vec![])), stats);
        };

        let mut stats = CallStats::new(request_id, first_target.clone());
        let mut history: Vec<ErrorContext> = Vec::new();
        let mut target_index = 0usize;
        let mut current_target = first_target.clone();

        loop {
            if options.cancel.is_cancelled() {
                stats.latency_ms = elapsed_ms(started_at);
                self.emit_request_end(request_id, "error");
                return (
                    Err(CoreError::classified(
                        ErrorKind::Cancelled,
                        ErrorContext { target: Some(current_target.label()), message: "cancelled".into(), ..Default::default() },
                    )),
                    stats,
                );
            }

            let manifest = match self.registry.manifests().load(&current_target.provider_id) {
                Ok(manifest) => manifest,
                Err(err) => {
                    stats.latency_ms = elapsed_ms(started_at);
                    self.emit_request_end(request_id, "error");
                    return (Err(err), stats);
                }
            };

            match self
                .attempt_target(&manifest, &current_target, request, &options, request_id, &mut stats)
                .await
            {
                Ok(outcome) => {
                    stats.latency_ms = elapsed_ms(started_at);
                    self.emit_request_end(request_id, "ok");
                    let outcome = self.instrument_first_event(outcome, request_id);
                    return (Ok(outcome), stats);
                }
                Err(AttemptFailure::RetryExhausted(context)) => {
                    history.push(context);
                    stats.latency_ms = elapsed_ms(started_at);
                    self.emit_request_end(request_id, "error");
                    return (Err(CoreError::fallback_exhausted(history)), stats);
                }
                Err(AttemptFailure::NotFallbackable(core_err)) => {
                    // Not part of the retry/fallback taxonomy at all (cancellation, a
                    // malformed request): surface the original error verbatim instead
                    // of laundering it through `fallback_exhausted`, which would lose
                    // its kind (e.g. `Cancelled`).
                    stats.latency_ms = elapsed_ms(started_at);
                    self.emit_request_end(request_id, "error");
                    return (Err(core_err), stats);
                }
                Err(AttemptFailure::Advance(context)) => {
                    history.push(context);
                    match targets.next_after(target_index) {
                        Some(next) => {
                            target_index += 1;
                            current_target = next.clone();
                            self.emit(
                                Level::Warn,
                                "fallback",
                                HashMap::from([
                                    ("request_id".to_string(), serde_json::Value::String(request_id.to_string())),
                                    ("next_target".to_string(), serde_json::Value::String(current_target.label())),
                                ]),
                            );
                            stats.record_fallback(current_target.clone());
                        }
                        None => {
                            stats.latency_ms = elapsed_ms(started_at);
                            self.emit_request_end(request_id, "error");
                            return (Err(CoreError::fallback_exhausted(history)), stats);
                        }
                    }
                }
            }
        }
    }

    async fn attempt_target(
        &self,
        manifest: &ProtocolManifest,
        target: &ProviderTarget,
        request: &CanonicalRequest,
        options: &CallOptions,
        request_id: Uuid,
        stats: &mut CallStats,
    ) -> Result<CallOutcome, AttemptFailure> {
        let preflight = self.registry.preflight_for(&target.provider_id);
        let mut attempt: u32 = 0;

        loop {
            if options.cancel.is_cancelled() {
                return Err(cancelled_failure(target, attempt, request_id));
            }

            let admit_result = tokio::select! {
                biased;
                () = options.cancel.cancelled() => return Err(cancelled_failure(target, attempt, request_id)),
                result = preflight.admit() => result.map_err(|err| {
                    AttemptFailure::Advance(ErrorContext {
                        target: Some(target.label()),
                        attempt,
                        request_id: Some(request_id),
                        message: err.to_string(),
                        ..Default::default()
                    })
                }),
            };
            self.emit(
                Level::Debug,
                "preflight_gate_result",
                HashMap::from([
                    ("request_id".to_string(), serde_json::Value::String(request_id.to_string())),
                    ("target".to_string(), serde_json::Value::String(target.label())),
                    ("attempt".to_string(), serde_json::Value::from(attempt)),
                    ("admitted".to_string(), serde_json::Value::from(admit_result.is_ok())),
                ]),
            );
            let _permit = admit_result?;

            let wire = build_wire_request(request, manifest, target, &options.operation, options.api_key.as_ref())
                .map_err(AttemptFailure::NotFallbackable)?;

            self.emit(
                Level::Debug,
                "transport_request",
                HashMap::from([
                    ("request_id".to_string(), serde_json::Value::String(request_id.to_string())),
                    ("target".to_string(), serde_json::Value::String(target.label())),
                    ("attempt".to_string(), serde_json::Value::from(attempt)),
                    ("streaming".to_string(), serde_json::Value::from(options.streaming)),
                ]),
            );
            let send_result = tokio::select! {
                biased;
                () = options.cancel.cancelled() => return Err(cancelled_failure(target, attempt, request_id)),
                result = async {
                    if options.streaming {
                        self.transport.send_stream(&wire, target, request_id, attempt).await
                    } else {
                        self.transport.send(&wire, target, request_id, attempt).await
                    }
                } => result,
            };
            if let Ok(response) = &send_result {
                self.emit(
                    Level::Debug,
                    "transport_response",
                    HashMap::from([
                        ("request_id".to_string(), serde_json::Value::String(request_id.to_string())),
                        ("target".to_string(), serde_json::Value::String(target.label())),
                        ("attempt".to_string(), serde_json::Value::from(attempt)),
                        ("status".to_string(), serde_json::Value::from(response.status())),
                    ]),
                );
            }

            match send_result {
                Ok(response) if response.status() < 400 => {
                    self.record_outcome_with_circuit_event(&preflight, true, target, request_id);
                    return Ok(self.finish_success(manifest, response, options.cancel.clone(), stats));
                }
                Ok(response) => {
                    self.record_outcome_with_circuit_event(&preflight, false, target, request_id);
                    let status = response.status();
                    let retry_after = retry_after_from_headers(response.headers());
                    let kind = crate::error::classify(&crate::error::ClassifyInput {
                        http_status: Some(status),
                        error_mapping: Some(&manifest.error_mapping),
                        ..Default::default()
                    });
                    let context = ErrorContext {
                        http_status: Some(status),
                        retry_after,
                        target: Some(target.label()),
                        attempt,
                        request_id: Some(request_id),
                        message: format!("target returned HTTP {status}"),
                        ..Default::default()
                    };
                    attempt += 1;
                    if kind.retryable() && self.retry_policy.within_budget(attempt) {
                        stats.retry_count += 1;
                        let delay = self.retry_policy.delay_for(attempt, retry_after);
                        self.emit(
                            Level::Debug,
                            "retry",
                            HashMap::from([
                                ("request_id".to_string(), serde_json::Value::String(request_id.to_string())),
                                ("attempt".to_string(), serde_json::Value::from(attempt)),
                                ("delay_ms".to_string(), serde_json::Value::from(delay.as_millis() as u64)),
                            ]),
                        );
                        tokio::select! {
                            biased;
                            () = options.cancel.cancelled() => return Err(cancelled_failure(target, attempt, request_id)),
                            () = tokio::time::sleep(delay) => {},
                        }
                        continue;
                    }
                    if kind.fallbackable() {
                        return Err(AttemptFailure::Advance(context));
                    }
                    return Err(AttemptFailure::RetryExhausted(context));
                }
                Err(core_err) => {
                    self.record_outcome_with_circuit_event(&preflight, false, target, request_id);
                    let kind = core_err.kind();
                    let context = ErrorContext {
                        target: Some(target.label()),
                        attempt,
                        request_id: Some(request_id),
                        message: core_err.to_string(),
                        ..Default::default()
                    };
                    attempt += 1;
                    if kind.retryable() && self.retry_policy.within_budget(attempt) {
                        stats.retry_count += 1;
                        let delay = self.retry_policy.delay_for(attempt, None);
                        self.emit(
                            Level::Debug,
                            "retry",
                            HashMap::from([
                                ("request_id".to_string(), serde_json::Value::String(request_id.to_string())),
                                ("attempt".to_string(), serde_json::Value::from(attempt)),
                                ("delay_ms".to_string(), serde_json::Value::from(delay.as_millis() as u64)),
                            ]),
                        );
                        tokio::select! {
                            biased;
                            () = options.cancel.cancelled() => return Err(cancelled_failure(target, attempt, request_id)),
                            () = tokio::time::sleep(delay) => {},
                        }
                        continue;
                    }
                    if kind.fallbackable() {
                        return Err(AttemptFailure::Advance(context));
                    }
                    return Err(AttemptFailure::RetryExhausted(context));
                }
            }
        }
    }

    fn finish_success(
        &self,
        manifest: &ProtocolManifest,
        response: TransportResponse,
        cancel: CancelToken,
        stats: &mut CallStats,
    ) -> CallOutcome {
        match response {
            TransportResponse::Stream { body, .. } => {
                let streaming_config = manifest
                    .streaming
                    .clone()
                    .unwrap_or_else(|| panic!("streaming call against a manifest with no streaming config"));
                let pipeline = Pipeline::new(&streaming_config, cancel);
                CallOutcome::Streaming(Box::pin(pipeline.run(body)))
            }
            TransportResponse::Full { body, .. } => {
                let events = map_full_response(&body, manifest);
                record_usage_into_stats(&events, stats);
                CallOutcome::Complete(events)
            }
        }
    }
}

/// Copies token counts from the first `Metadata` event, if any, into
/// `stats`. Mirrors the streaming mapper's `usage_path` lookup so
/// non-streaming calls report the same accounting a streaming call would.
fn record_usage_into_stats(events: &[CanonicalEvent], stats: &mut CallStats) {
    for event in events {
        if let CanonicalEvent::Metadata { usage: Some(usage) } = event {
            stats.tokens_in = usage.input_tokens;
            stats.tokens_out = usage.output_tokens;
            return;
        }
    }
}

fn cancelled_failure(target: &ProviderTarget, attempt: u32, request_id: Uuid) -> AttemptFailure {
    AttemptFailure::NotFallbackable(CoreError::classified(
        ErrorKind::Cancelled,
        ErrorContext {
            target: Some(target.label()),
            attempt,
            request_id: Some(request_id),
            message: "cancelled".into(),
            ..Default::default()
        },
    ))
}

struct FirstEventState {
    inner: EventStream,
    first: bool,
    sink: Option<Arc<dyn Sink>>,
    request_id: Uuid,
}

enum AttemptFailure {
    /// Not retryable or fallbackable; caller should stop entirely.
    RetryExhausted(ErrorContext),
    /// Not retryable within this target, but the chain should advance.
    Advance(ErrorContext),
    /// Terminal, non-classified failure (cancellation, bad request shape),
    /// carrying the original error so its kind survives to the caller
    /// instead of being inferred from a bare HTTP status in history.
    NotFallbackable(CoreError),
}

fn map_full_response(body: &[u8], manifest: &ProtocolManifest) -> Vec<CanonicalEvent> {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => return vec![map_stream_error(ErrorKind::ServerError, err.to_string())],
    };
    let Some(config) = &manifest.streaming else {
        return vec![map_stream_error(ErrorKind::ServerError, "manifest declares no content selector for non-streaming responses")];
    };
    let content = config
        .content_path
        .as_deref()
        .and_then(Selector::parse)
        .and_then(|selector| selector.evaluate_str(&value))
        .unwrap_or("");
    let finish_reason = config
        .finish_reason_path
        .as_deref()
        .and_then(Selector::parse)
        .and_then(|selector| selector.evaluate_str(&value))
        .unwrap_or("stop");
    let mut events = crate::pipeline::map_non_streaming_response(content, finish_reason);
    if let Some(usage) = config
        .usage_path
        .as_deref()
        .and_then(Selector::parse)
        .and_then(|selector| selector.evaluate(&value))
        .and_then(parse_usage)
    {
        events.insert(events.len() - 1, CanonicalEvent::Metadata { usage: Some(usage) });
    }
    events
}

fn parse_usage(value: &serde_json::Value) -> Option<crate::types::event::Usage> {
    Some(crate::types::event::Usage {
        input_tokens: value.get("input_tokens").and_then(serde_json::Value::as_u64),
        output_tokens: value.get("output_tokens").and_then(serde_json::Value::as_u64),
    })
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn retry_after_from_headers(headers: &[(String, String)]) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::schema::{AuthConfig, AuthScheme, Capabilities, EndpointConfig, RequestConfig, StreamDecoderKind, StreamingConfig};
    use crate::manifest::ManifestLoader;
    use crate::registry::RegistryConfig;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;
    use crate::resilience::fallback::WeightedTarget;
    use crate::types::request::Message;
    use std::collections::HashMap;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn streaming_manifest(base_url: String) -> ProtocolManifest {
        let mut paths = HashMap::new();
        paths.insert("chat".to_string(), "/v1/chat/completions".to_string());
        ProtocolManifest {
            id: "test-provider".to_string(),
            protocol_version: "1.0".to_string(),
            endpoint: EndpointConfig { base_url, paths },
            auth: AuthConfig { scheme: AuthScheme::None, header_name: None, env_var_name: String::new(), prefix: None },
            request: RequestConfig::default(),
            streaming: Some(StreamingConfig {
                decoder: StreamDecoderKind::Sse,
                content_path: Some("$.choices[0].delta.content".into()),
                tool_call_path: None,
                role_path: None,
                finish_reason_path: None,
                usage_path: None,
                fan_out_path: None,
            }),
            error_mapping: HashMap::new(),
            capabilities: Capabilities { streaming: true, ..Default::default() },
        }
    }

    async fn build_executor(base_url: String) -> (ResilientExecutor, ProtocolManifest) {
        let manifest = streaming_manifest(base_url);
        let loader = ManifestLoader::new(vec![], false);
        loader.register(manifest.clone()).unwrap();
        let registry = Arc::new(Registry::new(
            Arc::new(loader),
            RegistryConfig {
                requests_per_second: 100,
                breaker: CircuitBreakerConfig { failure_threshold: 10, ..Default::default() },
                max_inflight: 10,
                backpressure_queue_wait: Duration::from_secs(1),
            },
        ));
        let transport = Transport::new(Duration::from_secs(5), Duration::from_secs(5), false).unwrap();
        (ResilientExecutor::new(transport, registry, RetryPolicy { max_attempts: 2, ..Default::default() }), manifest)
    }

    #[tokio::test]
    async fn test_successful_stream_call_produces_events() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n",
                        "text/event-stream",
                    ),
            )
            .mount(&mock_server)
            .await;

        let (executor, _manifest) = build_executor(mock_server.uri()).await;
        let chain = FallbackChain::new(vec![WeightedTarget::new(ProviderTarget::new("test-provider", "m"), 1)]);
        let request = CanonicalRequest::new(vec![Message::user("hi")]);
        let (result, stats) = executor.execute(&chain, &request, CallOptions::streaming("chat")).await;
        match result.unwrap() {
            CallOutcome::Streaming(stream) => {
                let events: Vec<CanonicalEvent> = stream.collect().await;
                assert!(events.iter().any(|e| matches!(e, CanonicalEvent::PartialContentDelta { .. })));
                assert!(events.last().unwrap().is_terminal());
            }
            CallOutcome::Complete(_) => panic!("expected a streaming outcome"),
        }
        assert_eq!(stats.fallback_hops, 0);
    }

    #[tokio::test]
    async fn test_server_error_falls_back_to_next_target() {
        let failing_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing_server)
            .await;
        let healthy_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n", "text/event-stream"),
            )
            .mount(&healthy_server)
            .await;

        let failing_manifest = streaming_manifest(failing_server.uri());
        let mut healthy_manifest = streaming_manifest(healthy_server.uri());
        healthy_manifest.id = "healthy-provider".to_string();

        let loader = ManifestLoader::new(vec![], false);
        loader.register(failing_manifest).unwrap();
        loader.register(healthy_manifest).unwrap();
        let registry = Arc::new(Registry::new(
            Arc::new(loader),
            RegistryConfig {
                requests_per_second: 100,
                breaker: CircuitBreakerConfig { failure_threshold: 10, ..Default::default() },
                max_inflight: 10,
                backpressure_queue_wait: Duration::from_secs(1),
            },
        ));
        let transport = Transport::new(Duration::from_secs(5), Duration::from_secs(5), false).unwrap();
        let executor = ResilientExecutor::new(transport, registry, RetryPolicy { max_attempts: 1, ..Default::default() });

        let chain = FallbackChain::new(vec![
            WeightedTarget::new(ProviderTarget::new("test-provider", "m"), 1),
            WeightedTarget::new(ProviderTarget::new("healthy-provider", "m"), 1),
        ]);
        let request = CanonicalRequest::new(vec![Message::user("hi")]);
        let (result, stats) = executor.execute(&chain, &request, CallOptions::streaming("chat")).await;
        assert!(result.is_ok());
        assert_eq!(stats.fallback_hops, 1);
        assert_eq!(stats.target_used.provider_id, "healthy-provider");
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_retry_delay_promptly() {
        let failing_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing_server)
            .await;

        let manifest = streaming_manifest(failing_server.uri());
        let loader = ManifestLoader::new(vec![], false);
        loader.register(manifest).unwrap();
        let registry = Arc::new(Registry::new(
            Arc::new(loader),
            RegistryConfig {
                requests_per_second: 100,
                breaker: CircuitBreakerConfig { failure_threshold: 10, ..Default::default() },
                max_inflight: 10,
                backpressure_queue_wait: Duration::from_secs(1),
            },
        ));
        let transport = Transport::new(Duration::from_secs(5), Duration::from_secs(5), false).unwrap();
        let executor = ResilientExecutor::new(
            transport,
            registry,
            RetryPolicy { max_attempts: 5, min_delay: Duration::from_secs(10), max_delay: Duration::from_secs(30), jitter: crate::resilience::retry::Jitter::None },
        );

        let chain = FallbackChain::new(vec![WeightedTarget::new(ProviderTarget::new("test-provider", "m"), 1)]);
        let request = CanonicalRequest::new(vec![Message::user("hi")]);
        let cancel = CancelToken::new();
        let options = CallOptions { operation: "chat".to_string(), streaming: true, api_key: None, cancel: cancel.clone() };

        let cancel_for_task = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_for_task.cancel(crate::cancellation::CancelReason::UserRequest);
        });

        let started = Instant::now();
        let (result, _stats) = executor.execute(&chain, &request, options).await;
        assert!(started.elapsed() < Duration::from_secs(2), "cancellation should interrupt the 10s retry delay promptly");
        assert!(matches!(result, Err(e) if e.kind() == ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_registered_sink_observes_fallback_hop() {
        use crate::observability::ObservabilityEvent;
        use std::sync::Mutex;

        struct CollectingSink(Mutex<Vec<ObservabilityEvent>>);
        impl Sink for CollectingSink {
            fn emit(&self, event: &ObservabilityEvent) {
                self.0.lock().unwrap().push(event.clone());
            }
        }

        let failing_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing_server)
            .await;
        let healthy_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n", "text/event-stream"),
            )
            .mount(&healthy_server)
            .await;

        let failing_manifest = streaming_manifest(failing_server.uri());
        let mut healthy_manifest = streaming_manifest(healthy_server.uri());
        healthy_manifest.id = "healthy-provider".to_string();

        let loader = ManifestLoader::new(vec![], false);
        loader.register(failing_manifest).unwrap();
        loader.register(healthy_manifest).unwrap();
        let registry = Arc::new(Registry::new(
            Arc::new(loader),
            RegistryConfig {
                requests_per_second: 100,
                breaker: CircuitBreakerConfig { failure_threshold: 10, ..Default::default() },
                max_inflight: 10,
                backpressure_queue_wait: Duration::from_secs(1),
            },
        ));
        let transport = Transport::new(Duration::from_secs(5), Duration::from_secs(5), false).unwrap();
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let executor = ResilientExecutor::new(transport, registry, RetryPolicy { max_attempts: 1, ..Default::default() })
            .with_sink(sink.clone());

        let chain = FallbackChain::new(vec![
            WeightedTarget::new(ProviderTarget::new("test-provider", "m"), 1),
            WeightedTarget::new(ProviderTarget::new("healthy-provider", "m"), 1),
        ]);
        let request = CanonicalRequest::new(vec![Message::user("hi")]);
        let (result, _stats) = executor.execute(&chain, &request, CallOptions::streaming("chat")).await;
        assert!(result.is_ok());

        let events = sink.0.lock().unwrap();
        assert!(events.iter().any(|e| e.event_name == "fallback"));
    }

    #[tokio::test]
    async fn test_successful_call_emits_full_event_bracket() {
        use crate::observability::ObservabilityEvent;
        use std::sync::Mutex;

        struct CollectingSink(Mutex<Vec<ObservabilityEvent>>);
        impl Sink for CollectingSink {
            fn emit(&self, event: &ObservabilityEvent) {
                self.0.lock().unwrap().push(event.clone());
            }
        }

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n", "text/event-stream"),
            )
            .mount(&mock_server)
            .await;

        let (executor, _manifest) = build_executor(mock_server.uri()).await;
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let executor = executor.with_sink(sink.clone());
        let chain = FallbackChain::new(vec![WeightedTarget::new(ProviderTarget::new("test-provider", "m"), 1)]);
        let request = CanonicalRequest::new(vec![Message::user("hi")]);
        let (result, _stats) = executor.execute(&chain, &request, CallOptions::streaming("chat")).await;
        let CallOutcome::Streaming(stream) = result.unwrap() else { panic!("expected a streaming outcome") };
        let _events: Vec<CanonicalEvent> = stream.collect().await;

        let names: Vec<&str> = sink.0.lock().unwrap().iter().map(|e| e.event_name).collect();
        for expected in [
            "request_start",
            "preflight_gate_result",
            "transport_request",
            "transport_response",
            "stream_first_event",
            "request_end",
        ] {
            assert!(names.contains(&expected), "missing {expected} in {names:?}");
        }
    }

    #[tokio::test]
    async fn test_non_streaming_call_populates_token_usage() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hi there"}, "finish_reason": "stop"}],
                "usage": {"input_tokens": 12, "output_tokens": 34},
            })))
            .mount(&mock_server)
            .await;

        let mut manifest = streaming_manifest(mock_server.uri());
        manifest.capabilities.streaming = false;
        manifest.streaming = Some(StreamingConfig {
            decoder: StreamDecoderKind::Sse,
            content_path: Some("$.choices[0].message.content".into()),
            tool_call_path: None,
            role_path: None,
            finish_reason_path: Some("$.choices[0].finish_reason".into()),
            usage_path: Some("$.usage".into()),
            fan_out_path: None,
        });
        let loader = ManifestLoader::new(vec![], false);
        loader.register(manifest).unwrap();
        let registry = Arc::new(Registry::new(
            Arc::new(loader),
            RegistryConfig {
                requests_per_second: 100,
                breaker: CircuitBreakerConfig { failure_threshold: 10, ..Default::default() },
                max_inflight: 10,
                backpressure_queue_wait: Duration::from_secs(1),
            },
        ));
        let transport = Transport::new(Duration::from_secs(5), Duration::from_secs(5), false).unwrap();
        let executor = ResilientExecutor::new(transport, registry, RetryPolicy { max_attempts: 1, ..Default::default() });

        let chain = FallbackChain::new(vec![WeightedTarget::new(ProviderTarget::new("test-provider", "m"), 1)]);
        let request = CanonicalRequest::new(vec![Message::user("hi")]);
        let mut options = CallOptions::streaming("chat");
        options.streaming = false;
        let (result, stats) = executor.execute(&chain, &request, options).await;
        match result.unwrap() {
            CallOutcome::Complete(events) => {
                assert!(events.iter().any(|e| matches!(e, CanonicalEvent::Metadata { usage: Some(u) } if u.input_tokens == Some(12))));
            }
            CallOutcome::Streaming(_) => panic!("expected a non-streaming outcome"),
        }
        assert_eq!(stats.tokens_in, Some(12));
        assert_eq!(stats.tokens_out, Some(34));
    }
}
