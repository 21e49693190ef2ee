//! Converts selector output into canonical [`CanonicalEvent`]s.
//!
//! A rule-based mapper handles manifests using plain JSONPath selectors
//! (OpenAI-style deltas); an Anthropic-specific mapper handles the named
//! `content_block_*`/`message_*` event routing its SSE dialect uses
//! instead, generalizing the teacher's hardcoded `process_stream` state
//! machine. Both attach monotonically increasing `seq` numbers to content
//! deltas and funnel tool-call fragments through the shared [`Accumulator`].

use crate::pipeline::accumulator::Accumulator;
use crate::pipeline::decoder::DecodedFrame;
use crate::pipeline::selector::Selector;
use crate::error::ErrorKind;
use crate::manifest::schema::StreamingConfig;
use crate::types::event::{CanonicalEvent, Usage};
use serde_json::Value;

/// Selects which event-mapping strategy a manifest's streaming dialect needs.
pub enum EventMapper {
    /// Plain JSONPath-selector-driven mapping (OpenAI-style dialects).
    Generic(GenericMapper),
    /// Named-event routing (Anthropic's `content_block_*`/`message_*` dialect).
    Anthropic(AnthropicMapper),
}

impl EventMapper {
    /// Builds the mapper appropriate for `config`.
    #[must_use]
    pub fn for_streaming_config(config: &StreamingConfig) -> Self {
        use crate::manifest::schema::StreamDecoderKind;
        match config.decoder {
            StreamDecoderKind::AnthropicSse => Self::Anthropic(AnthropicMapper::new()),
            StreamDecoderKind::Sse | StreamDecoderKind::Ndjson => Self::Generic(GenericMapper::new(config)),
        }
    }

    /// Maps one decoded frame into zero or more canonical events, using
    /// and updating `accumulator` for any tool-call fragments encountered.
    pub fn map_frame(
        &mut self,
        frame: &DecodedFrame,
        accumulator: &mut Accumulator,
    ) -> Result<Vec<CanonicalEvent>, (String, String)> {
        match self {
            Self::Generic(mapper) => Ok(mapper.map_frame(frame, accumulator)),
            Self::Anthropic(mapper) => mapper.map_frame(frame, accumulator),
        }
    }
}

/// Rule-based mapper driven purely by manifest-declared selectors.
pub struct GenericMapper {
    content_path: Option<Selector>,
    finish_reason_path: Option<Selector>,
    usage_path: Option<Selector>,
    tool_call_path: Option<Selector>,
    seq: u64,
}

impl GenericMapper {
    #[must_use]
    fn new(config: &StreamingConfig) -> Self {
        Self {
            content_path: config.content_path.as_deref().and_then(Selector::parse),
            finish_reason_path: config.finish_reason_path.as_deref().and_then(Selector::parse),
            usage_path: config.usage_path.as_deref().and_then(Selector::parse),
            tool_call_path: config.tool_call_path.as_deref().and_then(Selector::parse),
            seq: 0,
        }
    }

    fn map_frame(&mut self, frame: &DecodedFrame, accumulator: &mut Accumulator) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();

        if let Some(selector) = &self.tool_call_path {
            if let Some(deltas) = selector.evaluate(&frame.value) {
                events.extend(self.map_tool_call_deltas(deltas, accumulator));
            }
        }

        if let Some(selector) = &self.content_path {
            if let Some(text) = selector.evaluate_str(&frame.value) {
                if !text.is_empty() {
                    events.push(CanonicalEvent::PartialContentDelta { text: text.to_string(), seq: self.seq });
                    self.seq += 1;
                }
            }
        }

        if let Some(selector) = &self.usage_path {
            if let Some(usage_value) = selector.evaluate(&frame.value) {
                events.push(CanonicalEvent::Metadata { usage: parse_usage(usage_value) });
            }
        }

        if let Some(selector) = &self.finish_reason_path {
            if let Some(reason) = selector.evaluate_str(&frame.value) {
                events.push(CanonicalEvent::StreamEnd { finish_reason: reason.to_string() });
            }
        }

        events
    }

    /// Generic (OpenAI-style) tool-call delta shape: an array of objects
    /// `{ "id"?: string, "name"?: string, "arguments"?: string }`, each
    /// identifying the call it belongs to by a stable `id` field.
    fn map_tool_call_deltas(&self, deltas: &Value, accumulator: &mut Accumulator) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        let Value::Array(deltas) = deltas else { return events };

        for delta in deltas {
            let Some(id) = delta.get("id").and_then(Value::as_str) else { continue };
            if let Some(name) = delta.get("name").and_then(Value::as_str) {
                if let Some(event) = accumulator.on_tool_call_start(id, name) {
                    events.push(event);
                }
            }
            if let Some(arguments) = delta.get("arguments").and_then(Value::as_str) {
                events.extend(accumulator.on_tool_call_delta(id, arguments));
            }
        }
        events
    }
}

fn parse_usage(value: &Value) -> Option<Usage> {
    Some(Usage {
        input_tokens: value.get("input_tokens").and_then(Value::as_u64),
        output_tokens: value.get("output_tokens").and_then(Value::as_u64),
    })
}

/// Maps Anthropic's named-event SSE dialect, generalizing the teacher's
/// `process_stream`/`handle_content_block_start`/`handle_content_block_delta`
/// state machine from a single hardcoded client into a reusable mapper.
#[derive(Default)]
pub struct AnthropicMapper {
    seq: u64,
    /// Tool-call id currently open via `content_block_start`, cleared on
    /// the matching `content_block_stop`.
    open_tool_call_id: Option<String>,
}

impl AnthropicMapper {
    #[must_use]
    fn new() -> Self {
        Self::default()
    }

    fn map_frame(
        &mut self,
        frame: &DecodedFrame,
        accumulator: &mut Accumulator,
    ) -> Result<Vec<CanonicalEvent>, (String, String)> {
        let mut events = Vec::new();
        match frame.event_name.as_deref() {
            Some("content_block_start") => {
                if let Some(block) = frame.value.get("content_block") {
                    if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                        let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                        let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                        if let Some(event) = accumulator.on_tool_call_start(id, name) {
                            events.push(event);
                        }
                        self.open_tool_call_id = Some(id.to_string());
                    }
                }
            }
            Some("content_block_delta") => {
                if let Some(delta) = frame.value.get("delta") {
                    match delta.get("type").and_then(Value::as_str) {
                        Some("text_delta") => {
                            if let Some(text) = delta.get("text").and_then(Value::as_str) {
                                events.push(CanonicalEvent::PartialContentDelta {
                                    text: text.to_string(),
                                    seq: self.seq,
                                });
                                self.seq += 1;
                            }
                        }
                        Some("input_json_delta") => {
                            if let (Some(id), Some(partial)) =
                                (&self.open_tool_call_id, delta.get("partial_json").and_then(Value::as_str))
                            {
                                events.extend(accumulator.on_tool_call_delta(id, partial));
                            }
                        }
                        Some("thinking_delta") => {
                            if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                                events.push(CanonicalEvent::ThinkingDelta { text: text.to_string() });
                            }
                        }
                        _ => {}
                    }
                }
            }
            Some("content_block_stop") => {
                if let Some(id) = self.open_tool_call_id.take() {
                    events.extend(accumulator.finish_one(&id)?);
                }
            }
            Some("message_delta") => {
                if let Some(reason) =
                    frame.value.get("delta").and_then(|d| d.get("stop_reason")).and_then(Value::as_str)
                {
                    events.push(CanonicalEvent::StreamEnd { finish_reason: reason.to_string() });
                }
                if let Some(usage) = frame.value.get("usage") {
                    events.push(CanonicalEvent::Metadata { usage: parse_usage(usage) });
                }
            }
            Some("message_stop") => {
                if !events.iter().any(|e| e.is_terminal()) {
                    events.push(CanonicalEvent::StreamEnd { finish_reason: "message_stop".to_string() });
                }
            }
            _ => {}
        }
        Ok(events)
    }
}

/// Synthesizes the canonical event sequence for a non-streaming response:
/// one `PartialContentDelta` for the full content, then a single
/// `StreamEnd`, so downstream consumers never branch on streaming-vs-not.
#[must_use]
pub fn map_non_streaming_response(content: &str, finish_reason: &str) -> Vec<CanonicalEvent> {
    vec![
        CanonicalEvent::PartialContentDelta { text: content.to_string(), seq: 0 },
        CanonicalEvent::StreamEnd { finish_reason: finish_reason.to_string() },
    ]
}

/// Builds a terminal error event for a classified failure.
#[must_use]
pub fn map_stream_error(kind: ErrorKind, message: impl Into<String>) -> CanonicalEvent {
    CanonicalEvent::StreamError { kind, message: message.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::schema::StreamDecoderKind;
    use serde_json::json;

    fn generic_config() -> StreamingConfig {
        StreamingConfig {
            decoder: StreamDecoderKind::Sse,
            content_path: Some("$.choices[0].delta.content".into()),
            tool_call_path: None,
            role_path: None,
            finish_reason_path: Some("$.choices[0].finish_reason".into()),
            usage_path: Some("$.usage".into()),
            fan_out_path: None,
        }
    }

    #[test]
    fn test_s1_stream_ok_scenario() {
        let mut mapper = EventMapper::for_streaming_config(&generic_config());
        let mut accumulator = Accumulator::new();

        let frame1 = DecodedFrame {
            event_name: None,
            value: json!({"choices": [{"delta": {"content": "Hel"}}]}),
        };
        let frame2 = DecodedFrame {
            event_name: None,
            value: json!({"choices": [{"delta": {"content": "lo"}}]}),
        };

        let events1 = mapper.map_frame(&frame1, &mut accumulator).unwrap();
        let events2 = mapper.map_frame(&frame2, &mut accumulator).unwrap();

        assert_eq!(events1, vec![CanonicalEvent::PartialContentDelta { text: "Hel".into(), seq: 0 }]);
        assert_eq!(events2, vec![CanonicalEvent::PartialContentDelta { text: "lo".into(), seq: 1 }]);
    }

    #[test]
    fn test_s2_anthropic_tool_call_scenario() {
        let mut mapper = EventMapper::for_streaming_config(&StreamingConfig {
            decoder: StreamDecoderKind::AnthropicSse,
            content_path: None,
            tool_call_path: None,
            role_path: None,
            finish_reason_path: None,
            usage_path: None,
            fan_out_path: None,
        });
        let mut accumulator = Accumulator::new();

        let start = DecodedFrame {
            event_name: Some("content_block_start".into()),
            value: json!({"content_block": {"type": "tool_use", "id": "t1", "name": "get_weather"}}),
        };
        let delta1 = DecodedFrame {
            event_name: Some("content_block_delta".into()),
            value: json!({"delta": {"type": "input_json_delta", "partial_json": "{\"city\":"}}),
        };
        let delta2 = DecodedFrame {
            event_name: Some("content_block_delta".into()),
            value: json!({"delta": {"type": "input_json_delta", "partial_json": "\"Tokyo\""}}),
        };
        let delta3 = DecodedFrame {
            event_name: Some("content_block_delta".into()),
            value: json!({"delta": {"type": "input_json_delta", "partial_json": "}"}}),
        };
        let stop = DecodedFrame { event_name: Some("content_block_stop".into()), value: json!({}) };
        let message_stop = DecodedFrame { event_name: Some("message_stop".into()), value: json!({}) };

        let mut all_events = Vec::new();
        for frame in [&start, &delta1, &delta2, &delta3, &stop, &message_stop] {
            all_events.extend(mapper.map_frame(frame, &mut accumulator).unwrap());
        }

        assert_eq!(
            all_events,
            vec![
                CanonicalEvent::ToolCallStarted { id: "t1".into(), name: "get_weather".into() },
                CanonicalEvent::PartialToolCall { id: "t1".into(), args_delta: "{\"city\":".into(), is_complete: false },
                CanonicalEvent::PartialToolCall { id: "t1".into(), args_delta: "\"Tokyo\"".into(), is_complete: false },
                CanonicalEvent::PartialToolCall { id: "t1".into(), args_delta: "}".into(), is_complete: false },
                CanonicalEvent::PartialToolCall { id: "t1".into(), args_delta: String::new(), is_complete: true },
                CanonicalEvent::ToolCallEnded { id: "t1".into() },
                CanonicalEvent::StreamEnd { finish_reason: "message_stop".into() },
            ]
        );
    }

    #[test]
    fn test_non_streaming_synthesis() {
        let events = map_non_streaming_response("hello world", "end_turn");
        assert_eq!(
            events,
            vec![
                CanonicalEvent::PartialContentDelta { text: "hello world".into(), seq: 0 },
                CanonicalEvent::StreamEnd { finish_reason: "end_turn".into() },
            ]
        );
    }
}
