//! Decoders turn a raw byte stream into a sequence of decoded JSON frames.
//!
//! Each decoder owns its own straddling-chunk buffer: partial frames that
//! span a chunk boundary are preserved and re-examined the next time bytes
//! arrive, never dropped or double-emitted.

use crate::manifest::schema::StreamDecoderKind;
use serde_json::Value;

/// A raw decoded frame plus, for Anthropic-SSE, the named event type that
/// routes it to the right accumulator/mapper handler.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// SSE `event:` name, when the wire format names events
    /// (`content_block_delta`, `message_stop`, ...). `None` for NDJSON and
    /// plain SSE, where routing is driven purely by selector paths.
    pub event_name: Option<String>,
    /// The decoded JSON payload.
    pub value: Value,
}

/// Result of feeding a decoder one more chunk of bytes.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// Zero or more complete frames were decoded; more bytes may still follow.
    Frames(Vec<DecodedFrame>),
    /// The stream's terminator was seen (`data: [DONE]` or equivalent); no
    /// further bytes should be fed.
    Done(Vec<DecodedFrame>),
    /// A frame could not be parsed as JSON.
    Malformed(String),
}

/// Stateful per-request decoder. One instance is exclusively owned by a
/// single in-flight request; it is never shared or reset across requests.
pub struct Decoder {
    kind: StreamDecoderKind,
    buffer: String,
}

const SSE_DONE_MARKER: &str = "[DONE]";

impl Decoder {
    /// Creates a decoder for the given wire format.
    #[must_use]
    pub fn new(kind: StreamDecoderKind) -> Self {
        Self { kind, buffer: String::new() }
    }

    /// Feeds the next chunk of bytes, returning whatever complete frames
    /// (if any) became decodable.
    pub fn feed(&mut self, chunk: &[u8]) -> DecodeOutcome {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        match self.kind {
            StreamDecoderKind::Sse | StreamDecoderKind::AnthropicSse => self.drain_sse(),
            StreamDecoderKind::Ndjson => self.drain_ndjson(),
        }
    }

    fn drain_sse(&mut self) -> DecodeOutcome {
        let mut frames = Vec::new();
        let mut done = false;

        loop {
            let Some(boundary) = self.buffer.find("\n\n") else { break };
            let raw_event: String = self.buffer.drain(..boundary + 2).collect();
            let raw_event = raw_event.trim_end_matches("\n\n");

            let mut event_name = None;
            let mut data_lines = Vec::new();
            for line in raw_event.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event_name = Some(name.trim().to_string());
                } else if let Some(data) = line.strip_prefix("data:") {
                    data_lines.push(data.trim_start());
                }
            }
            if data_lines.is_empty() {
                continue;
            }
            let data = data_lines.join("\n");
            if data.trim() == SSE_DONE_MARKER {
                done = true;
                break;
            }
            match serde_json::from_str::<Value>(&data) {
                Ok(value) => frames.push(DecodedFrame { event_name, value }),
                Err(e) => return DecodeOutcome::Malformed(format!("invalid SSE JSON payload: {e}")),
            }
        }

        if done {
            DecodeOutcome::Done(frames)
        } else {
            DecodeOutcome::Frames(frames)
        }
    }

    fn drain_ndjson(&mut self) -> DecodeOutcome {
        let mut frames = Vec::new();

        loop {
            let Some(boundary) = self.buffer.find('\n') else { break };
            let line: String = self.buffer.drain(..=boundary).collect();
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(value) => frames.push(DecodedFrame { event_name: None, value }),
                Err(e) => return DecodeOutcome::Malformed(format!("invalid NDJSON payload: {e}")),
            }
        }

        DecodeOutcome::Frames(frames)
    }
}
