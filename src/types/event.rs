//! `CanonicalEvent` — the fixed output alphabet every manifest's streaming
//! pipeline converges to, regardless of the upstream wire format.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};

/// Token usage reported at the end of a call, when the provider sends it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input (prompt) tokens consumed.
    pub input_tokens: Option<u64>,
    /// Output (completion) tokens generated.
    pub output_tokens: Option<u64>,
}

/// A single event emitted by the streaming pipeline, in arrival order.
///
/// This is the alphabet every `Decoder -> Selector -> Accumulator ->
/// FanOut -> EventMapper` chain produces, no matter which provider's wire
/// format fed it. Callers consume this type and never see the raw
/// provider payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// A fragment of visible assistant text.
    PartialContentDelta {
        /// The text fragment.
        text: String,
        /// Monotonically increasing sequence number within the call.
        seq: u64,
    },
    /// A fragment of provider-exposed reasoning/thinking text, when the
    /// provider separates it from visible content.
    ThinkingDelta {
        /// The thinking-text fragment.
        text: String,
    },
    /// The model began a tool call.
    ToolCallStarted {
        /// Id assigned to this call, used to correlate later deltas/end.
        id: String,
        /// Name of the tool being called.
        name: String,
    },
    /// A fragment of a tool call's arguments.
    PartialToolCall {
        /// Which call this fragment belongs to.
        id: String,
        /// Raw fragment of the arguments' JSON encoding.
        args_delta: String,
        /// `true` once the accumulator believes the arguments are complete
        /// and have been validated as parseable JSON.
        is_complete: bool,
    },
    /// A tool call finished; its arguments are complete.
    ToolCallEnded {
        /// Which call ended.
        id: String,
    },
    /// Out-of-band metadata, such as usage accounting, seen mid-stream.
    Metadata {
        /// Usage counters reported so far, if any.
        usage: Option<Usage>,
    },
    /// The stream ended normally.
    StreamEnd {
        /// Why generation stopped (e.g. `"end_turn"`, `"tool_use"`,
        /// `"max_tokens"`), as reported by the provider and passed through
        /// unmapped so callers can branch on provider-specific reasons.
        finish_reason: String,
    },
    /// The stream ended because of an error.
    StreamError {
        /// Classified error kind.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl CanonicalEvent {
    /// Returns `true` for the two terminal variants that end a stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamEnd { .. } | Self::StreamError { .. })
    }

    /// Returns `true` if this event carries visible or thinking text.
    #[must_use]
    pub fn is_content(&self) -> bool {
        matches!(self, Self::PartialContentDelta { .. } | Self::ThinkingDelta { .. })
    }
}
