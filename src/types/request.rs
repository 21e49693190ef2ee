//! `CanonicalRequest` and its nested types — the provider-agnostic request
//! shape every manifest's request-builder consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// A participant role in a canonical conversation.
///
/// Serializes as a lowercase string; manifests remap these to whatever
/// role strings the upstream wire format expects (see
/// `ProtocolManifest.request.role_map`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System/developer instructions.
    System,
    /// Human user turn.
    User,
    /// Assistant turn.
    Assistant,
    /// Tool result turn (carries a `tool_call_id`).
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A tagged content block within a [`Message`].
///
/// Mirrors the Anthropic-style content-block union this codebase has
/// always used for multimodal messages, generalized to cover the audio
/// modality the protocol spec adds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// An image, as a URL or base64-encoded data with a MIME type.
    Image {
        /// `Some(url)` for a remote image, `None` when `data`/`mime_type` are set.
        url: Option<String>,
        /// Base64-encoded image bytes, when not referenced by URL.
        data: Option<String>,
        /// MIME type of `data` (e.g. `"image/png"`).
        mime_type: Option<String>,
    },
    /// An audio clip, as a URL or base64-encoded data with a MIME type.
    Audio {
        /// `Some(url)` for a remote clip, `None` when `data`/`mime_type` are set.
        url: Option<String>,
        /// Base64-encoded audio bytes, when not referenced by URL.
        data: Option<String>,
        /// MIME type of `data` (e.g. `"audio/wav"`).
        mime_type: Option<String>,
    },
}

impl ContentBlock {
    /// Creates a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates an image block from a remote URL.
    #[must_use]
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::Image {
            url: Some(url.into()),
            data: None,
            mime_type: None,
        }
    }

    /// Creates an image block from base64-encoded data.
    #[must_use]
    pub fn image_base64(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            url: None,
            data: Some(data.into()),
            mime_type: Some(mime_type.into()),
        }
    }

    /// Returns the text if this is a `Text` block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Either a plain string or a list of [`ContentBlock`]s.
///
/// Most providers accept plain text for simple turns; multimodal or
/// tool-bearing turns need the block-list form. Serializing collapses to
/// whichever the source held — the request builder decides how to render
/// this for a specific provider's wire dialect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// One or more tagged content blocks.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenates all text in this content, ignoring non-text blocks.
    #[must_use]
    pub fn extract_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A tool call Claude (or any provider) asked the caller to execute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique id for this call, used to correlate the eventual tool result.
    pub id: String,
    /// Name of the tool/function to invoke.
    pub function_name: String,
    /// Arguments, as a raw JSON-encoded string (providers differ on whether
    /// this arrives whole or as streamed fragments; the pipeline
    /// reassembles fragments before this type is ever populated).
    pub arguments_json: String,
}

/// A single turn in a [`CanonicalRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Who sent this turn.
    pub role: Role,
    /// What was said.
    pub content: MessageContent,
    /// Tool calls requested by an assistant turn, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For `Role::Tool` turns: which call this is the result of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Creates a plain-text user turn.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a plain-text assistant turn.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a plain-text system turn.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a tool-result turn.
    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDef {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description used by the model to decide when to call it.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub json_schema: Value,
}

impl ToolDef {
    /// Creates a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, json_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema,
        }
    }
}

/// Controls how the model selects among offered tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    #[default]
    Auto,
    /// The model must call some tool.
    Required,
    /// The model must call this specific tool.
    Tool {
        /// Name of the required tool.
        name: String,
    },
    /// Tool calling is disabled for this request.
    None,
}

/// Sampling parameters, provider-agnostic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Sampling {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// The provider-agnostic request the caller builds once, regardless of
/// which target it is ultimately sent to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRequest {
    /// Conversation turns, in order.
    pub messages: Vec<Message>,
    /// Tools offered to the model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    /// Tool selection policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Sampling parameters.
    #[serde(default)]
    pub sampling: Sampling,
    /// Opaque provider-specific extensions, passed through verbatim by the
    /// request builder when the manifest declares a matching extension slot.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, Value>,
}

impl CanonicalRequest {
    /// Creates a request from a list of messages, with default sampling and
    /// no tools.
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Returns `true` if streaming tool use would need to be reassembled:
    /// i.e. tools were offered, so the model may emit `tool_use` blocks.
    #[must_use]
    pub fn offers_tools(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}
