//! Builds the wire request a [`crate::transport::Transport`] sends, from a
//! [`CanonicalRequest`] and the target manifest's request-assembly rules.
//!
//! Generalizes the fixed Anthropic header/body assembly this codebase used
//! to hardcode into a manifest-driven transform: role remapping, tool
//! dialect serialization, and auth all come from the manifest instead of
//! being baked into the call site.

use std::collections::HashMap;

use secrecy::ExposeSecret;
use serde_json::{json, Value};

use crate::error::{CoreError, ErrorContext, ErrorKind};
use crate::manifest::schema::{AuthScheme, ProtocolManifest};
use crate::types::request::{CanonicalRequest, ContentBlock, MessageContent, Role, ToolChoice, ToolDef};
use crate::types::target::{ApiKeySource, ProviderTarget};
use crate::transport::WireRequest;

/// Resolves the API key to use for `target` against `manifest`, honoring
/// the precedence documented on [`ApiKeySource`]: explicit per-call key,
/// then per-target override, then the manifest's declared env var.
pub fn resolve_api_key(
    manifest: &ProtocolManifest,
    target: &ProviderTarget,
    explicit: Option<&ApiKeySource>,
) -> Result<Option<String>, CoreError> {
    if manifest.auth.scheme == AuthScheme::None {
        return Ok(None);
    }
    let source = explicit.or(target.api_key_override.as_ref());
    let value = match source {
        Some(ApiKeySource::Explicit(secret)) => secret.expose_secret().to_string(),
        Some(ApiKeySource::Env(name)) => read_env_key(name)?,
        None => read_env_key(&manifest.auth.env_var_name)?,
    };
    Ok(Some(value))
}

fn read_env_key(name: &str) -> Result<String, CoreError> {
    std::env::var(name).map_err(|_| {
        CoreError::classified(
            ErrorKind::Authentication,
            ErrorContext { message: format!("environment variable {name} is not set"), ..Default::default() },
        )
    })
}

/// Builds a fully-formed [`WireRequest`] for `request` against `target`,
/// using `manifest`'s endpoint, auth, and request-transform rules.
/// `operation` selects which of the manifest's declared endpoint paths to
/// use (e.g. `"chat"`).
pub fn build_wire_request(
    request: &CanonicalRequest,
    manifest: &ProtocolManifest,
    target: &ProviderTarget,
    operation: &str,
    explicit_api_key: Option<&ApiKeySource>,
) -> Result<WireRequest, CoreError> {
    let base_url = target.base_url_override.as_deref().unwrap_or(&manifest.endpoint.base_url);
    let path = manifest.operation_path(operation)?;
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);

    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    if let Some(key) = resolve_api_key(manifest, target, explicit_api_key)? {
        push_auth_header(&mut headers, manifest, &key);
    }

    let body = build_body(request, manifest, target);
    let body_bytes = serde_json::to_vec(&body)
        .map_err(|e| CoreError::Other { message: format!("failed to serialize request body: {e}") })?;

    Ok(WireRequest { url, headers, body: body_bytes })
}

fn push_auth_header(headers: &mut Vec<(String, String)>, manifest: &ProtocolManifest, key: &str) {
    let value = match &manifest.auth.prefix {
        Some(prefix) => format!("{prefix}{key}"),
        None => key.to_string(),
    };
    match manifest.auth.scheme {
        AuthScheme::Bearer => {
            let header_name = manifest.auth.header_name.as_deref().unwrap_or("Authorization");
            let value = if manifest.auth.prefix.is_some() { value } else { format!("Bearer {value}") };
            headers.push((header_name.to_string(), value));
        }
        AuthScheme::Header => {
            let header_name = manifest.auth.header_name.as_deref().unwrap_or("x-api-key");
            headers.push((header_name.to_string(), value));
        }
        AuthScheme::Query | AuthScheme::None => {}
    }
}

fn build_body(request: &CanonicalRequest, manifest: &ProtocolManifest, target: &ProviderTarget) -> Value {
    let dialect = manifest.request.tool_dialect.as_deref();
    let mut body = serde_json::Map::new();
    body.insert(manifest.request.model_field.clone(), json!(target.model_id));
    body.insert("messages".to_string(), json!(wire_messages(request, manifest, dialect)));

    if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
        body.insert("tools".to_string(), wire_tools(tools, dialect));
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("tool_choice".to_string(), wire_tool_choice(choice));
    }
    if let Some(temperature) = request.sampling.temperature {
        body.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = request.sampling.top_p {
        body.insert("top_p".to_string(), json!(top_p));
    }
    if let Some(max_tokens) = request.sampling.max_tokens {
        body.insert("max_tokens".to_string(), json!(max_tokens));
    }
    if !request.sampling.stop.is_empty() {
        body.insert("stop".to_string(), json!(request.sampling.stop));
    }
    if manifest.capabilities.streaming {
        body.insert("stream".to_string(), json!(true));
    }
    for (key, value) in &request.extensions {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

fn wire_messages(request: &CanonicalRequest, manifest: &ProtocolManifest, dialect: Option<&str>) -> Vec<Value> {
    request
        .messages
        .iter()
        .map(|message| {
            let role = remap_role(message.role, &manifest.request.role_map);
            let mut entry = serde_json::Map::new();
            entry.insert("role".to_string(), json!(role));
            entry.insert("content".to_string(), wire_content(&message.content, dialect));
            if let Some(tool_calls) = &message.tool_calls {
                entry.insert(
                    "tool_calls".to_string(),
                    json!(tool_calls
                        .iter()
                        .map(|call| json!({
                            "id": call.id,
                            "function": { "name": call.function_name, "arguments": call.arguments_json },
                        }))
                        .collect::<Vec<_>>()),
                );
            }
            if let Some(tool_call_id) = &message.tool_call_id {
                entry.insert("tool_call_id".to_string(), json!(tool_call_id));
            }
            Value::Object(entry)
        })
        .collect()
}

fn wire_content(content: &MessageContent, dialect: Option<&str>) -> Value {
    match content {
        MessageContent::Text(text) => json!(text),
        MessageContent::Blocks(blocks) => {
            json!(blocks.iter().map(|block| wire_content_block(block, dialect)).collect::<Vec<_>>())
        }
    }
}

/// Serializes one content block the way `dialect` expects it on the wire.
/// Gemini's `Part` shape has no `type` tag and nests media under
/// `inlineData`/`fileData`; Anthropic nests media under a `source` object;
/// everything else (the OpenAI default) uses `image_url`/`input_audio`.
fn wire_content_block(block: &ContentBlock, dialect: Option<&str>) -> Value {
    match dialect {
        Some("gemini") => wire_content_block_gemini(block),
        Some("anthropic") => wire_content_block_anthropic(block),
        _ => wire_content_block_openai(block),
    }
}

fn wire_content_block_openai(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Image { url, data, mime_type } => {
            let source = match (url, data, mime_type) {
                (Some(url), _, _) => url.clone(),
                (None, Some(data), Some(mime_type)) => format!("data:{mime_type};base64,{data}"),
                (None, Some(data), None) => data.clone(),
                (None, None, _) => String::new(),
            };
            json!({ "type": "image_url", "image_url": { "url": source } })
        }
        ContentBlock::Audio { data, mime_type, .. } => {
            json!({
                "type": "input_audio",
                "input_audio": {
                    "data": data.clone().unwrap_or_default(),
                    "format": mime_type.clone().unwrap_or_default(),
                },
            })
        }
    }
}

fn wire_content_block_anthropic(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Image { url, data, mime_type } => {
            let source = match (url, data) {
                (Some(url), _) => json!({ "type": "url", "url": url }),
                (None, Some(data)) => {
                    json!({ "type": "base64", "media_type": mime_type.clone().unwrap_or_default(), "data": data })
                }
                (None, None) => json!({ "type": "base64", "media_type": "", "data": "" }),
            };
            json!({ "type": "image", "source": source })
        }
        ContentBlock::Audio { url, data, mime_type } => {
            let mut value = serde_json::Map::new();
            value.insert("type".to_string(), json!("audio"));
            if let Some(url) = url {
                value.insert("url".to_string(), json!(url));
            }
            if let Some(data) = data {
                value.insert("data".to_string(), json!(data));
            }
            if let Some(mime_type) = mime_type {
                value.insert("media_type".to_string(), json!(mime_type));
            }
            Value::Object(value)
        }
    }
}

fn wire_content_block_gemini(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "text": text }),
        ContentBlock::Image { url, data, mime_type } => match (url, data) {
            (Some(url), _) => json!({ "fileData": { "mimeType": mime_type.clone().unwrap_or_default(), "fileUri": url } }),
            (None, Some(data)) => {
                json!({ "inlineData": { "mimeType": mime_type.clone().unwrap_or_default(), "data": data } })
            }
            (None, None) => json!({ "inlineData": { "mimeType": "", "data": "" } }),
        },
        ContentBlock::Audio { url, data, mime_type } => match (url, data) {
            (Some(url), _) => json!({ "fileData": { "mimeType": mime_type.clone().unwrap_or_default(), "fileUri": url } }),
            (None, Some(data)) => {
                json!({ "inlineData": { "mimeType": mime_type.clone().unwrap_or_default(), "data": data } })
            }
            (None, None) => json!({ "inlineData": { "mimeType": "", "data": "" } }),
        },
    }
}

fn remap_role(role: Role, role_map: &HashMap<String, String>) -> String {
    let canonical = role.to_string();
    role_map.get(&canonical).cloned().unwrap_or(canonical)
}

/// Serializes `tools` into the dialect's wire shape. Gemini wraps every
/// declaration into a single `functionDeclarations` entry rather than one
/// array element per tool, so this returns the whole `tools` value instead
/// of a per-tool `Vec`.
fn wire_tools(tools: &[ToolDef], dialect: Option<&str>) -> Value {
    match dialect {
        Some("anthropic") => json!(tools
            .iter()
            .map(|tool| json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.json_schema,
            }))
            .collect::<Vec<_>>()),
        Some("gemini") => json!([{
            "functionDeclarations": tools
                .iter()
                .map(|tool| json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.json_schema,
                }))
                .collect::<Vec<_>>(),
        }]),
        _ => json!(tools
            .iter()
            .map(|tool| json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.json_schema,
                },
            }))
            .collect::<Vec<_>>()),
    }
}

fn wire_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Tool { name } => json!({ "type": "function", "function": { "name": name } }),
    }
}
