//! JSON codec for conversation history, tool calls and full session state.
//!
//! Encoding is pure. Decoding is fail-soft: empty or missing input yields an
//! empty history, an unknown version tag is logged and parsed anyway, and
//! individual malformed items are skipped with a warning.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{LiveTxtError, Result};
use crate::types::chat::{ChatContext, ChatItem, FunctionToolCall, ToDictOptions};

/// Schema version written by [`serialize_full_state`].
pub const STATE_VERSION: &str = "1.0";

/// Default user activity label.
pub const DEFAULT_USER_STATE: &str = "listening";

/// Default agent activity label.
pub const DEFAULT_AGENT_STATE: &str = "idle";

fn persistence_options() -> ToDictOptions {
    ToDictOptions {
        exclude_image: true,
        exclude_audio: true,
        exclude_timestamp: false,
        exclude_function_call: false,
    }
}

/// Export history items. Image and audio parts are dropped.
pub fn serialize_history(history: &ChatContext) -> Vec<Value> {
    match serialize_chat_context(history) {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Export history as the `{"items": [...]}` container.
pub fn serialize_chat_context(history: &ChatContext) -> Value {
    history.to_dict(persistence_options())
}

/// Rebuild a history from an `{"items": [...]}` container.
pub fn deserialize_history(data: &Value) -> ChatContext {
    if let Some(version) = data.get("version").and_then(Value::as_str) {
        if version != STATE_VERSION {
            tracing::warn!(version, "Unknown history version, attempting to parse anyway");
        }
    }
    let Some(items) = data.get("items").and_then(Value::as_array) else {
        return ChatContext::empty();
    };

    let mut restored = Vec::with_capacity(items.len());
    for (index, raw) in items.iter().enumerate() {
        match serde_json::from_value::<ChatItem>(raw.clone()) {
            Ok(item) => restored.push(item),
            Err(error) => {
                tracing::warn!(index, %error, "Skipping malformed chat item");
            }
        }
    }
    ChatContext::from_items(restored)
}

/// Export a single history item.
pub fn serialize_chat_item(item: &ChatItem) -> Result<Value> {
    Ok(serde_json::to_value(item)?)
}

/// Encode a model tool call. Arguments always come out as a JSON object;
/// text that is not valid JSON is kept under `"_raw"`.
pub fn serialize_function_tool_call(call: &FunctionToolCall) -> Value {
    let arguments = match serde_json::from_str::<Value>(&call.arguments) {
        Ok(value) => value,
        Err(_) => json!({ "_raw": call.arguments }),
    };
    json!({
        "call_id": call.call_id,
        "name": call.name,
        "arguments": arguments,
    })
}

/// Decode a tool call. Accepts `name` or the legacy `function_name`,
/// preferring `name`.
pub fn deserialize_function_tool_call(data: &Value) -> Result<FunctionToolCall> {
    let name = data
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .or_else(|| data.get("function_name").and_then(Value::as_str))
        .ok_or_else(|| LiveTxtError::Serialization("tool call has no name".into()))?;

    let arguments = match data.get("arguments") {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(raw)) => raw.clone(),
        Some(other) => serde_json::to_string(other)?,
    };
    let call_id = data
        .get("call_id")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(FunctionToolCall::new(call_id, name, arguments))
}

/// One entry of an agent's tool-call log.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FunctionCallRecord {
    pub function_name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl FunctionCallRecord {
    pub fn succeeded(function_name: impl Into<String>, arguments: Value, result: Value) -> Self {
        Self {
            function_name: function_name.into(),
            arguments,
            result: Some(result),
            error: None,
            timestamp: Some(crate::types::chat::now_timestamp()),
        }
    }

    pub fn failed(function_name: impl Into<String>, arguments: Value, error: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            arguments,
            result: None,
            error: Some(error.into()),
            timestamp: Some(crate::types::chat::now_timestamp()),
        }
    }
}

/// Decoded full-state document.
#[derive(Debug, Clone, PartialEq)]
pub struct FullState {
    pub chat_context: ChatContext,
    pub function_calls: Vec<FunctionCallRecord>,
    pub user_state: String,
    pub agent_state: String,
}

impl Default for FullState {
    fn default() -> Self {
        Self {
            chat_context: ChatContext::empty(),
            function_calls: Vec::new(),
            user_state: DEFAULT_USER_STATE.to_string(),
            agent_state: DEFAULT_AGENT_STATE.to_string(),
        }
    }
}

/// Bundle history, call log and activity labels with a version tag.
pub fn serialize_full_state(
    history: Option<&ChatContext>,
    function_calls: &[FunctionCallRecord],
    user_state: &str,
    agent_state: &str,
) -> Value {
    let chat_context = history
        .map(serialize_chat_context)
        .unwrap_or_else(|| json!({ "items": [] }));
    json!({
        "chat_context": chat_context,
        "function_calls": function_calls,
        "user_state": user_state,
        "agent_state": agent_state,
        "version": STATE_VERSION,
    })
}

/// Decode a full-state document, filling defaults for anything missing.
pub fn deserialize_full_state(data: &Value) -> FullState {
    let version = data
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or(STATE_VERSION);
    if version != STATE_VERSION {
        tracing::warn!(version, "Unknown state version, attempting to parse anyway");
    }

    let chat_context = data
        .get("chat_context")
        .map(deserialize_history)
        .unwrap_or_default();

    let function_calls = data
        .get("function_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|raw| match serde_json::from_value(raw.clone()) {
                    Ok(record) => Some(record),
                    Err(error) => {
                        tracing::warn!(%error, "Skipping malformed function call record");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let label = |key: &str, default: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    };

    FullState {
        chat_context,
        function_calls,
        user_state: label("user_state", DEFAULT_USER_STATE),
        agent_state: label("agent_state", DEFAULT_AGENT_STATE),
    }
}

/// Merge caller metadata into an object, returning a fresh map.
pub(crate) fn merged_metadata(base: &Map<String, Value>, extra: Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    merged.extend(extra);
    merged
}
