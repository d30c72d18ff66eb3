//! Conversation history model shared by agents, sessions and the codec.
//!
//! The JSON shape mirrors the voice-agent framework's history dump:
//! `{"items": [{"type": "message", ...}, {"type": "function_call", ...}]}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::LiveTxtError;

/// Seconds since the Unix epoch with microsecond precision.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn new_item_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("item_{}", &id[..12])
}

/// Conversation role.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChatRole {
    Developer,
    System,
    User,
    Assistant,
}

/// Image payload attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageContent {
    #[serde(default)]
    pub id: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Audio payload attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioContent {
    #[serde(default)]
    pub frame: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// Non-text message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MediaContent {
    #[serde(rename = "image_content")]
    Image(ImageContent),
    #[serde(rename = "audio_content")]
    Audio(AudioContent),
}

/// One element of a message's content list: plain text or a media part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Media(MediaContent),
}

impl From<&str> for ChatContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ChatContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    #[serde(default = "new_item_id")]
    pub id: String,
    pub role: ChatRole,
    #[serde(default)]
    pub content: Vec<ChatContent>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub created_at: f64,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: Vec<ChatContent>) -> Self {
        Self {
            id: new_item_id(),
            role,
            content,
            interrupted: false,
            created_at: now_timestamp(),
        }
    }

    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self::new(role, vec![ChatContent::Text(text.into())])
    }

    /// Text parts joined with newlines, or `None` when the message has no text.
    pub fn text_content(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|part| match part {
                ChatContent::Text(text) => Some(text.as_str()),
                ChatContent::Media(_) => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    #[serde(default = "new_item_id")]
    pub id: String,
    pub call_id: String,
    pub name: String,
    /// Arguments as an embedded JSON document.
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub created_at: f64,
}

impl FunctionCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: new_item_id(),
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
            created_at: now_timestamp(),
        }
    }
}

/// The output of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCallOutput {
    #[serde(default = "new_item_id")]
    pub id: String,
    pub call_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub created_at: f64,
}

impl FunctionCallOutput {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            id: new_item_id(),
            call_id: call_id.into(),
            name: name.into(),
            output: output.into(),
            is_error,
            created_at: now_timestamp(),
        }
    }
}

/// A tool call as emitted by a model, before it is recorded in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionToolCall {
    pub call_id: String,
    pub name: String,
    /// Arguments as an embedded JSON document.
    pub arguments: String,
}

impl FunctionToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatItem {
    Message(ChatMessage),
    FunctionCall(FunctionCall),
    FunctionCallOutput(FunctionCallOutput),
}

impl ChatItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Message(m) => &m.id,
            Self::FunctionCall(c) => &c.id,
            Self::FunctionCallOutput(o) => &o.id,
        }
    }

    pub fn as_message(&self) -> Option<&ChatMessage> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }
}

/// Options for [`ChatContext::to_dict`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ToDictOptions {
    pub exclude_image: bool,
    pub exclude_audio: bool,
    pub exclude_timestamp: bool,
    pub exclude_function_call: bool,
}

/// Ordered conversation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatContext {
    #[serde(default)]
    items: Vec<ChatItem>,
}

impl ChatContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<ChatItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[ChatItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ChatItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a text message and return a copy of it.
    pub fn add_message(&mut self, role: ChatRole, text: impl Into<String>) -> ChatMessage {
        let message = ChatMessage::text(role, text);
        self.items.push(ChatItem::Message(message.clone()));
        message
    }

    pub fn insert(&mut self, item: ChatItem) {
        self.items.push(item);
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    /// Text of the most recent assistant message that carries text.
    pub fn last_assistant_text(&self) -> Option<String> {
        self.items
            .iter()
            .rev()
            .filter_map(ChatItem::as_message)
            .filter(|m| m.role == ChatRole::Assistant)
            .find_map(ChatMessage::text_content)
    }

    /// Dump to the `{"items": [...]}` JSON shape.
    pub fn to_dict(&self, options: ToDictOptions) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .filter(|item| {
                !(options.exclude_function_call
                    && matches!(item, ChatItem::FunctionCall(_) | ChatItem::FunctionCallOutput(_)))
            })
            .map(|item| {
                let mut item = item.clone();
                if let ChatItem::Message(message) = &mut item {
                    message.content.retain(|part| match part {
                        ChatContent::Media(MediaContent::Image(_)) => !options.exclude_image,
                        ChatContent::Media(MediaContent::Audio(_)) => !options.exclude_audio,
                        ChatContent::Text(_) => true,
                    });
                }
                let mut value = serde_json::to_value(&item).unwrap_or(Value::Null);
                if options.exclude_timestamp {
                    if let Value::Object(map) = &mut value {
                        map.remove("created_at");
                    }
                }
                value
            })
            .filter(|value| !value.is_null())
            .collect();
        serde_json::json!({ "items": items })
    }

    /// Strict inverse of [`to_dict`](Self::to_dict).
    pub fn from_dict(data: &Value) -> Result<Self, LiveTxtError> {
        let items = match data.get("items") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(LiveTxtError::Serialization(format!(
                    "`items` must be an array, got {other}"
                )))
            }
            None => return Ok(Self::empty()),
        };
        let items = items
            .iter()
            .map(|raw| serde_json::from_value::<ChatItem>(raw.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { items })
    }
}
