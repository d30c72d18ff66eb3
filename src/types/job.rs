//! Turn request/result records and the serializable session snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use super::chat::{ChatContext, ChatItem};
use crate::error::LiveTxtError;

/// Default per-turn budget.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Serializable conversation snapshot passed opaquely between turns.
///
/// Chat items are kept as raw JSON objects so that records produced by a
/// newer writer survive a round trip untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    #[serde(default)]
    pub chat_items: Vec<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SessionState {
    pub fn new(chat_items: Vec<Value>, metadata: Map<String, Value>) -> Self {
        Self {
            chat_items,
            metadata,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chat_items.is_empty() && self.metadata.is_empty()
    }

    /// Snapshot a history, keeping the given metadata.
    pub fn from_chat_context(ctx: &ChatContext, metadata: Map<String, Value>) -> Self {
        let chat_items = crate::serialization::serialize_history(ctx);
        Self {
            chat_items,
            metadata,
        }
    }

    /// Rebuild a history from the stored items, skipping records that do not parse.
    pub fn to_chat_context(&self) -> ChatContext {
        crate::serialization::deserialize_history(&serde_json::json!({ "items": self.chat_items }))
    }

    /// Strict variant of [`to_chat_context`](Self::to_chat_context).
    pub fn try_to_chat_context(&self) -> Result<ChatContext, LiveTxtError> {
        let items = self
            .chat_items
            .iter()
            .map(|raw| serde_json::from_value::<ChatItem>(raw.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChatContext::from_items(items))
    }
}

/// One inbound turn. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRequest {
    job_id: String,
    user_input: String,
    #[serde(default)]
    state: SessionState,
    /// Per-request budget. When absent the executor's configured default applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

impl JobRequest {
    pub fn new(job_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            user_input: user_input.into(),
            state: SessionState::default(),
            timeout_ms: None,
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn user_input(&self) -> &str {
        &self.user_input
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }
}

/// Terminal status of a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
    Timeout,
}

/// Outcome of one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_state: Option<SessionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl JobResult {
    /// Successful turn. Empty response text is normalised to `None`.
    pub fn success(
        job_id: impl Into<String>,
        response_text: Option<String>,
        updated_state: SessionState,
        processing_time_ms: f64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Success,
            response_text: response_text.filter(|text| !text.is_empty()),
            updated_state: Some(updated_state),
            error: None,
            processing_time_ms,
            metadata: Map::new(),
        }
    }

    pub fn error(job_id: impl Into<String>, error: impl Into<String>, processing_time_ms: f64) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Error,
            response_text: None,
            updated_state: None,
            error: Some(error.into()),
            processing_time_ms,
            metadata: Map::new(),
        }
    }

    /// Timed-out turn; the budget is recorded under `metadata["timeout_ms"]`.
    pub fn timeout(job_id: impl Into<String>, timeout_ms: u64, processing_time_ms: f64) -> Self {
        let mut metadata = Map::new();
        metadata.insert("timeout_ms".into(), Value::from(timeout_ms));
        Self {
            job_id: job_id.into(),
            status: JobStatus::Timeout,
            response_text: None,
            updated_state: None,
            error: None,
            processing_time_ms,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}
