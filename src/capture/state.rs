//! Captured per-agent state records and the shared tool-call log.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serialization::{
    deserialize_history, serialize_chat_context, FunctionCallRecord, DEFAULT_AGENT_STATE,
    DEFAULT_USER_STATE,
};
use crate::types::chat::ChatContext;

/// State captured from a live agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturedAgentState {
    /// History in `{"items": [...]}` form, `None` until the history was read.
    #[serde(default)]
    pub chat_context: Option<Value>,
    #[serde(default)]
    pub function_calls: Vec<FunctionCallRecord>,
    #[serde(default = "default_user_state")]
    pub user_state: String,
    #[serde(default = "default_agent_state")]
    pub agent_state: String,
}

fn default_user_state() -> String {
    DEFAULT_USER_STATE.to_string()
}

fn default_agent_state() -> String {
    DEFAULT_AGENT_STATE.to_string()
}

impl Default for CapturedAgentState {
    fn default() -> Self {
        Self {
            chat_context: None,
            function_calls: Vec::new(),
            user_state: default_user_state(),
            agent_state: default_agent_state(),
        }
    }
}

impl CapturedAgentState {
    pub fn from_history(history: &ChatContext, function_calls: Vec<FunctionCallRecord>) -> Self {
        Self {
            chat_context: Some(serialize_chat_context(history)),
            function_calls,
            ..Self::default()
        }
    }

    /// Decoded history, if any was captured.
    pub fn history(&self) -> Option<ChatContext> {
        self.chat_context.as_ref().map(deserialize_history)
    }
}

/// Shared, append-only log of tool invocations for one agent.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    records: Arc<Mutex<Vec<FunctionCallRecord>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(records: Vec<FunctionCallRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    fn records(&self) -> MutexGuard<'_, Vec<FunctionCallRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, record: FunctionCallRecord) {
        self.records().push(record);
    }

    pub fn replace(&self, replacement: Vec<FunctionCallRecord>) {
        *self.records() = replacement;
    }

    pub fn snapshot(&self) -> Vec<FunctionCallRecord> {
        self.records().clone()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
