//! Explicit capture: wrap an agent instead of relying on process-wide hooks.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::state::CallLog;
use crate::agents::{session_events, Agent, AgentSession, SessionEvent};
use crate::error::Result;
use crate::serialization::{
    deserialize_full_state, serialize_full_state, FunctionCallRecord, DEFAULT_AGENT_STATE,
    DEFAULT_USER_STATE,
};
use crate::shim::HandlerId;
use crate::tools::{FunctionTool, TrackedTool};
use crate::types::chat::now_timestamp;
use crate::types::ChatContext;

/// A debug event recorded by a [`SessionWrapper`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturedEvent {
    pub event_type: String,
    pub data: Value,
    pub timestamp: f64,
}

struct Labels {
    user_state: String,
    agent_state: String,
}

struct WrapperInner {
    agent: Arc<Agent>,
    call_log: CallLog,
    events: Mutex<Vec<CapturedEvent>>,
    labels: Mutex<Labels>,
}

/// Composes an [`Agent`] with its tool-call log, event trail and activity labels.
///
/// Building a wrapper routes every tool of the agent through the wrapper's
/// log, in addition to any log the tool already records into. Clones share
/// state.
#[derive(Clone)]
pub struct SessionWrapper {
    inner: Arc<WrapperInner>,
}

impl SessionWrapper {
    pub fn new(agent: Arc<Agent>) -> Self {
        let call_log = CallLog::new();
        agent.map_tools(|tool| Arc::new(TrackedTool::new(tool, call_log.clone())) as Arc<dyn FunctionTool>);
        Self {
            inner: Arc::new(WrapperInner {
                agent,
                call_log,
                events: Mutex::new(Vec::new()),
                labels: Mutex::new(Labels {
                    user_state: DEFAULT_USER_STATE.to_string(),
                    agent_state: DEFAULT_AGENT_STATE.to_string(),
                }),
            }),
        }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.inner.agent
    }

    pub fn call_log(&self) -> &CallLog {
        &self.inner.call_log
    }

    /// Record a tool call made outside the agent's tool manifest.
    pub fn capture_function_call(
        &self,
        function_name: &str,
        arguments: Value,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let record = match error {
            Some(error) => FunctionCallRecord::failed(function_name, arguments, error),
            None => FunctionCallRecord::succeeded(function_name, arguments, result.unwrap_or(Value::Null)),
        };
        self.inner.call_log.push(record);
    }

    pub fn capture_event(&self, event_type: &str, data: Value) {
        self.inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CapturedEvent {
                event_type: event_type.to_string(),
                data,
                timestamp: now_timestamp(),
            });
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_user_state(&self, state: impl Into<String>) {
        self.labels().user_state = state.into();
    }

    pub fn update_agent_state(&self, state: impl Into<String>) {
        self.labels().agent_state = state.into();
    }

    pub fn user_state(&self) -> String {
        self.labels().user_state.clone()
    }

    pub fn agent_state(&self) -> String {
        self.labels().agent_state.clone()
    }

    fn labels(&self) -> std::sync::MutexGuard<'_, Labels> {
        self.inner.labels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_chat_context(&self) -> ChatContext {
        self.inner.agent.chat_ctx()
    }

    /// Full-state document: history, call log, activity labels and version.
    pub fn get_serializable_state(&self) -> Value {
        let history = self.get_chat_context();
        let labels = self.labels();
        serialize_full_state(
            Some(&history),
            &self.inner.call_log.snapshot(),
            &labels.user_state,
            &labels.agent_state,
        )
    }

    /// Restore from a document produced by [`get_serializable_state`](Self::get_serializable_state).
    ///
    /// History is replaced only when the document carries one.
    pub fn restore_state(&self, data: &Value) {
        let state = deserialize_full_state(data);
        if data.get("chat_context").is_some() {
            self.inner.agent.update_chat_ctx(state.chat_context);
        }
        self.inner.call_log.replace(state.function_calls);
        let mut labels = self.labels();
        labels.user_state = state.user_state;
        labels.agent_state = state.agent_state;
        tracing::debug!(agent = %self.inner.agent.id(), "Session state restored");
    }

    /// Mirror a session's state changes and new items into this wrapper.
    pub fn track_session(&self, session: &AgentSession) -> Vec<HandlerId> {
        [
            session_events::CONVERSATION_ITEM_ADDED,
            session_events::AGENT_STATE_CHANGED,
            session_events::USER_STATE_CHANGED,
        ]
        .into_iter()
        .map(|event| {
            let wrapper = self.clone();
            session.on(event, move |event| wrapper.observe(event))
        })
        .collect()
    }

    fn observe(&self, event: &SessionEvent) {
        match event {
            SessionEvent::AgentStateChanged { old_state, new_state } => {
                self.update_agent_state(new_state.to_string());
                self.capture_event(event.name(), json!({ "old_state": old_state, "new_state": new_state }));
            }
            SessionEvent::UserStateChanged { old_state, new_state } => {
                self.update_user_state(new_state.to_string());
                self.capture_event(event.name(), json!({ "old_state": old_state, "new_state": new_state }));
            }
            SessionEvent::ConversationItemAdded { item } => {
                self.capture_event(event.name(), json!({ "item_id": item.id() }));
            }
        }
    }
}

/// Scoped use of a wrapped agent: state restored and `on_enter` run on entry,
/// `on_exit` run on exit.
pub struct SessionScope {
    wrapper: SessionWrapper,
}

impl SessionScope {
    pub async fn enter(agent: Arc<Agent>, initial_state: Option<&Value>) -> Result<Self> {
        let wrapper = SessionWrapper::new(agent);
        if let Some(state) = initial_state {
            wrapper.restore_state(state);
        }
        wrapper.agent().enter(None).await?;
        Ok(Self { wrapper })
    }

    pub fn wrapper(&self) -> &SessionWrapper {
        &self.wrapper
    }

    /// Run `on_exit` and return the final state document.
    pub async fn exit(self) -> Value {
        if let Err(error) = self.wrapper.agent().exit(None).await {
            tracing::error!(agent = %self.wrapper.agent().id(), %error, "Error in agent on_exit");
        }
        self.wrapper.get_serializable_state()
    }
}
