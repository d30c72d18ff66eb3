//! Higher-level agent session: drives the model/tool loop and emits conversation events.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use super::agent::Agent;
use crate::error::LiveTxtError;
use crate::shim::{FakeRoom, HandlerId};
use crate::tools::{ToolArguments, ToolExecutionContext};
use crate::types::chat::{
    ChatItem, ChatMessage, ChatRole, FunctionCall, FunctionCallOutput, FunctionToolCall,
};

/// Upper bound on model calls within one `run`.
pub const DEFAULT_MAX_MODEL_CALLS: usize = 10;

/// Error text returned when a session is driven before an agent was started.
pub const NO_AGENT_MESSAGE: &str =
    "AgentSession has no agent with a chat history; call start() first";

/// Session event names.
pub mod session_events {
    pub const CONVERSATION_ITEM_ADDED: &str = "conversation_item_added";
    pub const AGENT_STATE_CHANGED: &str = "agent_state_changed";
    pub const USER_STATE_CHANGED: &str = "user_state_changed";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AgentState {
    Initializing,
    Listening,
    Thinking,
    Speaking,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserState {
    Listening,
    Speaking,
    Away,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConversationItemAdded { item: ChatItem },
    AgentStateChanged { old_state: AgentState, new_state: AgentState },
    UserStateChanged { old_state: UserState, new_state: UserState },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConversationItemAdded { .. } => session_events::CONVERSATION_ITEM_ADDED,
            Self::AgentStateChanged { .. } => session_events::AGENT_STATE_CHANGED,
            Self::UserStateChanged { .. } => session_events::USER_STATE_CHANGED,
        }
    }
}

/// Hook consulted by [`AgentSession::start`] through the room it starts in.
pub trait SessionHook: Send + Sync {
    fn on_session_start(&self, session: &AgentSession, agent: &Arc<Agent>);
}

type SessionHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;
type SayInterceptor = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

/// Outcome of [`AgentSession::run`].
#[derive(Debug, Clone, Default)]
pub struct SessionRunResult {
    /// Items appended to the history during the run, in order.
    pub items: Vec<ChatItem>,
    /// Final assistant message, if the model produced one.
    pub last_message: Option<ChatMessage>,
}

impl SessionRunResult {
    pub fn final_text(&self) -> Option<String> {
        self.last_message.as_ref().and_then(ChatMessage::text_content)
    }
}

struct SessionInner {
    id: String,
    agent: Mutex<Option<Arc<Agent>>>,
    room: Mutex<Option<FakeRoom>>,
    handlers: Mutex<Vec<(HandlerId, String, SessionHandler)>>,
    say_interceptors: Mutex<Vec<(HandlerId, SayInterceptor)>>,
    agent_state: Mutex<AgentState>,
    user_state: Mutex<UserState>,
    next_id: AtomicU64,
    max_model_calls: usize,
}

/// Text-only agent session. Clones share the same session.
#[derive(Clone)]
pub struct AgentSession {
    inner: Arc<SessionInner>,
}

impl Default for AgentSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentSession {
    pub fn new() -> Self {
        Self::with_max_model_calls(DEFAULT_MAX_MODEL_CALLS)
    }

    pub fn with_max_model_calls(max_model_calls: usize) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            inner: Arc::new(SessionInner {
                id: format!("AS_{}", &id[..12]),
                agent: Mutex::new(None),
                room: Mutex::new(None),
                handlers: Mutex::new(Vec::new()),
                say_interceptors: Mutex::new(Vec::new()),
                agent_state: Mutex::new(AgentState::Initializing),
                user_state: Mutex::new(UserState::Listening),
                next_id: AtomicU64::new(1),
                max_model_calls: max_model_calls.max(1),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn agent(&self) -> Option<Arc<Agent>> {
        self.inner
            .agent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn room(&self) -> Option<FakeRoom> {
        self.inner
            .room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn agent_state(&self) -> AgentState {
        *self
            .inner
            .agent_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn user_state(&self) -> UserState {
        *self
            .inner
            .user_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the session in `room`. A hook attached to the room sees the
    /// session and agent first; then the agent's `on_enter` runs.
    pub async fn start(&self, agent: Arc<Agent>, room: &FakeRoom) -> Result<(), LiveTxtError> {
        if let Some(hook) = room.session_hook() {
            hook.on_session_start(self, &agent);
        }
        *self.inner.agent.lock().unwrap_or_else(PoisonError::into_inner) = Some(agent.clone());
        *self.inner.room.lock().unwrap_or_else(PoisonError::into_inner) = Some(room.clone());
        tracing::debug!(session = %self.inner.id, agent_id = %agent.id(), room = room.name(), "AgentSession started");

        self.set_agent_state(AgentState::Listening);
        agent.enter(Some(self.clone())).await
    }

    /// Append an assistant message directly.
    pub async fn say(&self, text: impl Into<String>) -> Result<ChatMessage, LiveTxtError> {
        let agent = self.require_agent()?;
        let message = ChatMessage::text(ChatRole::Assistant, text);

        let interceptors: Vec<SayInterceptor> = self
            .inner
            .say_interceptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        for interceptor in interceptors {
            if std::panic::catch_unwind(AssertUnwindSafe(|| interceptor(&message))).is_err() {
                tracing::error!(session = %self.inner.id, "say interceptor panicked");
            }
        }

        self.set_agent_state(AgentState::Speaking);
        self.append(&agent, ChatItem::Message(message.clone()));
        self.set_agent_state(AgentState::Listening);
        Ok(message)
    }

    /// Add the user's input to the history and let the model answer, running
    /// tools as requested.
    pub async fn run(&self, user_input: &str) -> Result<SessionRunResult, LiveTxtError> {
        let agent = self.require_agent()?;
        let mut result = SessionRunResult::default();

        self.set_user_state(UserState::Speaking);
        let user_message = ChatItem::Message(ChatMessage::text(ChatRole::User, user_input));
        self.append(&agent, user_message.clone());
        result.items.push(user_message);
        self.set_user_state(UserState::Listening);

        let outcome = self.model_loop(&agent, &mut result).await;
        self.set_agent_state(AgentState::Listening);
        outcome.map(|()| result)
    }

    /// Let the model speak without new user input.
    pub async fn generate_reply(&self) -> Result<SessionRunResult, LiveTxtError> {
        let agent = self.require_agent()?;
        let mut result = SessionRunResult::default();
        let outcome = self.model_loop(&agent, &mut result).await;
        self.set_agent_state(AgentState::Listening);
        outcome.map(|()| result)
    }

    /// Run the agent's `on_exit`. Errors are logged, not returned.
    pub async fn close(&self) {
        let Some(agent) = self.agent() else {
            return;
        };
        if let Err(error) = agent.exit(Some(self.clone())).await {
            tracing::error!(session = %self.inner.id, %error, "Error in agent on_exit");
        }
        tracing::debug!(session = %self.inner.id, "AgentSession closed");
    }

    /// Subscribe to a session event by name.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.next_handler_id();
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, event.to_string(), Arc::new(handler)));
        id
    }

    /// Remove one handler, or all handlers for `event` when `id` is `None`.
    pub fn off(&self, event: &str, id: Option<HandlerId>) -> usize {
        let mut handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, name, _)| name != event || id.is_some_and(|id| *existing != id));
        before - handlers.len()
    }

    /// Observe every [`say`](Self::say) before the message is appended.
    pub fn add_say_interceptor<F>(&self, interceptor: F) -> HandlerId
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        let id = self.next_handler_id();
        self.inner
            .say_interceptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(interceptor)));
        id
    }

    pub fn remove_say_interceptor(&self, id: HandlerId) -> bool {
        let mut interceptors = self
            .inner
            .say_interceptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = interceptors.len();
        interceptors.retain(|(existing, _)| *existing != id);
        before != interceptors.len()
    }

    fn next_handler_id(&self) -> HandlerId {
        HandlerId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn require_agent(&self) -> Result<Arc<Agent>, LiveTxtError> {
        self.agent()
            .ok_or_else(|| LiveTxtError::InvalidState(NO_AGENT_MESSAGE.to_string()))
    }

    async fn model_loop(
        &self,
        agent: &Arc<Agent>,
        result: &mut SessionRunResult,
    ) -> Result<(), LiveTxtError> {
        let llm = agent
            .llm()
            .ok_or_else(|| LiveTxtError::InvalidState("agent has no language model".into()))?;
        let specs = agent.tool_specs();

        for step in 0..self.inner.max_model_calls {
            self.set_agent_state(AgentState::Thinking);
            let history = agent.chat_ctx();
            tracing::debug!(session = %self.inner.id, step, llm = llm.label(), items = history.len(), "Calling model");
            let response = llm
                .chat(agent.instructions(), &history, &specs)
                .await
                .map_err(|e| LiveTxtError::agent(e.as_ref()))?;

            if let Some(text) = response.text.filter(|text| !text.is_empty()) {
                let message = ChatMessage::text(ChatRole::Assistant, text);
                self.set_agent_state(AgentState::Speaking);
                self.append(agent, ChatItem::Message(message.clone()));
                result.items.push(ChatItem::Message(message.clone()));
                result.last_message = Some(message);
            }

            if response.tool_calls.is_empty() {
                return Ok(());
            }

            for call in response.tool_calls {
                let call_item = ChatItem::FunctionCall(FunctionCall::new(
                    call.call_id.clone(),
                    call.name.clone(),
                    call.arguments.clone(),
                ));
                self.append(agent, call_item.clone());
                result.items.push(call_item);

                let output = ChatItem::FunctionCallOutput(self.invoke_tool(agent, &call).await);
                self.append(agent, output.clone());
                result.items.push(output);
            }
        }

        tracing::warn!(
            session = %self.inner.id,
            limit = self.inner.max_model_calls,
            "Model call limit reached without a final reply"
        );
        Ok(())
    }

    async fn invoke_tool(&self, agent: &Agent, call: &FunctionToolCall) -> FunctionCallOutput {
        let Some(tool) = agent.tool(&call.name) else {
            tracing::warn!(tool = %call.name, "Model requested an unknown tool");
            return FunctionCallOutput::new(
                &call.call_id,
                &call.name,
                format!("Unknown tool: {}", call.name),
                true,
            );
        };
        let args = match ToolArguments::from_json_str(&call.arguments) {
            Ok(args) => args,
            Err(error) => {
                return FunctionCallOutput::new(&call.call_id, &call.name, error.to_string(), true)
            }
        };
        let ctx = ToolExecutionContext {
            call_id: call.call_id.clone(),
            metadata: Value::Null,
        };
        match tool.execute(&args, &ctx).await {
            Ok(Value::String(text)) => FunctionCallOutput::new(&call.call_id, &call.name, text, false),
            Ok(value) => FunctionCallOutput::new(&call.call_id, &call.name, value.to_string(), false),
            Err(error) => {
                FunctionCallOutput::new(&call.call_id, &call.name, error.to_string(), true)
            }
        }
    }

    fn append(&self, agent: &Agent, item: ChatItem) {
        agent.insert_item(item.clone());
        self.emit(&SessionEvent::ConversationItemAdded { item });
    }

    fn set_agent_state(&self, new_state: AgentState) {
        let old_state = {
            let mut state = self
                .inner
                .agent_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, new_state)
        };
        if old_state != new_state {
            self.emit(&SessionEvent::AgentStateChanged {
                old_state,
                new_state,
            });
        }
    }

    fn set_user_state(&self, new_state: UserState) {
        let old_state = {
            let mut state = self
                .inner
                .user_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, new_state)
        };
        if old_state != new_state {
            self.emit(&SessionEvent::UserStateChanged {
                old_state,
                new_state,
            });
        }
    }

    fn emit(&self, event: &SessionEvent) {
        let name = event.name();
        let handlers: Vec<SessionHandler> = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, event_name, _)| event_name == name)
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(session = %self.inner.id, event = name, "Session event handler panicked");
            }
        }
    }
}

impl fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSession")
            .field("id", &self.inner.id)
            .field("agent_state", &self.agent_state())
            .field("user_state", &self.user_state())
            .finish()
    }
}
