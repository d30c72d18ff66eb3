//! Per-turn capture of the agent session an entrypoint starts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::agents::{session_events, Agent, AgentSession, Llm, LlmKind, SessionEvent, SessionHook};
use crate::capture::clear_agent_state;
use crate::shim::{FakeRoom, HandlerId, OutputBuffer};
use crate::types::{ChatContext, ChatItem, ChatRole, SessionState};

#[derive(Default)]
struct Captured {
    agent: Option<Arc<Agent>>,
    session: Option<AgentSession>,
    text_mode: bool,
    restored_ids: HashSet<String>,
    item_handler: Option<HandlerId>,
    say_interceptor: Option<HandlerId>,
}

/// Installed on the turn's room; sees the session the entrypoint starts.
///
/// Restores prior history into the agent, swaps a realtime model for the
/// configured text fallback, and routes assistant output into the turn's
/// buffer. Each message id reaches the buffer at most once.
pub(crate) struct TurnCapture {
    job_id: String,
    buffer: OutputBuffer,
    prior_state: SessionState,
    fallback_llm: Option<Arc<dyn Llm>>,
    seen: Arc<Mutex<HashSet<String>>>,
    captured: Mutex<Captured>,
}

impl TurnCapture {
    pub(crate) fn new(
        job_id: &str,
        buffer: OutputBuffer,
        prior_state: SessionState,
        fallback_llm: Option<Arc<dyn Llm>>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            buffer,
            prior_state,
            fallback_llm,
            seen: Arc::new(Mutex::new(HashSet::new())),
            captured: Mutex::new(Captured::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Captured> {
        self.captured.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn agent(&self) -> Option<Arc<Agent>> {
        self.lock().agent.clone()
    }

    /// The captured session, when its agent can be driven with text.
    pub(crate) fn text_session(&self) -> Option<AgentSession> {
        let captured = self.lock();
        if captured.text_mode {
            captured.session.clone()
        } else {
            None
        }
    }

    pub(crate) fn restored_ids(&self) -> HashSet<String> {
        self.lock().restored_ids.clone()
    }

    /// Last assistant text produced during this turn, ignoring restored history.
    pub(crate) fn fallback_response(&self) -> Option<String> {
        let agent = self.agent()?;
        let restored = self.restored_ids();
        let history = agent.history_snapshot();
        history
            .items()
            .iter()
            .rev()
            .filter(|item| !restored.contains(item.id()))
            .filter_map(ChatItem::as_message)
            .filter(|message| message.role == ChatRole::Assistant)
            .find_map(|message| message.text_content())
    }

    /// Function calls the model made this turn.
    pub(crate) fn new_function_calls(&self) -> usize {
        let Some(agent) = self.agent() else {
            return 0;
        };
        let restored = self.restored_ids();
        agent
            .history_snapshot()
            .items()
            .iter()
            .filter(|item| matches!(item, ChatItem::FunctionCall(_)))
            .filter(|item| !restored.contains(item.id()))
            .count()
    }

    fn restore_history(&self, agent: &Agent) -> HashSet<String> {
        if self.prior_state.is_empty() {
            return HashSet::new();
        }
        let restored = self.prior_state.to_chat_context();
        let current = agent.history_snapshot();
        let ids: HashSet<String> = restored.items().iter().map(|item| item.id().to_string()).collect();

        let mut merged: Vec<ChatItem> = restored
            .into_items()
            .into_iter()
            .filter(|item| !current.contains_id(item.id()))
            .collect();
        let restored_count = merged.len();
        merged.extend(current.into_items());
        agent.update_chat_ctx(ChatContext::from_items(merged));

        tracing::debug!(job_id = %self.job_id, agent = %agent.id(), restored_count, "Restored prior chat history");
        ids
    }

    fn select_mode(&self, agent: &Agent) -> bool {
        match agent.llm() {
            Some(llm) if llm.kind() == LlmKind::Realtime => match &self.fallback_llm {
                Some(fallback) => {
                    tracing::info!(
                        job_id = %self.job_id,
                        realtime = llm.label(),
                        fallback = fallback.label(),
                        "Replacing realtime model with text fallback"
                    );
                    agent.set_llm(Some(Arc::clone(fallback)));
                    true
                }
                None => {
                    tracing::error!(
                        job_id = %self.job_id,
                        realtime = llm.label(),
                        "Realtime model cannot process text and no fallback model is configured"
                    );
                    false
                }
            },
            Some(_) => true,
            None => false,
        }
    }

    /// Drop the session subscriptions this turn installed, and anything the
    /// process-wide capture recorded for the turn's agent.
    pub(crate) fn release(&self) {
        let mut captured = self.lock();
        if let Some(agent) = &captured.agent {
            clear_agent_state(agent.id());
        }
        let Some(session) = captured.session.clone() else {
            return;
        };
        if let Some(id) = captured.item_handler.take() {
            session.off(session_events::CONVERSATION_ITEM_ADDED, Some(id));
        }
        if let Some(id) = captured.say_interceptor.take() {
            session.remove_say_interceptor(id);
        }
    }
}

impl SessionHook for TurnCapture {
    fn on_session_start(&self, session: &AgentSession, agent: &Arc<Agent>) {
        if self.lock().session.is_some() {
            tracing::warn!(job_id = %self.job_id, session = session.id(), "Second session started in one turn; not captured");
            return;
        }

        let restored_ids = self.restore_history(agent);
        let text_mode = self.select_mode(agent);

        let buffer = self.buffer.clone();
        let seen = Arc::clone(&self.seen);
        let item_handler = session.on(session_events::CONVERSATION_ITEM_ADDED, move |event| {
            let SessionEvent::ConversationItemAdded { item } = event else {
                return;
            };
            let Some(message) = item.as_message() else {
                return;
            };
            if message.role != ChatRole::Assistant {
                return;
            }
            let fresh = seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(message.id.clone());
            if let (true, Some(text)) = (fresh, message.text_content()) {
                buffer.push(text);
            }
        });

        let buffer = self.buffer.clone();
        let seen = Arc::clone(&self.seen);
        let say_interceptor = session.add_say_interceptor(move |message| {
            let fresh = seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(message.id.clone());
            if let (true, Some(text)) = (fresh, message.text_content()) {
                buffer.push(text);
            }
        });

        tracing::debug!(
            job_id = %self.job_id,
            session = session.id(),
            agent = %agent.id(),
            text_mode,
            "Captured agent session"
        );

        let mut captured = self.lock();
        captured.agent = Some(Arc::clone(agent));
        captured.session = Some(session.clone());
        captured.text_mode = text_mode;
        captured.restored_ids = restored_ids;
        captured.item_handler = Some(item_handler);
        captured.say_interceptor = Some(say_interceptor);
    }
}

/// Keeps a [`TurnCapture`] installed on a room for as long as it lives.
pub(crate) struct HookGuard {
    room: FakeRoom,
    capture: Arc<TurnCapture>,
}

impl HookGuard {
    pub(crate) fn install(room: &FakeRoom, capture: Arc<TurnCapture>) -> crate::error::Result<Self> {
        room.set_session_hook(Arc::clone(&capture) as Arc<dyn SessionHook>)?;
        Ok(Self {
            room: room.clone(),
            capture,
        })
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        self.room.clear_session_hook();
        self.capture.release();
    }
}
