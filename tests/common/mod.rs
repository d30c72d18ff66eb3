//! Shared test helpers and scripted models.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use livetxt::agents::{Agent, Llm, LlmKind, LlmResponse};
use livetxt::error::BoxError;
use livetxt::executor::Entrypoint;
use livetxt::loader::session_entrypoint;
use livetxt::shim::JobContext;
use livetxt::tools::ToolSpec;
use livetxt::types::{ChatContext, ChatItem, ChatRole, FunctionToolCall};

/// A model that replays queued responses, then falls back to echoing the
/// last user message as `Reply: <text>`.
pub struct ScriptedLlm {
    kind: LlmKind,
    label: String,
    responses: Mutex<VecDeque<LlmResponse>>,
    seen_history_lens: Mutex<Vec<usize>>,
}

impl ScriptedLlm {
    pub fn text() -> Self {
        Self::with_kind(LlmKind::Text, "scripted-text")
    }

    pub fn realtime() -> Self {
        Self::with_kind(LlmKind::Realtime, "scripted-realtime")
    }

    fn with_kind(kind: LlmKind, label: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
            responses: Mutex::new(VecDeque::new()),
            seen_history_lens: Mutex::new(Vec::new()),
        }
    }

    /// Queue a text response.
    pub fn queue_text(self, text: &str) -> Self {
        self.responses.lock().unwrap().push_back(LlmResponse::text(text));
        self
    }

    /// Queue a tool call response.
    pub fn queue_tool_call(self, call_id: &str, name: &str, arguments: serde_json::Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(LlmResponse::tool_call(FunctionToolCall {
                call_id: call_id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }));
        self
    }

    /// History sizes the model was called with, in order.
    pub fn seen_history_lens(&self) -> Vec<usize> {
        self.seen_history_lens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Llm for ScriptedLlm {
    fn kind(&self) -> LlmKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn chat(
        &self,
        _instructions: &str,
        history: &ChatContext,
        _tools: &[ToolSpec],
    ) -> Result<LlmResponse, BoxError> {
        self.seen_history_lens.lock().unwrap().push(history.len());
        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return Ok(response);
        }
        let last_user = history
            .items()
            .iter()
            .rev()
            .filter_map(ChatItem::as_message)
            .find(|message| message.role == ChatRole::User)
            .and_then(|message| message.text_content())
            .unwrap_or_default();
        Ok(LlmResponse::text(format!("Reply: {last_user}")))
    }
}

/// Entrypoint that publishes `Echo: <text>` for every chat message.
pub fn echo_entrypoint() -> Entrypoint {
    Entrypoint::new(|ctx: JobContext| async move {
        let me = ctx.agent();
        ctx.room().on_data_received(move |packet| {
            me.publish_text(&format!("Echo: {}", packet.text()));
            Ok(())
        });
        ctx.connect().await;
        Ok::<(), BoxError>(())
    })
}

/// Entrypoint that starts a session with a fresh agent driven by `llm`.
pub fn session_agent_entrypoint(llm: Arc<dyn Llm>) -> Entrypoint {
    session_entrypoint(Arc::new(move || {
        Agent::builder()
            .name("scripted")
            .instructions("Be brief.")
            .llm_arc(Arc::clone(&llm))
            .build()
    }))
}

/// Text of every message in `history`, as `role: text`.
pub fn transcript(history: &ChatContext) -> Vec<String> {
    history
        .items()
        .iter()
        .filter_map(ChatItem::as_message)
        .map(|message| {
            format!(
                "{}: {}",
                message.role,
                message.text_content().unwrap_or_default()
            )
        })
        .collect()
}
