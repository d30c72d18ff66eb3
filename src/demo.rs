//! Built-in demo agents, registered by the `livetxt` binary.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::{Agent, Llm, LlmKind, LlmResponse};
use crate::error::BoxError;
use crate::executor::Entrypoint;
use crate::loader::AgentCatalog;
use crate::shim::JobContext;
use crate::tools::{FunctionToolFn, ToolParameters, ToolSpec};
use crate::types::{ChatContext, ChatItem, ChatRole, FunctionToolCall};

/// Replies `Echo: <text>` to every chat message in the room.
pub fn echo_entrypoint() -> Entrypoint {
    Entrypoint::new(|ctx: JobContext| async move {
        let agent = ctx.agent();
        ctx.room().on_data_received(move |packet| {
            agent.publish_text(&format!("Echo: {}", packet.text()));
            Ok(())
        });
        ctx.connect().await;
        Ok::<(), BoxError>(())
    })
}

/// Offline text model: answers clock questions through the `current_time` tool
/// and repeats everything else back.
#[derive(Debug, Default)]
pub struct KeywordLlm;

#[async_trait]
impl Llm for KeywordLlm {
    fn kind(&self) -> LlmKind {
        LlmKind::Text
    }

    fn label(&self) -> &str {
        "keyword"
    }

    async fn chat(
        &self,
        _instructions: &str,
        history: &ChatContext,
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, BoxError> {
        match history.items().last() {
            Some(ChatItem::FunctionCallOutput(output)) => {
                Ok(LlmResponse::text(format!("It is {}.", output.output)))
            }
            Some(ChatItem::Message(message)) if message.role == ChatRole::User => {
                let text = message.text_content().unwrap_or_default();
                let has_clock = tools.iter().any(|tool| tool.name == "current_time");
                if has_clock && text.to_lowercase().contains("time") {
                    let call_id = format!("call_{}", history.len());
                    return Ok(LlmResponse::tool_call(FunctionToolCall {
                        call_id,
                        name: "current_time".into(),
                        arguments: "{}".into(),
                    }));
                }
                Ok(LlmResponse::text(format!("You said: {text}")))
            }
            _ => Ok(LlmResponse::default()),
        }
    }
}

/// Text agent with a clock tool.
pub fn assistant_agent() -> Arc<Agent> {
    Agent::builder()
        .name("assistant")
        .instructions("You are a helpful assistant reachable over SMS.")
        .tool(FunctionToolFn::new(
            "current_time",
            "Current UTC time",
            ToolParameters::empty(),
            |_args, _ctx| async { Ok(json!(chrono::Utc::now().format("%H:%M UTC").to_string())) },
        ))
        .llm(KeywordLlm)
        .build()
}

/// Catalog with every demo registered.
pub fn demo_catalog() -> AgentCatalog {
    AgentCatalog::new()
        .with_entrypoint("echo", echo_entrypoint())
        .with_agent("assistant", assistant_agent)
}
