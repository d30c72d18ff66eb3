//! Language model seam used by [`AgentSession`](super::AgentSession).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::BoxError;
use crate::tools::ToolSpec;
use crate::types::chat::{ChatContext, FunctionToolCall};

/// Model transport family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LlmKind {
    /// Streaming speech-to-speech model; cannot run without audio.
    Realtime,
    /// Request/response text model.
    Text,
}

/// One model reply: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<FunctionToolCall>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(call: FunctionToolCall) -> Self {
        Self {
            text: None,
            tool_calls: vec![call],
        }
    }
}

/// A chat model.
#[async_trait]
pub trait Llm: Send + Sync {
    fn kind(&self) -> LlmKind;

    /// Short human-readable name used in logs, e.g. `"gpt-4o-mini"`.
    fn label(&self) -> &str;

    async fn chat(
        &self,
        instructions: &str,
        history: &ChatContext,
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, BoxError>;
}

impl std::fmt::Debug for dyn Llm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Llm")
            .field("kind", &self.kind())
            .field("label", &self.label())
            .finish()
    }
}
