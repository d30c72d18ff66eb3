//! Convenience re-exports for common use.

pub use crate::agents::{Agent, AgentSession, Llm, LlmKind, LlmResponse, SessionEvent};
pub use crate::capture::{CapturedAgentState, SessionScope, SessionWrapper};
pub use crate::config::LiveTxtConfig;
pub use crate::error::{BoxError, LiveTxtError, Result};
pub use crate::executor::{execute_job, Entrypoint, ExecutorConfig, TurnExecutor};
pub use crate::loader::AgentCatalog;
pub use crate::shim::{FakeParticipant, FakeRoom, JobContext, OutputBuffer};
pub use crate::tools::{FunctionTool, FunctionToolFn, ToolArguments, ToolParameters};
pub use crate::types::{
    ChatContext, ChatItem, ChatMessage, ChatRole, JobRequest, JobResult, JobStatus, SessionState,
};
