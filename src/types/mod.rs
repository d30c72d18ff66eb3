//! Core data types.

pub mod chat;
pub mod job;

pub use chat::{
    AudioContent, ChatContent, ChatContext, ChatItem, ChatMessage, ChatRole, FunctionCall,
    FunctionCallOutput, FunctionToolCall, ImageContent, MediaContent, ToDictOptions,
};
pub use job::{JobRequest, JobResult, JobStatus, SessionState, DEFAULT_TIMEOUT_MS};
