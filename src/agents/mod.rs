//! Host-facing agent object model: agents, models and sessions.

pub mod agent;
pub mod llm;
pub mod session;

pub use agent::{
    agent_observer_installed, set_agent_observer, Agent, AgentBuilder, AgentId, AgentObserver,
    LifecycleContext, LifecycleHook,
};
pub use llm::{Llm, LlmKind, LlmResponse};
pub use session::{
    session_events, AgentSession, AgentState, SessionEvent, SessionHook, SessionRunResult,
    UserState, DEFAULT_MAX_MODEL_CALLS, NO_AGENT_MESSAGE,
};
