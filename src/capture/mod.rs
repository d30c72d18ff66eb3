//! State capture and restore for live agents.
//!
//! Two ways in: [`SessionWrapper`] composes an agent explicitly, and
//! [`install_auto_capture`] observes every agent in the process through a
//! global table keyed by [`AgentId`](crate::agents::AgentId).

mod registry;
mod state;
mod wrapper;

pub use registry::{
    auto_capture_installed, captured_agent_count, clear_agent_state, clear_execution_context,
    current_execution_context, get_agent_state, install_agent_hooks, install_auto_capture,
    set_execution_context, ExecutionContext,
};
pub use state::{CallLog, CapturedAgentState};
pub use wrapper::{CapturedEvent, SessionScope, SessionWrapper};
