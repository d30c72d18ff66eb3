//! Process-wide capture for agents built without any executor-specific code.
//!
//! Agents are keyed by [`AgentId`]. Callers clear an entry with
//! [`clear_agent_state`] once they have read it; entries for agents that
//! are dropped without being cleared are evicted on drop. Prefer
//! [`SessionWrapper`](super::SessionWrapper) whenever the agent can be
//! passed around explicitly.
//!
//! The execution context is a single global slot. Two turns that set it
//! concurrently for different agents can see each other's state; callers
//! must serialize agent construction on this path.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock, Mutex, OnceLock, PoisonError};

use super::state::{CallLog, CapturedAgentState};
use crate::agents::{set_agent_observer, Agent, AgentId, AgentObserver};
use crate::tools::TrackedTool;
use crate::types::ChatContext;

static CAPTURED: LazyLock<Mutex<HashMap<AgentId, CapturedAgentState>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static CALL_LOGS: LazyLock<Mutex<HashMap<AgentId, CallLog>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static EXECUTION_CONTEXT: Mutex<Option<ExecutionContext>> = Mutex::new(None);

static AUTO_CAPTURE: OnceLock<bool> = OnceLock::new();

/// What the next constructed agent should be restored from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    pub previous_state: Option<CapturedAgentState>,
    pub user_id: Option<String>,
}

pub fn set_execution_context(ctx: ExecutionContext) {
    *EXECUTION_CONTEXT
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(ctx);
}

pub fn current_execution_context() -> Option<ExecutionContext> {
    EXECUTION_CONTEXT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn clear_execution_context() {
    EXECUTION_CONTEXT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

/// Last captured state for `id`, or the default-empty record.
///
/// The tool-call log is read live, so calls made after the last history
/// read are included.
pub fn get_agent_state(id: AgentId) -> CapturedAgentState {
    let mut state = CAPTURED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
        .cloned()
        .unwrap_or_default();
    if let Some(log) = call_log(id) {
        state.function_calls = log.snapshot();
    }
    state
}

/// Forget everything captured for `id`. Returns whether anything was stored.
pub fn clear_agent_state(id: AgentId) -> bool {
    let state = CAPTURED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    let log = CALL_LOGS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    let cleared = state.is_some() || log.is_some();
    if cleared {
        tracing::debug!(agent = %id, "Cleared captured agent state");
    }
    cleared
}

/// Number of agents with a captured state or call log. Useful for leak checks.
pub fn captured_agent_count() -> usize {
    let mut ids: HashSet<AgentId> = CAPTURED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .copied()
        .collect();
    ids.extend(
        CALL_LOGS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied(),
    );
    ids.len()
}

fn call_log(id: AgentId) -> Option<CallLog> {
    CALL_LOGS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
        .cloned()
}

/// Wrap every tool of `agent` so calls land in its registered log.
///
/// Safe to call repeatedly: tools already tracked are left alone and the
/// same log is reused.
pub fn install_agent_hooks(agent: &Agent) -> CallLog {
    let log = CALL_LOGS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(agent.id())
        .or_default()
        .clone();
    agent.map_tools(|tool| TrackedTool::wrap(tool, &log));
    log
}

struct AutoCaptureObserver;

impl AgentObserver for AutoCaptureObserver {
    fn on_agent_created(&self, agent: &Agent) {
        let log = install_agent_hooks(agent);
        let Some(ctx) = current_execution_context() else {
            return;
        };
        let Some(previous) = ctx.previous_state else {
            return;
        };
        if let Some(history) = previous.history() {
            tracing::debug!(
                agent = %agent.id(),
                items = history.len(),
                user_id = ctx.user_id.as_deref(),
                "Restoring agent history"
            );
            agent.update_chat_ctx(history);
        }
        log.replace(previous.function_calls);
    }

    fn on_history_read(&self, agent: &Agent, history: &ChatContext) {
        let calls = call_log(agent.id())
            .map(|log| log.snapshot())
            .unwrap_or_default();
        CAPTURED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent.id(), CapturedAgentState::from_history(history, calls));
    }

    fn on_agent_dropped(&self, id: AgentId) {
        clear_agent_state(id);
    }
}

/// Install process-wide capture. Returns whether it is active.
///
/// Only the first call does anything. If another observer already owns the
/// agent observer slot, capture stays off and later calls do not retry.
pub fn install_auto_capture() -> bool {
    *AUTO_CAPTURE.get_or_init(|| match set_agent_observer(Arc::new(AutoCaptureObserver)) {
        Ok(()) => {
            tracing::info!("Auto-capture installed");
            true
        }
        Err(error) => {
            tracing::warn!(%error, "Auto-capture unavailable");
            false
        }
    })
}

pub fn auto_capture_installed() -> bool {
    AUTO_CAPTURE.get().copied().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_agents_read_as_default() {
        let agent = Agent::builder().build();
        assert_eq!(get_agent_state(agent.id()), CapturedAgentState::default());
        assert!(!clear_agent_state(agent.id()));
    }

    #[test]
    fn agent_hooks_reuse_one_log() {
        let agent = Agent::builder().build();
        let first = install_agent_hooks(&agent);
        let second = install_agent_hooks(&agent);
        first.push(crate::serialization::FunctionCallRecord::default());
        assert_eq!(second.len(), 1);
        assert!(clear_agent_state(agent.id()));
    }
}
