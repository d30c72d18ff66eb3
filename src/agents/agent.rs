//! Agent object model: instructions, owned history, tool manifest, model and lifecycle hooks.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::llm::Llm;
use super::session::AgentSession;
use crate::error::{BoxError, LiveTxtError};
use crate::tools::{FunctionTool, ToolSpec};
use crate::types::chat::{ChatContext, ChatItem};

static NEXT_AGENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique agent identity. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(u64);

impl AgentId {
    fn next() -> Self {
        Self(NEXT_AGENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// Extension point notified about every agent in the process.
pub trait AgentObserver: Send + Sync {
    /// Called once the agent is fully built, before it is handed to the caller.
    fn on_agent_created(&self, agent: &Agent);

    /// Called on every [`Agent::chat_ctx`] read with the snapshot being returned.
    fn on_history_read(&self, agent: &Agent, history: &ChatContext);

    /// Called when the last handle to an agent goes away.
    fn on_agent_dropped(&self, _id: AgentId) {}
}

static AGENT_OBSERVER: OnceLock<Arc<dyn AgentObserver>> = OnceLock::new();

/// Install the process-wide observer. Only the first call succeeds.
pub fn set_agent_observer(observer: Arc<dyn AgentObserver>) -> Result<(), LiveTxtError> {
    AGENT_OBSERVER
        .set(observer)
        .map_err(|_| LiveTxtError::InvalidState("an agent observer is already installed".into()))
}

pub fn agent_observer_installed() -> bool {
    AGENT_OBSERVER.get().is_some()
}

/// What a lifecycle hook gets to work with.
#[derive(Clone)]
pub struct LifecycleContext {
    pub agent: Arc<Agent>,
    /// Present when the hook runs under an [`AgentSession`].
    pub session: Option<AgentSession>,
}

pub type LifecycleHook =
    Arc<dyn Fn(LifecycleContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A conversational agent.
pub struct Agent {
    id: AgentId,
    name: String,
    instructions: String,
    chat_ctx: Mutex<ChatContext>,
    tools: RwLock<Vec<Arc<dyn FunctionTool>>>,
    llm: RwLock<Option<Arc<dyn Llm>>>,
    on_enter: Option<LifecycleHook>,
    on_exit: Option<LifecycleHook>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Snapshot of the conversation history. Notifies the process observer.
    pub fn chat_ctx(&self) -> ChatContext {
        let snapshot = self.history_snapshot();
        if let Some(observer) = AGENT_OBSERVER.get() {
            observer.on_history_read(self, &snapshot);
        }
        snapshot
    }

    /// Snapshot without notifying the observer.
    pub(crate) fn history_snapshot(&self) -> ChatContext {
        self.chat_ctx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the whole history.
    pub fn update_chat_ctx(&self, chat_ctx: ChatContext) {
        *self.chat_ctx.lock().unwrap_or_else(PoisonError::into_inner) = chat_ctx;
    }

    /// Append one item to the history.
    pub fn insert_item(&self, item: ChatItem) {
        self.chat_ctx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item);
    }

    pub fn tools(&self) -> Vec<Arc<dyn FunctionTool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn FunctionTool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|tool| tool.name() == name)
            .cloned()
    }

    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|tool| tool.spec())
            .collect()
    }

    /// Replace every tool in the manifest with `f(tool)`, keeping order.
    pub fn map_tools(&self, f: impl Fn(Arc<dyn FunctionTool>) -> Arc<dyn FunctionTool>) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        let mapped: Vec<_> = tools.drain(..).map(f).collect();
        *tools = mapped;
    }

    pub fn llm(&self) -> Option<Arc<dyn Llm>> {
        self.llm
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_llm(&self, llm: Option<Arc<dyn Llm>>) {
        *self.llm.write().unwrap_or_else(PoisonError::into_inner) = llm;
    }

    pub fn has_on_enter(&self) -> bool {
        self.on_enter.is_some()
    }

    /// Run the `on_enter` hook, if any.
    pub async fn enter(self: &Arc<Self>, session: Option<AgentSession>) -> Result<(), LiveTxtError> {
        self.run_hook(self.on_enter.as_ref(), session).await
    }

    /// Run the `on_exit` hook, if any.
    pub async fn exit(self: &Arc<Self>, session: Option<AgentSession>) -> Result<(), LiveTxtError> {
        self.run_hook(self.on_exit.as_ref(), session).await
    }

    async fn run_hook(
        self: &Arc<Self>,
        hook: Option<&LifecycleHook>,
        session: Option<AgentSession>,
    ) -> Result<(), LiveTxtError> {
        let Some(hook) = hook else {
            return Ok(());
        };
        let ctx = LifecycleContext {
            agent: Arc::clone(self),
            session,
        };
        hook(ctx).await.map_err(|e| LiveTxtError::agent(e.as_ref()))
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tool_names: Vec<String> = self
            .tools()
            .iter()
            .map(|tool| tool.name().to_string())
            .collect();
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tools", &tool_names)
            .field("llm", &self.llm().map(|llm| llm.label().to_string()))
            .finish()
    }
}

/// Builder for [`Agent`].
#[derive(Default)]
pub struct AgentBuilder {
    name: Option<String>,
    instructions: String,
    chat_ctx: ChatContext,
    tools: Vec<Arc<dyn FunctionTool>>,
    llm: Option<Arc<dyn Llm>>,
    on_enter: Option<LifecycleHook>,
    on_exit: Option<LifecycleHook>,
}

impl AgentBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn chat_ctx(mut self, chat_ctx: ChatContext) -> Self {
        self.chat_ctx = chat_ctx;
        self
    }

    pub fn tool(self, tool: impl FunctionTool + 'static) -> Self {
        self.tool_arc(Arc::new(tool))
    }

    /// Add a tool. A tool with the same name replaces the earlier one.
    pub fn tool_arc(mut self, tool: Arc<dyn FunctionTool>) -> Self {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            tracing::warn!(tool = tool.name(), "Duplicate tool name, replacing earlier definition");
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
        self
    }

    pub fn llm(self, llm: impl Llm + 'static) -> Self {
        self.llm_arc(Arc::new(llm))
    }

    pub fn llm_arc(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn on_enter<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(LifecycleContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_enter = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    pub fn on_exit<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(LifecycleContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_exit = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    /// Build the agent and announce it to the process observer.
    pub fn build(self) -> Arc<Agent> {
        let id = AgentId::next();
        let agent = Arc::new(Agent {
            id,
            name: self.name.unwrap_or_else(|| "Agent".to_string()),
            instructions: self.instructions,
            chat_ctx: Mutex::new(self.chat_ctx),
            tools: RwLock::new(self.tools),
            llm: RwLock::new(self.llm),
            on_enter: self.on_enter,
            on_exit: self.on_exit,
        });
        if let Some(observer) = AGENT_OBSERVER.get() {
            observer.on_agent_created(&agent);
        }
        tracing::debug!(agent_id = %id, name = agent.name(), "Agent created");
        agent
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(observer) = AGENT_OBSERVER.get() {
            observer.on_agent_dropped(self.id);
        }
    }
}
