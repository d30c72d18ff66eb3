//! Named agents and entrypoints, registered at program definition time.

use std::fmt;
use std::sync::Arc;

use crate::agents::{Agent, AgentSession};
use crate::error::{BoxError, LiveTxtError, Result};
use crate::executor::Entrypoint;
use crate::shim::JobContext;

/// Builds a fresh agent for every turn or request.
pub type AgentFactory = Arc<dyn Fn() -> Arc<Agent> + Send + Sync>;

/// Entrypoint that connects, builds an agent and starts a session with it.
pub fn session_entrypoint(factory: AgentFactory) -> Entrypoint {
    Entrypoint::new(move |ctx: JobContext| {
        let factory = Arc::clone(&factory);
        async move {
            ctx.connect().await;
            let agent = factory();
            AgentSession::new().start(agent, ctx.room()).await?;
            Ok::<(), BoxError>(())
        }
    })
}

/// A resolved agent factory.
#[derive(Clone)]
pub struct LoadedAgent {
    pub name: String,
    pub factory: AgentFactory,
}

impl LoadedAgent {
    pub fn create(&self) -> Arc<Agent> {
        let agent = (self.factory)();
        tracing::info!(name = %self.name, agent = %agent.id(), "Created agent instance");
        agent
    }
}

impl fmt::Debug for LoadedAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedAgent").field("name", &self.name).finish()
    }
}

/// Registry of everything a worker or server can run.
#[derive(Clone, Default)]
pub struct AgentCatalog {
    entrypoints: Vec<(String, Entrypoint)>,
    agents: Vec<(String, AgentFactory)>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named entrypoint.
    pub fn register_entrypoint(&mut self, name: impl Into<String>, entrypoint: Entrypoint) -> &mut Self {
        let name = name.into();
        match self.entrypoints.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => {
                tracing::warn!(name = %name, "Replacing registered entrypoint");
                slot.1 = entrypoint;
            }
            None => self.entrypoints.push((name, entrypoint)),
        }
        self
    }

    /// Register (or replace) a named agent factory.
    pub fn register_agent<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<Agent> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: AgentFactory = Arc::new(factory);
        match self.agents.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => {
                tracing::warn!(name = %name, "Replacing registered agent");
                slot.1 = factory;
            }
            None => self.agents.push((name, factory)),
        }
        self
    }

    pub fn with_entrypoint(mut self, name: impl Into<String>, entrypoint: Entrypoint) -> Self {
        self.register_entrypoint(name, entrypoint);
        self
    }

    pub fn with_agent<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<Agent> + Send + Sync + 'static,
    {
        self.register_agent(name, factory);
        self
    }

    pub fn entrypoint_names(&self) -> Vec<&str> {
        self.entrypoints.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entrypoints.is_empty() && self.agents.is_empty()
    }

    /// Resolve an entrypoint by name.
    ///
    /// Registered entrypoints come first; an agent factory of the same name
    /// is run through [`session_entrypoint`].
    pub fn load_entrypoint(&self, name: Option<&str>) -> Result<(String, Entrypoint)> {
        let mut candidates: Vec<(&str, Entrypoint)> = self
            .entrypoints
            .iter()
            .map(|(name, entrypoint)| (name.as_str(), entrypoint.clone()))
            .collect();
        for (agent_name, factory) in &self.agents {
            if !candidates.iter().any(|(existing, _)| existing == agent_name) {
                candidates.push((agent_name.as_str(), session_entrypoint(Arc::clone(factory))));
            }
        }
        let (name, entrypoint) = select("entrypoint", candidates, name)?;
        Ok((name.to_string(), entrypoint))
    }

    /// Resolve an agent factory by name.
    pub fn load_agent(&self, name: Option<&str>) -> Result<LoadedAgent> {
        let candidates = self
            .agents
            .iter()
            .map(|(name, factory)| (name.as_str(), Arc::clone(factory)))
            .collect();
        let (name, factory) = select("agent", candidates, name)?;
        Ok(LoadedAgent {
            name: name.to_string(),
            factory,
        })
    }

    pub fn create_agent(&self, name: Option<&str>) -> Result<Arc<Agent>> {
        Ok(self.load_agent(name)?.create())
    }
}

fn select<'a, T>(kind: &str, mut candidates: Vec<(&'a str, T)>, wanted: Option<&str>) -> Result<(&'a str, T)> {
    if candidates.is_empty() {
        return Err(LiveTxtError::Load(format!("no agents registered (looking for an {kind})")));
    }
    match wanted {
        Some(wanted) => {
            let available = candidates
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", ");
            let index = candidates
                .iter()
                .position(|(name, _)| *name == wanted)
                .ok_or_else(|| LiveTxtError::Load(format!("{kind} '{wanted}' not found. Available: {available}")))?;
            Ok(candidates.swap_remove(index))
        }
        None => {
            if candidates.len() > 1 {
                tracing::warn!(
                    kind,
                    chosen = candidates[0].0,
                    count = candidates.len(),
                    "Several candidates registered, using the first"
                );
            }
            Ok(candidates.swap_remove(0))
        }
    }
}

impl fmt::Debug for AgentCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCatalog")
            .field("entrypoints", &self.entrypoint_names())
            .field("agents", &self.agent_names())
            .finish()
    }
}
