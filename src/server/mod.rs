//! HTTP surface (feature `server`).

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::agents::{Agent, AgentSession};
use crate::capture::{
    auto_capture_installed, clear_agent_state, clear_execution_context, get_agent_state,
    install_agent_hooks, install_auto_capture, set_execution_context, CapturedAgentState,
    ExecutionContext,
};
use crate::error::{ErrorCategory, LiveTxtError, Result};
use crate::executor::TurnExecutor;
use crate::loader::AgentCatalog;
use crate::shim::{FakeRoom, OutputBuffer};
use crate::types::{ChatItem, ChatMessage, ChatRole, JobRequest, JobResult, JobStatus};

/// Shared handler state.
#[derive(Clone)]
pub struct ServerState {
    catalog: Arc<AgentCatalog>,
    executor: TurnExecutor,
    selected: Arc<RwLock<Option<String>>>,
}

/// Agent construction on the auto-capture path goes through one global
/// execution context, so `/execute` turns run one at a time per process.
static EXECUTE_LOCK: Mutex<()> = Mutex::const_new(());

impl ServerState {
    pub fn new(catalog: AgentCatalog, executor: TurnExecutor) -> Self {
        Self {
            catalog: Arc::new(catalog),
            executor,
            selected: Arc::new(RwLock::new(None)),
        }
    }

    /// Pre-select an agent or entrypoint, as `/load_agent` would.
    pub fn with_selected(self, name: impl Into<String>) -> Self {
        *self.selected.write().unwrap_or_else(PoisonError::into_inner) = Some(name.into());
        self
    }

    pub fn selected(&self) -> Option<String> {
        self.selected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadAgentRequest {
    #[serde(default, alias = "agent_file")]
    pub agent: Option<String>,
    #[serde(default)]
    pub agent_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub request_id: String,
    pub session_id: String,
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub agent_state: Option<CapturedAgentState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteMetadata {
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteResponse {
    pub request_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_state: Option<CapturedAgentState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExecuteMetadata>,
}

impl ExecuteResponse {
    fn error(request_id: &str, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: JobStatus::Error,
            response: None,
            updated_state: None,
            error: Some(error.into()),
            metadata: None,
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/load_agent", post(load_agent))
        .route("/execute", post(execute))
        .route("/jobs", post(run_job))
        .with_state(state)
}

/// Bind `addr` and serve until ctrl-c.
pub async fn serve(addr: SocketAddr, state: ServerState) -> Result<()> {
    if !install_auto_capture() {
        tracing::warn!("Serving without auto-capture; /execute state falls back to direct history reads");
    }
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, selected = ?state.selected(), "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down HTTP server");
        })
        .await?;
    Ok(())
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /load_agent`
pub async fn load_agent(
    State(state): State<ServerState>,
    Json(req): Json<LoadAgentRequest>,
) -> std::result::Result<Json<Value>, (StatusCode, Json<Value>)> {
    let wanted = req.agent_class.or(req.agent);
    match state.catalog.load_agent(wanted.as_deref()) {
        Ok(loaded) => {
            tracing::info!(agent = %loaded.name, "Loaded agent");
            *state.selected.write().unwrap_or_else(PoisonError::into_inner) = Some(loaded.name.clone());
            Ok(Json(json!({ "status": "loaded", "agent_class": loaded.name })))
        }
        Err(error) => {
            tracing::error!(%error, "Failed to load agent");
            Err(error.into())
        }
    }
}

/// `POST /execute`: one turn on the auto-capture path.
pub async fn execute(State(state): State<ServerState>, Json(req): Json<ExecuteRequest>) -> Json<ExecuteResponse> {
    let started = Instant::now();
    let Some(selected) = state.selected() else {
        return Json(ExecuteResponse::error(&req.request_id, "Agent not loaded"));
    };
    let loaded = match state.catalog.load_agent(Some(&selected)) {
        Ok(loaded) => loaded,
        Err(error) => return Json(ExecuteResponse::error(&req.request_id, error.to_string())),
    };

    let _turn = EXECUTE_LOCK.lock().await;
    set_execution_context(ExecutionContext {
        previous_state: req.agent_state.clone(),
        user_id: Some(req.user_id.clone()),
    });
    let agent = loaded.create();
    clear_execution_context();
    let call_log = install_agent_hooks(&agent);
    if !auto_capture_installed() {
        if let Some(previous) = &req.agent_state {
            if let Some(history) = previous.history() {
                agent.update_chat_ctx(history);
            }
            call_log.replace(previous.function_calls.clone());
        }
    }

    let outcome = respond(&agent, &req).await;
    let captured = capture(&agent);
    clear_agent_state(agent.id());

    let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
    Json(match outcome {
        Ok(response) => ExecuteResponse {
            request_id: req.request_id,
            status: JobStatus::Success,
            response: Some(response),
            updated_state: Some(captured),
            error: None,
            metadata: Some(ExecuteMetadata { processing_time_ms }),
        },
        Err(error) => {
            tracing::error!(request_id = %req.request_id, session_id = %req.session_id, %error, "Execute failed");
            ExecuteResponse {
                metadata: Some(ExecuteMetadata { processing_time_ms }),
                ..ExecuteResponse::error(&req.request_id, error.to_string())
            }
        }
    })
}

async fn respond(agent: &Arc<Agent>, req: &ExecuteRequest) -> Result<String> {
    if agent.llm().is_none() {
        let reply = format!("You said: {}", req.message);
        agent.insert_item(ChatItem::Message(ChatMessage::text(ChatRole::User, req.message.as_str())));
        agent.insert_item(ChatItem::Message(ChatMessage::text(ChatRole::Assistant, reply.as_str())));
        return Ok(reply);
    }

    let room = FakeRoom::for_job(&req.request_id, Arc::new(OutputBuffer::new()));
    let session = AgentSession::new();
    session.start(Arc::clone(agent), &room).await?;
    let result = session.run(&req.message).await;
    session.close().await;
    result.map(|run| run.final_text().unwrap_or_default())
}

/// Read history (which records it when auto-capture is on) and return the captured state.
fn capture(agent: &Agent) -> CapturedAgentState {
    let history = agent.chat_ctx();
    if auto_capture_installed() {
        get_agent_state(agent.id())
    } else {
        CapturedAgentState::from_history(&history, get_agent_state(agent.id()).function_calls)
    }
}

/// `POST /jobs`: one stateless turn through the executor.
pub async fn run_job(State(state): State<ServerState>, Json(request): Json<JobRequest>) -> Json<JobResult> {
    let selected = state.selected();
    let entrypoint = match state.catalog.load_entrypoint(selected.as_deref()) {
        Ok((_, entrypoint)) => entrypoint,
        Err(error) => return Json(JobResult::error(request.job_id(), error.to_string(), 0.0)),
    };
    Json(state.executor.execute(&entrypoint, &request).await)
}

impl From<LiveTxtError> for (StatusCode, Json<Value>) {
    fn from(error: LiveTxtError) -> Self {
        let status = match error.category() {
            ErrorCategory::Load | ErrorCategory::Configuration => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": error.to_string() })))
    }
}
