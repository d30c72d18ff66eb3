//! Stateless turn execution.
//!
//! A turn builds a fresh fake room, runs the agent entrypoint against it,
//! injects the user's text once the agent is ready, and collects whatever
//! the agent publishes or says. Nothing is kept between turns except what
//! goes back to the caller in [`SessionState`].

mod entrypoint;
mod hooks;
mod inject;

pub use entrypoint::Entrypoint;
pub use inject::inject_when_ready;

use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use serde_json::{json, Map, Value};
use strum::{Display, IntoStaticStr};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::agents::Llm;
use crate::error::LiveTxtError;
use crate::serialization::merged_metadata;
use crate::shim::{JobContext, OutputBuffer};
use crate::types::chat::now_timestamp;
use crate::types::{JobRequest, JobResult, SessionState, DEFAULT_TIMEOUT_MS};

use hooks::{HookGuard, TurnCapture};

/// Time allowed for an entrypoint to register handlers after connecting.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 300;

/// Executor settings.
#[derive(Debug, Clone, Builder)]
pub struct ExecutorConfig {
    /// Wait between room connect and message injection.
    #[builder(default = Duration::from_millis(DEFAULT_SETTLE_DELAY_MS))]
    pub settle_delay: Duration,
    /// Budget for requests that carry none.
    #[builder(default = DEFAULT_TIMEOUT_MS)]
    pub default_timeout_ms: u64,
    /// Text model substituted for realtime models.
    pub fallback_llm: Option<Arc<dyn Llm>>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Lifecycle of one turn, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TurnState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// Where the response text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
enum OutputPath {
    /// A captured text session was driven with the user input.
    Session,
    /// Room handlers published the reply.
    Room,
}

struct TurnOutput {
    response_text: Option<String>,
    state: SessionState,
    path: OutputPath,
    fragments: usize,
    function_calls: usize,
}

/// Runs one request through an entrypoint.
#[derive(Debug, Clone, Default)]
pub struct TurnExecutor {
    config: ExecutorConfig,
}

impl TurnExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute with the request's budget, or the configured default.
    pub async fn execute(&self, entrypoint: &Entrypoint, request: &JobRequest) -> JobResult {
        self.execute_with_timeout(entrypoint, request, None).await
    }

    /// Execute one turn. Never fails: errors and timeouts are reported in the result.
    pub async fn execute_with_timeout(
        &self,
        entrypoint: &Entrypoint,
        request: &JobRequest,
        timeout_ms: Option<u64>,
    ) -> JobResult {
        let job_id = request.job_id();
        let timeout_ms = timeout_ms
            .or(request.timeout_ms())
            .unwrap_or(self.config.default_timeout_ms);
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(job_id, state = %TurnState::Pending, timeout_ms, "Turn queued");

        let buffer = OutputBuffer::new();
        let ctx = JobContext::for_turn(request, buffer.clone());
        let capture = Arc::new(TurnCapture::new(
            job_id,
            buffer.clone(),
            request.state().clone(),
            self.config.fallback_llm.clone(),
        ));
        let _guard = match HookGuard::install(ctx.room(), Arc::clone(&capture)) {
            Ok(guard) => guard,
            Err(error) => return JobResult::error(job_id, error.to_string(), elapsed_ms()),
        };

        tracing::info!(job_id, state = %TurnState::Running, entrypoint = ?entrypoint, "Executing turn");
        let turn = self.drive(entrypoint, request, &ctx, &capture, &buffer);
        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), turn).await;

        match outcome {
            Ok(Ok(output)) => {
                let processing_time_ms = elapsed_ms();
                tracing::info!(
                    job_id,
                    state = %TurnState::Succeeded,
                    path = %output.path,
                    processing_time_ms,
                    has_response = output.response_text.is_some(),
                    "Turn finished"
                );
                JobResult::success(job_id, output.response_text, output.state, processing_time_ms)
                    .with_metadata("path", Value::from(output.path.to_string()))
                    .with_metadata("fragments", Value::from(output.fragments))
                    .with_metadata("function_calls", Value::from(output.function_calls))
            }
            Ok(Err(error)) => {
                let processing_time_ms = elapsed_ms();
                tracing::error!(job_id, state = %TurnState::Failed, %error, processing_time_ms, "Turn failed");
                JobResult::error(job_id, error.to_string(), processing_time_ms)
                    .with_metadata("error_kind", Value::from(error.kind()))
            }
            Err(_) => {
                let processing_time_ms = elapsed_ms();
                tracing::warn!(job_id, state = %TurnState::TimedOut, timeout_ms, "Turn timed out");
                JobResult::timeout(job_id, timeout_ms, processing_time_ms)
            }
        }
    }

    async fn drive(
        &self,
        entrypoint: &Entrypoint,
        request: &JobRequest,
        ctx: &JobContext,
        capture: &TurnCapture,
        buffer: &OutputBuffer,
    ) -> Result<TurnOutput, LiveTxtError> {
        let (done_tx, done_rx) = watch::channel(false);
        let run_entrypoint = async {
            let outcome = entrypoint.invoke(ctx.clone()).await;
            done_tx.send_replace(true);
            outcome
        };
        let inject = inject_when_ready(ctx.room(), request.user_input(), self.config.settle_delay, done_rx);
        let (outcome, injected) = tokio::join!(run_entrypoint, inject);
        outcome?;
        tracing::debug!(job_id = request.job_id(), injected, "Entrypoint completed");

        let mut path = OutputPath::Room;
        if let Some(session) = capture.text_session() {
            path = OutputPath::Session;
            let before = buffer.len();
            let run = session.run(request.user_input()).await?;
            if buffer.len() == before {
                if let Some(text) = run.final_text() {
                    buffer.push(text);
                }
            }
        }

        if buffer.is_empty() {
            if let Some(text) = capture.fallback_response() {
                tracing::debug!(job_id = request.job_id(), "Using last assistant message as response");
                buffer.push(text);
            }
        }

        let response_text = buffer.joined();
        let state = match capture.agent() {
            Some(agent) => SessionState::from_chat_context(&agent.history_snapshot(), request.state().metadata.clone()),
            None => {
                let mut last_turn = Map::new();
                last_turn.insert(
                    "last_turn".into(),
                    json!({
                        "user_input": request.user_input(),
                        "agent_response": response_text,
                        "timestamp": now_timestamp(),
                    }),
                );
                SessionState::new(
                    request.state().chat_items.clone(),
                    merged_metadata(&request.state().metadata, last_turn),
                )
            }
        };

        Ok(TurnOutput {
            response_text,
            state,
            path,
            fragments: buffer.len(),
            function_calls: capture.new_function_calls(),
        })
    }
}

/// Run one turn with default settings.
pub async fn execute_job(entrypoint: &Entrypoint, request: &JobRequest, timeout_ms: Option<u64>) -> JobResult {
    TurnExecutor::default()
        .execute_with_timeout(entrypoint, request, timeout_ms)
        .await
}
