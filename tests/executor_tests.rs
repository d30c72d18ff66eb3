//! End-to-end turns through the executor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{echo_entrypoint, session_agent_entrypoint, transcript, ScriptedLlm};
use livetxt::agents::{Agent, AgentSession};
use livetxt::error::BoxError;
use livetxt::executor::{execute_job, Entrypoint, ExecutorConfig, TurnExecutor};
use livetxt::loader::session_entrypoint;
use livetxt::shim::JobContext;
use livetxt::types::{JobRequest, JobStatus};

#[tokio::test(start_paused = true)]
async fn handler_outputs_are_joined_in_order() {
    let entry = Entrypoint::new(|ctx: JobContext| async move {
        let first = ctx.agent();
        let second = ctx.agent();
        ctx.room().on_data_received(move |_packet| {
            first.publish_text("first");
            Ok(())
        });
        ctx.room().on_data_received(move |_packet| {
            second.publish_text("second");
            Ok(())
        });
        ctx.connect().await;
        Ok::<(), BoxError>(())
    });

    let result = execute_job(&entry, &JobRequest::new("join", "hi"), None).await;
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.response_text.as_deref(), Some("first second"));
    assert_eq!(result.metadata["fragments"], 2);
}

#[tokio::test(start_paused = true)]
async fn history_grows_across_turns() {
    let llm = Arc::new(ScriptedLlm::text());
    let entry = session_agent_entrypoint(llm.clone());

    let first = execute_job(&entry, &JobRequest::new("turn-1", "hi"), None).await;
    assert_eq!(first.status, JobStatus::Success);
    assert_eq!(first.response_text.as_deref(), Some("Reply: hi"));
    assert_eq!(first.metadata["path"], "session");
    let first_state = first.updated_state.unwrap();
    assert_eq!(first_state.chat_items.len(), 2);

    let request = JobRequest::new("turn-2", "again").with_state(first_state.clone());
    let second = execute_job(&entry, &request, None).await;
    assert_eq!(second.response_text.as_deref(), Some("Reply: again"));
    let second_state = second.updated_state.unwrap();
    assert_eq!(second_state.chat_items.len(), 4);
    let ids = |items: &[serde_json::Value]| -> Vec<String> {
        items.iter().map(|item| item["id"].as_str().unwrap_or_default().to_string()).collect()
    };
    assert_eq!(ids(&second_state.chat_items[..2]), ids(&first_state.chat_items));
    assert_eq!(
        transcript(&second_state.to_chat_context()),
        vec!["user: hi", "assistant: Reply: hi", "user: again", "assistant: Reply: again"]
    );

    // The model saw the restored history on the second turn.
    assert_eq!(llm.seen_history_lens(), vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn realtime_models_are_swapped_for_the_fallback() {
    let fallback = Arc::new(ScriptedLlm::text().queue_text("from fallback"));
    let executor = TurnExecutor::new(ExecutorConfig::builder().fallback_llm(fallback).build());
    let entry = session_agent_entrypoint(Arc::new(ScriptedLlm::realtime()));

    let result = executor.execute(&entry, &JobRequest::new("rt", "hello")).await;
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.response_text.as_deref(), Some("from fallback"));
}

#[tokio::test(start_paused = true)]
async fn realtime_without_fallback_yields_no_response() {
    let entry = session_agent_entrypoint(Arc::new(ScriptedLlm::realtime()));
    let result = execute_job(&entry, &JobRequest::new("rt-none", "hello"), None).await;
    assert_eq!(result.status, JobStatus::Success);
    assert!(result.response_text.is_none());
    assert_eq!(result.metadata["path"], "room");
}

#[tokio::test(start_paused = true)]
async fn greeting_and_reply_are_both_captured() {
    let llm: Arc<ScriptedLlm> = Arc::new(ScriptedLlm::text());
    let factory_llm = llm.clone();
    let entry = session_entrypoint(Arc::new(move || {
        Agent::builder()
            .llm_arc(factory_llm.clone())
            .on_enter(|ctx| async move {
                if let Some(session) = ctx.session {
                    session.say("Welcome!").await?;
                }
                Ok(())
            })
            .build()
    }));

    let result = execute_job(&entry, &JobRequest::new("greet", "hi"), None).await;
    assert_eq!(result.response_text.as_deref(), Some("Welcome! Reply: hi"));
    assert_eq!(result.metadata["fragments"], 2);
}

#[tokio::test(start_paused = true)]
async fn entrypoint_without_session_keeps_prior_history() {
    let prior = execute_job(
        &session_agent_entrypoint(Arc::new(ScriptedLlm::text())),
        &JobRequest::new("p", "hi"),
        None,
    )
    .await
    .updated_state
    .unwrap();

    let request = JobRequest::new("echo", "again").with_state(prior.clone());
    let result = execute_job(&echo_entrypoint(), &request, None).await;
    assert_eq!(result.response_text.as_deref(), Some("Echo: again"));
    let state = result.updated_state.unwrap();
    assert_eq!(state.chat_items, prior.chat_items);
    assert_eq!(state.metadata["last_turn"]["user_input"], "again");
}

#[tokio::test(start_paused = true)]
async fn tool_calls_are_counted() {
    let llm = ScriptedLlm::text()
        .queue_tool_call("call_1", "lookup", serde_json::json!({"q": "x"}))
        .queue_text("done");
    let llm: Arc<ScriptedLlm> = Arc::new(llm);
    let entry = Entrypoint::new(move |ctx: JobContext| {
        let llm = llm.clone();
        async move {
            ctx.connect().await;
            let agent = Agent::builder()
                .tool(livetxt::tools::FunctionToolFn::new(
                    "lookup",
                    "Look something up",
                    livetxt::tools::ToolParameters::empty(),
                    |_args, _ctx| async { Ok(serde_json::json!("found")) },
                ))
                .llm_arc(llm)
                .build();
            AgentSession::new().start(agent, ctx.room()).await?;
            Ok::<(), BoxError>(())
        }
    });

    let result = execute_job(&entry, &JobRequest::new("tools", "find x"), None).await;
    assert_eq!(result.response_text.as_deref(), Some("done"));
    assert_eq!(result.metadata["function_calls"], 1);
    assert_eq!(result.updated_state.unwrap().chat_items.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_entrypoints_run_on_worker_threads() {
    let entry = Entrypoint::blocking(|ctx: JobContext| {
        let me = ctx.agent();
        ctx.room().on_data_received(move |packet| {
            me.publish_text(&format!("Blocking echo: {}", packet.text()));
            Ok(())
        });
        ctx.connect_blocking()?;
        Ok(())
    });
    let executor = TurnExecutor::new(
        ExecutorConfig::builder()
            .settle_delay(Duration::from_millis(20))
            .build(),
    );

    let result = executor.execute(&entry, &JobRequest::new("blocking", "hi")).await;
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.response_text.as_deref(), Some("Blocking echo: hi"));
}

#[tokio::test]
async fn panics_in_agent_code_become_errors() {
    async fn explode(_ctx: JobContext) -> Result<(), BoxError> {
        panic!("kaboom");
    }
    let result = execute_job(&Entrypoint::new(explode), &JobRequest::new("panic", "hi"), None).await;
    assert_eq!(result.status, JobStatus::Error);
    assert_eq!(result.error.as_deref(), Some("Panic: kaboom"));
    assert_eq!(result.metadata["error_kind"], "AgentExecution");
}

#[tokio::test(start_paused = true)]
async fn timed_out_turns_release_the_room() {
    let rooms = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = Arc::clone(&rooms);
    let entry = Entrypoint::new(move |ctx: JobContext| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().unwrap().push(ctx.room().clone());
            ctx.connect().await;
            let agent = Agent::builder().llm(ScriptedLlm::text()).build();
            AgentSession::new().start(agent, ctx.room()).await?;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), BoxError>(())
        }
    });

    let result = execute_job(&entry, &JobRequest::new("stuck", "hi"), Some(200)).await;
    assert_eq!(result.status, JobStatus::Timeout);
    assert_eq!(result.metadata["timeout_ms"], 200);
    assert!(result.response_text.is_none());
    assert!(result.updated_state.is_none());
    assert!(result.error.is_none());
    assert!(result.processing_time_ms < 1000.0);

    let rooms = rooms.lock().unwrap();
    assert_eq!(rooms.len(), 1);
    assert!(rooms[0].session_hook().is_none());
}

#[tokio::test(start_paused = true)]
async fn requests_without_a_budget_use_the_configured_default() {
    let entry = Entrypoint::new(|ctx: JobContext| async move {
        ctx.connect().await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<(), BoxError>(())
    });
    let executor = TurnExecutor::new(ExecutorConfig::builder().default_timeout_ms(100).build());
    let request: JobRequest =
        serde_json::from_value(serde_json::json!({"job_id": "wire", "user_input": "hi"})).unwrap();

    let result = executor.execute(&entry, &request).await;
    assert_eq!(result.status, JobStatus::Timeout);
    assert_eq!(result.metadata["timeout_ms"], 100);
    assert!(result.processing_time_ms < 1000.0);
}
