//! Catalog-resolved entrypoints driven through the executor.

use pretty_assertions::assert_eq;

use livetxt::demo::demo_catalog;
use livetxt::error::LiveTxtError;
use livetxt::executor::execute_job;
use livetxt::types::{JobRequest, JobStatus};

#[tokio::test(start_paused = true)]
async fn registered_agents_run_as_sessions() {
    let (name, entrypoint) = demo_catalog().load_entrypoint(Some("assistant")).unwrap();
    assert_eq!(name, "assistant");

    let result = execute_job(&entrypoint, &JobRequest::new("a-1", "hello"), None).await;
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.response_text.as_deref(), Some("You said: hello"));
    assert_eq!(result.metadata["path"], "session");

    let follow_up = JobRequest::new("a-2", "what time is it?").with_state(result.updated_state.unwrap());
    let result = execute_job(&entrypoint, &follow_up, None).await;
    assert!(result.response_text.unwrap().starts_with("It is "));
    assert_eq!(result.metadata["function_calls"], 1);
    assert_eq!(result.updated_state.unwrap().chat_items.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn default_entrypoint_is_the_first_registered() {
    let (name, entrypoint) = demo_catalog().load_entrypoint(None).unwrap();
    assert_eq!(name, "echo");
    let result = execute_job(&entrypoint, &JobRequest::new("e-1", "ping"), None).await;
    assert_eq!(result.response_text.as_deref(), Some("Echo: ping"));
}

#[test]
fn missing_names_are_load_errors() {
    let err = demo_catalog().load_entrypoint(Some("nobody")).err().unwrap();
    assert!(matches!(err, LiveTxtError::Load(_)));
    assert!(err.to_string().contains("Available: echo, assistant"));
    assert!(err.is_fatal_at_startup());
}
