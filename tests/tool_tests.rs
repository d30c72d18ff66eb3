//! Tests for the tool system.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::json;

use livetxt::agents::{Agent, AgentSession};
use livetxt::capture::CallLog;
use livetxt::shim::{FakeRoom, OutputBuffer};
use livetxt::tools::*;
use livetxt::types::ChatItem;

use common::ScriptedLlm;

#[derive(Debug, Deserialize, PartialEq)]
struct Forecast {
    city: String,
    days: u32,
}

fn forecast_tool() -> FunctionToolFn {
    FunctionToolFn::new(
        "forecast",
        "Weather forecast",
        ToolParameters::object()
            .string("city", "City name", true)
            .number("days", "Days ahead", true)
            .build(),
        |args, _ctx| async move {
            let forecast: Forecast = args.deserialize()?;
            if forecast.city.is_empty() {
                return Err("city must not be empty".into());
            }
            Ok(json!(format!("Sunny in {} for {} days", forecast.city, forecast.days)))
        },
    )
}

#[test]
fn blank_arguments_decode_to_an_empty_object() {
    let args = ToolArguments::from_json_str("  ").unwrap();
    assert_eq!(args.raw(), &json!({}));
    assert!(ToolArguments::from_json_str("{oops").is_err());
}

#[test]
fn typed_arguments_deserialize() {
    let args = ToolArguments::from_json_str(r#"{"city": "Lima", "days": 2}"#).unwrap();
    let forecast: Forecast = args.deserialize().unwrap();
    assert_eq!(
        forecast,
        Forecast {
            city: "Lima".into(),
            days: 2
        }
    );
}

#[tokio::test]
async fn tracked_tools_record_calls_made_by_a_session() {
    let llm = ScriptedLlm::text()
        .queue_tool_call("c1", "forecast", json!({"city": "Lima", "days": 2}))
        .queue_tool_call("c2", "forecast", json!({"city": "", "days": 1}))
        .queue_text("Done.");
    let agent = Agent::builder()
        .name("weather")
        .tool(forecast_tool())
        .llm(llm)
        .build();
    let log = CallLog::new();
    agent.map_tools(|tool| TrackedTool::wrap(tool, &log));

    let room = FakeRoom::for_job("tools", Arc::new(OutputBuffer::new()));
    let session = AgentSession::new();
    session.start(agent.clone(), &room).await.unwrap();
    let run = session.run("weather please").await.unwrap();
    assert_eq!(run.final_text().as_deref(), Some("Done."));

    let records = log.snapshot();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].result, Some(json!("Sunny in Lima for 2 days")));
    assert_eq!(records[1].error.as_deref(), Some("city must not be empty"));

    let outputs: Vec<(String, bool)> = agent
        .chat_ctx()
        .items()
        .iter()
        .filter_map(|item| match item {
            ChatItem::FunctionCallOutput(output) => Some((output.output.clone(), output.is_error)),
            _ => None,
        })
        .collect();
    assert_eq!(
        outputs,
        vec![
            ("Sunny in Lima for 2 days".to_string(), false),
            ("city must not be empty".to_string(), true),
        ]
    );
}
