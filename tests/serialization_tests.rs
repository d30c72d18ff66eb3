//! History and full-state codec behaviour.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use livetxt::serialization::{
    deserialize_full_state, deserialize_function_tool_call, deserialize_history,
    serialize_chat_context, serialize_full_state, serialize_function_tool_call, FunctionCallRecord,
    STATE_VERSION,
};
use livetxt::types::chat::now_timestamp;
use livetxt::types::{
    ChatContent, ChatContext, ChatItem, ChatMessage, ChatRole, FunctionCall, FunctionCallOutput,
    FunctionToolCall, ImageContent, MediaContent, SessionState,
};

fn sample_history() -> ChatContext {
    let mut history = ChatContext::empty();
    history.add_message(ChatRole::System, "Be brief.");
    history.add_message(ChatRole::User, "weather?");
    history.insert(ChatItem::FunctionCall(FunctionCall::new("c1", "weather", r#"{"city":"Oslo"}"#)));
    history.insert(ChatItem::FunctionCallOutput(FunctionCallOutput::new("c1", "weather", "rain", false)));
    history.add_message(ChatRole::Assistant, "Rain in Oslo.");
    history
}

#[test]
fn history_survives_a_round_trip() {
    let history = sample_history();
    let restored = deserialize_history(&serialize_chat_context(&history));

    let ids = |ctx: &ChatContext| ctx.items().iter().map(|i| i.id().to_string()).collect::<Vec<_>>();
    assert_eq!(ids(&restored), ids(&history));
    assert_eq!(restored.last_assistant_text().as_deref(), Some("Rain in Oslo."));
    let ChatItem::FunctionCall(call) = &restored.items()[2] else {
        panic!("expected function call");
    };
    assert_eq!(call.arguments, r#"{"city":"Oslo"}"#);
}

#[test]
fn images_are_dropped_from_persisted_history() {
    let mut history = ChatContext::empty();
    history.insert(ChatItem::Message(ChatMessage::new(
        ChatRole::User,
        vec![
            ChatContent::Text("look".into()),
            ChatContent::Media(MediaContent::Image(ImageContent {
                id: "img".into(),
                image: "data:image/png;base64,AAAA".into(),
                mime_type: Some("image/png".into()),
            })),
        ],
    )));
    let value = serialize_chat_context(&history);
    assert_eq!(value["items"][0]["content"], json!(["look"]));
}

#[test]
fn malformed_items_are_skipped() {
    let data = json!({
        "items": [
            {"type": "message", "id": "m1", "role": "user", "content": ["hi"]},
            {"type": "hologram"},
            {"type": "message", "id": "m2", "role": "assistant", "content": ["hello"]},
        ]
    });
    let history = deserialize_history(&data);
    assert_eq!(history.len(), 2);
    assert_eq!(history.items()[1].id(), "m2");

    assert!(deserialize_history(&Value::Null).is_empty());
    assert!(deserialize_history(&json!({})).is_empty());
}

#[test]
fn full_state_fills_defaults() {
    let state = deserialize_full_state(&json!({}));
    assert!(state.chat_context.is_empty());
    assert!(state.function_calls.is_empty());
    assert_eq!(state.user_state, "listening");
    assert_eq!(state.agent_state, "idle");
}

#[test]
fn full_state_round_trip() {
    let history = sample_history();
    let calls = vec![FunctionCallRecord::succeeded("weather", json!({"city": "Oslo"}), json!("rain"))];
    let doc = serialize_full_state(Some(&history), &calls, "speaking", "thinking");
    assert_eq!(doc["version"], STATE_VERSION);

    let state = deserialize_full_state(&doc);
    assert_eq!(state.chat_context.len(), history.len());
    assert_eq!(state.function_calls, calls);
    assert_eq!(state.user_state, "speaking");
    assert_eq!(state.agent_state, "thinking");
}

#[test]
fn unknown_versions_still_parse() {
    let doc = json!({
        "version": "9.9",
        "chat_context": {"items": [{"type": "message", "id": "m", "role": "user", "content": ["x"]}]},
    });
    assert_eq!(deserialize_full_state(&doc).chat_context.len(), 1);
}

#[test]
fn tool_calls_keep_raw_arguments() {
    let call = FunctionToolCall::new("c9", "search", "not json");
    let value = serialize_function_tool_call(&call);
    assert_eq!(value["arguments"], json!({"_raw": "not json"}));

    let legacy = deserialize_function_tool_call(&json!({
        "call_id": "c9",
        "function_name": "search",
        "arguments": {"q": "rust"},
    }))
    .unwrap();
    assert_eq!(legacy.name, "search");
    assert_eq!(legacy.arguments, r#"{"q":"rust"}"#);

    assert!(deserialize_function_tool_call(&json!({"call_id": "c"})).is_err());
}

#[test]
fn session_state_survives_json_text_with_real_timestamps() {
    let mut history = sample_history();
    let mut message = ChatMessage::text(ChatRole::User, "late reply");
    message.created_at = 1_760_000_000.068_536_5;
    history.insert(ChatItem::Message(message));
    for step in 0..200u32 {
        let mut message = ChatMessage::text(ChatRole::Assistant, format!("step {step}"));
        message.created_at = now_timestamp() + f64::from(step) * 0.000_137;
        history.insert(ChatItem::Message(message));
    }
    let mut metadata = serde_json::Map::new();
    metadata.insert("last_seen".into(), json!(now_timestamp()));

    let state = SessionState::from_chat_context(&history, metadata);
    let text = serde_json::to_string(&state).unwrap();
    let decoded: SessionState = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded, state);
    assert_eq!(decoded.to_chat_context(), history);
}
