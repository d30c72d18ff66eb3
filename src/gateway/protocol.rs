//! Gateway wire protocol: event-tagged JSON text frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LiveTxtError, Result};

/// Every frame the worker sends or understands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Welcome sent by the gateway right after the socket opens.
    Connected {
        #[serde(default)]
        worker_id: Option<String>,
    },
    Ready {
        worker_id: Option<String>,
    },
    Heartbeat {
        timestamp: f64,
    },
    HeartbeatAck,
    Message(InboundMessage),
    Response {
        session_id: String,
        message: String,
    },
}

impl GatewayEvent {
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// An inbound SMS-style message, as received. Fields may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// An inbound message with every required field present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    pub session_id: String,
    pub from: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(session_id: &str, from: &str, message: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            from: Some(from.to_string()),
            message: Some(message.to_string()),
        }
    }

    pub fn validate(self) -> Option<SessionMessage> {
        let present = |value: Option<String>| value.filter(|v| !v.is_empty());
        Some(SessionMessage {
            session_id: present(self.session_id)?,
            from: present(self.from)?,
            text: present(self.message)?,
        })
    }
}

/// Outcome of decoding one text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(GatewayEvent),
    /// Valid JSON with an event name this worker does not handle.
    Unknown(Option<String>),
    /// Not JSON, or a known event with the wrong shape.
    Invalid(String),
}

pub fn parse_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(error) => return Frame::Invalid(error.to_string()),
    };
    let event = value.get("event").and_then(Value::as_str).map(str::to_string);
    let known = matches!(
        event.as_deref(),
        Some("connected" | "ready" | "heartbeat" | "heartbeat_ack" | "message" | "response")
    );
    if !known {
        return Frame::Unknown(event);
    }
    match serde_json::from_value(value) {
        Ok(event) => Frame::Event(event),
        Err(error) => Frame::Invalid(error.to_string()),
    }
}

/// Worker websocket URL for an http(s) or ws(s) gateway URL.
///
/// `https://gw.example/anything` becomes
/// `wss://gw.example/worker/connect?api_key=<key>`.
pub fn worker_connect_url(gateway_url: &str, api_key: &str) -> Result<String> {
    let trimmed = gateway_url.trim();
    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| LiveTxtError::Configuration(format!("gateway url has no scheme: {trimmed}")))?;
    let ws_scheme = match scheme {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(LiveTxtError::Configuration(format!(
                "unsupported gateway url scheme: {other}"
            )))
        }
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(LiveTxtError::Configuration(format!("gateway url has no host: {trimmed}")));
    }
    Ok(format!(
        "{ws_scheme}://{host}/worker/connect?api_key={}",
        encode_query_value(api_key)
    ))
}

fn encode_query_value(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn frames_are_event_tagged() {
        let frame = GatewayEvent::Response {
            session_id: "s1".into(),
            message: "hi".into(),
        };
        let value: Value = serde_json::from_str(&frame.to_frame().unwrap()).unwrap();
        assert_eq!(value, json!({"event": "response", "session_id": "s1", "message": "hi"}));

        let ready: Value =
            serde_json::to_value(GatewayEvent::Ready { worker_id: Some("w1".into()) }).unwrap();
        assert_eq!(ready, json!({"event": "ready", "worker_id": "w1"}));
    }

    #[test]
    fn parses_known_unknown_and_invalid() {
        assert_eq!(
            parse_frame(r#"{"event":"connected","worker_id":"w9"}"#),
            Frame::Event(GatewayEvent::Connected { worker_id: Some("w9".into()) })
        );
        assert_eq!(parse_frame(r#"{"event":"heartbeat_ack"}"#), Frame::Event(GatewayEvent::HeartbeatAck));
        assert_eq!(parse_frame(r#"{"event":"surprise"}"#), Frame::Unknown(Some("surprise".into())));
        assert!(matches!(parse_frame("not json"), Frame::Invalid(_)));

        let Frame::Event(GatewayEvent::Message(inbound)) =
            parse_frame(r#"{"event":"message","session_id":"s","from":"+1","message":"yo"}"#)
        else {
            panic!("expected message frame");
        };
        assert_eq!(inbound.validate().unwrap().text, "yo");
    }

    #[test]
    fn incomplete_messages_do_not_validate() {
        let inbound = InboundMessage {
            session_id: Some("s".into()),
            from: None,
            message: Some("hello".into()),
        };
        assert!(inbound.validate().is_none());
        assert!(InboundMessage::new("s", "+1", "").validate().is_none());
    }

    #[test]
    fn connect_url_is_derived_from_http_url() {
        assert_eq!(
            worker_connect_url("https://gw.example.com/api", "k y").unwrap(),
            "wss://gw.example.com/worker/connect?api_key=k%20y"
        );
        assert_eq!(
            worker_connect_url("http://localhost:8080", "abc").unwrap(),
            "ws://localhost:8080/worker/connect?api_key=abc"
        );
        assert!(worker_connect_url("localhost:8080", "abc").is_err());
    }
}
