//! Tests for the error system.

use pretty_assertions::assert_eq;

use livetxt::error::{BoxError, ErrorCategory, LiveTxtError};

#[test]
fn categories_are_stable_for_major_variants() {
    let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let serde_error = serde_json::from_str::<serde_json::Value>("{not-json}").unwrap_err();

    let cases = vec![
        (LiveTxtError::Configuration("x".into()), ErrorCategory::Configuration, true),
        (LiveTxtError::Load("x".into()), ErrorCategory::Load, true),
        (
            LiveTxtError::AgentExecution {
                kind: "AgentError".into(),
                message: "x".into(),
            },
            ErrorCategory::Execution,
            false,
        ),
        (LiveTxtError::Timeout(10), ErrorCategory::Timeout, false),
        (LiveTxtError::Json(serde_error), ErrorCategory::Serialization, false),
        (LiveTxtError::Io(io_error), ErrorCategory::Transport, false),
        (LiveTxtError::Gateway("x".into()), ErrorCategory::Transport, false),
    ];

    for (error, category, fatal) in cases {
        assert_eq!(error.category(), category, "{error}");
        assert_eq!(error.is_fatal_at_startup(), fatal, "{error}");
    }
}

#[test]
fn agent_errors_keep_their_message() {
    let boxed: BoxError = "database unavailable".into();
    let error = LiveTxtError::agent(&*boxed);
    assert_eq!(error.to_string(), "AgentError: database unavailable");

    let nested: BoxError = Box::new(LiveTxtError::Timeout(250));
    let error = LiveTxtError::agent(&*nested);
    assert_eq!(error.to_string(), "Timeout: Timeout after 250ms");
}

#[test]
fn panic_payloads_are_readable() {
    let payload = std::panic::catch_unwind(|| {
        panic!("boom {}", 7);
    })
    .unwrap_err();
    let error = LiveTxtError::from_panic(payload);
    assert_eq!(error.kind(), "AgentExecution");
    assert_eq!(error.to_string(), "Panic: boom 7");
}
