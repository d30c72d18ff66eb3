//! Error types for livetxt.

use thiserror::Error;

/// Error type agent code may return from entrypoints, handlers and tools.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Primary error type for all livetxt operations.
#[derive(Error, Debug, strum::IntoStaticStr)]
pub enum LiveTxtError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("{kind}: {message}")]
    AgentExecution { kind: String, message: String },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Tool execution error: {tool_name} - {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Broad error category used for turn classification and startup policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Load,
    Execution,
    Timeout,
    Serialization,
    Transport,
    Unknown,
}

impl LiveTxtError {
    /// Wrap an arbitrary agent-side error, keeping a short kind label.
    pub fn agent(error: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(inner) = error.downcast_ref::<LiveTxtError>() {
            return Self::AgentExecution {
                kind: inner.kind().to_string(),
                message: inner.to_string(),
            };
        }
        let kind = if error.is::<std::io::Error>() {
            "IoError"
        } else if error.is::<serde_json::Error>() {
            "JsonError"
        } else {
            "AgentError"
        };
        Self::AgentExecution {
            kind: kind.to_string(),
            message: error.to_string(),
        }
    }

    /// Build an execution error from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "agent code panicked".to_string()
        };
        Self::AgentExecution {
            kind: "Panic".to_string(),
            message,
        }
    }

    /// Variant name, e.g. `"Timeout"`.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Load(_) => ErrorCategory::Load,
            Self::AgentExecution { .. } | Self::ToolExecution { .. } | Self::InvalidState(_) => {
                ErrorCategory::Execution
            }
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Serialization(_) | Self::Json(_) => ErrorCategory::Serialization,
            Self::Gateway(_) | Self::Io(_) => ErrorCategory::Transport,
            Self::InvalidArgument(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error should stop process startup rather than a single turn.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Load
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, LiveTxtError>;
