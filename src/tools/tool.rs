//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::arguments::ToolArguments;
use super::types::{ToolParameters, ToolSpec};
use crate::error::BoxError;

/// Context available during tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    /// Call id assigned by the model.
    pub call_id: String,
    /// Free-form data supplied by the session.
    pub metadata: Value,
}

/// A tool an agent exposes to its model.
#[async_trait]
pub trait FunctionTool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &ToolParameters;

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> Result<Value, BoxError>;

    /// True when calls are already being recorded into a call log.
    fn is_tracked(&self) -> bool {
        false
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }
}

type ToolHandler = dyn Fn(ToolArguments, ToolExecutionContext) -> Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>
    + Send
    + Sync;

/// Closure-backed tool.
pub struct FunctionToolFn {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: Arc<ToolHandler>,
}

impl FunctionToolFn {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl FunctionTool for FunctionToolFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> Result<Value, BoxError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FunctionToolFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionToolFn")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_tool() -> FunctionToolFn {
        FunctionToolFn::new(
            "add",
            "Add two numbers",
            ToolParameters::object()
                .number("a", "left", true)
                .number("b", "right", true)
                .build(),
            |args, _ctx| async move {
                let a = args.get_f64("a")?;
                let b = args.get_f64("b")?;
                Ok(json!(a + b))
            },
        )
    }

    #[tokio::test]
    async fn closure_tool_executes() {
        let tool = add_tool();
        let args = ToolArguments::new(json!({"a": 2, "b": 3}));
        let out = tool.execute(&args, &ToolExecutionContext::default()).await.unwrap();
        assert_eq!(out, json!(5.0));
        assert!(!tool.is_tracked());
    }

    #[tokio::test]
    async fn argument_errors_surface_as_tool_errors() {
        let tool = add_tool();
        let args = ToolArguments::new(json!({"a": 2}));
        let err = tool.execute(&args, &ToolExecutionContext::default()).await.unwrap_err();
        assert!(err.to_string().contains("Missing float argument: b"));
    }

    #[test]
    fn spec_exposes_schema() {
        let spec = add_tool().spec();
        assert_eq!(spec.name, "add");
        assert_eq!(spec.parameters["required"], json!(["a", "b"]));
    }
}
