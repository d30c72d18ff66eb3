//! Tool decorator that records every invocation into a [`CallLog`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::arguments::ToolArguments;
use super::tool::{FunctionTool, ToolExecutionContext};
use super::types::ToolParameters;
use crate::capture::CallLog;
use crate::error::BoxError;
use crate::serialization::FunctionCallRecord;

/// Wraps a tool so calls land in a call log. Errors are logged, recorded and
/// returned unchanged.
pub struct TrackedTool {
    inner: Arc<dyn FunctionTool>,
    log: CallLog,
}

impl TrackedTool {
    pub fn new(inner: Arc<dyn FunctionTool>, log: CallLog) -> Self {
        Self { inner, log }
    }

    /// Wrap `tool` unless it is already tracked.
    pub fn wrap(tool: Arc<dyn FunctionTool>, log: &CallLog) -> Arc<dyn FunctionTool> {
        if tool.is_tracked() {
            return tool;
        }
        Arc::new(Self::new(tool, log.clone()))
    }
}

#[async_trait]
impl FunctionTool for TrackedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> &ToolParameters {
        self.inner.parameters()
    }

    fn is_tracked(&self) -> bool {
        true
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolExecutionContext) -> Result<Value, BoxError> {
        let name = self.inner.name();
        tracing::debug!(tool = name, call_id = %ctx.call_id, "Function tool called");
        match self.inner.execute(args, ctx).await {
            Ok(result) => {
                self.log.push(FunctionCallRecord::succeeded(
                    name,
                    args.raw().clone(),
                    result.clone(),
                ));
                Ok(result)
            }
            Err(error) => {
                tracing::warn!(tool = name, %error, "Function tool failed");
                self.log.push(FunctionCallRecord::failed(
                    name,
                    args.raw().clone(),
                    error.to_string(),
                ));
                Err(error)
            }
        }
    }
}
