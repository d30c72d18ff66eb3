//! Tool system for function calling.

pub mod arguments;
pub mod tool;
pub mod tracking;
pub mod types;

pub use arguments::ToolArguments;
pub use tool::{FunctionTool, FunctionToolFn, ToolExecutionContext};
pub use tracking::TrackedTool;
pub use types::{ParameterBuilder, ToolParameters, ToolSpec};
