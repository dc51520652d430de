//! Tool calling: the executor seam and an in-process tool registry.

pub mod executor;
pub mod tool;

pub use executor::{ToolExecutor, ToolRegistry};
pub use tool::{string_params, AgentTool, Tool, ToolExecutionContext};
