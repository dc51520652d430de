//! Convenience re-exports for common use.

pub use crate::agent::{AgentHandle, AgentRequest, Orchestrator, RunOutcome, RunStatus};
pub use crate::background::{BackgroundTask, BackgroundTaskManager, TaskService, TaskStatus};
pub use crate::config::SidestreamConfig;
pub use crate::consumer::{StreamConsumer, StreamState};
pub use crate::error::{Result, SidestreamError};
pub use crate::protocol::{AgentMode, Frame};
pub use crate::provider::CompletionBackend;
pub use crate::tools::{AgentTool, Tool, ToolExecutor, ToolRegistry};
pub use crate::types::{ModelMessage, Role, Usage};
