//! Batched tool execution.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future;

use crate::error::SidestreamError;
use crate::provider::ToolDefinition;
use crate::types::{ToolCall, ToolOutcome};

use super::tool::{output_to_string, Tool, ToolExecutionContext};

/// Executes every pending tool call of one iteration as a single batch.
///
/// Per-call failures are reported as unsuccessful [`ToolOutcome`]s. An `Err`
/// means the batch as a whole could not run, and ends the agent loop.
/// Calls may be re-issued after a process restart; executors that need
/// exactly-once semantics must deduplicate on `call_id`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools advertised to the backend.
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(
        &self,
        calls: Vec<ToolCall>,
        request_id: Option<&str>,
    ) -> Result<Vec<ToolOutcome>, SidestreamError>;
}

/// Executor over a fixed set of in-process tools, run concurrently.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    async fn run_one(&self, call: ToolCall, request_id: Option<String>) -> ToolOutcome {
        let Some(tool) = self.find(&call.name) else {
            return ToolOutcome::failure(&call, format!("Tool '{}' not found", call.name));
        };
        let ctx = ToolExecutionContext {
            call_id: call.call_id.clone(),
            request_id,
        };
        match tool.call(call.arguments.clone(), ctx).await {
            Ok(value) => ToolOutcome::success(&call, output_to_string(value)),
            Err(err) => {
                tracing::warn!(tool = %call.name, call_id = %call.call_id, error = %err, "tool call failed");
                ToolOutcome::failure(&call, err.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    async fn execute(
        &self,
        calls: Vec<ToolCall>,
        request_id: Option<&str>,
    ) -> Result<Vec<ToolOutcome>, SidestreamError> {
        let request_id = request_id.map(str::to_string);
        let futures = calls
            .into_iter()
            .map(|call| self.run_one(call, request_id.clone()));
        Ok(future::join_all(futures).await)
    }
}
