//! Locally executed tools.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};

use crate::error::SidestreamError;
use crate::provider::ToolDefinition;

/// Identifies the call a tool is answering.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub call_id: String,
    pub request_id: Option<String>,
}

/// A function the model may call during an agent run.
///
/// Arguments arrive already parsed from the model's JSON; malformed
/// argument strings become `{}` before they reach the tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, args: Value, ctx: ToolExecutionContext) -> Result<Value, SidestreamError>;

    fn name(&self) -> String {
        self.definition().name
    }
}

type Handler = dyn Fn(Value, ToolExecutionContext) -> BoxFuture<'static, Result<Value, SidestreamError>>
    + Send
    + Sync;

/// A tool backed by an async closure.
#[derive(Clone)]
pub struct AgentTool {
    definition: ToolDefinition,
    handler: Arc<Handler>,
}

impl AgentTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, parameters: Value, handler: F) -> Self
    where
        F: Fn(Value, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, SidestreamError>> + Send + 'static,
    {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            handler: Arc::new(move |args, ctx| handler(args, ctx).boxed()),
        }
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn name(&self) -> String {
        self.definition.name.clone()
    }

    async fn call(&self, args: Value, ctx: ToolExecutionContext) -> Result<Value, SidestreamError> {
        (self.handler)(args, ctx).await
    }
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AgentTool").field(&self.definition.name).finish()
    }
}

/// Object schema whose properties are all strings: `(name, description, required)`.
pub fn string_params(fields: &[(&str, &str, bool)]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|(name, description, _)| {
            ((*name).to_string(), json!({ "type": "string", "description": description }))
        })
        .collect();
    let required: Vec<&str> = fields
        .iter()
        .filter(|(_, _, required)| *required)
        .map(|(name, _, _)| *name)
        .collect();
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Text fed back to the model for a tool's result.
pub(crate) fn output_to_string(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}
