//! Completion backend interface and implementations.

pub mod events;
pub mod http;
pub mod sse;

#[cfg(feature = "openai")]
pub mod openai_responses;

pub use events::{BackendEvent, BackendEventKind, ResponseSnapshot};

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::SidestreamError;
use crate::protocol::ReasoningEffort;
use crate::types::InputItem;

/// Typed event stream returned by a backend.
pub type EventStream = BoxStream<'static, Result<BackendEvent, SidestreamError>>;

/// A request sent to a completion backend.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub model: String,
    /// Static instructions; sent ahead of the conversation so the backend
    /// can reuse its cached prefix across iterations.
    pub instructions: String,
    pub input: Vec<InputItem>,
    /// `None` disables tool calling for this request.
    pub tools: Option<Vec<ToolDefinition>>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Run the generation provider-side, independent of this connection.
    pub background: bool,
    pub metadata: HashMap<String, String>,
    pub user: Option<String>,
}

/// Tool definition sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Core trait implemented by completion backends.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Backend name (e.g. "openai").
    fn name(&self) -> &str;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Submit a request and stream its events.
    async fn stream(&self, request: &ProviderRequest) -> Result<EventStream, SidestreamError>;

    /// Reattach to a background response, skipping events at or before
    /// `starting_after`.
    async fn resume(
        &self,
        response_id: &str,
        starting_after: Option<u64>,
    ) -> Result<EventStream, SidestreamError>;

    /// Fetch the current state of a response.
    async fn retrieve(&self, response_id: &str) -> Result<ResponseSnapshot, SidestreamError>;

    /// Cancel a queued or in-progress background response.
    async fn cancel(&self, response_id: &str) -> Result<ResponseSnapshot, SidestreamError>;
}
