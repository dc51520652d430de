//! Agent run requests.

use std::sync::Arc;

use bon::Builder;

use crate::error::SidestreamError;
use crate::protocol::{AgentMode, ReasoningEffort};
use crate::tools::ToolExecutor;
use crate::types::{ModelMessage, Role};

use super::mode::Complexity;

/// Everything the orchestrator needs for one client request.
///
/// ```
/// use sidestream::agent::AgentRequest;
/// use sidestream::protocol::AgentMode;
/// use sidestream::types::ModelMessage;
///
/// let request = AgentRequest::builder()
///     .system_prompt("You are terse.")
///     .history(vec![ModelMessage::user("hi")])
///     .mode(AgentMode::Chat)
///     .user_id("user_1")
///     .build();
/// assert!(request.validate().is_ok());
/// ```
#[derive(Clone, Builder)]
pub struct AgentRequest {
    #[builder(into, default = uuid::Uuid::new_v4().to_string())]
    pub request_id: String,
    #[builder(into, default)]
    pub system_prompt: String,
    #[builder(default)]
    pub history: Vec<ModelMessage>,
    pub tools: Option<Arc<dyn ToolExecutor>>,
    #[builder(default)]
    pub mode: AgentMode,
    /// Why this mode was chosen; echoed in the `mode` frame.
    #[builder(into)]
    pub mode_reason: Option<String>,
    #[builder(into, default = "anonymous".to_string())]
    pub user_id: String,
    /// Conversation id; background tasks with one get a durable record.
    #[builder(into)]
    pub chat_id: Option<String>,
    #[builder(into)]
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    #[builder(default)]
    pub complexity: Complexity,
}

impl std::fmt::Debug for AgentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRequest")
            .field("request_id", &self.request_id)
            .field("mode", &self.mode)
            .field("user_id", &self.user_id)
            .field("chat_id", &self.chat_id)
            .field("messages", &self.history.len())
            .field("has_tools", &self.has_tools())
            .finish()
    }
}

impl AgentRequest {
    /// Checked before the loop starts; failures never reach the backend.
    pub fn validate(&self) -> Result<(), SidestreamError> {
        if self.request_id.trim().is_empty() {
            return Err(SidestreamError::validation("request id is empty"));
        }
        let Some(last) = self.history.last() else {
            return Err(SidestreamError::validation("conversation history is empty"));
        };
        if last.role != Role::User {
            return Err(SidestreamError::validation(
                "conversation must end with a user message",
            ));
        }
        if self.history.iter().all(|m| m.content.trim().is_empty()) {
            return Err(SidestreamError::validation("conversation has no content"));
        }
        Ok(())
    }

    pub fn has_tools(&self) -> bool {
        self.tools
            .as_ref()
            .is_some_and(|tools| !tools.definitions().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_rejected() {
        let request = AgentRequest::builder().build();
        let err = request.validate().unwrap_err();
        assert!(matches!(err, SidestreamError::Validation(_)));
    }

    #[test]
    fn history_must_end_with_user_turn() {
        let request = AgentRequest::builder()
            .history(vec![ModelMessage::user("hi"), ModelMessage::assistant("hello")])
            .build();
        assert!(request.validate().is_err());
    }

    #[test]
    fn builder_assigns_request_id() {
        let a = AgentRequest::builder().build();
        let b = AgentRequest::builder().build();
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.user_id, "anonymous");
        assert!(!a.has_tools());
    }
}
