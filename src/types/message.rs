//! Conversation and tool-call types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ModelMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create a developer/system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One item of backend input.
///
/// History messages come first; later iterations append the backend's own
/// output items verbatim followed by the tool outputs that answer them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputItem {
    Message(ModelMessage),
    /// An output item replayed exactly as the backend produced it.
    BackendOutput { item: serde_json::Value },
    FunctionCallOutput { call_id: String, output: String },
}

impl From<ModelMessage> for InputItem {
    fn from(message: ModelMessage) -> Self {
        Self::Message(message)
    }
}

impl From<&ToolOutcome> for InputItem {
    fn from(outcome: &ToolOutcome) -> Self {
        Self::FunctionCallOutput {
            call_id: outcome.call_id.clone(),
            output: outcome.output.clone(),
        }
    }
}

/// A tool invocation being assembled from the backend stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingToolCall {
    /// Backend output item id.
    pub id: String,
    pub name: String,
    /// Id the tool output must echo back.
    pub call_id: String,
    /// Raw argument text, accumulated from deltas.
    pub arguments: String,
}

impl PendingToolCall {
    /// Argument deltas are only accepted once the call is named.
    pub fn accepts_arguments(&self) -> bool {
        !self.name.is_empty()
    }

    /// Parse the accumulated arguments, falling back to a JSON string.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        if self.arguments.trim().is_empty() {
            return serde_json::Value::Object(Default::default());
        }
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| serde_json::Value::String(self.arguments.clone()))
    }

    pub fn to_call(&self) -> ToolCall {
        ToolCall {
            call_id: self.call_id.clone(),
            name: self.name.clone(),
            arguments: self.parsed_arguments(),
        }
    }
}

/// A finalized tool call handed to the executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub success: bool,
    pub output: String,
}

impl ToolOutcome {
    pub fn success(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            success: false,
            output: output.into(),
        }
    }
}
