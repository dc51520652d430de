//! Frame types and their wire JSON shapes.
//!
//! Each frame maps to exactly one populated top-level key on the wire. The
//! mapping is written by hand rather than derived because the text deltas
//! borrow the `choices[0].delta` envelope of chat-completion streams while
//! every other kind is keyed by name.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumString};

use crate::error::ErrorCode;

/// Execution mode requested for a conversation turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AgentMode {
    #[default]
    Chat,
    Agent,
    Research,
}

/// Confidence attached to a mode decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Reasoning effort level forwarded to the backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    #[default]
    Low,
    Medium,
    High,
}

/// Lifecycle of a single tool invocation as seen by the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolUseStatus {
    InProgress,
    Executing,
    Completed,
    Error,
}

impl ToolUseStatus {
    /// `completed` and `error` end a tool's activity.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Status of a background generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Incomplete,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::InProgress)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Terminal states are absorbing; `queued` cannot be re-entered once the
    /// task has started.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            Self::Queued => true,
            Self::InProgress => next != Self::Queued,
            _ => self == next,
        }
    }

    /// Parse a provider status string, accepting the `canceled` spelling.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status {
            "canceled" => Some(Self::Cancelled),
            other => other.parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolUseFrame {
    pub tool: String,
    pub status: ToolUseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResultFrame {
    pub tool: String,
    pub success: bool,
    #[serde(default)]
    pub output: String,
}

/// A non-text artifact produced by the backend, such as an image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactFrame {
    #[serde(rename = "base64")]
    pub payload: String,
    #[serde(rename = "prompt", default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModeFrame {
    #[serde(rename = "type")]
    pub kind: AgentMode,
    #[serde(default)]
    pub reason: String,
    pub confidence: Confidence,
    pub reasoning_effort: ReasoningEffort,
    #[serde(default)]
    pub background_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundFrame {
    pub response_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Domain progress signal, e.g. a research stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFrame {
    #[serde(rename = "stage")]
    pub label: String,
    #[serde(rename = "activity", default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Source {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    #[serde(rename = "type", deserialize_with = "lenient_code")]
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorFrame {
    pub fn from_error(err: &crate::error::SidestreamError, request_id: Option<String>) -> Self {
        Self {
            code: err.code(),
            message: err.user_message().to_string(),
            retryable: err.is_retryable(),
            request_id,
        }
    }
}

fn lenient_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ErrorCode, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or(ErrorCode::Unknown))
}

/// One self-describing unit of the server to client event protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    ContentDelta(String),
    ReasoningDelta(String),
    ToolUse(ToolUseFrame),
    ToolResult(ToolResultFrame),
    GeneratedArtifact(ArtifactFrame),
    Mode(ModeFrame),
    BackgroundStatus(BackgroundFrame),
    Stage(StageFrame),
    Sources(Vec<Source>),
    Error(ErrorFrame),
    /// Terminal sentinel (`[DONE]`).
    Done,
}

impl Frame {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta(text.into())
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta(text.into())
    }

    pub fn tool_use(tool: impl Into<String>, status: ToolUseStatus, details: Option<String>) -> Self {
        Self::ToolUse(ToolUseFrame {
            tool: tool.into(),
            status,
            details,
        })
    }

    pub fn stage(label: impl Into<String>, detail: Option<String>) -> Self {
        Self::Stage(StageFrame {
            label: label.into(),
            detail,
        })
    }

    /// `error` and the sentinel are the only frames that end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Done)
    }

    /// Wire kind tag, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContentDelta(_) => "content_delta",
            Self::ReasoningDelta(_) => "reasoning_delta",
            Self::ToolUse(_) => "tool_use",
            Self::ToolResult(_) => "tool_result",
            Self::GeneratedArtifact(_) => "generated_image",
            Self::Mode(_) => "mode",
            Self::BackgroundStatus(_) => "background",
            Self::Stage(_) => "research_stage",
            Self::Sources(_) => "research_sources",
            Self::Error(_) => "error",
            Self::Done => "done",
        }
    }

    /// JSON payload for this frame; `None` for the sentinel, which is not JSON.
    pub fn to_json(&self) -> Option<Value> {
        let value = match self {
            Self::ContentDelta(text) => json!({ "choices": [{ "delta": { "content": text } }] }),
            Self::ReasoningDelta(text) => json!({ "choices": [{ "delta": { "reasoning": text } }] }),
            Self::ToolUse(f) => json!({ "tool_use": f }),
            Self::ToolResult(f) => json!({ "tool_result": f }),
            Self::GeneratedArtifact(f) => json!({ "generated_image": f }),
            Self::Mode(f) => json!({ "mode": f }),
            Self::BackgroundStatus(f) => json!({ "background": f }),
            Self::Stage(f) => json!({ "research_stage": f }),
            Self::Sources(list) => json!({ "research_sources": list }),
            Self::Error(f) => json!({ "error": f }),
            Self::Done => return None,
        };
        Some(value)
    }

    /// Decode a frame from its JSON payload.
    ///
    /// Returns `None` for payloads with no recognised key, or whose recognised
    /// key holds a malformed value; both are ignorable by consumers.
    pub fn from_json(value: &Value) -> Option<Self> {
        if let Some(delta) = value.pointer("/choices/0/delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                return Some(Self::ContentDelta(text.to_string()));
            }
            if let Some(text) = delta.get("reasoning").and_then(Value::as_str) {
                return Some(Self::ReasoningDelta(text.to_string()));
            }
        }
        let obj = value.as_object()?;
        if let Some(v) = obj.get("tool_use") {
            return decode(v).map(Self::ToolUse);
        }
        if let Some(v) = obj.get("tool_result") {
            return decode(v).map(Self::ToolResult);
        }
        if let Some(v) = obj.get("generated_image") {
            return decode(v).map(Self::GeneratedArtifact);
        }
        if let Some(v) = obj.get("mode") {
            return decode(v).map(Self::Mode);
        }
        if let Some(v) = obj.get("background") {
            return decode(v).map(Self::BackgroundStatus);
        }
        if let Some(v) = obj.get("research_stage") {
            return decode(v).map(Self::Stage);
        }
        if let Some(v) = obj.get("research_sources") {
            return decode(v).map(Self::Sources);
        }
        if let Some(v) = obj.get("error") {
            return decode(v).map(Self::Error);
        }
        None
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed frame payload");
            None
        }
    }
}
