//! Client-side view of an in-progress answer.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::protocol::{
    ArtifactFrame, BackgroundFrame, ErrorFrame, Frame, ModeFrame, Source, StageFrame, ToolResultFrame,
    ToolUseFrame, ToolUseStatus,
};

/// One tool invocation as seen by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    pub tool: String,
    pub status: ToolUseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResultFrame>,
}

/// Whether a frame changed the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// Arrived after the stream terminated.
    Ignored,
}

/// Reduced state of one streamed answer.
///
/// `content` and `reasoning` only grow. Once the sentinel has been applied
/// every later frame is ignored; after an `error` frame only the sentinel is
/// still accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamState {
    pub content: String,
    pub reasoning: String,
    pub thinking_time_seconds: Option<f64>,
    pub active_tool: Option<ToolStatus>,
    pub tool_history: Vec<ToolStatus>,
    pub mode: Option<ModeFrame>,
    pub sources: Vec<Source>,
    pub artifacts: Vec<ArtifactFrame>,
    pub background: Option<BackgroundFrame>,
    pub stage: Option<StageFrame>,
    pub error: Option<ErrorFrame>,
    pub done: bool,
    started_at: Instant,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamState {
    /// Empty state; the request-start timestamp is taken now.
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(started_at: Instant) -> Self {
        Self {
            content: String::new(),
            reasoning: String::new(),
            thinking_time_seconds: None,
            active_tool: None,
            tool_history: Vec::new(),
            mode: None,
            sources: Vec::new(),
            artifacts: Vec::new(),
            background: None,
            stage: None,
            error: None,
            done: false,
            started_at,
        }
    }

    /// No more frames will be applied except, after an error, the sentinel.
    pub fn is_terminated(&self) -> bool {
        self.done || self.error.is_some()
    }

    /// Fold one frame into the state.
    pub fn apply(&mut self, frame: &Frame) -> Applied {
        if self.done {
            return Applied::Ignored;
        }
        if self.error.is_some() && !matches!(frame, Frame::Done) {
            return Applied::Ignored;
        }
        match frame {
            Frame::ContentDelta(text) => self.on_content(text),
            Frame::ReasoningDelta(text) => self.reasoning.push_str(text),
            Frame::ToolUse(tool_use) => self.on_tool_use(tool_use),
            Frame::ToolResult(result) => self.on_tool_result(result),
            Frame::GeneratedArtifact(artifact) => self.artifacts.push(artifact.clone()),
            Frame::Mode(mode) => self.mode = Some(mode.clone()),
            Frame::BackgroundStatus(background) => self.background = Some(background.clone()),
            Frame::Stage(stage) => self.stage = Some(stage.clone()),
            Frame::Sources(sources) => {
                for source in sources {
                    if !self.sources.iter().any(|s| s.url == source.url) {
                        self.sources.push(source.clone());
                    }
                }
            }
            Frame::Error(error) => {
                self.active_tool = None;
                self.error = Some(error.clone());
            }
            Frame::Done => {
                self.active_tool = None;
                self.done = true;
            }
        }
        Applied::Updated
    }

    fn on_content(&mut self, text: &str) {
        if self.content.is_empty() && !text.is_empty() && self.thinking_time_seconds.is_none() {
            self.thinking_time_seconds = Some(self.started_at.elapsed().as_secs_f64());
        }
        self.content.push_str(text);
    }

    fn on_tool_use(&mut self, frame: &ToolUseFrame) {
        let open = self
            .tool_history
            .iter_mut()
            .rev()
            .find(|t| t.tool == frame.tool && !t.status.is_finished());
        let entry = match open {
            Some(entry) => {
                entry.status = frame.status;
                if frame.details.is_some() {
                    entry.details = frame.details.clone();
                }
                entry.clone()
            }
            None => {
                let entry = ToolStatus {
                    tool: frame.tool.clone(),
                    status: frame.status,
                    details: frame.details.clone(),
                    result: None,
                };
                self.tool_history.push(entry.clone());
                entry
            }
        };
        self.active_tool = if entry.status.is_finished() {
            None
        } else {
            Some(entry)
        };
    }

    fn on_tool_result(&mut self, result: &ToolResultFrame) {
        let target = self
            .tool_history
            .iter_mut()
            .rev()
            .find(|t| t.tool == result.tool && t.result.is_none());
        match target {
            Some(entry) => entry.result = Some(result.clone()),
            None => self.tool_history.push(ToolStatus {
                tool: result.tool.clone(),
                status: if result.success {
                    ToolUseStatus::Completed
                } else {
                    ToolUseStatus::Error
                },
                details: None,
                result: Some(result.clone()),
            }),
        }
        if let Some(active) = self.active_tool.as_mut() {
            if active.tool == result.tool {
                active.result = Some(result.clone());
            }
        }
    }

    /// Immutable copy for persisting as a chat message.
    pub fn finalize(&self) -> FinalizedMessage {
        FinalizedMessage {
            content: self.content.clone(),
            reasoning: (!self.reasoning.is_empty()).then(|| self.reasoning.clone()),
            thinking_time_seconds: self.thinking_time_seconds,
            tool_history: self.tool_history.clone(),
            mode: self.mode.clone(),
            sources: self.sources.clone(),
            artifacts: self.artifacts.clone(),
            background: self.background.clone(),
            error: self.error.clone(),
            completed: self.done,
        }
    }
}

/// A finished answer, ready to store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_time_seconds: Option<f64>,
    #[serde(default)]
    pub tool_history: Vec<ToolStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModeFrame>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorFrame>,
    /// The sentinel arrived, as opposed to the connection closing.
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn error_frame() -> Frame {
        Frame::Error(ErrorFrame {
            code: ErrorCode::ServerError,
            message: "Something went wrong".into(),
            retryable: true,
            request_id: None,
        })
    }

    #[test]
    fn frames_after_done_are_ignored() {
        let mut state = StreamState::new();
        state.apply(&Frame::content("hi"));
        state.apply(&Frame::Done);
        let before = state.clone();
        assert_eq!(state.apply(&Frame::content(" there")), Applied::Ignored);
        assert_eq!(state.apply(&error_frame()), Applied::Ignored);
        assert_eq!(state, before);
    }

    #[test]
    fn error_keeps_partial_content_and_accepts_sentinel() {
        let mut state = StreamState::new();
        state.apply(&Frame::content("partial"));
        state.apply(&error_frame());
        assert_eq!(state.apply(&Frame::content("late")), Applied::Ignored);
        assert_eq!(state.apply(&Frame::Done), Applied::Updated);
        let message = state.finalize();
        assert_eq!(message.content, "partial");
        assert!(message.error.is_some());
        assert!(message.completed);
    }

    #[test]
    fn tool_lifecycle_clears_active_tool() {
        let mut state = StreamState::new();
        state.apply(&Frame::tool_use("lookup", ToolUseStatus::InProgress, None));
        state.apply(&Frame::tool_use("lookup", ToolUseStatus::Executing, None));
        assert_eq!(
            state.active_tool.as_ref().map(|t| t.status),
            Some(ToolUseStatus::Executing)
        );
        state.apply(&Frame::ToolResult(ToolResultFrame {
            tool: "lookup".into(),
            success: true,
            output: "42".into(),
        }));
        state.apply(&Frame::tool_use("lookup", ToolUseStatus::Completed, None));
        assert!(state.active_tool.is_none());
        assert_eq!(state.tool_history.len(), 1);
        assert_eq!(state.tool_history[0].status, ToolUseStatus::Completed);
        assert_eq!(
            state.tool_history[0].result.as_ref().map(|r| r.output.as_str()),
            Some("42")
        );
    }

    #[test]
    fn thinking_time_is_measured_once() {
        let mut state = StreamState::new();
        state.apply(&Frame::reasoning("hmm"));
        assert!(state.thinking_time_seconds.is_none());
        state.apply(&Frame::content("a"));
        let first = state.thinking_time_seconds;
        assert!(first.is_some());
        state.apply(&Frame::content("b"));
        assert_eq!(state.thinking_time_seconds, first);
    }
}
