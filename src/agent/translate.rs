//! Backend event to frame translation.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::error::SidestreamError;
use crate::protocol::{ArtifactFrame, Frame, Source, ToolUseStatus};
use crate::provider::{BackendEvent, BackendEventKind, ResponseSnapshot};
use crate::types::{PendingToolCall, Usage};

/// Per-iteration translator state.
///
/// Holds the text and tool calls the backend produced so the orchestrator
/// can decide what to do once the iteration's stream ends.
#[derive(Debug, Default)]
pub(crate) struct EventTranslator {
    text: String,
    pending: Vec<PendingToolCall>,
    output_items: Vec<Value>,
    seen_sources: HashSet<String>,
    finished: Option<ResponseSnapshot>,
    error: Option<SidestreamError>,
}

impl EventTranslator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Translate one event into zero or more frames.
    pub(crate) fn handle(&mut self, event: BackendEvent) -> Vec<Frame> {
        match event.kind {
            BackendEventKind::Created { .. } | BackendEventKind::StatusChanged { .. } => Vec::new(),
            BackendEventKind::TextDelta { delta, .. } => self.on_text_delta(delta),
            BackendEventKind::ReasoningDelta { delta } => on_reasoning_delta(delta),
            BackendEventKind::OutputItemAdded { item } => self.on_item_added(&item),
            BackendEventKind::FunctionCallArgumentsDelta { item_id, delta } => {
                self.on_arguments_delta(&item_id, &delta);
                Vec::new()
            }
            BackendEventKind::FunctionCallArgumentsDone { item_id, arguments } => {
                self.on_arguments_done(&item_id, arguments);
                Vec::new()
            }
            BackendEventKind::OutputItemDone { item } => self.on_item_done(item),
            BackendEventKind::HostedToolProgress { tool, status, .. } => {
                vec![Frame::tool_use(tool, status, None)]
            }
            BackendEventKind::ImageGenerated { payload, caption } => {
                vec![Frame::GeneratedArtifact(ArtifactFrame { payload, caption })]
            }
            BackendEventKind::SourceCited { source } => self.on_source(source),
            BackendEventKind::Finished { response } => self.on_finished(response),
            BackendEventKind::Error { code, message } => {
                self.error = Some(stream_error(code.as_deref(), message));
                Vec::new()
            }
            BackendEventKind::Unknown { event_type } => {
                tracing::trace!(event_type, "ignoring backend event");
                Vec::new()
            }
        }
    }

    fn on_text_delta(&mut self, delta: String) -> Vec<Frame> {
        if delta.is_empty() || looks_like_tool_call_json(&delta) {
            return Vec::new();
        }
        self.text.push_str(&delta);
        vec![Frame::ContentDelta(delta)]
    }

    fn on_item_added(&mut self, item: &Value) -> Vec<Frame> {
        if str_field(item, "type") != Some("function_call") {
            return Vec::new();
        }
        let call = PendingToolCall {
            id: str_field(item, "id").unwrap_or_default().to_string(),
            name: str_field(item, "name").unwrap_or_default().to_string(),
            call_id: str_field(item, "call_id").unwrap_or_default().to_string(),
            arguments: str_field(item, "arguments").unwrap_or_default().to_string(),
        };
        let frames = if call.accepts_arguments() {
            vec![Frame::tool_use(call.name.clone(), ToolUseStatus::InProgress, None)]
        } else {
            Vec::new()
        };
        self.pending.push(call);
        frames
    }

    fn on_arguments_delta(&mut self, item_id: &str, delta: &str) {
        if let Some(call) = self.pending_mut(item_id) {
            if call.accepts_arguments() {
                call.arguments.push_str(delta);
            }
        }
    }

    fn on_arguments_done(&mut self, item_id: &str, arguments: String) {
        if let Some(call) = self.pending_mut(item_id) {
            if call.accepts_arguments() {
                call.arguments = arguments;
            }
        }
    }

    /// Completed output items are authoritative and are replayed as input on
    /// the next iteration. A call first named here is announced here.
    fn on_item_done(&mut self, item: Value) -> Vec<Frame> {
        let mut frames = Vec::new();
        if str_field(&item, "type") == Some("function_call") {
            let id = str_field(&item, "id").unwrap_or_default();
            let name = str_field(&item, "name").unwrap_or_default().to_string();
            let call_id = str_field(&item, "call_id").unwrap_or_default().to_string();
            let arguments = str_field(&item, "arguments").map(str::to_string);
            match self.pending_mut(id) {
                Some(call) => {
                    if call.name.is_empty() && !name.is_empty() {
                        frames.push(Frame::tool_use(name.clone(), ToolUseStatus::InProgress, None));
                        call.name = name;
                    }
                    if call.call_id.is_empty() {
                        call.call_id = call_id;
                    }
                    if let Some(arguments) = arguments {
                        call.arguments = arguments;
                    }
                }
                None => {
                    let call = PendingToolCall {
                        id: id.to_string(),
                        name,
                        call_id,
                        arguments: arguments.unwrap_or_default(),
                    };
                    if call.accepts_arguments() {
                        frames.push(Frame::tool_use(call.name.clone(), ToolUseStatus::InProgress, None));
                    }
                    self.pending.push(call);
                }
            }
        }
        self.output_items.push(item);
        frames
    }

    fn on_source(&mut self, source: Source) -> Vec<Frame> {
        if self.seen_sources.insert(source.url.clone()) {
            vec![Frame::Sources(vec![source])]
        } else {
            Vec::new()
        }
    }

    /// Some backends only report function calls in the final snapshot.
    fn on_finished(&mut self, response: ResponseSnapshot) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.output_items.is_empty() {
            for item in response.output.clone() {
                frames.extend(self.on_item_done(item));
            }
        }
        self.finished = Some(response);
        frames
    }

    fn pending_mut(&mut self, item_id: &str) -> Option<&mut PendingToolCall> {
        self.pending.iter_mut().find(|c| c.id == item_id)
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn usage(&self) -> Usage {
        self.finished
            .as_ref()
            .and_then(|r| r.usage)
            .unwrap_or_default()
    }

    pub(crate) fn take_error(&mut self) -> Option<SidestreamError> {
        self.error.take()
    }

    /// Named tool calls ready for execution.
    pub(crate) fn take_tool_calls(&mut self) -> Vec<PendingToolCall> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter(PendingToolCall::accepts_arguments)
            .collect()
    }

    /// Output items to replay, synthesizing function-call items the stream
    /// never completed.
    pub(crate) fn replay_items(&self, calls: &[PendingToolCall]) -> Vec<Value> {
        let mut items = self.output_items.clone();
        for call in calls {
            let present = items.iter().any(|item| {
                str_field(item, "type") == Some("function_call")
                    && str_field(item, "call_id") == Some(call.call_id.as_str())
            });
            if !present {
                items.push(json!({
                    "type": "function_call",
                    "call_id": call.call_id,
                    "name": call.name,
                    "arguments": call.arguments,
                }));
            }
        }
        items
    }
}

fn on_reasoning_delta(delta: String) -> Vec<Frame> {
    if delta.is_empty() {
        Vec::new()
    } else {
        vec![Frame::ReasoningDelta(delta)]
    }
}

/// Map an in-stream `error` event to a classified error.
pub(crate) fn stream_error(code: Option<&str>, message: String) -> SidestreamError {
    match code {
        Some("rate_limit_exceeded") => SidestreamError::RateLimited { retry_after_ms: None },
        Some("insufficient_quota") => SidestreamError::Quota(message),
        Some("server_error") => SidestreamError::api(500, message),
        Some("server_is_overloaded") | Some("overloaded") => SidestreamError::Overloaded(message),
        Some("invalid_request_error") | Some("invalid_prompt") => SidestreamError::Validation(message),
        _ => SidestreamError::Stream(message),
    }
}

/// Tool-call JSON leaking into the text channel.
fn looks_like_tool_call_json(delta: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?s)^\s*(\{\s*"(name|tool|tool_call|function_call|recipient_name)"\s*:|.*"type"\s*:\s*"function_call"|.*"arguments"\s*:\s*"?\{)"#,
        )
        .ok()
    });
    pattern.as_ref().is_some_and(|re| re.is_match(delta))
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}
