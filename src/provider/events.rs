//! Typed backend stream events.
//!
//! The backend speaks the Responses streaming dialect; each SSE payload is
//! decoded once into a closed [`BackendEventKind`] so downstream handling is a
//! single exhaustive `match`.

use serde_json::Value;

use crate::protocol::{Source, TaskStatus, ToolUseStatus};
use crate::types::Usage;

/// One event from the backend stream.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendEvent {
    /// Provider-assigned position in the response's event log.
    pub sequence_number: Option<u64>,
    pub kind: BackendEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEventKind {
    /// The response exists and has an id; first event of a stream.
    Created { response_id: String, status: TaskStatus },
    /// The response changed to `queued` or `in_progress`.
    StatusChanged { response_id: String, status: TaskStatus },
    TextDelta { item_id: Option<String>, delta: String },
    ReasoningDelta { delta: String },
    OutputItemAdded { item: Value },
    FunctionCallArgumentsDelta { item_id: String, delta: String },
    FunctionCallArgumentsDone { item_id: String, arguments: String },
    OutputItemDone { item: Value },
    /// Lifecycle of a backend-hosted tool (web search, image generation, ...).
    HostedToolProgress { item_id: String, tool: String, status: ToolUseStatus },
    ImageGenerated { payload: String, caption: Option<String> },
    SourceCited { source: Source },
    /// The response reached a terminal status.
    Finished { response: ResponseSnapshot },
    Error { code: Option<String>, message: String },
    Unknown { event_type: String },
}

impl BackendEvent {
    pub fn new(kind: BackendEventKind) -> Self {
        Self {
            sequence_number: None,
            kind,
        }
    }

    pub fn with_sequence(mut self, sequence_number: u64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    /// Decode one Responses API stream payload.
    pub fn from_json(event: &Value) -> Self {
        let sequence_number = event.get("sequence_number").and_then(Value::as_u64);
        let event_type = str_field(event, "type").unwrap_or_default();
        let kind = decode_kind(event_type, event);
        Self {
            sequence_number,
            kind,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.kind,
            BackendEventKind::Finished { .. } | BackendEventKind::Error { .. }
        )
    }
}

fn decode_kind(event_type: &str, event: &Value) -> BackendEventKind {
    match event_type {
        "response.created" | "response.queued" | "response.in_progress" => {
            let response = event.get("response");
            let response_id = response
                .and_then(|r| str_field(r, "id"))
                .unwrap_or_default()
                .to_string();
            let status = response
                .and_then(|r| str_field(r, "status"))
                .and_then(TaskStatus::from_provider)
                .unwrap_or(TaskStatus::InProgress);
            if event_type == "response.created" {
                BackendEventKind::Created {
                    response_id,
                    status,
                }
            } else {
                BackendEventKind::StatusChanged {
                    response_id,
                    status,
                }
            }
        }
        "response.output_text.delta" => BackendEventKind::TextDelta {
            item_id: str_field(event, "item_id").map(str::to_string),
            delta: str_field(event, "delta").unwrap_or_default().to_string(),
        },
        "response.reasoning_text.delta"
        | "response.reasoning_summary_text.delta"
        | "response.reasoning.delta" => BackendEventKind::ReasoningDelta {
            delta: str_field(event, "delta").unwrap_or_default().to_string(),
        },
        "response.output_item.added" => BackendEventKind::OutputItemAdded {
            item: event.get("item").cloned().unwrap_or(Value::Null),
        },
        "response.output_item.done" => {
            let item = event.get("item").cloned().unwrap_or(Value::Null);
            if str_field(&item, "type") == Some("image_generation_call") {
                if let Some(payload) = str_field(&item, "result") {
                    return BackendEventKind::ImageGenerated {
                        payload: payload.to_string(),
                        caption: str_field(&item, "revised_prompt").map(str::to_string),
                    };
                }
            }
            BackendEventKind::OutputItemDone { item }
        }
        "response.function_call_arguments.delta" => BackendEventKind::FunctionCallArgumentsDelta {
            item_id: str_field(event, "item_id").unwrap_or_default().to_string(),
            delta: str_field(event, "delta").unwrap_or_default().to_string(),
        },
        "response.function_call_arguments.done" => BackendEventKind::FunctionCallArgumentsDone {
            item_id: str_field(event, "item_id").unwrap_or_default().to_string(),
            arguments: str_field(event, "arguments").unwrap_or_default().to_string(),
        },
        "response.output_text.annotation.added" => {
            let annotation = event.get("annotation").cloned().unwrap_or(Value::Null);
            match str_field(&annotation, "url") {
                Some(url) => BackendEventKind::SourceCited {
                    source: Source {
                        url: url.to_string(),
                        title: str_field(&annotation, "title").unwrap_or_default().to_string(),
                    },
                },
                None => BackendEventKind::Unknown {
                    event_type: event_type.to_string(),
                },
            }
        }
        "response.completed" | "response.failed" | "response.incomplete" | "response.cancelled" => {
            let response = event.get("response").cloned().unwrap_or(Value::Null);
            let mut snapshot = ResponseSnapshot::from_json(&response);
            if snapshot.status.is_none() || !snapshot.status_is_terminal() {
                snapshot.status = Some(match event_type {
                    "response.completed" => TaskStatus::Completed,
                    "response.incomplete" => TaskStatus::Incomplete,
                    "response.cancelled" => TaskStatus::Cancelled,
                    _ => TaskStatus::Failed,
                });
            }
            BackendEventKind::Finished { response: snapshot }
        }
        "error" => BackendEventKind::Error {
            code: str_field(event, "code").map(str::to_string),
            message: str_field(event, "message")
                .unwrap_or("backend stream error")
                .to_string(),
        },
        other => match hosted_tool_progress(other, event) {
            Some(kind) => kind,
            None => BackendEventKind::Unknown {
                event_type: other.to_string(),
            },
        },
    }
}

/// `response.<tool>_call.<phase>` events for backend-hosted tools.
fn hosted_tool_progress(event_type: &str, event: &Value) -> Option<BackendEventKind> {
    let rest = event_type.strip_prefix("response.")?;
    let (tool, phase) = rest.split_once("_call.")?;
    if tool.is_empty() || tool.contains('.') {
        return None;
    }
    let status = match phase {
        "in_progress" => ToolUseStatus::InProgress,
        "searching" | "generating" | "interpreting" => ToolUseStatus::Executing,
        "completed" => ToolUseStatus::Completed,
        "failed" => ToolUseStatus::Error,
        _ => return None,
    };
    Some(BackendEventKind::HostedToolProgress {
        item_id: str_field(event, "item_id").unwrap_or_default().to_string(),
        tool: tool.to_string(),
        status,
    })
}

/// Point-in-time view of a backend response.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseSnapshot {
    pub id: String,
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Raw output items, replayed into the next iteration's input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<Value>,
}

impl ResponseSnapshot {
    pub fn from_json(response: &Value) -> Self {
        let output: Vec<Value> = response
            .get("output")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut text = String::new();
        for item in &output {
            if str_field(item, "type") != Some("message") {
                continue;
            }
            for part in item.get("content").and_then(Value::as_array).into_iter().flatten() {
                if str_field(part, "type") == Some("output_text") {
                    text.push_str(str_field(part, "text").unwrap_or_default());
                }
            }
        }
        let error = response.get("error").and_then(|e| {
            if e.is_null() {
                return None;
            }
            Some(
                str_field(e, "message")
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string()),
            )
        });
        let error = error.or_else(|| {
            response
                .pointer("/incomplete_details/reason")
                .and_then(Value::as_str)
                .map(|reason| format!("incomplete: {reason}"))
        });
        Self {
            id: str_field(response, "id").unwrap_or_default().to_string(),
            status: str_field(response, "status").and_then(TaskStatus::from_provider),
            output_text: (!text.is_empty()).then_some(text),
            usage: response.get("usage").and_then(Usage::from_response_json),
            error,
            output,
        }
    }

    pub fn status_is_terminal(&self) -> bool {
        self.status.is_some_and(TaskStatus::is_terminal)
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}
