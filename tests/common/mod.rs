//! Shared test helpers: a scripted backend and a scripted tool executor.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::time::Instant;

use sidestream::error::SidestreamError;
use sidestream::protocol::TaskStatus;
use sidestream::provider::{
    BackendEvent, BackendEventKind, CompletionBackend, EventStream, ProviderRequest, ResponseSnapshot,
    ToolDefinition,
};
use sidestream::tools::ToolExecutor;
use sidestream::types::{ToolCall, ToolOutcome, Usage};

/// What one `stream` call returns.
pub enum Script {
    Events(Vec<BackendEvent>),
    /// Yield the events, then never end.
    Hang(Vec<BackendEvent>),
    /// Yield the events, then a transport error.
    BreakWith(Vec<BackendEvent>, SidestreamError),
    /// Fail before the stream opens.
    Reject(SidestreamError),
}

/// A backend that replays scripted event lists, one per `stream` call.
#[derive(Default)]
pub struct MockBackend {
    scripts: Mutex<VecDeque<Script>>,
    resume_events: Mutex<Vec<BackendEvent>>,
    snapshots: Mutex<VecDeque<ResponseSnapshot>>,
    pub requests: Mutex<Vec<ProviderRequest>>,
    pub resumes: Mutex<Vec<(String, Option<u64>)>>,
    pub retrieved_at: Mutex<Vec<Instant>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    pub fn events(self, events: Vec<BackendEvent>) -> Self {
        self.script(Script::Events(events))
    }

    /// Events served by every `resume` call.
    pub fn resume_with(self, events: Vec<BackendEvent>) -> Self {
        *self.resume_events.lock().unwrap() = events;
        self
    }

    /// Snapshots served by `retrieve`, in order; the last one repeats.
    pub fn snapshots(self, snapshots: Vec<ResponseSnapshot>) -> Self {
        self.snapshots.lock().unwrap().extend(snapshots);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<EventStream, SidestreamError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Events(events)) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            Some(Script::Hang(events)) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Some(Script::BreakWith(events, err)) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::once(async move { Err(err) }))
                .boxed()),
            Some(Script::Reject(err)) => Err(err),
            None => Err(SidestreamError::Stream("no scripted response".into())),
        }
    }

    async fn resume(
        &self,
        response_id: &str,
        starting_after: Option<u64>,
    ) -> Result<EventStream, SidestreamError> {
        self.resumes
            .lock()
            .unwrap()
            .push((response_id.to_string(), starting_after));
        let events = self.resume_events.lock().unwrap().clone();
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn retrieve(&self, response_id: &str) -> Result<ResponseSnapshot, SidestreamError> {
        self.retrieved_at.lock().unwrap().push(Instant::now());
        let mut snapshots = self.snapshots.lock().unwrap();
        let snapshot = if snapshots.len() > 1 {
            snapshots.pop_front()
        } else {
            snapshots.front().cloned()
        };
        snapshot.ok_or_else(|| SidestreamError::NotFound(response_id.to_string()))
    }

    async fn cancel(&self, response_id: &str) -> Result<ResponseSnapshot, SidestreamError> {
        self.cancelled.lock().unwrap().push(response_id.to_string());
        Ok(snapshot(response_id, TaskStatus::Cancelled))
    }
}

pub fn snapshot(response_id: &str, status: TaskStatus) -> ResponseSnapshot {
    ResponseSnapshot {
        id: response_id.to_string(),
        status: Some(status),
        ..Default::default()
    }
}

// Event builders.

pub fn created(response_id: &str, seq: u64) -> BackendEvent {
    BackendEvent::new(BackendEventKind::Created {
        response_id: response_id.to_string(),
        status: TaskStatus::Queued,
    })
    .with_sequence(seq)
}

pub fn in_progress(response_id: &str, seq: u64) -> BackendEvent {
    BackendEvent::new(BackendEventKind::StatusChanged {
        response_id: response_id.to_string(),
        status: TaskStatus::InProgress,
    })
    .with_sequence(seq)
}

pub fn text(delta: &str) -> BackendEvent {
    BackendEvent::new(BackendEventKind::TextDelta {
        item_id: Some("msg_1".to_string()),
        delta: delta.to_string(),
    })
}

pub fn text_at(delta: &str, seq: u64) -> BackendEvent {
    text(delta).with_sequence(seq)
}

pub fn completed() -> BackendEvent {
    finished_with("", TaskStatus::Completed, Usage::default())
}

pub fn finished_with(response_id: &str, status: TaskStatus, usage: Usage) -> BackendEvent {
    BackendEvent::new(BackendEventKind::Finished {
        response: ResponseSnapshot {
            id: response_id.to_string(),
            status: Some(status),
            usage: Some(usage),
            ..Default::default()
        },
    })
}

pub fn usage(input: u32, output: u32) -> Usage {
    Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
        ..Default::default()
    }
}

/// A complete function call: added, arguments done, item done.
pub fn function_call(call_id: &str, name: &str, arguments: Value) -> Vec<BackendEvent> {
    let item_id = format!("fc_{call_id}");
    let arguments = arguments.to_string();
    vec![
        BackendEvent::new(BackendEventKind::OutputItemAdded {
            item: json!({"type": "function_call", "id": item_id, "call_id": call_id, "name": name, "arguments": ""}),
        }),
        BackendEvent::new(BackendEventKind::FunctionCallArgumentsDone {
            item_id: item_id.clone(),
            arguments: arguments.clone(),
        }),
        BackendEvent::new(BackendEventKind::OutputItemDone {
            item: json!({"type": "function_call", "id": item_id, "call_id": call_id, "name": name, "arguments": arguments}),
        }),
    ]
}

/// One iteration that only asks for a tool.
pub fn tool_turn(call_id: &str, name: &str, arguments: Value) -> Vec<BackendEvent> {
    let mut events = function_call(call_id, name, arguments);
    events.push(completed());
    events
}

/// One iteration that answers with text.
pub fn text_turn(deltas: &[&str]) -> Vec<BackendEvent> {
    let mut events: Vec<BackendEvent> = deltas.iter().map(|d| text(d)).collect();
    events.push(completed());
    events
}

/// Executor that answers every call with a fixed output and records batches.
pub struct ScriptedExecutor {
    names: Vec<String>,
    output: String,
    succeed: bool,
    fail_batch: bool,
    pub batches: Mutex<Vec<Vec<ToolCall>>>,
}

impl ScriptedExecutor {
    pub fn answering(names: &[&str], output: &str) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            output: output.to_string(),
            succeed: true,
            fail_batch: false,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_calls(names: &[&str], output: &str) -> Self {
        Self {
            succeed: false,
            ..Self::answering(names, output)
        }
    }

    pub fn failing_batch(names: &[&str]) -> Self {
        Self {
            fail_batch: true,
            ..Self::answering(names, "")
        }
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.names
            .iter()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("{name} tool"),
                parameters: json!({"type": "object", "properties": {}}),
            })
            .collect()
    }

    async fn execute(
        &self,
        calls: Vec<ToolCall>,
        _request_id: Option<&str>,
    ) -> Result<Vec<ToolOutcome>, SidestreamError> {
        self.batches.lock().unwrap().push(calls.clone());
        if self.fail_batch {
            return Err(SidestreamError::tool("batch", "executor unavailable"));
        }
        Ok(calls
            .iter()
            .map(|call| {
                if self.succeed {
                    ToolOutcome::success(call, self.output.clone())
                } else {
                    ToolOutcome::failure(call, self.output.clone())
                }
            })
            .collect())
    }
}
