//! Public entry point for agent runs.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::background::{commit_on_delivery, BackgroundTaskManager, SequencedFrame, TaskStatus};
use crate::error::{ErrorCode, SidestreamError};
use crate::protocol::{Confidence, Frame};
use crate::provider::CompletionBackend;
use crate::types::Usage;

use super::engine::Run;
use super::mode::{default_reasoning_effort, BackgroundPolicy, DefaultBackgroundPolicy, ModeSelection, PolicyInput};
use super::request::AgentRequest;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// Text answer with no outstanding tool calls.
    Completed,
    /// The iteration budget ran out and the fallback apology was sent.
    Exhausted,
    /// The provider cancelled the response.
    Stopped,
    /// The tool executor failed as a whole.
    ToolAborted,
    /// A backend error was reported to the client.
    Failed,
    /// The caller aborted the run.
    Cancelled,
    /// The frame receiver went away.
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub request_id: String,
    pub status: RunStatus,
    /// Backend calls made, including the forced-final one.
    pub iterations: usize,
    pub usage: Usage,
    /// All streamed answer text.
    pub text: String,
    /// Last provider response id, when running in background mode.
    pub response_id: Option<String>,
    pub background: bool,
    pub error: Option<ErrorCode>,
}

/// Runs agent loops against one backend and task manager.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn CompletionBackend>,
    tasks: Arc<BackgroundTaskManager>,
    policy: Arc<dyn BackgroundPolicy>,
    channel_capacity: usize,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn CompletionBackend>, tasks: Arc<BackgroundTaskManager>) -> Self {
        Self {
            backend,
            tasks,
            policy: Arc::new(DefaultBackgroundPolicy::default()),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn BackgroundPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn backend(&self) -> &dyn CompletionBackend {
        self.backend.as_ref()
    }

    pub fn tasks(&self) -> &BackgroundTaskManager {
        &self.tasks
    }

    /// Resolve mode, reasoning effort and background eligibility.
    pub fn select_mode(&self, request: &AgentRequest) -> ModeSelection {
        let background = self.policy.use_background(&PolicyInput {
            mode: request.mode,
            has_tools: request.has_tools(),
            complexity: request.complexity,
            message_count: request.history.len(),
        });
        ModeSelection {
            mode: request.mode,
            reason: request
                .mode_reason
                .clone()
                .unwrap_or_else(|| format!("{} mode requested", request.mode)),
            confidence: Confidence::High,
            reasoning_effort: request
                .reasoning_effort
                .unwrap_or_else(|| default_reasoning_effort(request.mode)),
            background,
        }
    }

    /// Drive one request to completion, sending frames to `sink`.
    ///
    /// The sink always ends with the sentinel, or with nothing more at all
    /// once `cancel` fires or the receiver is dropped. Background cursors are
    /// not committed here; pass the receiver through [`commit_on_delivery`].
    pub async fn run(
        &self,
        request: AgentRequest,
        sink: mpsc::Sender<SequencedFrame>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let selection = self.select_mode(&request);
        let outcome = {
            let mut run = Run::new(self, &request, selection, &sink, &cancel);
            run.drive().await
        };
        drop(sink);
        if outcome.status == RunStatus::Cancelled {
            self.release_background(&outcome).await;
        }
        outcome
    }

    /// Start a run on the Tokio runtime.
    pub fn spawn(&self, request: AgentRequest) -> (AgentHandle, BoxStream<'static, Frame>) {
        let (handle, frames) = self.spawn_sequenced(request);
        (handle, frames.map(|f| f.frame).boxed())
    }

    /// Like [`spawn`](Self::spawn), keeping each frame's stream position.
    ///
    /// A background task's cursor advances as frames are pulled from the
    /// returned stream.
    pub fn spawn_sequenced(&self, request: AgentRequest) -> (AgentHandle, BoxStream<'static, SequencedFrame>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        let this = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move { this.run(request, tx, token).await });
        let frames = commit_on_delivery(Arc::clone(&self.tasks), ReceiverStream::new(rx));
        (AgentHandle { cancel, join }, frames)
    }

    /// A user-initiated stop also stops the provider-side generation.
    async fn release_background(&self, outcome: &RunOutcome) {
        let Some(response_id) = outcome.response_id.as_deref() else {
            return;
        };
        match self.tasks.get_by_response(response_id).await {
            Some(task) if !task.is_terminal() => {}
            _ => return,
        }
        if let Err(err) = self.backend.cancel(response_id).await {
            warn!(response_id, error = %err, "failed to cancel background response");
        }
        self.tasks.update_status(response_id, TaskStatus::Cancelled).await;
        debug!(response_id, request_id = %outcome.request_id, "released background response");
    }
}

/// Handle to a spawned run.
#[derive(Debug)]
pub struct AgentHandle {
    cancel: CancellationToken,
    join: JoinHandle<RunOutcome>,
}

impl AgentHandle {
    /// Stop the run immediately; no further frames are sent.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> Result<RunOutcome, SidestreamError> {
        self.join
            .await
            .map_err(|e| SidestreamError::InvalidState(format!("agent run panicked: {e}")))
    }
}
