//! The agent loop as an explicit state machine.
//!
//! ```text
//! Requesting -> StreamingBackend -> ExecutingTools -> Requesting ...
//!                      \                  \
//!                       +------------------+--> Finalizing
//! ```
//! Every suspension point races the run's cancellation token.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::background::{SequencedFrame, StreamCursor};
use crate::error::{ErrorCode, SidestreamError};
use crate::protocol::{AgentMode, ErrorFrame, Frame};
use crate::provider::{EventStream, ProviderRequest};
use crate::types::{InputItem, PendingToolCall, Usage};

use super::mode::ModeSelection;
use super::orchestrator::{Orchestrator, RunOutcome, RunStatus};
use super::request::AgentRequest;
use super::translate::EventTranslator;

/// Text sent when the iteration budget runs out without an answer.
pub const FALLBACK_APOLOGY: &str = "I'm sorry, I couldn't finish this request within the allowed number of steps. Please try again or narrow the question.";

pub(super) enum RunState {
    Requesting,
    StreamingBackend(EventStream),
    ExecutingTools(Vec<PendingToolCall>),
    Finalizing(Finish),
}

pub(super) enum Finish {
    Answered,
    /// The forced-final iteration ended.
    Exhausted { apologize: bool },
    /// The provider cancelled the response out of band.
    Stopped,
    ToolAborted,
    Failed(SidestreamError),
    Cancelled,
    Disconnected,
}

/// Why frame delivery stopped.
pub(super) enum Halt {
    Cancelled,
    Disconnected,
}

impl From<Halt> for Finish {
    fn from(halt: Halt) -> Self {
        match halt {
            Halt::Cancelled => Finish::Cancelled,
            Halt::Disconnected => Finish::Disconnected,
        }
    }
}

pub(super) struct Run<'a> {
    pub(super) orchestrator: &'a Orchestrator,
    pub(super) request: &'a AgentRequest,
    pub(super) selection: ModeSelection,
    pub(super) model: String,
    sink: &'a mpsc::Sender<SequencedFrame>,
    pub(super) cancel: &'a CancellationToken,
    pub(super) input: Vec<InputItem>,
    pub(super) iteration: usize,
    pub(super) forced_final: bool,
    pub(super) force_final_next: bool,
    pub(super) translator: EventTranslator,
    pub(super) usage: Usage,
    pub(super) text: String,
    pub(super) response_id: Option<String>,
    /// Position of the latest background event whose frames are not yet sent.
    pub(super) pending_cursor: Option<StreamCursor>,
    started: Instant,
    pub(super) call_started: Instant,
}

impl<'a> Run<'a> {
    pub(super) fn new(
        orchestrator: &'a Orchestrator,
        request: &'a AgentRequest,
        selection: ModeSelection,
        sink: &'a mpsc::Sender<SequencedFrame>,
        cancel: &'a CancellationToken,
    ) -> Self {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| orchestrator.backend().default_model().to_string());
        let now = Instant::now();
        Self {
            orchestrator,
            request,
            selection,
            model,
            sink,
            cancel,
            input: request.history.iter().cloned().map(InputItem::from).collect(),
            iteration: 0,
            forced_final: false,
            force_final_next: false,
            translator: EventTranslator::new(),
            usage: Usage::default(),
            text: String::new(),
            response_id: None,
            pending_cursor: None,
            started: now,
            call_started: now,
        }
    }

    pub(super) async fn drive(&mut self) -> RunOutcome {
        info!(
            request_id = %self.request.request_id,
            model = %self.model,
            mode = %self.selection.mode,
            background = self.selection.background,
            "agent run started"
        );
        let mut state = match self.emit(Frame::Mode(self.selection.to_frame())).await {
            Ok(()) => RunState::Requesting,
            Err(halt) => RunState::Finalizing(halt.into()),
        };
        loop {
            state = match state {
                RunState::Requesting => self.request_phase().await,
                RunState::StreamingBackend(stream) => self.backend_phase(stream).await,
                RunState::ExecutingTools(calls) => self.tool_phase(calls).await,
                RunState::Finalizing(finish) => return self.finalize(finish).await,
            };
        }
    }

    /// Send one frame unless the run was cancelled or the client left.
    pub(super) async fn emit(&self, frame: Frame) -> Result<(), Halt> {
        self.send(SequencedFrame::plain(frame)).await
    }

    async fn send(&self, frame: SequencedFrame) -> Result<(), Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            sent = self.sink.send(frame) => sent.map_err(|_| Halt::Disconnected),
        }
    }

    pub(super) async fn emit_all(&self, frames: Vec<Frame>) -> Result<(), Halt> {
        for frame in frames {
            self.emit(frame).await?;
        }
        Ok(())
    }

    /// Send the frames of one provider event; the last carries its cursor.
    pub(super) async fn emit_event(&mut self, frames: Vec<Frame>) -> Result<(), Halt> {
        for frame in SequencedFrame::tag_last(frames, &mut self.pending_cursor) {
            self.send(frame).await?;
        }
        Ok(())
    }

    pub(super) fn is_research(&self) -> bool {
        self.selection.mode == AgentMode::Research
    }

    async fn request_phase(&mut self) -> RunState {
        self.iteration += 1;
        self.forced_final = self.force_final_next || self.iteration > self.selection.max_iterations();
        self.translator = EventTranslator::new();

        if self.forced_final && self.is_research() {
            let frame = Frame::stage("synthesizing", Some("Writing the final answer".to_string()));
            if let Err(halt) = self.emit(frame).await {
                return RunState::Finalizing(halt.into());
            }
        }

        let provider_request = self.provider_request();
        debug!(
            request_id = %self.request.request_id,
            iteration = self.iteration,
            forced_final = self.forced_final,
            input_items = provider_request.input.len(),
            "requesting backend"
        );
        self.call_started = Instant::now();
        let backend = self.orchestrator.backend();
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return RunState::Finalizing(Finish::Cancelled),
            opened = backend.stream(&provider_request) => opened,
        };
        match opened {
            Ok(stream) => RunState::StreamingBackend(stream),
            Err(err) => RunState::Finalizing(Finish::Failed(err)),
        }
    }

    /// Static instructions first, conversation and tool outputs last.
    fn provider_request(&self) -> ProviderRequest {
        let tools = if self.forced_final {
            None
        } else {
            self.request
                .tools
                .as_ref()
                .map(|tools| tools.definitions())
                .filter(|defs| !defs.is_empty())
        };
        let mut metadata = HashMap::new();
        metadata.insert("request_id".to_string(), self.request.request_id.clone());
        metadata.insert("mode".to_string(), self.selection.mode.to_string());
        ProviderRequest {
            model: self.model.clone(),
            instructions: self.request.system_prompt.clone(),
            input: self.input.clone(),
            tools,
            reasoning_effort: Some(self.selection.reasoning_effort),
            background: self.selection.background,
            metadata,
            user: Some(self.request.user_id.clone()),
        }
    }

    /// Decide what follows a fully consumed backend stream.
    pub(super) fn after_stream(&mut self) -> RunState {
        self.usage.merge(&self.translator.usage());
        let iteration_text = self.translator.text().to_string();
        self.text.push_str(&iteration_text);
        let calls = self.translator.take_tool_calls();

        if self.forced_final {
            return RunState::Finalizing(Finish::Exhausted {
                apologize: iteration_text.trim().is_empty(),
            });
        }
        if calls.is_empty() {
            if !iteration_text.is_empty() {
                return RunState::Finalizing(Finish::Answered);
            }
            // Nothing to act on; go straight to the tool-free answer pass.
            self.force_final_next = true;
            return RunState::Requesting;
        }
        RunState::ExecutingTools(calls)
    }

    async fn finalize(&mut self, finish: Finish) -> RunOutcome {
        let mut error_code = None;
        let status = match finish {
            Finish::Answered => {
                let _ = self.emit(Frame::Done).await;
                RunStatus::Completed
            }
            Finish::Exhausted { apologize } => {
                if apologize {
                    self.text.push_str(FALLBACK_APOLOGY);
                    let _ = self.emit(Frame::content(FALLBACK_APOLOGY)).await;
                }
                let _ = self.emit(Frame::Done).await;
                if apologize {
                    RunStatus::Exhausted
                } else {
                    RunStatus::Completed
                }
            }
            Finish::Stopped => {
                let _ = self.emit(Frame::Done).await;
                RunStatus::Stopped
            }
            Finish::ToolAborted => {
                let _ = self.emit(Frame::Done).await;
                RunStatus::ToolAborted
            }
            Finish::Failed(err) => {
                error!(
                    request_id = %self.request.request_id,
                    model = %self.model,
                    iteration = self.iteration,
                    latency_ms = self.call_started.elapsed().as_millis() as u64,
                    outcome = "error",
                    code = %err.code(),
                    error = %err,
                    "backend call failed"
                );
                error_code = Some(err.code());
                let frame = ErrorFrame::from_error(&err, Some(self.request.request_id.clone()));
                if self.emit(Frame::Error(frame)).await.is_ok() {
                    let _ = self.emit(Frame::Done).await;
                }
                RunStatus::Failed
            }
            Finish::Cancelled => RunStatus::Cancelled,
            Finish::Disconnected => RunStatus::Disconnected,
        };
        info!(
            request_id = %self.request.request_id,
            iterations = self.iteration,
            latency_ms = self.started.elapsed().as_millis() as u64,
            outcome = %status,
            input_tokens = self.usage.input_tokens,
            output_tokens = self.usage.output_tokens,
            "agent run finished"
        );
        self.outcome(status, error_code)
    }

    fn outcome(&self, status: RunStatus, error: Option<ErrorCode>) -> RunOutcome {
        RunOutcome {
            request_id: self.request.request_id.clone(),
            status,
            iterations: self.iteration,
            usage: self.usage,
            text: self.text.clone(),
            response_id: self.response_id.clone(),
            background: self.selection.background,
            error,
        }
    }
}
