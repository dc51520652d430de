use futures::StreamExt;
use tracing::debug;

use crate::background::StreamCursor;
use crate::error::SidestreamError;
use crate::protocol::{BackgroundFrame, Frame, TaskStatus};
use crate::provider::{BackendEvent, BackendEventKind, EventStream};

use super::engine::{Finish, Halt, Run, RunState};

impl Run<'_> {
    /// Consume one backend stream, forwarding translated frames.
    pub(super) async fn backend_phase(&mut self, mut stream: EventStream) -> RunState {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return RunState::Finalizing(Finish::Cancelled),
                next = stream.next() => next,
            };
            let event = match next {
                None => break,
                Some(Ok(event)) => event,
                Some(Err(err)) => return RunState::Finalizing(Finish::Failed(err)),
            };

            self.track_background(&event).await;
            let finished = match &event.kind {
                BackendEventKind::Finished { response } => {
                    Some((response.status.unwrap_or(TaskStatus::Completed), response.error.clone()))
                }
                _ => None,
            };

            let frames = self.translator.handle(event);
            if let Err(halt) = self.emit_event(frames).await {
                return RunState::Finalizing(halt.into());
            }
            if let Some(err) = self.translator.take_error() {
                return RunState::Finalizing(Finish::Failed(err));
            }

            if let Some((status, message)) = finished {
                if let Err(halt) = self.finish_background(status, message.clone()).await {
                    return RunState::Finalizing(halt.into());
                }
                match status {
                    TaskStatus::Failed => {
                        let message = message.unwrap_or_else(|| "response failed".to_string());
                        return RunState::Finalizing(Finish::Failed(SidestreamError::Stream(message)));
                    }
                    TaskStatus::Cancelled => return RunState::Finalizing(Finish::Stopped),
                    _ => break,
                }
            }
        }
        debug!(
            request_id = %self.request.request_id,
            iteration = self.iteration,
            latency_ms = self.call_started.elapsed().as_millis() as u64,
            text_len = self.translator.text().len(),
            "backend stream ended"
        );
        self.after_stream()
    }

    /// Register the response and stage its cursor while in background mode.
    ///
    /// The cursor is committed by the receiving side once the frame carrying
    /// it has been delivered.
    async fn track_background(&mut self, event: &BackendEvent) {
        if !self.selection.background {
            return;
        }
        let orchestrator = self.orchestrator;
        let tasks = orchestrator.tasks();
        match &event.kind {
            BackendEventKind::Created {
                response_id,
                status,
            } if !response_id.is_empty() => {
                let mut cursor = StreamCursor::new(response_id.clone());
                if let Some(seq) = event.sequence_number {
                    cursor.advance(seq);
                }
                tasks
                    .register(
                        &self.request.request_id,
                        &self.request.user_id,
                        &cursor,
                        self.request.chat_id.clone(),
                    )
                    .await;
                tasks.update_status(response_id, *status).await;
                self.response_id = Some(response_id.clone());
            }
            BackendEventKind::StatusChanged {
                response_id,
                status,
            } if !response_id.is_empty() => {
                tasks.update_status(response_id, *status).await;
            }
            _ => {}
        }
        if let (Some(response_id), Some(seq)) = (self.response_id.as_deref(), event.sequence_number) {
            self.pending_cursor = Some(StreamCursor {
                response_id: response_id.to_string(),
                sequence_number: seq,
            });
        }
    }

    /// Mark the iteration's terminal status and report it once.
    async fn finish_background(
        &mut self,
        status: TaskStatus,
        message: Option<String>,
    ) -> Result<(), Halt> {
        if !self.selection.background {
            return Ok(());
        }
        let Some(response_id) = self.response_id.clone() else {
            return Ok(());
        };
        self.orchestrator
            .tasks()
            .update_status(&response_id, status)
            .await;
        self.emit_event(vec![Frame::BackgroundStatus(BackgroundFrame {
            response_id,
            status,
            message,
        })])
        .await
    }
}
