//! Reattaching to a background response from a stream cursor.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::translate::EventTranslator;
use crate::protocol::{BackgroundFrame, ErrorFrame, Frame, TaskStatus};
use crate::provider::{BackendEventKind, CompletionBackend};

use super::delivery::{commit_on_delivery, SequencedFrame};
use super::manager::BackgroundTaskManager;
use super::task::StreamCursor;

/// Where to pick up a background stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub response_id: String,
    /// Last sequence number the client saw; defaults to the stored cursor.
    #[serde(default)]
    pub starting_after: Option<u64>,
}

impl ResumeRequest {
    pub fn new(response_id: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            starting_after: None,
        }
    }

    pub fn starting_after(mut self, sequence_number: u64) -> Self {
        self.starting_after = Some(sequence_number);
        self
    }
}

/// Stream the frames a client missed, ending with the sentinel.
///
/// Events at or before the cursor are dropped even if the provider replays
/// them.
pub fn resume_frames(
    backend: Arc<dyn CompletionBackend>,
    tasks: Arc<BackgroundTaskManager>,
    request: ResumeRequest,
) -> BoxStream<'static, Frame> {
    resume_sequenced(backend, tasks, request)
        .map(|f| f.frame)
        .boxed()
}

/// [`resume_frames`] with each frame's stream position attached.
///
/// The stored cursor advances as tagged frames are pulled from the stream,
/// so a client that drops it mid-way can resume again without gaps.
pub fn resume_sequenced(
    backend: Arc<dyn CompletionBackend>,
    tasks: Arc<BackgroundTaskManager>,
    request: ResumeRequest,
) -> BoxStream<'static, SequencedFrame> {
    let store = Arc::clone(&tasks);
    let stream = async_stream::stream! {
        let response_id = request.response_id;
        let starting_after = match request.starting_after {
            Some(after) => Some(after),
            None => match tasks.find(&response_id).await {
                Ok(task) => task.map(|t| t.sequence_number),
                Err(err) => {
                    warn!(response_id = %response_id, error = %err, "could not read stored cursor");
                    None
                }
            },
        };
        debug!(response_id = %response_id, starting_after, "resuming background stream");

        let mut events = match backend.resume(&response_id, starting_after).await {
            Ok(events) => events,
            Err(err) => {
                yield SequencedFrame::plain(Frame::Error(ErrorFrame::from_error(&err, None)));
                yield SequencedFrame::plain(Frame::Done);
                return;
            }
        };

        let mut translator = EventTranslator::new();
        let mut pending: Option<StreamCursor> = None;
        while let Some(next) = events.next().await {
            let event = match next {
                Ok(event) => event,
                Err(err) => {
                    yield SequencedFrame::plain(Frame::Error(ErrorFrame::from_error(&err, None)));
                    break;
                }
            };
            if let Some(seq) = event.sequence_number {
                if starting_after.is_some_and(|after| seq <= after) {
                    continue;
                }
                pending = Some(StreamCursor {
                    response_id: response_id.clone(),
                    sequence_number: seq,
                });
            }
            let finished = match &event.kind {
                BackendEventKind::Finished { response } => {
                    Some((response.status.unwrap_or(TaskStatus::Completed), response.error.clone()))
                }
                BackendEventKind::StatusChanged { status, .. } => {
                    tasks.update_status(&response_id, *status).await;
                    None
                }
                _ => None,
            };
            let mut frames = translator.handle(event);
            let failed = translator.take_error();
            if let Some((status, message)) = &finished {
                tasks.update_status(&response_id, *status).await;
                if failed.is_none() {
                    frames.push(Frame::BackgroundStatus(BackgroundFrame {
                        response_id: response_id.clone(),
                        status: *status,
                        message: message.clone(),
                    }));
                }
            }
            for frame in SequencedFrame::tag_last(frames, &mut pending) {
                yield frame;
            }
            if let Some(err) = failed {
                yield SequencedFrame::plain(Frame::Error(ErrorFrame::from_error(&err, None)));
                break;
            }
            if finished.is_some() {
                break;
            }
        }
        yield SequencedFrame {
            frame: Frame::Done,
            cursor: pending.take(),
        };
    };
    commit_on_delivery(store, stream)
}
