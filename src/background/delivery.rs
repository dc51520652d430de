//! Frames tagged with the stream position they complete.
//!
//! A background stream's cursor only moves once the frame carrying it has
//! been handed to the consumer, so frames still queued in a channel when a
//! client disconnects are replayed on resume.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::protocol::Frame;

use super::manager::BackgroundTaskManager;
use super::task::StreamCursor;

#[derive(Debug, Clone, PartialEq)]
pub struct SequencedFrame {
    pub frame: Frame,
    /// Set on the last frame produced by a sequenced provider event.
    pub cursor: Option<StreamCursor>,
}

impl SequencedFrame {
    pub fn plain(frame: Frame) -> Self {
        Self { frame, cursor: None }
    }

    pub fn at(frame: Frame, cursor: StreamCursor) -> Self {
        Self {
            frame,
            cursor: Some(cursor),
        }
    }

    pub fn sequence_number(&self) -> Option<u64> {
        self.cursor.as_ref().map(|c| c.sequence_number)
    }

    /// Tag the last of one event's frames with `pending`. With no frames the
    /// cursor stays pending for the next event that produces one.
    pub(crate) fn tag_last(frames: Vec<Frame>, pending: &mut Option<StreamCursor>) -> Vec<Self> {
        let last = frames.len().checked_sub(1);
        frames
            .into_iter()
            .enumerate()
            .map(|(i, frame)| {
                let cursor = if Some(i) == last { pending.take() } else { None };
                Self { frame, cursor }
            })
            .collect()
    }
}

impl From<Frame> for SequencedFrame {
    fn from(frame: Frame) -> Self {
        Self::plain(frame)
    }
}

/// Advance each task's stored cursor as its tagged frame is yielded.
pub fn commit_on_delivery<S>(tasks: Arc<BackgroundTaskManager>, frames: S) -> BoxStream<'static, SequencedFrame>
where
    S: Stream<Item = SequencedFrame> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut frames = Box::pin(frames);
        while let Some(frame) = frames.next().await {
            if let Some(cursor) = &frame.cursor {
                tasks
                    .update_sequence(&cursor.response_id, cursor.sequence_number)
                    .await;
            }
            yield frame;
        }
    };
    stream.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_last_frame_takes_the_cursor() {
        let mut pending = Some(StreamCursor {
            response_id: "resp_1".into(),
            sequence_number: 4,
        });
        let tagged = SequencedFrame::tag_last(vec![Frame::content("a"), Frame::content("b")], &mut pending);
        assert_eq!(tagged[0].sequence_number(), None);
        assert_eq!(tagged[1].sequence_number(), Some(4));
        assert!(pending.is_none());
    }

    #[test]
    fn frameless_events_keep_the_cursor_pending() {
        let mut pending = Some(StreamCursor::new("resp_1"));
        assert!(SequencedFrame::tag_last(Vec::new(), &mut pending).is_empty());
        assert!(pending.is_some());
    }

    #[tokio::test]
    async fn cursor_moves_only_for_consumed_frames() {
        let tasks = Arc::new(BackgroundTaskManager::new());
        tasks
            .register("req_1", "user_1", &StreamCursor::new("resp_1"), None)
            .await;
        let at = |seq| StreamCursor {
            response_id: "resp_1".into(),
            sequence_number: seq,
        };
        let frames = futures::stream::iter(vec![
            SequencedFrame::at(Frame::content("a"), at(1)),
            SequencedFrame::at(Frame::content("b"), at(2)),
        ]);
        let mut delivered = commit_on_delivery(Arc::clone(&tasks), frames);
        assert_eq!(delivered.next().await.map(|f| f.frame), Some(Frame::content("a")));
        drop(delivered);
        let task = tasks.get_by_response("resp_1").await.unwrap();
        assert_eq!(task.sequence_number, 1);
    }
}
