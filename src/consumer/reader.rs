//! Throttled consumption of a frame stream.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;

use crate::protocol::{Frame, FrameDecoder};

use super::state::{Applied, StreamState};

const DEFAULT_THROTTLE: Duration = Duration::from_millis(50);

/// Folds frames into a [`StreamState`] and reports progress through a
/// throttled callback.
///
/// Status frames (`tool_use`, `background`, `error`) are delivered
/// immediately. Everything else is coalesced into at most one callback per
/// throttle window, with a trailing callback once a burst settles.
#[derive(Debug, Clone)]
pub struct StreamConsumer {
    throttle: Duration,
}

impl Default for StreamConsumer {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE)
    }
}

impl StreamConsumer {
    pub fn new(throttle: Duration) -> Self {
        Self { throttle }
    }

    /// Decode a raw byte stream and consume it.
    ///
    /// Transport errors end consumption like a closed connection.
    pub async fn consume_bytes<S, B, E, F>(&self, bytes: S, state: StreamState, on_update: F) -> StreamState
    where
        S: Stream<Item = Result<B, E>> + Send,
        B: AsRef<[u8]> + Send,
        E: std::fmt::Display + Send,
        F: FnMut(&StreamState) + Send,
    {
        let frames = async_stream::stream! {
            let mut decoder = FrameDecoder::new();
            futures::pin_mut!(bytes);
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for frame in decoder.push(chunk.as_ref()) {
                            yield frame;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "frame stream closed by transport error");
                        break;
                    }
                }
            }
            if let Some(frame) = decoder.finish() {
                yield frame;
            }
        };
        self.consume_frames(frames, state, on_update).await
    }

    /// Consume decoded frames until the sentinel or the end of the stream,
    /// then make one final callback and return the state.
    pub async fn consume_frames<S, F>(&self, frames: S, mut state: StreamState, mut on_update: F) -> StreamState
    where
        S: Stream<Item = Frame> + Send,
        F: FnMut(&StreamState) + Send,
    {
        futures::pin_mut!(frames);
        let mut last_delivery: Option<Instant> = None;
        let mut pending = false;

        while !state.done {
            let deadline = last_delivery.map(|at| at + self.throttle);
            let next = tokio::select! {
                biased;
                next = frames.next() => next,
                _ = sleep_until(deadline), if pending => {
                    on_update(&state);
                    last_delivery = Some(Instant::now());
                    pending = false;
                    continue;
                }
            };
            let Some(frame) = next else {
                break;
            };
            if state.apply(&frame) == Applied::Ignored {
                continue;
            }
            if state.done {
                break;
            }

            let now = Instant::now();
            let window_open = last_delivery.map_or(true, |at| now.duration_since(at) >= self.throttle);
            if bypasses_throttle(&frame) || window_open {
                on_update(&state);
                last_delivery = Some(now);
                pending = false;
            } else {
                pending = true;
            }
        }

        on_update(&state);
        state
    }
}

fn bypasses_throttle(frame: &Frame) -> bool {
    matches!(
        frame,
        Frame::ToolUse(_) | Frame::BackgroundStatus(_) | Frame::Error(_)
    )
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
