//! Line framing: `data: <json>\n\n` units terminated by `data: [DONE]\n\n`.

use super::frame::Frame;

/// Literal payload of the terminal sentinel.
pub const DONE_MARKER: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// JSON text of a frame, or the sentinel marker.
pub fn frame_payload(frame: &Frame) -> String {
    match frame.to_json() {
        Some(value) => value.to_string(),
        None => DONE_MARKER.to_string(),
    }
}

/// Encode one frame as a complete wire unit.
pub fn encode_frame(frame: &Frame) -> String {
    format!("data: {}\n\n", frame_payload(frame))
}

/// Decode a single transport line.
///
/// Blank lines, comments, and non-`data` fields yield `None`, as do payloads
/// that are not a recognised frame.
pub fn decode_line(line: &str) -> Option<Frame> {
    let line = line.trim_end_matches('\r');
    let data = line.strip_prefix(DATA_PREFIX)?;
    let data = data.strip_prefix(' ').unwrap_or(data).trim_end();
    if data.is_empty() {
        return None;
    }
    if data == DONE_MARKER {
        return Some(Frame::Done);
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => Frame::from_json(&value),
        Err(err) => {
            tracing::debug!(error = %err, "skipping undecodable data line");
            None
        }
    }
}

/// Longest line the decoder buffers before giving up on it.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Incremental decoder tolerant of frames split across transport packets.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across chunks are reassembled before decoding. A line
/// longer than [`MAX_LINE_BYTES`] is dropped up to its newline.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    discarding: bool,
    last_event_id: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return all frames it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                let text = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
                if let Some(frame) = self.decode(&text) {
                    frames.push(frame);
                }
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        if self.discarding || self.buffer.len() > MAX_LINE_BYTES {
            if !self.discarding {
                tracing::debug!(buffered = self.buffer.len(), "discarding oversized line");
            }
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        frames
    }

    fn decode(&mut self, line: &str) -> Option<Frame> {
        if let Some(id) = line.trim_end_matches('\r').strip_prefix("id:") {
            self.last_event_id = Some(id.strip_prefix(' ').unwrap_or(id).to_string());
            return None;
        }
        decode_line(line)
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Option<Frame> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || self.buffer.is_empty() {
            self.buffer.clear();
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode(&String::from_utf8_lossy(&line))
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Value of the most recent `id:` field, for reconnecting with
    /// `Last-Event-ID`.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }
}
