//! Server-sent event assembly for backend byte streams.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::error::SidestreamError;

use super::events::BackendEvent;

/// Accumulates `data:` lines into complete SSE payloads.
#[derive(Debug, Default)]
pub struct SseAssembler {
    buffer: String,
    pending_data: Vec<String>,
}

/// Result of feeding a chunk.
#[derive(Debug, Default, PartialEq)]
pub struct SseChunk {
    pub payloads: Vec<String>,
    pub done: bool,
}

impl SseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> SseChunk {
        self.buffer.push_str(chunk);
        let mut out = SseChunk::default();
        while let Some(line_end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=line_end).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if line.is_empty() {
                if self.pending_data.is_empty() {
                    continue;
                }
                let data = self.pending_data.join("\n");
                self.pending_data.clear();
                if data == "[DONE]" {
                    out.done = true;
                    break;
                }
                out.payloads.push(data);
            } else if line.starts_with(':') {
                continue;
            } else if let Some(rest) = line.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.pending_data.push(rest.to_string());
            }
        }
        out
    }

    /// Flush a final payload that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending_data.is_empty() {
            return None;
        }
        let data = self.pending_data.join("\n");
        self.pending_data.clear();
        (data != "[DONE]").then_some(data)
    }
}

/// Turn an HTTP byte stream into typed backend events.
pub fn backend_events<S, B>(bytes: S) -> BoxStream<'static, Result<BackendEvent, SidestreamError>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut assembler = SseAssembler::new();
        let decode = |data: String| match serde_json::from_str::<serde_json::Value>(&data) {
            Ok(value) => Some(BackendEvent::from_json(&value)),
            Err(err) => {
                tracing::debug!(error = %err, data = %data, "backend SSE parse failed");
                None
            }
        };
        futures::pin_mut!(bytes);
        let mut saw_done = false;
        let mut carry: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(SidestreamError::Network(e));
                    return;
                }
            };
            carry.extend_from_slice(chunk.as_ref());
            let valid_up_to = match std::str::from_utf8(&carry) {
                Ok(_) => carry.len(),
                Err(err) if err.error_len().is_none() => err.valid_up_to(),
                Err(_) => carry.len(),
            };
            let text: Vec<u8> = carry.drain(..valid_up_to).collect();
            let parsed = assembler.push(&String::from_utf8_lossy(&text));
            for data in parsed.payloads {
                if let Some(event) = decode(data) {
                    yield Ok(event);
                }
            }
            if parsed.done {
                saw_done = true;
                break;
            }
        }
        if !saw_done {
            if let Some(data) = assembler.finish() {
                if let Some(event) = decode(data) {
                    yield Ok(event);
                }
            }
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_multiline_payloads() {
        let mut sse = SseAssembler::new();
        let out = sse.push("event: x\ndata: {\"a\":\ndata: 1}\n\n: ping\n");
        assert_eq!(out.payloads, vec!["{\"a\":\n1}".to_string()]);
        assert!(!out.done);
    }

    #[test]
    fn done_marker_stops_assembly() {
        let mut sse = SseAssembler::new();
        let out = sse.push("data: {}\n\ndata: [DONE]\n\ndata: {\"late\":1}\n\n");
        assert_eq!(out.payloads, vec!["{}".to_string()]);
        assert!(out.done);
    }

    #[tokio::test]
    async fn byte_stream_yields_events_across_chunk_boundaries() {
        let body = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hé\",\"sequence_number\":3}\n\n";
        let split = body.find('é').unwrap() + 1;
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(body.as_bytes()[..split].to_vec()),
            Ok(body.as_bytes()[split..].to_vec()),
        ];
        let events: Vec<_> = backend_events(futures::stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 1);
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.sequence_number, Some(3));
        assert_eq!(
            event.kind,
            crate::provider::BackendEventKind::TextDelta {
                item_id: None,
                delta: "hé".to_string(),
            }
        );
    }
}
