//! SSE (Server-Sent Events) frame parser.
//!
//! The transport chunks the stream at arbitrary byte boundaries, so the
//! parser buffers partial lines across reads and only dispatches on the
//! blank-line frame delimiter. An unterminated trailing fragment is carried
//! into the next read, never dropped.

use std::pin::Pin;

use futures::Stream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::event::{ingest_frame, StreamEvent};

/// A parsed SSE frame.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse any byte stream as SSE frames.
///
/// Split-boundary invariant: the emitted frames are identical no matter how
/// the transport fragments the bytes, including mid-line and mid-UTF-8.
pub fn parse_sse_bytes<S>(bytes: S) -> impl Stream<Item = anyhow::Result<SseFrame>>
where
    S: Stream<Item = anyhow::Result<bytes::Bytes>> + Send + 'static,
{
    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(bytes),
            raw: Vec::new(),
            buffer: String::new(),
            current_event: None,
            current_data: Vec::new(),
            current_id: None,
        },
        |mut state| async move {
            loop {
                // Try to extract a line from the buffer
                if let Some(newline_pos) = state.buffer.find('\n') {
                    let line = state.buffer[..newline_pos].trim_end_matches('\r').to_string();
                    state.buffer = state.buffer[newline_pos + 1..].to_string();

                    if line.is_empty() {
                        // Empty line = dispatch frame
                        if !state.current_data.is_empty() {
                            let frame = SseFrame {
                                event: state.current_event.take(),
                                data: state.current_data.join("\n"),
                                id: state.current_id.take(),
                            };
                            state.current_data.clear();
                            return Some((Ok(frame), state));
                        }
                        continue;
                    }

                    if line.starts_with(':') {
                        // Comment, skip
                        continue;
                    }

                    if let Some(value) = line.strip_prefix("event:") {
                        state.current_event = Some(value.trim_start().to_string());
                    } else if let Some(value) = line.strip_prefix("data:") {
                        state.current_data.push(value.trim_start().to_string());
                    } else if let Some(value) = line.strip_prefix("id:") {
                        state.current_id = Some(value.trim_start().to_string());
                    }
                    // Ignore unknown fields
                    continue;
                }

                // Need more data from the stream
                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        // Chunks can split multi-byte characters; decode only
                        // the longest valid prefix and keep the rest raw.
                        state.raw.extend_from_slice(&chunk);
                        let valid_up_to = match std::str::from_utf8(&state.raw) {
                            Ok(s) => {
                                state.buffer.push_str(s);
                                state.raw.len()
                            }
                            Err(e) => {
                                let n = e.valid_up_to();
                                // Unwrap is fine: the prefix was just validated.
                                state
                                    .buffer
                                    .push_str(std::str::from_utf8(&state.raw[..n]).unwrap());
                                n
                            }
                        };
                        state.raw.drain(..valid_up_to);
                    }
                    Some(Err(e)) => {
                        return Some((Err(anyhow::anyhow!("SSE stream error: {e}")), state));
                    }
                    None => {
                        // Stream ended. Dispatch any remaining data.
                        if !state.current_data.is_empty() {
                            let frame = SseFrame {
                                event: state.current_event.take(),
                                data: state.current_data.join("\n"),
                                id: state.current_id.take(),
                            };
                            state.current_data.clear();
                            return Some((Ok(frame), state));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_response(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<SseFrame>> {
    let byte_stream = response
        .bytes_stream()
        .map(|r| r.map_err(|e| anyhow::anyhow!("SSE stream error: {e}")));
    parse_sse_bytes(byte_stream)
}

/// Decode SSE frames into typed events. Frames that fail ingest are skipped
/// (already logged); transport errors pass through.
pub fn decode_sse_events<S>(frames: S) -> impl Stream<Item = anyhow::Result<StreamEvent>>
where
    S: Stream<Item = anyhow::Result<SseFrame>>,
{
    frames.filter_map(|item| match item {
        Ok(frame) => {
            if frame.data.trim() == "[DONE]" {
                debug!("SSE terminator frame");
                return None;
            }
            ingest_frame(&frame.data).map(Ok)
        }
        Err(e) => Some(Err(e)),
    })
}

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = anyhow::Result<bytes::Bytes>> + Send>>,
    /// Undecoded bytes (a chunk boundary may split a UTF-8 sequence).
    raw: Vec<u8>,
    buffer: String,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
}
