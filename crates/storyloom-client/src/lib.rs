//! Streaming protocol client.
//!
//! Turns a byte stream of framed backend events — SSE `data:` frames over
//! HTTP or JSON text messages over WebSocket — into typed [`StreamEvent`]s,
//! correlates tool calls with their results, and assembles each turn's
//! narration, thinking steps, and declared effects.

pub mod assembler;
pub mod correlator;
pub mod event;
pub mod sse;
pub mod transport;
pub mod ws;

pub use assembler::{TurnAssembler, TurnUpdate};
pub use correlator::{ToolCallCorrelator, ToolCallRecord, ToolCallStatus};
pub use event::{ingest_frame, StreamEvent};
pub use transport::{BackendClient, TurnReply, TurnTransport};
