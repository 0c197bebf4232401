//! Session controller — owns one conversation and one logical turn at a time.
//!
//! The controller submits a player's turn, consumes the protocol client's
//! event stream, feeds the transcript and the game-state engine, and
//! produces a stream of [`SessionEvent`]s for whatever surface is rendering
//! the session.

use serde::{Deserialize, Serialize};

pub mod autosave;
pub mod controller;

pub use controller::SessionController;

/// Events emitted by the session controller during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Streaming narration fragment for live display.
    #[serde(rename = "narration_delta")]
    NarrationDelta { delta: String },

    /// Narration finalized into the transcript.
    #[serde(rename = "narration")]
    Narration { text: String, turn_number: u64 },

    /// One reasoning step, sequence-numbered within the turn.
    #[serde(rename = "thinking")]
    Thinking { seq: u32, text: String },

    /// A tool call is in flight.
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        tool: String,
        input: serde_json::Value,
    },

    /// A tool call finished (completed or errored).
    #[serde(rename = "tool_result")]
    ToolResult {
        id: String,
        tool: String,
        is_error: bool,
        duration_ms: Option<i64>,
    },

    /// The visible document changed (batch applied, turn settled, snapshot).
    #[serde(rename = "state_changed")]
    StateChanged { turn_number: u64 },

    /// A turn submission was refused before any I/O happened.
    #[serde(rename = "rejected")]
    Rejected { reason: String },

    /// An error occurred during the turn.
    #[serde(rename = "error")]
    Error { kind: String, message: String },

    /// The in-flight turn was cancelled.
    #[serde(rename = "aborted")]
    Aborted,
}

/// Result of a finished (settled, failed, or aborted) turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Finalized narration, when the turn settled.
    pub narration: Option<String>,
    pub meta: TurnMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMeta {
    pub duration_ms: u64,
    pub tool_calls: u32,
    pub aborted: bool,
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn settled(&self) -> bool {
        self.narration.is_some() && !self.meta.aborted && self.meta.error.is_none()
    }
}
