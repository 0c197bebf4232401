//! Per-turn stream assembly.
//!
//! The assembler is the synchronous state machine between raw frames and
//! the session controller: it rebuilds narration text from chunks, numbers
//! thinking steps, runs the tool-call correlator, and accumulates the
//! backend-declared effects that settle the turn.

use tracing::{debug, warn};

use storyloom_core::action::GameAction;
use storyloom_core::state::GameStateDocument;

use crate::correlator::{ToolCallCorrelator, ToolCallRecord};
use crate::event::StreamEvent;

/// High-level output of one ingested frame.
#[derive(Debug, Clone)]
pub enum TurnUpdate {
    /// More streaming narration text. `delta` is just the new fragment.
    NarrationDelta { delta: String },
    /// Narration finalized into a permanent transcript entry.
    NarrationFinal { text: String },
    /// One reasoning step, with its per-turn sequence id.
    ThinkingStep { seq: u32, text: String },
    ToolStarted(ToolCallRecord),
    ToolFinished(ToolCallRecord),
    /// Authoritative full-document replacement.
    Snapshot(Box<GameStateDocument>),
    /// The backend ended this turn's streaming phase with an error.
    Failed { message: String },
}

/// Stream assembler for a single turn. Create one per `submit_turn`.
pub struct TurnAssembler {
    /// Ephemeral streaming buffer; `Some` only between narration_start and
    /// narration_end. Discarded, never finalized, if the stream dies first.
    buffer: Option<String>,
    thinking_open: bool,
    next_thinking_seq: u32,
    correlator: ToolCallCorrelator,
    pending_actions: Vec<GameAction>,
    failed: bool,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self {
            buffer: None,
            thinking_open: false,
            next_thinking_seq: 0,
            correlator: ToolCallCorrelator::new(),
            pending_actions: Vec::new(),
            failed: false,
        }
    }

    /// Feed one event; returns zero or more updates for the controller.
    pub fn ingest(&mut self, event: StreamEvent) -> Vec<TurnUpdate> {
        match event {
            StreamEvent::NarrationStart => {
                // Resets the buffer even if a previous start never ended.
                self.buffer = Some(String::new());
                Vec::new()
            }

            StreamEvent::NarrationChunk { text } => match &mut self.buffer {
                Some(buffer) => {
                    buffer.push_str(&text);
                    vec![TurnUpdate::NarrationDelta { delta: text }]
                }
                None => {
                    // After narration_end (or before start) no chunk is valid.
                    warn!("narration_chunk outside an open narration, skipped");
                    Vec::new()
                }
            },

            StreamEvent::NarrationEnd { effects } => match self.buffer.take() {
                Some(text) => {
                    self.pending_actions.extend(effects);
                    vec![TurnUpdate::NarrationFinal { text }]
                }
                None => {
                    warn!("narration_end without narration_start, skipped");
                    Vec::new()
                }
            },

            StreamEvent::ThinkingStart => {
                self.thinking_open = true;
                Vec::new()
            }

            StreamEvent::ThinkingStep { text } => {
                if !self.thinking_open {
                    debug!("thinking_step outside thinking brackets, accepted");
                }
                // The backend does not guarantee unique step ids; sequence
                // locally, strictly increasing within the turn.
                let seq = self.next_thinking_seq;
                self.next_thinking_seq += 1;
                vec![TurnUpdate::ThinkingStep { seq, text }]
            }

            StreamEvent::ThinkingEnd => {
                self.thinking_open = false;
                Vec::new()
            }

            StreamEvent::ToolCall { id, name, input } => {
                let record = self.correlator.open(id, &name, input);
                vec![TurnUpdate::ToolStarted(record)]
            }

            StreamEvent::ToolResult {
                id,
                name,
                output,
                is_error,
                effects,
            } => {
                match self
                    .correlator
                    .resolve(id.as_deref(), name.as_deref(), output, is_error)
                {
                    Some(record) => {
                        if !is_error {
                            self.pending_actions.extend(effects);
                        }
                        vec![TurnUpdate::ToolFinished(record)]
                    }
                    None => Vec::new(),
                }
            }

            StreamEvent::StateUpdate { state } => {
                // Authoritative: the snapshot already reflects any effects
                // we were still queueing for the superseded document.
                if !self.pending_actions.is_empty() {
                    debug!(
                        dropped = self.pending_actions.len(),
                        "state_update supersedes queued actions"
                    );
                    self.pending_actions.clear();
                }
                vec![TurnUpdate::Snapshot(state)]
            }

            StreamEvent::Error { message, code } => {
                self.failed = true;
                // Partial narration must never read as complete.
                self.buffer = None;
                let message = match code {
                    Some(code) => format!("{message} ({code})"),
                    None => message,
                };
                let mut updates: Vec<TurnUpdate> = self
                    .correlator
                    .fail_open(&message)
                    .into_iter()
                    .map(TurnUpdate::ToolFinished)
                    .collect();
                updates.push(TurnUpdate::Failed {
                    message,
                });
                updates
            }

            StreamEvent::Heartbeat => Vec::new(),
        }
    }

    /// Drain the effects accumulated since the last call. The controller
    /// applies these as one batch when the turn settles.
    pub fn take_pending_actions(&mut self) -> Vec<GameAction> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Abort path (cancel, disconnect, stall): discards any unterminated
    /// buffer and fails open tool calls. Returns the failed records.
    pub fn abort(&mut self, reason: &str) -> Vec<ToolCallRecord> {
        self.buffer = None;
        self.failed = true;
        self.correlator.fail_open(reason)
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn has_open_narration(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn open_tool_calls(&self) -> usize {
        self.correlator.open_count()
    }

    pub fn tool_records(&self) -> &[ToolCallRecord] {
        self.correlator.records()
    }
}

impl Default for TurnAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(text: &str) -> StreamEvent {
        StreamEvent::NarrationChunk { text: text.into() }
    }

    #[test]
    fn test_basic_turn_reassembly() {
        // "look around": two chunks concatenate into one transcript entry.
        let mut a = TurnAssembler::new();
        a.ingest(StreamEvent::NarrationStart);
        a.ingest(chunk("You see a door."));
        a.ingest(chunk(" It is locked."));
        let updates = a.ingest(StreamEvent::NarrationEnd { effects: vec![] });

        let [TurnUpdate::NarrationFinal { text }] = updates.as_slice() else {
            panic!("expected a single final update");
        };
        assert_eq!(text, "You see a door. It is locked.");
        assert!(!a.has_open_narration());
    }

    #[test]
    fn test_chunk_after_end_is_invalid() {
        let mut a = TurnAssembler::new();
        a.ingest(StreamEvent::NarrationStart);
        a.ingest(chunk("Done."));
        a.ingest(StreamEvent::NarrationEnd { effects: vec![] });

        assert!(a.ingest(chunk("stray")).is_empty());
    }

    #[test]
    fn test_start_resets_buffer() {
        let mut a = TurnAssembler::new();
        a.ingest(StreamEvent::NarrationStart);
        a.ingest(chunk("half-finished"));
        a.ingest(StreamEvent::NarrationStart);
        a.ingest(chunk("fresh"));
        let updates = a.ingest(StreamEvent::NarrationEnd { effects: vec![] });
        let [TurnUpdate::NarrationFinal { text }] = updates.as_slice() else {
            panic!("expected final");
        };
        assert_eq!(text, "fresh");
    }

    #[test]
    fn test_effects_accumulate_from_end_and_tool_results() {
        let mut a = TurnAssembler::new();
        a.ingest(StreamEvent::ToolCall {
            id: None,
            name: "give_item".into(),
            input: json!({}),
        });
        a.ingest(StreamEvent::ToolResult {
            id: None,
            name: Some("give_item".into()),
            output: json!("ok"),
            is_error: false,
            effects: vec![GameAction::AddItem {
                item_id: "torch".into(),
                name: None,
                quantity: 1,
            }],
        });
        a.ingest(StreamEvent::NarrationStart);
        a.ingest(StreamEvent::NarrationEnd {
            effects: vec![GameAction::UpdateHp { delta: -2 }],
        });

        let actions = a.take_pending_actions();
        assert_eq!(actions.len(), 2);
        assert!(a.take_pending_actions().is_empty());
    }

    #[test]
    fn test_thinking_seq_strictly_increases() {
        let mut a = TurnAssembler::new();
        a.ingest(StreamEvent::ThinkingStart);
        let mut seqs = Vec::new();
        for text in ["consider the door", "check inventory", "decide"] {
            for update in a.ingest(StreamEvent::ThinkingStep { text: text.into() }) {
                if let TurnUpdate::ThinkingStep { seq, .. } = update {
                    seqs.push(seq);
                }
            }
        }
        a.ingest(StreamEvent::ThinkingEnd);
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_snapshot_clears_pending_actions() {
        let mut a = TurnAssembler::new();
        a.ingest(StreamEvent::NarrationStart);
        a.ingest(StreamEvent::NarrationEnd {
            effects: vec![GameAction::UpdateHp { delta: 5 }],
        });

        let doc = GameStateDocument::new("village", "Sleepy Village");
        let updates = a.ingest(StreamEvent::StateUpdate {
            state: Box::new(doc.clone()),
        });

        assert!(matches!(&updates[..], [TurnUpdate::Snapshot(s)] if **s == doc));
        assert!(a.take_pending_actions().is_empty());
    }

    #[test]
    fn test_error_fails_open_calls_and_discards_buffer() {
        let mut a = TurnAssembler::new();
        a.ingest(StreamEvent::ToolCall {
            id: None,
            name: "roll".into(),
            input: json!({}),
        });
        a.ingest(StreamEvent::NarrationStart);
        a.ingest(chunk("The dice tumble"));

        let updates = a.ingest(StreamEvent::Error {
            message: "backend exploded".into(),
            code: Some("E_DICE".into()),
        });

        assert!(a.failed());
        assert!(!a.has_open_narration());
        assert_eq!(a.open_tool_calls(), 0);
        assert!(matches!(updates.first(), Some(TurnUpdate::ToolFinished(r))
            if r.error.as_deref() == Some("backend exploded (E_DICE)")));
        assert!(matches!(updates.last(), Some(TurnUpdate::Failed { .. })));
    }

    #[test]
    fn test_heartbeat_is_a_noop() {
        let mut a = TurnAssembler::new();
        assert!(a.ingest(StreamEvent::Heartbeat).is_empty());
    }

    #[test]
    fn test_abort_discards_unterminated_buffer() {
        let mut a = TurnAssembler::new();
        a.ingest(StreamEvent::NarrationStart);
        a.ingest(chunk("never to be seen"));
        let failed = a.abort("cancelled");
        assert!(failed.is_empty());
        assert!(!a.has_open_narration());
    }
}
