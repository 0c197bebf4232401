//! The turn loop: submit, stream, settle (or cancel, or fail).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use storyloom_client::assembler::{TurnAssembler, TurnUpdate};
use storyloom_client::transport::{TurnReply, TurnTransport};
use storyloom_core::action::GameAction;
use storyloom_core::error::{Result, StoryloomError};
use storyloom_core::state::GameStateDocument;
use storyloom_core::transcript::TranscriptEntry;
use storyloom_engine::sequencer::{GameStateHandle, StateChange};

use crate::{SessionEvent, TurnMeta, TurnOutcome};

/// Owns one session: the game-state document, the transcript, and at most
/// one in-flight turn. There is one producer (the player) and one consumer
/// (the stream loop), so a plain boolean guards the turn slot — no lock.
pub struct SessionController {
    transport: Arc<dyn TurnTransport>,
    state: GameStateHandle,
    transcript: Vec<TranscriptEntry>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    turn_timeout: Duration,
    in_flight: bool,
    /// Retained independently of the transcript — the transcript is
    /// user-facing and may be edited or cleared.
    last_input: Option<String>,
    last_error: Option<String>,
    cancel: CancellationToken,
}

/// Book-keeping for one `run_turn` invocation.
struct TurnProgress {
    started: Instant,
    narration: Option<String>,
    tool_calls: u32,
    aborted: bool,
    error: Option<String>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn TurnTransport>,
        document: GameStateDocument,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            state: GameStateHandle::new(document),
            transcript: Vec::new(),
            event_tx,
            turn_timeout,
            in_flight: false,
            last_input: None,
            last_error: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn document(&self) -> &GameStateDocument {
        self.state.document()
    }

    pub fn committed(&self) -> &GameStateDocument {
        self.state.committed()
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Subscribe to state transitions (one notification per batch).
    pub fn subscribe_state(&mut self) -> mpsc::UnboundedReceiver<StateChange> {
        self.state.subscribe()
    }

    /// Token for cancelling the in-flight turn from another task.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Install an authoritative document (remote load, local load).
    /// Equivalent to receiving a `state_update`.
    pub fn load_document(&mut self, document: GameStateDocument) {
        self.state.replace(document);
        self.transcript
            .push(TranscriptEntry::system("Game state loaded."));
    }

    /// Submit one turn. Rejects without side effects when a turn is already
    /// in flight or the input is empty.
    pub async fn submit_turn(&mut self, input: &str) -> Result<TurnOutcome> {
        if self.in_flight {
            return Err(self.reject("a turn is already in flight"));
        }
        if input.trim().is_empty() {
            return Err(self.reject("player input is empty"));
        }

        self.in_flight = true;
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.last_input = Some(input.to_string());

        // Optimistic: the player's entry lands before any acknowledgement.
        self.transcript.push(TranscriptEntry::player(input));

        let outcome = self.run_turn(input).await;
        self.in_flight = false;
        Ok(outcome)
    }

    /// Re-submit the most recent input as a fresh turn.
    pub async fn retry(&mut self) -> Result<TurnOutcome> {
        let Some(input) = self.last_input.clone() else {
            return Err(StoryloomError::Session("nothing to retry".into()));
        };
        info!("Retrying last turn");
        self.submit_turn(&input).await
    }

    fn reject(&self, reason: &str) -> StoryloomError {
        let _ = self.event_tx.send(SessionEvent::Rejected {
            reason: reason.to_string(),
        });
        StoryloomError::Session(reason.to_string())
    }

    async fn run_turn(&mut self, input: &str) -> TurnOutcome {
        let start = Instant::now();
        let mut assembler = TurnAssembler::new();
        let mut progress = TurnProgress {
            started: start,
            narration: None,
            tool_calls: 0,
            aborted: false,
            error: None,
        };

        let transport = self.transport.clone();
        let reply = transport.open_turn(input, self.state.document()).await;
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                // Transport errors surface with a retry affordance; the
                // core never retries on its own.
                let message = e.to_string();
                warn!(%message, "Turn request failed");
                self.fail(&mut progress, "transport", message);
                return self.finish(start, progress);
            }
        };

        match reply {
            TurnReply::Complete(events) => {
                for event in events {
                    for update in assembler.ingest(event) {
                        self.handle_update(&mut assembler, update, &mut progress);
                    }
                }
            }
            TurnReply::Stream(mut stream) => {
                let cancel = self.cancel.clone();
                loop {
                    tokio::select! {
                        // Checked first: an event parsed after the flag flips
                        // is discarded, not applied.
                        biased;

                        _ = cancel.cancelled() => {
                            info!("Turn cancelled");
                            assembler.abort("turn cancelled");
                            self.state.discard_provisional();
                            self.transcript.push(TranscriptEntry::system("Turn aborted."));
                            let _ = self.event_tx.send(SessionEvent::Aborted);
                            progress.aborted = true;
                            break;
                        }

                        item = tokio::time::timeout(self.turn_timeout, stream.next()) => {
                            match item {
                                Err(_) => {
                                    // Stalled: the protocol layer leaves
                                    // unresolved calls open forever; this is
                                    // where they get surfaced.
                                    let message = format!(
                                        "no stream activity for {}s",
                                        self.turn_timeout.as_secs()
                                    );
                                    warn!(%message, "Turn stalled");
                                    for record in assembler.abort("turn stalled") {
                                        let _ = self.event_tx.send(SessionEvent::ToolResult {
                                            id: record.id.clone(),
                                            tool: record.tool_name.clone(),
                                            is_error: true,
                                            duration_ms: record.duration_ms(),
                                        });
                                    }
                                    self.state.discard_provisional();
                                    self.fail(&mut progress, "stalled", message);
                                    break;
                                }
                                Ok(None) => break,
                                Ok(Some(Err(e))) => {
                                    let message = e.to_string();
                                    warn!(%message, "Stream transport error");
                                    assembler.abort(&message);
                                    self.state.discard_provisional();
                                    self.fail(&mut progress, "transport", message);
                                    break;
                                }
                                Ok(Some(Ok(event))) => {
                                    for update in assembler.ingest(event) {
                                        self.handle_update(&mut assembler, update, &mut progress);
                                    }
                                    if assembler.failed() {
                                        // Backend error event: streaming phase
                                        // over; the transport connection stays up.
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        if progress.narration.is_none() && !progress.aborted && progress.error.is_none() {
            // Stream ended mid-turn. The last settled narration stands; the
            // unterminated buffer was already discarded by the assembler.
            self.state.discard_provisional();
            self.fail(
                &mut progress,
                "protocol",
                "stream ended before narration completed".to_string(),
            );
        }

        if progress.narration.is_some() && progress.error.is_none() && !progress.aborted {
            self.last_error = None;
        }

        self.finish(start, progress)
    }

    fn finish(&self, start: Instant, progress: TurnProgress) -> TurnOutcome {
        TurnOutcome {
            narration: progress.narration,
            meta: TurnMeta {
                duration_ms: start.elapsed().as_millis() as u64,
                tool_calls: progress.tool_calls,
                aborted: progress.aborted,
                error: progress.error,
            },
        }
    }

    fn fail(&mut self, progress: &mut TurnProgress, kind: &str, message: String) {
        self.last_error = Some(message.clone());
        let _ = self.event_tx.send(SessionEvent::Error {
            kind: kind.to_string(),
            message: message.clone(),
        });
        progress.error = Some(message);
    }

    fn handle_update(
        &mut self,
        assembler: &mut TurnAssembler,
        update: TurnUpdate,
        progress: &mut TurnProgress,
    ) {
        match update {
            TurnUpdate::NarrationDelta { delta } => {
                let _ = self.event_tx.send(SessionEvent::NarrationDelta { delta });
            }

            TurnUpdate::NarrationFinal { text } => {
                let actions = assembler.take_pending_actions();
                self.settle(&text, actions, progress.started.elapsed().as_secs());
                progress.narration = Some(text);
            }

            TurnUpdate::ThinkingStep { seq, text } => {
                let _ = self.event_tx.send(SessionEvent::Thinking { seq, text });
            }

            TurnUpdate::ToolStarted(record) => {
                progress.tool_calls += 1;
                let _ = self.event_tx.send(SessionEvent::ToolCall {
                    id: record.id,
                    tool: record.tool_name,
                    input: record.input,
                });
            }

            TurnUpdate::ToolFinished(record) => {
                let _ = self.event_tx.send(SessionEvent::ToolResult {
                    id: record.id.clone(),
                    tool: record.tool_name.clone(),
                    is_error: record.error.is_some(),
                    duration_ms: record.duration_ms(),
                });
            }

            TurnUpdate::Snapshot(document) => {
                debug!(turn = document.turn_number, "Authoritative snapshot installed");
                self.state.replace(*document);
                let _ = self.event_tx.send(SessionEvent::StateChanged {
                    turn_number: self.state.document().turn_number,
                });
            }

            TurnUpdate::Failed { message } => {
                self.state.discard_provisional();
                self.fail(progress, "backend", message);
            }
        }
    }

    /// Narration completed: apply the accumulated effects as one batch via
    /// the sequencer, commit the turn, and record the transcript entry.
    /// This is the only place the turn number advances.
    fn settle(&mut self, text: &str, actions: Vec<GameAction>, turn_seconds: u64) {
        let turn_number = self.state.document().turn_number;

        if !actions.is_empty() {
            self.state.apply_batch(&actions);
        }
        self.state.commit_turn();
        self.state.record_play_time(turn_seconds);

        self.transcript
            .push(TranscriptEntry::narration(text, turn_number));
        let _ = self.event_tx.send(SessionEvent::Narration {
            text: text.to_string(),
            turn_number,
        });
        let _ = self.event_tx.send(SessionEvent::StateChanged {
            turn_number: self.state.document().turn_number,
        });
    }
}
