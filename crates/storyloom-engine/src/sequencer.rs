//! Batch sequencing and the session-scoped state handle.
//!
//! A batch is the atomic unit of visibility: subscribers are notified once
//! per batch, never per action, so multi-step effects ("pick up sword" =
//! add_item + add_log + set_flag) cannot flicker through the UI.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use storyloom_core::action::GameAction;
use storyloom_core::state::GameStateDocument;

use crate::reducer::apply;

/// Apply actions in array order via repeated [`apply`].
pub fn apply_batch(doc: &GameStateDocument, actions: &[GameAction]) -> GameStateDocument {
    actions.iter().fold(doc.clone(), |acc, action| apply(&acc, action))
}

/// Notification delivered to subscribers, once per state transition.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub kind: StateChangeKind,
    /// Snapshot of the visible document after the transition.
    pub document: GameStateDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeKind {
    /// A batch of actions was applied to the provisional tier.
    BatchApplied,
    /// An authoritative snapshot replaced the confirmed document.
    SnapshotReplaced,
    /// A turn settled: provisional promoted, turn number bumped.
    TurnCommitted,
    /// The provisional tier was dropped (cancel/abort path).
    ProvisionalDiscarded,
}

/// Session-scoped owner of the game-state document.
///
/// Two tiers: `confirmed` is the last committed/authoritative document;
/// `provisional` carries optimistic local mutations for the turn in flight.
/// On a backend snapshot the provisional tier is discarded wholesale —
/// never diffed or merged back.
pub struct GameStateHandle {
    confirmed: GameStateDocument,
    provisional: Option<GameStateDocument>,
    subscribers: Vec<mpsc::UnboundedSender<StateChange>>,
}

impl GameStateHandle {
    pub fn new(document: GameStateDocument) -> Self {
        Self {
            confirmed: document,
            provisional: None,
            subscribers: Vec::new(),
        }
    }

    /// The document observers should render: provisional when a turn is
    /// mid-flight, confirmed otherwise.
    pub fn document(&self) -> &GameStateDocument {
        self.provisional.as_ref().unwrap_or(&self.confirmed)
    }

    /// The last committed document, untouched by in-flight mutations.
    pub fn committed(&self) -> &GameStateDocument {
        &self.confirmed
    }

    /// Subscribe to state transitions. One `StateChange` per batch/replace/
    /// commit/discard; closed receivers are pruned on the next send.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Apply a batch of actions to the provisional tier.
    pub fn apply_batch(&mut self, actions: &[GameAction]) {
        let next = apply_batch(self.document(), actions);
        self.provisional = Some(next);
        debug!(actions = actions.len(), "Applied action batch");
        self.notify(StateChangeKind::BatchApplied);
    }

    /// Install an authoritative snapshot. Idempotent: replaying the same
    /// snapshot re-overwrites with identical content.
    pub fn replace(&mut self, document: GameStateDocument) {
        self.confirmed = document;
        self.provisional = None;
        self.notify(StateChangeKind::SnapshotReplaced);
    }

    /// Settle the in-flight turn: promote the provisional tier (if any),
    /// bump the turn number, stamp `updated_at`.
    pub fn commit_turn(&mut self) {
        if let Some(provisional) = self.provisional.take() {
            self.confirmed = provisional;
        }
        self.confirmed.turn_number += 1;
        self.confirmed.metadata.updated_at = Utc::now();
        self.notify(StateChangeKind::TurnCommitted);
    }

    /// Accumulate play time into the committed document's metadata.
    /// Metadata-only, so subscribers are not notified.
    pub fn record_play_time(&mut self, seconds: u64) {
        self.confirmed.metadata.play_time_seconds += seconds;
    }

    /// Drop the provisional tier without touching committed state.
    /// No-op (and no notification) when nothing was provisional.
    pub fn discard_provisional(&mut self) {
        if self.provisional.take().is_some() {
            self.notify(StateChangeKind::ProvisionalDiscarded);
        }
    }

    fn notify(&mut self, kind: StateChangeKind) {
        let snapshot = self.document().clone();
        self.subscribers.retain(|tx| {
            tx.send(StateChange {
                kind,
                document: snapshot.clone(),
            })
            .is_ok()
        });
    }
}
