//! Game-state engine — the deterministic reducer and the batch sequencer.
//!
//! All document mutation funnels through [`reducer::apply`]; the UI layer
//! only ever observes whole-batch results via [`sequencer::GameStateHandle`].

pub mod reducer;
pub mod sequencer;

pub use reducer::apply;
pub use sequencer::{apply_batch, GameStateHandle, StateChange, StateChangeKind};
