//! Periodic autosave of the latest document snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use storyloom_core::save_store::SaveStore;
use storyloom_core::state::GameStateDocument;
use storyloom_engine::sequencer::StateChange;

pub const AUTOSAVE_SLOT: &str = "autosave";

/// Run autosave until the state channel closes (session ended).
///
/// Saves at most once per interval tick, and only when the document changed
/// since the last write. Autosave and explicit saves race last-write-wins
/// on the slot, which is fine — both serialize the in-memory document at
/// read time, so there are no torn writes. A failed write is logged and the
/// next tick tries again; autosave never takes the session down.
pub fn spawn_autosave(
    store: Arc<dyn SaveStore>,
    mut changes: mpsc::UnboundedReceiver<StateChange>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut latest: Option<GameStateDocument> = None;
        let mut dirty = false;

        loop {
            tokio::select! {
                change = changes.recv() => {
                    match change {
                        Some(change) => {
                            latest = Some(change.document);
                            dirty = true;
                        }
                        None => {
                            // Session over: one final flush.
                            if dirty {
                                if let Some(doc) = &latest {
                                    write(&*store, doc).await;
                                }
                            }
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if dirty {
                        if let Some(doc) = &latest {
                            write(&*store, doc).await;
                            dirty = false;
                        }
                    }
                }
            }
        }
    })
}

async fn write(store: &dyn SaveStore, doc: &GameStateDocument) {
    match store.save(AUTOSAVE_SLOT, "Autosave", doc).await {
        Ok(()) => debug!(turn = doc.turn_number, "Autosaved"),
        Err(e) => warn!(%e, "Autosave failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_core::save_store::JsonSaveStore;
    use storyloom_engine::sequencer::StateChangeKind;

    #[tokio::test]
    async fn test_final_flush_on_channel_close() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn SaveStore> = Arc::new(JsonSaveStore::new(dir.path().to_path_buf()));
        let (tx, rx) = mpsc::unbounded_channel();

        // Long interval: only the final flush can write.
        let handle = spawn_autosave(store.clone(), rx, Duration::from_secs(3600));

        let doc = GameStateDocument::new("village", "Sleepy Village");
        tx.send(StateChange {
            kind: StateChangeKind::TurnCommitted,
            document: doc.clone(),
        })
        .unwrap();
        drop(tx);

        handle.await.unwrap();
        let record = store.load(AUTOSAVE_SLOT).await.unwrap().unwrap();
        assert_eq!(record.state, doc);
    }

    #[tokio::test]
    async fn test_no_write_without_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn SaveStore> = Arc::new(JsonSaveStore::new(dir.path().to_path_buf()));
        let (tx, rx) = mpsc::unbounded_channel::<StateChange>();

        let handle = spawn_autosave(store.clone(), rx, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
        handle.await.unwrap();

        assert!(store.load(AUTOSAVE_SLOT).await.unwrap().is_none());
    }
}
