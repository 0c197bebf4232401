//! File-based save store — local persistence for game-state documents.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoryloomError};
use crate::state::GameStateDocument;

/// Index entry for one save slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMeta {
    pub slot_id: String,
    pub save_name: String,
    pub updated_at: DateTime<Utc>,
}

/// A loaded save: the document plus its slot metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRecord {
    pub meta: SaveMeta,
    pub state: GameStateDocument,
}

/// Key-value persistence keyed by save-slot identifier.
///
/// Loaded documents are treated as authoritative by the caller, the same as
/// a backend `state_update`. Failures come back as `Err`, never panics —
/// save/load is user-triggered and must degrade gracefully.
#[async_trait]
pub trait SaveStore: Send + Sync {
    async fn save(&self, slot_id: &str, save_name: &str, state: &GameStateDocument) -> Result<()>;
    async fn load(&self, slot_id: &str) -> Result<Option<SaveRecord>>;
    async fn list(&self) -> Result<Vec<SaveMeta>>;
    async fn delete(&self, slot_id: &str) -> Result<()>;
}

/// File-based save store.
///
/// Layout:
/// - `<base>/index.json` — array of `SaveMeta`
/// - `<base>/slots/<slot_id>.json` — one serialized document per slot
pub struct JsonSaveStore {
    base: PathBuf,
}

impl JsonSaveStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    /// Default store location: `~/.storyloom/saves/`
    pub fn default_path() -> PathBuf {
        crate::config::data_dir().join("saves")
    }

    fn index_path(&self) -> PathBuf {
        self.base.join("index.json")
    }

    fn slot_dir(&self) -> PathBuf {
        self.base.join("slots")
    }

    fn slot_path(&self, slot_id: &str) -> PathBuf {
        // Slot ids come from user input; keep them filesystem-safe.
        let safe: String = slot_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.slot_dir().join(format!("{safe}.json"))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        tokio::fs::create_dir_all(self.slot_dir()).await?;
        Ok(())
    }

    async fn load_index(&self) -> Result<Vec<SaveMeta>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let metas: Vec<SaveMeta> = serde_json::from_str(&data)?;
        Ok(metas)
    }

    async fn save_index(&self, metas: &[SaveMeta]) -> Result<()> {
        self.ensure_dirs().await?;
        let data = serde_json::to_string_pretty(metas)?;
        let path = self.index_path();
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl SaveStore for JsonSaveStore {
    async fn save(&self, slot_id: &str, save_name: &str, state: &GameStateDocument) -> Result<()> {
        self.ensure_dirs().await?;

        let now = Utc::now();
        let mut metas = self.load_index().await?;
        if let Some(existing) = metas.iter_mut().find(|m| m.slot_id == slot_id) {
            existing.save_name = save_name.to_string();
            existing.updated_at = now;
        } else {
            metas.push(SaveMeta {
                slot_id: slot_id.to_string(),
                save_name: save_name.to_string(),
                updated_at: now,
            });
        }
        self.save_index(&metas).await?;

        let data = serde_json::to_string_pretty(state)?;
        let path = self.slot_path(slot_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(slot = %slot_id, turn = state.turn_number, "Saved game state");
        Ok(())
    }

    async fn load(&self, slot_id: &str) -> Result<Option<SaveRecord>> {
        let metas = self.load_index().await?;
        let Some(meta) = metas.into_iter().find(|m| m.slot_id == slot_id) else {
            return Ok(None);
        };

        let path = self.slot_path(slot_id);
        if !path.exists() {
            return Err(StoryloomError::Save(format!(
                "slot '{slot_id}' is indexed but its file is missing"
            )));
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let state: GameStateDocument = serde_json::from_str(&data)
            .map_err(|e| StoryloomError::Save(format!("corrupt save in slot '{slot_id}': {e}")))?;

        debug!(slot = %slot_id, turn = state.turn_number, "Loaded game state");
        Ok(Some(SaveRecord { meta, state }))
    }

    async fn list(&self) -> Result<Vec<SaveMeta>> {
        self.load_index().await
    }

    async fn delete(&self, slot_id: &str) -> Result<()> {
        let mut metas = self.load_index().await?;
        metas.retain(|m| m.slot_id != slot_id);
        self.save_index(&metas).await?;

        let path = self.slot_path(slot_id);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }

        debug!(slot = %slot_id, "Deleted save slot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_doc() -> GameStateDocument {
        GameStateDocument::new("village", "Sleepy Village")
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSaveStore::new(dir.path().to_path_buf());

        let doc = test_doc();
        store.save("slot1", "Before the cave", &doc).await.unwrap();

        let record = store.load("slot1").await.unwrap().unwrap();
        assert_eq!(record.state, doc);
        assert_eq!(record.meta.save_name, "Before the cave");
    }

    #[tokio::test]
    async fn test_load_missing_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSaveStore::new(dir.path().to_path_buf());
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_updates_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSaveStore::new(dir.path().to_path_buf());

        let doc = test_doc();
        store.save("slot1", "First", &doc).await.unwrap();
        store.save("slot1", "Second", &doc).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].save_name, "Second");
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSaveStore::new(dir.path().to_path_buf());

        store.save("a", "A", &test_doc()).await.unwrap();
        store.save("b", "B", &test_doc()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        store.delete("a").await.unwrap();
        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].slot_id, "b");
    }

    #[tokio::test]
    async fn test_corrupt_save_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSaveStore::new(dir.path().to_path_buf());

        store.save("slot1", "ok", &test_doc()).await.unwrap();
        tokio::fs::write(dir.path().join("slots/slot1.json"), b"{not json")
            .await
            .unwrap();

        assert!(matches!(
            store.load("slot1").await,
            Err(StoryloomError::Save(_))
        ));
    }

    #[tokio::test]
    async fn test_slot_id_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSaveStore::new(dir.path().to_path_buf());

        store.save("../evil", "escape", &test_doc()).await.unwrap();
        let record = store.load("../evil").await.unwrap().unwrap();
        assert_eq!(record.meta.slot_id, "../evil");
        // The file itself must stay inside the slots dir.
        assert!(dir.path().join("slots/___evil.json").exists());
    }
}
