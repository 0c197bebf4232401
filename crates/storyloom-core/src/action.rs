//! Game actions — the closed tagged union of document mutations.
//!
//! Actions are created by the protocol client from backend-declared effects,
//! applied exactly once by the engine's reducer, then discarded. A retry
//! re-issues fresh actions; actions are never reused in place.

use serde::{Deserialize, Serialize};

use crate::state::{FlagValue, LogDraft, QuestStatus};

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameAction {
    AddItem {
        item_id: String,
        /// Display name from the backend's item catalog. Absent when the
        /// catalog had no entry — the reducer then falls back to the id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default = "default_quantity")]
        quantity: u32,
    },
    RemoveItem {
        item_id: String,
        #[serde(default = "default_quantity")]
        quantity: u32,
    },
    UpdateHp {
        delta: i32,
    },
    UpdateStamina {
        delta: i32,
    },
    SetLocation {
        location_id: String,
    },
    SetFlag {
        key: String,
        value: FlagValue,
    },
    UpdateQuest {
        quest_id: String,
        updates: QuestPatch,
    },
    DiscoverLocation {
        location_id: String,
    },
    UnlockLocation {
        location_id: String,
    },
    AddTrait {
        trait_id: String,
    },
    RemoveTrait {
        trait_id: String,
    },
    AddLog {
        entry: LogDraft,
    },
    /// Forward-compatible catch-all for action kinds this client does not
    /// understand yet. Applied as a logged no-op, never an error.
    Custom {
        kind: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

/// Shallow-merge patch for a quest: fields present replace the quest's,
/// fields absent are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<QuestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<Vec<crate::state::Objective>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewards: Option<serde_json::Value>,
}

impl GameAction {
    /// Short tag for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            GameAction::AddItem { .. } => "add_item",
            GameAction::RemoveItem { .. } => "remove_item",
            GameAction::UpdateHp { .. } => "update_hp",
            GameAction::UpdateStamina { .. } => "update_stamina",
            GameAction::SetLocation { .. } => "set_location",
            GameAction::SetFlag { .. } => "set_flag",
            GameAction::UpdateQuest { .. } => "update_quest",
            GameAction::DiscoverLocation { .. } => "discover_location",
            GameAction::UnlockLocation { .. } => "unlock_location",
            GameAction::AddTrait { .. } => "add_trait",
            GameAction::RemoveTrait { .. } => "remove_trait",
            GameAction::AddLog { .. } => "add_log",
            GameAction::Custom { .. } => "custom",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_item_defaults() {
        let action: GameAction =
            serde_json::from_str(r#"{"type": "add_item", "item_id": "torch"}"#).unwrap();
        assert_eq!(
            action,
            GameAction::AddItem {
                item_id: "torch".into(),
                name: None,
                quantity: 1,
            }
        );
    }

    #[test]
    fn test_quest_patch_partial() {
        let action: GameAction = serde_json::from_str(
            r#"{"type": "update_quest", "quest_id": "q1", "updates": {"status": "active"}}"#,
        )
        .unwrap();
        let GameAction::UpdateQuest { quest_id, updates } = action else {
            panic!("wrong variant");
        };
        assert_eq!(quest_id, "q1");
        assert_eq!(updates.status, Some(QuestStatus::Active));
        assert!(updates.objectives.is_none());
    }

    #[test]
    fn test_action_tag_roundtrip() {
        let action = GameAction::SetFlag {
            key: "door_open".into(),
            value: FlagValue::Bool(true),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains(r#""type":"set_flag""#));
        let back: GameAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
