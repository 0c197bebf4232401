//! Game-state document — the versioned root aggregate for one play session.
//!
//! The document is pure data: all mutation goes through the engine's reducer,
//! or a wholesale replacement when the backend sends an authoritative
//! snapshot. The `log` is append-only and every entry carries the turn it
//! occurred in.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema/compatibility tag for serialized documents.
pub const DOCUMENT_VERSION: &str = "1";

/// The root aggregate for one play session.
///
/// Exclusively owned by the active session controller; replaced wholesale
/// when the backend supplies a `state_update` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateDocument {
    pub version: String,
    /// Monotonically non-decreasing; incremented only when a turn settles
    /// (narration completion), never by client-only UI actions.
    pub turn_number: u64,
    pub player: PlayerState,
    pub world: WorldState,
    pub quests: Vec<Quest>,
    pub map: WorldMap,
    /// Append-only. Entries are never mutated in place.
    pub log: Vec<LogEntry>,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub hp: i32,
    pub max_hp: i32,
    pub stamina: i32,
    pub max_stamina: i32,
    /// Always equals `map.current_node_id`.
    pub location: String,
    pub money: i64,
    pub inventory: Vec<InventoryItem>,
    pub traits: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub flags: BTreeMap<String, FlagValue>,
    /// Set semantics enforced by the reducer; stored as a list for stable
    /// serialization order.
    #[serde(default)]
    pub discovered_locations: Vec<String>,
    /// Opaque world-content variables owned by the backend.
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
}

/// World flag value — the backend declares bools, strings, and numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quest {
    pub id: String,
    pub name: String,
    pub status: QuestStatus,
    #[serde(default)]
    pub objectives: Vec<Objective>,
    /// Opaque reward declaration, passed through to the UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewards: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Inactive,
    Active,
    Completed,
}

impl QuestStatus {
    fn rank(self) -> u8 {
        match self {
            QuestStatus::Inactive => 0,
            QuestStatus::Active => 1,
            QuestStatus::Completed => 2,
        }
    }

    /// Quests move inactive → active → completed, never backward, under
    /// normal action application. Snapshots may override.
    pub fn allows_transition_to(self, next: QuestStatus) -> bool {
        next.rank() >= self.rank()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldMap {
    pub nodes: Vec<MapNode>,
    #[serde(default)]
    pub edges: Vec<MapEdge>,
    /// Must reference an existing, discovered node.
    pub current_node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub discovered: bool,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEdge {
    pub from_node: String,
    pub to_node: String,
}

/// One narration/actor entry in the append-only session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub turn_number: u64,
    pub source: LogSource,
    pub text: String,
    /// Stamped at apply time so ordering reflects application order even
    /// under network jitter.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Player,
    Narrator,
    System,
}

/// A log entry as declared by the backend — turn number and timestamp are
/// stamped by the reducer when the entry is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogDraft {
    #[serde(default = "LogDraft::default_source")]
    pub source: LogSource,
    pub text: String,
}

impl LogDraft {
    fn default_source() -> LogSource {
        LogSource::Narrator
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub play_time_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Always > 0 — the reducer deletes the entry when it hits zero.
    pub quantity: u32,
    #[serde(default)]
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Weapon,
    Armor,
    Consumable,
    QuestItem,
    #[default]
    Misc,
}

impl GameStateDocument {
    /// A fresh document with a single discovered starting node.
    pub fn new(start_node_id: &str, start_node_name: &str) -> Self {
        let now = Utc::now();
        Self {
            version: DOCUMENT_VERSION.to_string(),
            turn_number: 0,
            player: PlayerState {
                hp: 100,
                max_hp: 100,
                stamina: 100,
                max_stamina: 100,
                location: start_node_id.to_string(),
                money: 0,
                inventory: Vec::new(),
                traits: BTreeSet::new(),
            },
            world: WorldState {
                discovered_locations: vec![start_node_id.to_string()],
                ..WorldState::default()
            },
            quests: Vec::new(),
            map: WorldMap {
                nodes: vec![MapNode {
                    id: start_node_id.to_string(),
                    name: start_node_name.to_string(),
                    discovered: true,
                    locked: false,
                }],
                edges: Vec::new(),
                current_node_id: start_node_id.to_string(),
            },
            log: Vec::new(),
            metadata: DocumentMetadata {
                created_at: now,
                updated_at: now,
                play_time_seconds: 0,
            },
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&MapNode> {
        self.map.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn quest(&self, quest_id: &str) -> Option<&Quest> {
        self.quests.iter().find(|q| q.id == quest_id)
    }

    pub fn inventory_item(&self, item_id: &str) -> Option<&InventoryItem> {
        self.player.inventory.iter().find(|i| i.id == item_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_document_starts_consistent() {
        let doc = GameStateDocument::new("village", "Sleepy Village");
        assert_eq!(doc.player.location, doc.map.current_node_id);
        assert!(doc.node("village").is_some_and(|n| n.discovered));
        assert_eq!(doc.turn_number, 0);
        assert!(doc.world.discovered_locations.contains(&"village".into()));
    }

    #[test]
    fn test_quest_status_forward_only() {
        assert!(QuestStatus::Inactive.allows_transition_to(QuestStatus::Active));
        assert!(QuestStatus::Active.allows_transition_to(QuestStatus::Completed));
        assert!(QuestStatus::Active.allows_transition_to(QuestStatus::Active));
        assert!(!QuestStatus::Completed.allows_transition_to(QuestStatus::Active));
        assert!(!QuestStatus::Active.allows_transition_to(QuestStatus::Inactive));
    }

    #[test]
    fn test_flag_value_untagged_roundtrip() {
        let flags: BTreeMap<String, FlagValue> = serde_json::from_str(
            r#"{"door_open": true, "threat": 0.5, "weather": "rain"}"#,
        )
        .unwrap();
        assert_eq!(flags["door_open"], FlagValue::Bool(true));
        assert_eq!(flags["threat"], FlagValue::Number(0.5));
        assert_eq!(flags["weather"], FlagValue::Text("rain".into()));
    }

    #[test]
    fn test_document_serde_roundtrip() {
        let doc = GameStateDocument::new("gate", "North Gate");
        let json = serde_json::to_string(&doc).unwrap();
        let back: GameStateDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
