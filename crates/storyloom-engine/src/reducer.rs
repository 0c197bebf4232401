//! The action reducer: `apply(document, action) -> document'`.
//!
//! Total over every [`GameAction`] variant — a malformed or unsatisfiable
//! action degrades to a logged no-op, never a panic. The input document is
//! never mutated.

use chrono::Utc;
use tracing::{debug, warn};

use storyloom_core::action::{GameAction, QuestPatch};
use storyloom_core::state::{GameStateDocument, InventoryItem, ItemKind, LogEntry};

/// Apply a single action, producing the successor document.
pub fn apply(doc: &GameStateDocument, action: &GameAction) -> GameStateDocument {
    let mut next = doc.clone();

    match action {
        GameAction::AddItem {
            item_id,
            name,
            quantity,
        } => {
            let quantity = (*quantity).max(1);
            if let Some(item) = next.player.inventory.iter_mut().find(|i| &i.id == item_id) {
                item.quantity = item.quantity.saturating_add(quantity);
            } else {
                next.player.inventory.push(InventoryItem {
                    id: item_id.clone(),
                    // No catalog entry: the raw id doubles as the display name.
                    name: name.clone().unwrap_or_else(|| item_id.clone()),
                    description: String::new(),
                    quantity,
                    kind: ItemKind::Misc,
                    effects: None,
                });
            }
        }

        GameAction::RemoveItem { item_id, quantity } => {
            let quantity = (*quantity).max(1);
            if let Some(pos) = next.player.inventory.iter().position(|i| &i.id == item_id) {
                let item = &mut next.player.inventory[pos];
                if item.quantity > quantity {
                    item.quantity -= quantity;
                } else {
                    next.player.inventory.remove(pos);
                }
            } else {
                // Narration may reference items already merged away.
                debug!(item = %item_id, "remove_item: not in inventory, ignoring");
            }
        }

        GameAction::UpdateHp { delta } => {
            next.player.hp = (next.player.hp.saturating_add(*delta)).clamp(0, next.player.max_hp);
        }

        GameAction::UpdateStamina { delta } => {
            next.player.stamina =
                (next.player.stamina.saturating_add(*delta)).clamp(0, next.player.max_stamina);
        }

        GameAction::SetLocation { location_id } => {
            // player.location and map.current_node_id move together or not
            // at all. The target must exist and be discovered.
            let target = next.node(location_id).map(|n| n.discovered);
            match target {
                Some(true) => {
                    next.player.location = location_id.clone();
                    next.map.current_node_id = location_id.clone();
                }
                Some(false) => {
                    warn!(node = %location_id, "set_location: node not discovered, ignoring");
                }
                None => {
                    warn!(node = %location_id, "set_location: unknown node, ignoring");
                }
            }
        }

        GameAction::SetFlag { key, value } => {
            next.world.flags.insert(key.clone(), value.clone());
        }

        GameAction::UpdateQuest { quest_id, updates } => {
            if next.quest(quest_id).is_some() {
                merge_quest(&mut next, quest_id, updates);
            } else {
                debug!(quest = %quest_id, "update_quest: unknown quest, ignoring");
            }
        }

        GameAction::DiscoverLocation { location_id } => {
            if let Some(node) = next.map.nodes.iter_mut().find(|n| &n.id == location_id) {
                node.discovered = true;
            } else {
                warn!(node = %location_id, "discover_location: unknown node, ignoring");
            }
            // Set semantics despite the list backing.
            if next.node(location_id).is_some()
                && !next.world.discovered_locations.contains(location_id)
            {
                next.world.discovered_locations.push(location_id.clone());
            }
        }

        GameAction::UnlockLocation { location_id } => {
            if let Some(node) = next.map.nodes.iter_mut().find(|n| &n.id == location_id) {
                node.locked = false;
            } else {
                warn!(node = %location_id, "unlock_location: unknown node, ignoring");
            }
        }

        GameAction::AddTrait { trait_id } => {
            next.player.traits.insert(trait_id.clone());
        }

        GameAction::RemoveTrait { trait_id } => {
            next.player.traits.remove(trait_id);
        }

        GameAction::AddLog { entry } => {
            // Stamped at apply time so log order reflects application order.
            next.log.push(LogEntry {
                turn_number: next.turn_number,
                source: entry.source,
                text: entry.text.clone(),
                timestamp: Utc::now(),
            });
        }

        GameAction::Custom { kind, data } => {
            // Forward-compatible: accepted without effect, but always traced.
            warn!(kind = %kind, %data, "custom action not understood by this client");
        }
    }

    next
}

fn merge_quest(doc: &mut GameStateDocument, quest_id: &str, patch: &QuestPatch) {
    let Some(quest) = doc.quests.iter_mut().find(|q| q.id == quest_id) else {
        return;
    };

    if let Some(name) = &patch.name {
        quest.name = name.clone();
    }
    if let Some(status) = patch.status {
        if quest.status.allows_transition_to(status) {
            quest.status = status;
        } else {
            warn!(
                quest = %quest_id,
                from = ?quest.status,
                to = ?status,
                "update_quest: backward status transition refused"
            );
        }
    }
    if let Some(objectives) = &patch.objectives {
        let mut deduped: Vec<storyloom_core::state::Objective> = Vec::new();
        for obj in objectives {
            if deduped.iter().any(|o| o.id == obj.id) {
                warn!(quest = %quest_id, objective = %obj.id, "duplicate objective id dropped");
            } else {
                deduped.push(obj.clone());
            }
        }
        quest.objectives = deduped;
    }
    if let Some(rewards) = &patch.rewards {
        quest.rewards = Some(rewards.clone());
    }
}
