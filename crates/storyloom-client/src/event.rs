//! Stream-event frames and the alias-normalizing ingest boundary.
//!
//! Backend builds drift: the same event arrives with `tool_name` or `tool`,
//! `input` or `arguments`, `delta` or `text`. [`ingest_frame`] maps every
//! accepted alias onto one canonical shape before any typed logic runs, so
//! protocol drift never leaks into the reducer or correlator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use storyloom_core::action::GameAction;
use storyloom_core::state::GameStateDocument;

/// One protocol frame, canonical shape. Transient: lives only for the
/// duration of a turn's stream, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    NarrationStart,
    NarrationChunk {
        text: String,
    },
    NarrationEnd {
        #[serde(default)]
        effects: Vec<GameAction>,
    },
    ThinkingStart,
    ThinkingStep {
        text: String,
    },
    ThinkingEnd,
    ToolCall {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        output: Value,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        effects: Vec<GameAction>,
    },
    StateUpdate {
        state: Box<GameStateDocument>,
    },
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
    Heartbeat,
}

/// Parse one raw frame payload into a canonical [`StreamEvent`].
///
/// Returns `None` for malformed JSON or an unrecognized event type — the
/// frame is logged and skipped so a single corrupt frame never aborts the
/// stream.
pub fn ingest_frame(raw: &str) -> Option<StreamEvent> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(%e, frame = raw, "malformed frame skipped");
            return None;
        }
    };
    ingest_value(value)
}

/// Normalize an already-parsed frame value.
pub fn ingest_value(mut value: Value) -> Option<StreamEvent> {
    let Some(obj) = value.as_object_mut() else {
        warn!("frame is not a JSON object, skipped");
        return None;
    };

    let kind = match obj.get("type").and_then(Value::as_str) {
        Some(t) => canonical_type(t).to_string(),
        None => {
            warn!("frame has no type field, skipped");
            return None;
        }
    };
    obj.insert("type".into(), Value::String(kind.clone()));

    match kind.as_str() {
        "narration_chunk" | "thinking_step" => {
            rename_first(obj, &["delta", "content"], "text");
        }
        "narration_end" => {
            rename_first(obj, &["actions"], "effects");
            normalize_effects(obj);
        }
        "tool_call" => {
            rename_first(obj, &["tool_name", "tool"], "name");
            rename_first(obj, &["arguments", "args", "params"], "input");
            rename_first(obj, &["call_id", "tool_call_id"], "id");
        }
        "tool_result" => {
            rename_first(obj, &["tool_name", "tool"], "name");
            rename_first(obj, &["result", "content"], "output");
            rename_first(obj, &["call_id", "tool_call_id"], "id");
            rename_first(obj, &["actions"], "effects");
            normalize_effects(obj);
        }
        "state_update" => {
            rename_first(obj, &["snapshot", "game_state", "document"], "state");
        }
        "error" => {
            rename_first(obj, &["error", "detail"], "message");
        }
        _ => {}
    }

    match serde_json::from_value::<StreamEvent>(value) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(%e, kind = %kind, "frame failed to decode, skipped");
            None
        }
    }
}

/// Map event-type aliases onto the canonical tag. Unknown types pass
/// through and fail typed decoding with a log line.
fn canonical_type(t: &str) -> &str {
    match t {
        "ping" | "keep_alive" | "keepalive" => "heartbeat",
        "snapshot" | "state" | "full_state" => "state_update",
        "narration_delta" | "text_chunk" => "narration_chunk",
        "narration_done" => "narration_end",
        "thinking" => "thinking_step",
        "tool_use" => "tool_call",
        other => other,
    }
}

fn rename_first(obj: &mut serde_json::Map<String, Value>, aliases: &[&str], canonical: &str) {
    if obj.contains_key(canonical) {
        return;
    }
    for alias in aliases {
        if let Some(v) = obj.remove(*alias) {
            obj.insert(canonical.to_string(), v);
            return;
        }
    }
}

/// Rewrite each declared effect so unknown action kinds survive as
/// `custom` instead of killing the whole frame.
fn normalize_effects(obj: &mut serde_json::Map<String, Value>) {
    let Some(effects) = obj.get_mut("effects").and_then(Value::as_array_mut) else {
        return;
    };
    for effect in effects.iter_mut() {
        *effect = normalize_effect(effect.take());
    }
}

fn normalize_effect(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        rename_first(obj, &["action", "kind"], "type");
        // Id aliases depend on the action kind — "id" alone is ambiguous.
        match obj.get("type").and_then(Value::as_str) {
            Some("add_item" | "remove_item") => {
                rename_first(obj, &["item", "id"], "item_id");
            }
            Some("set_location" | "discover_location" | "unlock_location") => {
                rename_first(obj, &["location", "node_id", "id"], "location_id");
            }
            Some("update_quest") => {
                rename_first(obj, &["quest", "id"], "quest_id");
            }
            Some("add_trait" | "remove_trait") => {
                rename_first(obj, &["trait", "id"], "trait_id");
            }
            _ => {}
        }
    }

    match serde_json::from_value::<GameAction>(value.clone()) {
        Ok(action) => {
            if let GameAction::AddItem {
                item_id,
                name: None,
                ..
            } = &action
            {
                // Reportable condition, not just cosmetic: the UI will show
                // the raw id until the catalog knows this item.
                warn!(item = %item_id, "add_item effect without catalog name");
            }
            serde_json::to_value(&action).unwrap_or(Value::Null)
        }
        Err(e) => {
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            debug!(%e, kind = %kind, "effect downgraded to custom action");
            serde_json::json!({ "type": "custom", "kind": kind, "data": value })
        }
    }
}
