//! Tool-call correlation — matching invocations to their eventual results.
//!
//! Some backend paths omit a stable correlation id, so resolution falls
//! back from id to tool name to arrival order. The order fallback is a
//! compatibility shim and is logged whenever it fires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle: `in_progress -> {completed | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    InProgress,
    Completed,
    Error,
}

/// One tool invocation and (eventually) its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool_name: String,
    pub input: Value,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRecord {
    /// Wall-clock duration; `None` while still in progress.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|f| (f - self.started_at).num_milliseconds())
    }
}

/// Per-turn correlator. A call that never receives a result stays
/// `in_progress` here; surfacing that as a stalled turn is the session
/// controller's job, not the protocol's.
#[derive(Debug, Default)]
pub struct ToolCallCorrelator {
    records: Vec<ToolCallRecord>,
}

impl ToolCallCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a record for an announced tool call. Generates an id when the
    /// backend did not supply one.
    pub fn open(&mut self, id: Option<String>, tool_name: &str, input: Value) -> ToolCallRecord {
        let record = ToolCallRecord {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            tool_name: tool_name.to_string(),
            input,
            status: ToolCallStatus::InProgress,
            output: None,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        debug!(tool = %record.tool_name, id = %record.id, "tool call opened");
        self.records.push(record.clone());
        record
    }

    /// Close the record matching a result frame.
    ///
    /// Resolution order: backend id, then the most recent open record with
    /// the same tool name, then the oldest open record (order fallback for
    /// backends that send neither id nor name). A result that matches
    /// nothing is dropped with a diagnostic rather than attached to the
    /// wrong record.
    pub fn resolve(
        &mut self,
        id: Option<&str>,
        tool_name: Option<&str>,
        output: Value,
        is_error: bool,
    ) -> Option<ToolCallRecord> {
        let idx = self.match_index(id, tool_name)?;
        let record = &mut self.records[idx];
        record.status = if is_error {
            ToolCallStatus::Error
        } else {
            ToolCallStatus::Completed
        };
        if is_error {
            record.error = output.as_str().map(str::to_string);
        }
        record.output = Some(output);
        record.finished_at = Some(Utc::now());
        Some(record.clone())
    }

    fn match_index(&self, id: Option<&str>, tool_name: Option<&str>) -> Option<usize> {
        if let Some(id) = id {
            if let Some(idx) = self
                .records
                .iter()
                .position(|r| r.status == ToolCallStatus::InProgress && r.id == id)
            {
                return Some(idx);
            }
            warn!(%id, "tool result id matches no open call");
            // Fall through: a bad id is treated like a missing one.
        }

        if let Some(name) = tool_name {
            if let Some(idx) = self
                .records
                .iter()
                .rposition(|r| r.status == ToolCallStatus::InProgress && r.tool_name == name)
            {
                return Some(idx);
            }
            warn!(tool = %name, "tool result matches no open call of that name, dropped");
            return None;
        }

        // No id, no name: oldest open record. Compatibility shim only.
        match self
            .records
            .iter()
            .position(|r| r.status == ToolCallStatus::InProgress)
        {
            Some(idx) => {
                warn!(
                    tool = %self.records[idx].tool_name,
                    "anonymous tool result attached by arrival order"
                );
                Some(idx)
            }
            None => {
                warn!("tool result with no open call at all, dropped");
                None
            }
        }
    }

    /// Mark every open record errored (backend `error` event or abort).
    /// Returns the records that were failed.
    pub fn fail_open(&mut self, message: &str) -> Vec<ToolCallRecord> {
        let now = Utc::now();
        let mut failed = Vec::new();
        for record in &mut self.records {
            if record.status == ToolCallStatus::InProgress {
                record.status = ToolCallStatus::Error;
                record.error = Some(message.to_string());
                record.finished_at = Some(now);
                failed.push(record.clone());
            }
        }
        failed
    }

    pub fn open_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == ToolCallStatus::InProgress)
            .count()
    }

    pub fn records(&self) -> &[ToolCallRecord] {
        &self.records
    }
}
