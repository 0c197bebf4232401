//! Session transcript — the user-facing conversation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in the session transcript.
///
/// The transcript is presentation state: it may be edited or cleared by the
/// UI layer, so the session controller never relies on it for retry/resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    /// Player input, appended optimistically before the backend acknowledges.
    #[serde(rename = "player")]
    Player {
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// A completed narration entry. Only finalized narration lands here —
    /// an unterminated streaming buffer is discarded, never committed.
    #[serde(rename = "narration")]
    Narration {
        text: String,
        turn_number: u64,
        timestamp: DateTime<Utc>,
    },
    /// Client-side events worth showing (aborts, load notices).
    #[serde(rename = "system")]
    System {
        text: String,
        timestamp: DateTime<Utc>,
    },
}

impl TranscriptEntry {
    pub fn player(text: impl Into<String>) -> Self {
        TranscriptEntry::Player {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn narration(text: impl Into<String>, turn_number: u64) -> Self {
        TranscriptEntry::Narration {
            text: text.into(),
            turn_number,
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        TranscriptEntry::System {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}
