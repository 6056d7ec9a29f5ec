use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Maximum chat message length after trimming (characters).
pub const MAX_CHAT_LENGTH: usize = 1000;

/// Maximum nickname length (characters).
pub const MAX_NICKNAME_LENGTH: usize = 32;

/// Event delivered to clients. Immutable once constructed.
///
/// `System` and `Chat` are retained in room history and replayed to new
/// joiners; `Roster` is broadcast-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    /// Full sorted list of display names currently claimed in a room.
    Roster { members: Vec<String>, ts: i64 },

    /// Free-text notice (join/leave announcements).
    System { text: String, ts: i64 },

    /// A chat message from a named session.
    Chat { from: String, text: String, ts: i64 },
}

impl Event {
    pub fn system(text: impl Into<String>) -> Self {
        Event::System {
            text: text.into(),
            ts: epoch_ms(),
        }
    }

    pub fn chat(from: impl Into<String>, text: impl Into<String>) -> Self {
        Event::Chat {
            from: from.into(),
            text: text.into(),
            ts: epoch_ms(),
        }
    }

    /// Build a roster snapshot; members are sorted ascending.
    pub fn roster(mut members: Vec<String>) -> Self {
        members.sort();
        Event::Roster {
            members,
            ts: epoch_ms(),
        }
    }
}

/// Frame received from a client. Any other tag, or a frame that fails to
/// parse, is discarded without a response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Join/identity request. Missing nickname defaults to empty (the engine
    /// substitutes a generated placeholder).
    Hello {
        #[serde(default)]
        nickname: String,
    },

    /// Chat message request.
    Chat {
        #[serde(default)]
        text: String,
    },
}

/// Current wall-clock time as epoch milliseconds (the wire `ts` field).
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
