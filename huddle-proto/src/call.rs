//! Group call types.

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, ConversationId, Timestamp, UserId};

/// Kind of media a call was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    /// Voice only.
    Audio,
    /// Voice plus camera (camera still starts muted client-side).
    Video,
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// A user currently in a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    /// The participant's user ID.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
}

/// Metadata describing a call, as reported by the server.
///
/// The server guarantees at most one active call per conversation; this
/// is the payload surfaced when a `start` collides with an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Server-assigned call identifier.
    pub call_id: CallId,
    /// Conversation the call is scoped to.
    pub conversation: ConversationId,
    /// Who started the call.
    pub caller: UserId,
    /// Display name of the caller.
    pub caller_name: String,
    /// Audio or video.
    pub call_type: CallType,
    /// When the call was created server-side.
    pub started_at: Timestamp,
    /// Participants at the time this snapshot was taken.
    pub participants: Vec<Participant>,
}

impl CallInfo {
    /// Number of participants in this snapshot.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}
