//! Slot resolution for incoming server messages.
//!
//! Pure functions that decide how a confirmed server message maps onto
//! the local conversation log: which optimistic entry it confirms,
//! whether it is a duplicate, or whether it is genuinely new. Keeping
//! this free of locks and channels makes the matching rules directly
//! testable.

use huddle_proto::ids::UserId;
use huddle_proto::message::ServerMessage;

use super::{ChatEntry, DeliveryState};

/// Where an incoming server message lands in the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Confirms the pending entry at this index (in place).
    Confirm(usize),
    /// The message is already present under its server id; drop it.
    Duplicate,
    /// No local counterpart; append as a new confirmed entry.
    Append,
}

/// Resolves the slot for an incoming message.
///
/// Matching precedence:
/// 1. Correlation token: an entry carrying the same `client_temp_id`
///    that is not yet confirmed. Failed entries still qualify — a late
///    echo after a pessimistic failure report means the send worked.
/// 2. Duplicate server id: already-confirmed entry with the same id.
/// 3. Content fallback, only when the echo lost its token AND the
///    message is the local user's own: the first optimistic entry from
///    the local user with identical text. Deliberately narrow so two
///    identical pending sends never collapse into one.
pub fn find_slot(entries: &[ChatEntry], incoming: &ServerMessage, local_user: &UserId) -> Slot {
    if let Some(temp_id) = incoming.client_temp_id {
        if let Some(index) = entries.iter().position(|e| {
            e.client_temp_id == Some(temp_id) && !matches!(e.state, DeliveryState::Confirmed)
        }) {
            return Slot::Confirm(index);
        }
        return duplicate_or_append(entries, incoming);
    }

    if incoming.sender == *local_user
        && let Some(index) = entries.iter().position(|e| {
            matches!(e.state, DeliveryState::Optimistic)
                && e.sender == *local_user
                && e.body.text == incoming.body.text
        })
    {
        return Slot::Confirm(index);
    }

    duplicate_or_append(entries, incoming)
}

fn duplicate_or_append(entries: &[ChatEntry], incoming: &ServerMessage) -> Slot {
    if entries.iter().any(|e| e.id == Some(incoming.id)) {
        Slot::Duplicate
    } else {
        Slot::Append
    }
}
