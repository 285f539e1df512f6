//! Typing indicators.
//!
//! Peers announce typing with repeated signals; a peer is shown as
//! typing until no signal has arrived for a quiet window (3 seconds by
//! default). Outgoing announcements are throttled to one per window so
//! a fast typist does not flood the channel. Typing state is advisory:
//! failures here are logged, never surfaced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use huddle_proto::event::{ClientEvent, ServerEvent};
use huddle_proto::ids::{ConversationId, UserId};

use crate::channel::EventSink;

/// Tracks who is typing per conversation.
pub struct TypingTracker<S: EventSink> {
    sink: Arc<S>,
    local_user: UserId,
    quiet_window: Duration,
    /// Per conversation, each peer's typing deadline.
    deadlines: parking_lot::Mutex<HashMap<ConversationId, HashMap<UserId, tokio::time::Instant>>>,
    /// Per conversation, when we last announced our own typing.
    last_announce: parking_lot::Mutex<HashMap<ConversationId, tokio::time::Instant>>,
}

impl<S: EventSink> TypingTracker<S> {
    /// Creates a tracker for the given local user.
    pub fn new(sink: Arc<S>, local_user: UserId, quiet_window: Duration) -> Self {
        Self {
            sink,
            local_user,
            quiet_window,
            deadlines: parking_lot::Mutex::new(HashMap::new()),
            last_announce: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Announces that the local user is typing in `conversation`.
    ///
    /// Call on every keystroke; actual signals go out at most once per
    /// quiet window. Fire and forget: a failed send only gets a log
    /// line.
    pub fn announce(&self, conversation: &ConversationId) {
        let now = tokio::time::Instant::now();
        {
            let mut last = self.last_announce.lock();
            if let Some(sent_at) = last.get(conversation)
                && now.duration_since(*sent_at) < self.quiet_window
            {
                return;
            }
            last.insert(conversation.clone(), now);
        }
        let event = ClientEvent::Typing {
            conversation: conversation.clone(),
        };
        if let Err(e) = self.sink.send_event(event) {
            tracing::debug!(err = %e, conversation = %conversation, "typing signal not sent");
        }
    }

    /// Applies a typing-relevant server event; everything else is
    /// ignored.
    pub fn handle_event(&self, event: &ServerEvent) {
        if let ServerEvent::UserTyping {
            conversation,
            user_id,
        } = event
        {
            // Our own signal echoed back is not "someone is typing".
            if *user_id == self.local_user {
                return;
            }
            let deadline = tokio::time::Instant::now() + self.quiet_window;
            self.deadlines
                .lock()
                .entry(conversation.clone())
                .or_default()
                .insert(user_id.clone(), deadline);
        }
    }

    /// Users currently typing in `conversation`. Expired entries are
    /// pruned as a side effect.
    #[must_use]
    pub fn typing_users(&self, conversation: &ConversationId) -> Vec<UserId> {
        let now = tokio::time::Instant::now();
        let mut deadlines = self.deadlines.lock();
        let Some(peers) = deadlines.get_mut(conversation) else {
            return Vec::new();
        };
        peers.retain(|_, deadline| *deadline > now);
        peers.keys().cloned().collect()
    }

    /// Forgets all typing state, for example on disconnect.
    pub fn clear(&self) {
        self.deadlines.lock().clear();
    }
}
