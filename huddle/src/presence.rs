//! Online presence tracking.
//!
//! The hub is the authority: every full-list update replaces the local
//! snapshot wholesale, so missed incremental events can never leave a
//! user stuck appearing online. Connect and disconnect events are never
//! applied locally; they only prompt a fresh full-list request.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use huddle_proto::event::{ClientEvent, ServerEvent};
use huddle_proto::ids::UserId;

use crate::channel::EventSink;

/// Presence of a single user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The user is connected.
    Online,
    /// The user is not in the online set.
    Offline,
    /// No authoritative data is available.
    Unknown,
}

/// The tracker's view of who is online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceView {
    /// No snapshot yet, or the last refresh went unanswered too long.
    Unknown,
    /// Authoritative set of online users.
    Snapshot(HashSet<UserId>),
}

struct PresenceState {
    online: Option<HashSet<UserId>>,
    refresh_requested_at: Option<tokio::time::Instant>,
}

/// Tracks the online set from channel events.
pub struct PresenceTracker<S: EventSink> {
    sink: Arc<S>,
    state: parking_lot::Mutex<PresenceState>,
    refresh_timeout: Duration,
}

impl<S: EventSink> PresenceTracker<S> {
    /// Creates a tracker. Presence starts out unknown.
    pub fn new(sink: Arc<S>, refresh_timeout: Duration) -> Self {
        Self {
            sink,
            state: parking_lot::Mutex::new(PresenceState {
                online: None,
                refresh_requested_at: None,
            }),
            refresh_timeout,
        }
    }

    /// Applies a presence-relevant server event. Other events are
    /// ignored, so the whole stream can be fed through unfiltered.
    pub fn handle_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::OnlineUsersUpdated { users } => {
                let mut state = self.state.lock();
                state.online = Some(users.iter().cloned().collect());
                state.refresh_requested_at = None;
            }
            // Peer churn is a hint, not data. The set is never edited
            // locally; the hub is asked for a fresh full list instead.
            ServerEvent::UserConnected { .. } | ServerEvent::UserDisconnected { .. } => {
                self.request_refresh();
            }
            _ => {}
        }
    }

    /// Requests a fresh full list from the hub.
    ///
    /// The request time is recorded so [`view`](Self::view) can report
    /// unknown instead of serving arbitrarily stale data when the hub
    /// never answers. Only the oldest outstanding request is kept.
    pub fn request_refresh(&self) {
        {
            let mut state = self.state.lock();
            if state.refresh_requested_at.is_none() {
                state.refresh_requested_at = Some(tokio::time::Instant::now());
            }
        }
        if let Err(e) = self.sink.send_event(ClientEvent::RequestOnlineUsers) {
            tracing::debug!(err = %e, "presence refresh request not sent");
        }
    }

    /// Current view of the online set.
    #[must_use]
    pub fn view(&self) -> PresenceView {
        let state = self.state.lock();
        if let Some(requested_at) = state.refresh_requested_at
            && requested_at.elapsed() > self.refresh_timeout
        {
            return PresenceView::Unknown;
        }
        match &state.online {
            Some(online) => PresenceView::Snapshot(online.clone()),
            None => PresenceView::Unknown,
        }
    }

    /// Presence of a single user under the current view.
    #[must_use]
    pub fn presence_of(&self, user: &UserId) -> Presence {
        match self.view() {
            PresenceView::Unknown => Presence::Unknown,
            PresenceView::Snapshot(online) => {
                if online.contains(user) {
                    Presence::Online
                } else {
                    Presence::Offline
                }
            }
        }
    }

    /// Drops the snapshot. Called when the channel disconnects, since
    /// the data can no longer be trusted.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.online = None;
        state.refresh_requested_at = None;
    }
}
