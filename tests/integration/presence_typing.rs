//! Integration tests for presence tracking and typing indicators
//! against a live hub: roster snapshots, connect/disconnect deltas,
//! and the typing quiet window.
//!
//! Verification command: `cargo test --test presence_typing`

use std::sync::Arc;
use std::time::Duration;

use huddle::call::api::{ApiError, CallApi};
use huddle::client::{ClientEvents, HuddleClient};
use huddle::config::{ChannelConfig, ClientConfig, TypingConfig};
use huddle::media::{MediaDevices, MediaError, MediaTrack};
use huddle::presence::PresenceView;
use huddle::session::{Role, SessionContext};
use huddle_hub::hub;
use huddle_proto::call::{CallInfo, CallType, Participant};
use huddle_proto::ids::{CallId, ConversationId, UserId};

// =============================================================================
// Test helpers
// =============================================================================

/// Call signaling stub; these tests never touch calls.
struct NoCalls;

impl CallApi for NoCalls {
    async fn create_call(
        &self,
        _conversation: &ConversationId,
        _call_type: CallType,
    ) -> Result<CallInfo, ApiError> {
        Err(ApiError::Server("unsupported".into()))
    }
    async fn join_call(&self, _call_id: &CallId) -> Result<CallInfo, ApiError> {
        Err(ApiError::Server("unsupported".into()))
    }
    async fn leave_call(&self, _call_id: &CallId) -> Result<(), ApiError> {
        Ok(())
    }
    async fn end_call(&self, _call_id: &CallId) -> Result<(), ApiError> {
        Ok(())
    }
    async fn force_cleanup(&self, _conversation: &ConversationId) -> Result<(), ApiError> {
        Ok(())
    }
    async fn participants(&self, _call_id: &CallId) -> Result<Vec<Participant>, ApiError> {
        Ok(Vec::new())
    }
}

/// Device stub; these tests never touch media.
struct NoDevices;

impl MediaDevices for NoDevices {
    async fn acquire(
        &self,
        _audio: bool,
        _video: bool,
    ) -> Result<Vec<Arc<MediaTrack>>, MediaError> {
        Err(MediaError::Unavailable)
    }
}

async fn connect(
    addr: std::net::SocketAddr,
    user: &str,
    quiet_window: Duration,
) -> (HuddleClient<NoCalls, NoDevices>, ClientEvents) {
    let config = ClientConfig {
        channel: ChannelConfig {
            url: format!("ws://{addr}/ws"),
            ..ChannelConfig::default()
        },
        typing: TypingConfig { quiet_window },
        ..ClientConfig::default()
    };
    let session = SessionContext::new(UserId::new(user), user, Role::Member, user);
    HuddleClient::connect(config, session, NoCalls, NoDevices)
        .await
        .expect("client connect failed")
}

fn general() -> ConversationId {
    ConversationId::new("general")
}

/// Polls until the predicate holds, or panics after five seconds.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("condition never became true");
}

fn is_online(view: &PresenceView, user: &str) -> bool {
    matches!(view, PresenceView::Snapshot(users) if users.contains(&UserId::new(user)))
}

// =============================================================================
// Presence
// =============================================================================

#[tokio::test]
async fn roster_snapshot_includes_connected_peers() {
    let (addr, _state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let (alice, _alice_events) = connect(addr, "alice", Duration::from_secs(3)).await;
    let (bob, _bob_events) = connect(addr, "bob", Duration::from_secs(3)).await;

    // Either the seeded snapshot or the refresh triggered by bob's
    // UserConnected gets him into alice's view.
    wait_until(|| is_online(&alice.presence(), "bob")).await;
    wait_until(|| is_online(&bob.presence(), "alice")).await;

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn peer_disconnect_removes_it_from_the_roster() {
    let (addr, _state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let (alice, _alice_events) = connect(addr, "alice", Duration::from_secs(3)).await;
    let (bob, _bob_events) = connect(addr, "bob", Duration::from_secs(3)).await;
    wait_until(|| is_online(&alice.presence(), "bob")).await;

    bob.shutdown().await;

    wait_until(|| !is_online(&alice.presence(), "bob")).await;
    // Alice herself stays online.
    assert!(is_online(&alice.presence(), "alice"));
    alice.shutdown().await;
}

// =============================================================================
// Typing
// =============================================================================

#[tokio::test]
async fn typing_announcement_reaches_group_peers() {
    let (addr, _state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let (alice, _alice_events) = connect(addr, "alice", Duration::from_secs(3)).await;
    let (bob, _bob_events) = connect(addr, "bob", Duration::from_secs(3)).await;
    alice.set_active_conversation(general()).unwrap();
    bob.set_active_conversation(general()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    bob.announce_typing(&general());

    wait_until(|| {
        alice
            .typing_users(&general())
            .contains(&UserId::new("bob"))
    })
    .await;
    // The hub does not echo typing back to its sender.
    assert!(bob.typing_users(&general()).is_empty());

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn typing_indicator_expires_after_the_quiet_window() {
    let (addr, _state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let quiet = Duration::from_millis(400);
    let (alice, _alice_events) = connect(addr, "alice", quiet).await;
    let (bob, _bob_events) = connect(addr, "bob", quiet).await;
    alice.set_active_conversation(general()).unwrap();
    bob.set_active_conversation(general()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    bob.announce_typing(&general());
    wait_until(|| {
        alice
            .typing_users(&general())
            .contains(&UserId::new("bob"))
    })
    .await;

    // No further keystrokes from bob; the indicator lapses on its own.
    tokio::time::sleep(quiet + Duration::from_millis(200)).await;
    assert!(alice.typing_users(&general()).is_empty());

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn repeated_keystrokes_keep_the_indicator_alive() {
    let (addr, _state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let quiet = Duration::from_millis(400);
    let (alice, _alice_events) = connect(addr, "alice", quiet).await;
    let (bob, _bob_events) = connect(addr, "bob", quiet).await;
    alice.set_active_conversation(general()).unwrap();
    bob.set_active_conversation(general()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Each announcement lands after the previous indicator would have
    // lapsed, so the throttle never swallows one.
    for _ in 0..3 {
        bob.announce_typing(&general());
        wait_until(|| {
            alice
                .typing_users(&general())
                .contains(&UserId::new("bob"))
        })
        .await;
        tokio::time::sleep(quiet + Duration::from_millis(50)).await;
    }

    alice.shutdown().await;
    bob.shutdown().await;
}
