//! Integration tests for the event channel's connection lifecycle:
//! authenticated handshake, supervised reconnection with bounded
//! backoff, group re-announcement, and the persistent-disconnect
//! terminal state.
//!
//! Verification command: `cargo test --test channel_reconnect`

use std::sync::Arc;
use std::time::Duration;

use huddle::channel::{Channel, ChannelError, ChannelStatus, EventSink};
use huddle::config::ChannelConfig;
use huddle::session::{Role, SessionContext};
use huddle_hub::hub::{self, HubState};
use huddle_proto::event::{ClientEvent, ServerEvent};
use huddle_proto::ids::{ConversationId, TempId, UserId};
use huddle_proto::message::MessageBody;

// =============================================================================
// Test helpers
// =============================================================================

async fn start_hub() -> (std::net::SocketAddr, Arc<HubState>, tokio::task::JoinHandle<()>) {
    hub::start_server("127.0.0.1:0")
        .await
        .expect("failed to start hub")
}

/// Channel config with reconnect delays short enough for tests.
fn fast_config(addr: std::net::SocketAddr) -> ChannelConfig {
    ChannelConfig {
        url: format!("ws://{addr}/ws"),
        reconnect_initial_delay: Duration::from_millis(50),
        reconnect_step: Duration::from_millis(50),
        reconnect_max_delay: Duration::from_millis(200),
        max_reconnect_attempts: 10,
        ..ChannelConfig::default()
    }
}

fn session(user: &str) -> SessionContext {
    SessionContext::new(UserId::new(user), user, Role::Member, user)
}

/// Waits until the status watch reports a value matching the
/// predicate.
async fn wait_for_status(
    status: &mut tokio::sync::watch::Receiver<ChannelStatus>,
    mut predicate: impl FnMut(ChannelStatus) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if predicate(*status.borrow_and_update()) {
                return;
            }
            status.changed().await.expect("status watch closed");
        }
    })
    .await
    .expect("timed out waiting for channel status");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn connects_and_authenticates() {
    let (addr, _state, _handle) = start_hub().await;
    let channel = Channel::connect(fast_config(addr), &session("alice"))
        .await
        .expect("connect failed");
    assert_eq!(channel.current_status(), ChannelStatus::Connected);
    channel.shutdown().await;
}

#[tokio::test]
async fn connect_to_dead_port_fails() {
    // Port 1 is almost certainly not listening.
    let config = ChannelConfig {
        url: "ws://127.0.0.1:1/ws".into(),
        ..ChannelConfig::default()
    };
    let result = Channel::connect(config, &session("alice")).await;
    assert!(matches!(result, Err(ChannelError::Transport(_))));
}

#[tokio::test]
async fn reconnects_after_server_closes_the_connection() {
    let (addr, state, _handle) = start_hub().await;
    let channel = Channel::connect(fast_config(addr), &session("alice"))
        .await
        .expect("connect failed");
    let mut status = channel.status();

    state.close_all_connections().await;

    // The supervisor notices the drop and recovers on its own.
    wait_for_status(&mut status, |s| {
        matches!(s, ChannelStatus::Reconnecting { .. })
    })
    .await;
    wait_for_status(&mut status, |s| s == ChannelStatus::Connected).await;
    channel.shutdown().await;
}

#[tokio::test]
async fn reannounces_group_membership_after_reconnect() {
    let (addr, state, _handle) = start_hub().await;
    let general = ConversationId::new("general");

    let alice = Channel::connect(fast_config(addr), &session("alice"))
        .await
        .expect("alice connect failed");
    let mut alice_events = alice.subscribe();
    alice.set_conversation(general.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Knock everyone off and wait for both channels to come back.
    let mut alice_status = alice.status();
    state.close_all_connections().await;
    wait_for_status(&mut alice_status, |s| {
        matches!(s, ChannelStatus::Reconnecting { .. })
    })
    .await;
    wait_for_status(&mut alice_status, |s| s == ChannelStatus::Connected).await;

    // A fresh peer posts to the group; alice only receives it if her
    // membership survived the reconnect.
    let bob = Channel::connect(fast_config(addr), &session("bob"))
        .await
        .expect("bob connect failed");
    bob.set_conversation(general.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    bob.send_event(ClientEvent::SendMessage {
        conversation: general,
        client_temp_id: TempId::new(),
        body: MessageBody::text("post-reconnect"),
    })
    .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ServerEvent::MessageReceived(message)) = alice_events.recv().await
                && message.body.text == "post-reconnect"
            {
                return message;
            }
        }
    })
    .await
    .expect("alice never received the post-reconnect message");
    assert_eq!(received.sender, UserId::new("bob"));

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn gives_up_after_bounded_attempts() {
    let (addr, state, handle) = start_hub().await;
    let config = ChannelConfig {
        max_reconnect_attempts: 2,
        ..fast_config(addr)
    };
    let channel = Channel::connect(config, &session("alice"))
        .await
        .expect("connect failed");
    let mut status = channel.status();

    // Kill the server outright so every reconnect attempt is refused.
    handle.abort();
    state.close_all_connections().await;

    wait_for_status(&mut status, |s| s == ChannelStatus::Disconnected).await;

    // Sends are rejected in the terminal state.
    let result = channel.send_event(ClientEvent::RequestOnlineUsers);
    assert!(matches!(result, Err(ChannelError::NotConnected)));
}

#[tokio::test]
async fn send_while_disconnected_is_rejected() {
    let (addr, state, handle) = start_hub().await;
    let channel = Channel::connect(fast_config(addr), &session("alice"))
        .await
        .expect("connect failed");
    let mut status = channel.status();

    handle.abort();
    state.close_all_connections().await;
    wait_for_status(&mut status, |s| {
        matches!(s, ChannelStatus::Reconnecting { .. })
    })
    .await;

    // While reconnecting, the channel refuses new events instead of
    // silently queueing into the void.
    let result = channel.send_event(ClientEvent::RequestOnlineUsers);
    assert!(matches!(result, Err(ChannelError::NotConnected)));
    channel.shutdown().await;
}
