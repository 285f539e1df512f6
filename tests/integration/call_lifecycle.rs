//! Integration tests for call coordination through the assembled
//! client: start/leave lifecycle, conflict resolution, incoming offers
//! delivered over the wire, and remote teardown detection.
//!
//! Verification command: `cargo test --test call_lifecycle`

use std::sync::Arc;
use std::time::Duration;

use huddle::call::api::{ApiError, CallApi};
use huddle::call::{CallEvent, CallPhase, ConflictAction};
use huddle::client::{ClientEvents, HuddleClient};
use huddle::config::{CallConfig, ChannelConfig, ClientConfig};
use huddle::media::{MediaDevices, MediaError, MediaTrack, TrackKind};
use huddle::session::{Role, SessionContext};
use huddle_hub::hub;
use huddle_proto::call::{CallInfo, CallType, Participant};
use huddle_proto::ids::{CallId, ConversationId, Timestamp, UserId};

// =============================================================================
// Test fakes
// =============================================================================

/// In-memory call signaling fake: one call per workspace, conflicts on
/// create, gone after end. Clones share state so tests can mutate the
/// server side mid-flight.
#[derive(Clone)]
struct FakeCallApi {
    active: Arc<parking_lot::Mutex<Option<CallInfo>>>,
    end_calls: Arc<parking_lot::Mutex<u32>>,
}

impl FakeCallApi {
    fn new() -> Self {
        Self {
            active: Arc::new(parking_lot::Mutex::new(None)),
            end_calls: Arc::new(parking_lot::Mutex::new(0)),
        }
    }

    fn seed_call(&self, caller: &str, conversation: &str) -> CallInfo {
        let info = CallInfo {
            call_id: CallId::new("seeded"),
            conversation: ConversationId::new(conversation),
            caller: UserId::new(caller),
            caller_name: caller.to_string(),
            call_type: CallType::Audio,
            started_at: Timestamp::from_millis(1_000),
            participants: vec![Participant {
                user_id: UserId::new(caller),
                name: caller.to_string(),
            }],
        };
        *self.active.lock() = Some(info.clone());
        info
    }
}

impl CallApi for FakeCallApi {
    async fn create_call(
        &self,
        conversation: &ConversationId,
        call_type: CallType,
    ) -> Result<CallInfo, ApiError> {
        let mut active = self.active.lock();
        if let Some(existing) = &*active {
            return Err(ApiError::Conflict(existing.clone()));
        }
        let caller = UserId::new("alice");
        let info = CallInfo {
            call_id: CallId::new("c-1"),
            conversation: conversation.clone(),
            caller: caller.clone(),
            caller_name: "Alice".into(),
            call_type,
            started_at: Timestamp::from_millis(2_000),
            participants: vec![Participant {
                user_id: caller,
                name: "Alice".into(),
            }],
        };
        *active = Some(info.clone());
        Ok(info)
    }

    async fn join_call(&self, call_id: &CallId) -> Result<CallInfo, ApiError> {
        let active = self.active.lock();
        match &*active {
            Some(info) if info.call_id == *call_id => Ok(info.clone()),
            _ => Err(ApiError::Gone),
        }
    }

    async fn leave_call(&self, call_id: &CallId) -> Result<(), ApiError> {
        let active = self.active.lock();
        match &*active {
            Some(info) if info.call_id == *call_id => Ok(()),
            _ => Err(ApiError::Gone),
        }
    }

    async fn end_call(&self, call_id: &CallId) -> Result<(), ApiError> {
        *self.end_calls.lock() += 1;
        let mut active = self.active.lock();
        match &*active {
            Some(info) if info.call_id == *call_id => {
                *active = None;
                Ok(())
            }
            _ => Err(ApiError::Gone),
        }
    }

    async fn force_cleanup(&self, _conversation: &ConversationId) -> Result<(), ApiError> {
        *self.active.lock() = None;
        Ok(())
    }

    async fn participants(&self, call_id: &CallId) -> Result<Vec<Participant>, ApiError> {
        let active = self.active.lock();
        match &*active {
            Some(info) if info.call_id == *call_id => Ok(info.participants.clone()),
            _ => Err(ApiError::Gone),
        }
    }
}

/// Device fake that always grants the requested tracks.
struct FakeDevices;

impl MediaDevices for FakeDevices {
    async fn acquire(
        &self,
        audio: bool,
        video: bool,
    ) -> Result<Vec<Arc<MediaTrack>>, MediaError> {
        let mut tracks = Vec::new();
        if audio {
            tracks.push(Arc::new(MediaTrack::new(TrackKind::Audio, true)));
        }
        if video {
            tracks.push(Arc::new(MediaTrack::new(TrackKind::Video, false)));
        }
        Ok(tracks)
    }
}

// =============================================================================
// Test helpers
// =============================================================================

async fn connect(
    addr: std::net::SocketAddr,
    user: &str,
    role: Role,
    api: FakeCallApi,
) -> (HuddleClient<FakeCallApi, FakeDevices>, ClientEvents) {
    let config = ClientConfig {
        channel: ChannelConfig {
            url: format!("ws://{addr}/ws"),
            ..ChannelConfig::default()
        },
        call: CallConfig {
            participant_poll_interval: Duration::from_millis(50),
            event_buffer: 64,
        },
        ..ClientConfig::default()
    };
    let session = SessionContext::new(UserId::new(user), user, role, user);
    HuddleClient::connect(config, session, api, FakeDevices)
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

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn start_and_leave_through_the_client() {
    let (addr, _state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let (alice, _events) = connect(addr, "alice", Role::Member, FakeCallApi::new()).await;

    alice
        .calls()
        .start(general(), CallType::Video)
        .await
        .unwrap();
    assert!(matches!(alice.calls().phase(), CallPhase::Active(_)));
    let session = alice.calls().media().session().await.unwrap();
    assert!(session.audio.is_some());
    assert!(session.video.is_some());

    alice.calls().leave().await;
    assert_eq!(alice.calls().phase(), CallPhase::Idle);
    assert!(alice.calls().media().session().await.is_none());
    alice.shutdown().await;
}

#[tokio::test]
async fn incoming_offer_arrives_over_the_wire() {
    let (addr, state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let api = FakeCallApi::new();
    let (alice, mut events) = connect(addr, "alice", Role::Member, api.clone()).await;

    // Bob's call shows up both as server state and as a push.
    let seeded = api.seed_call("bob", "general");
    state.push_call(seeded.clone()).await;

    let offered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(CallEvent::IncomingCall(info)) = events.calls.recv().await {
                return info;
            }
        }
    })
    .await
    .expect("offer never arrived");
    assert_eq!(offered.call_id, seeded.call_id);
    assert_eq!(offered.caller, UserId::new("bob"));

    alice.calls().accept_incoming().await.unwrap();
    match alice.calls().phase() {
        CallPhase::Active(active) => assert_eq!(active.info.call_id, seeded.call_id),
        other => panic!("expected active, got {other:?}"),
    }
    alice.shutdown().await;
}

#[tokio::test]
async fn own_announcement_is_not_an_offer() {
    let (addr, state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let api = FakeCallApi::new();
    let (alice, _events) = connect(addr, "alice", Role::Member, api.clone()).await;

    let own = api.seed_call("alice", "general");
    state.push_call(own).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(alice.calls().incoming_call().is_none());
    alice.shutdown().await;
}

#[tokio::test]
async fn admin_resolves_conflict_by_ending_and_retrying() {
    let (addr, _state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let api = FakeCallApi::new();
    let (alice, _events) = connect(addr, "alice", Role::Admin, api.clone()).await;
    api.seed_call("bob", "general");

    alice
        .calls()
        .start(general(), CallType::Audio)
        .await
        .unwrap();
    assert!(matches!(alice.calls().phase(), CallPhase::Conflict { .. }));

    alice
        .calls()
        .resolve_conflict(ConflictAction::EndAndRetry)
        .await
        .unwrap();
    assert_eq!(*api.end_calls.lock(), 1);
    match alice.calls().phase() {
        CallPhase::Active(active) => assert_eq!(active.info.caller, UserId::new("alice")),
        other => panic!("expected active, got {other:?}"),
    }
    alice.shutdown().await;
}

#[tokio::test]
async fn member_cannot_end_a_strangers_call() {
    let (addr, _state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let api = FakeCallApi::new();
    let (alice, _events) = connect(addr, "alice", Role::Member, api.clone()).await;
    api.seed_call("bob", "general");

    alice
        .calls()
        .start(general(), CallType::Audio)
        .await
        .unwrap();
    let result = alice
        .calls()
        .resolve_conflict(ConflictAction::EndAndRetry)
        .await;
    assert!(result.is_err());
    assert_eq!(*api.end_calls.lock(), 0);
    assert!(matches!(alice.calls().phase(), CallPhase::Conflict { .. }));
    alice.shutdown().await;
}

#[tokio::test]
async fn poll_notices_the_call_ending_remotely() {
    let (addr, _state, _handle) = hub::start_server("127.0.0.1:0").await.unwrap();
    let api = FakeCallApi::new();
    let (alice, _events) = connect(addr, "alice", Role::Member, api.clone()).await;

    alice
        .calls()
        .start(general(), CallType::Audio)
        .await
        .unwrap();

    // The server drops the call behind our back; the participant poll
    // notices and tears down locally.
    *api.active.lock() = None;
    wait_until(|| alice.calls().phase() == CallPhase::Idle).await;
    assert!(alice.calls().media().session().await.is_none());
    alice.shutdown().await;
}
