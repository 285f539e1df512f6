//! Property-based wire format tests.
//!
//! Uses proptest to verify:
//! 1. Any valid `ClientEvent` survives an encode → decode round-trip.
//! 2. Any valid `ServerEvent` survives an encode → decode round-trip.
//! 3. Random bytes never cause a panic in `decode` (returns `Err` gracefully).

use proptest::prelude::*;
use uuid::Uuid;

use huddle_proto::call::{CallInfo, CallType, Participant};
use huddle_proto::codec;
use huddle_proto::event::{ActivityEvent, ActivityKind, ClientEvent, ServerEvent};
use huddle_proto::ids::{CallId, ConversationId, MessageId, TempId, Timestamp, UserId};
use huddle_proto::message::{Attachment, MessageBody, ServerMessage};

// --- Strategies for protocol types ---

/// Strategy for generating arbitrary `UserId` values.
fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[a-z0-9-]{1,32}".prop_map(UserId::new)
}

/// Strategy for generating arbitrary `ConversationId` values.
fn arb_conversation_id() -> impl Strategy<Value = ConversationId> {
    "[a-z0-9-]{1,32}".prop_map(ConversationId::new)
}

/// Strategy for generating arbitrary `CallId` values.
fn arb_call_id() -> impl Strategy<Value = CallId> {
    "[a-z0-9-]{1,32}".prop_map(CallId::new)
}

/// Strategy for generating arbitrary `MessageId` values.
fn arb_message_id() -> impl Strategy<Value = MessageId> {
    any::<i64>().prop_map(MessageId::new)
}

/// Strategy for generating arbitrary `TempId` values.
fn arb_temp_id() -> impl Strategy<Value = TempId> {
    any::<u128>().prop_map(|n| TempId::from_uuid(Uuid::from_u128(n)))
}

/// Strategy for generating arbitrary `Timestamp` values.
fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    any::<u64>().prop_map(Timestamp::from_millis)
}

/// Strategy for generating arbitrary `MessageBody` values, including
/// attachment-only bodies.
fn arb_message_body() -> impl Strategy<Value = MessageBody> {
    (
        ".{0,256}",
        prop::collection::vec(
            (".{1,64}", ".{1,128}").prop_map(|(name, url)| Attachment { name, url }),
            0..4,
        ),
    )
        .prop_map(|(text, attachments)| MessageBody { text, attachments })
}

/// Strategy for generating arbitrary `ServerMessage` values.
fn arb_server_message() -> impl Strategy<Value = ServerMessage> {
    (
        arb_message_id(),
        arb_conversation_id(),
        arb_user_id(),
        ".{1,64}",
        arb_message_body(),
        arb_timestamp(),
        prop::option::of(arb_temp_id()),
    )
        .prop_map(
            |(id, conversation, sender, sender_name, body, created_at, client_temp_id)| {
                ServerMessage {
                    id,
                    conversation,
                    sender,
                    sender_name,
                    body,
                    created_at,
                    client_temp_id,
                }
            },
        )
}

/// Strategy for generating arbitrary `Participant` values.
fn arb_participant() -> impl Strategy<Value = Participant> {
    (arb_user_id(), ".{1,64}").prop_map(|(user_id, name)| Participant { user_id, name })
}

/// Strategy for generating arbitrary `CallInfo` values.
fn arb_call_info() -> impl Strategy<Value = CallInfo> {
    (
        arb_call_id(),
        arb_conversation_id(),
        arb_user_id(),
        ".{1,64}",
        prop_oneof![Just(CallType::Audio), Just(CallType::Video)],
        arb_timestamp(),
        prop::collection::vec(arb_participant(), 0..8),
    )
        .prop_map(
            |(call_id, conversation, caller, caller_name, call_type, started_at, participants)| {
                CallInfo {
                    call_id,
                    conversation,
                    caller,
                    caller_name,
                    call_type,
                    started_at,
                    participants,
                }
            },
        )
}

/// Strategy for generating arbitrary `ActivityEvent` values.
fn arb_activity() -> impl Strategy<Value = ActivityEvent> {
    (
        prop_oneof![
            Just(ActivityKind::TaskCompleted),
            Just(ActivityKind::ObjectiveCreated),
            Just(ActivityKind::ObjectiveCompleted),
            Just(ActivityKind::ProgressUpdate),
        ],
        ".{0,256}",
    )
        .prop_map(|(kind, payload)| ActivityEvent { kind, payload })
}

/// Strategy for generating arbitrary `ClientEvent` values.
fn arb_client_event() -> impl Strategy<Value = ClientEvent> {
    prop_oneof![
        ".{0,128}".prop_map(|token| ClientEvent::Authenticate { token }),
        arb_conversation_id().prop_map(|conversation| ClientEvent::JoinGroup { conversation }),
        (arb_conversation_id(), arb_temp_id(), arb_message_body()).prop_map(
            |(conversation, client_temp_id, body)| ClientEvent::SendMessage {
                conversation,
                client_temp_id,
                body,
            }
        ),
        arb_conversation_id().prop_map(|conversation| ClientEvent::Typing { conversation }),
        Just(ClientEvent::RequestOnlineUsers),
    ]
}

/// Strategy for generating arbitrary `ServerEvent` values.
fn arb_server_event() -> impl Strategy<Value = ServerEvent> {
    prop_oneof![
        arb_user_id().prop_map(|user_id| ServerEvent::Authenticated { user_id }),
        ".{0,128}".prop_map(|reason| ServerEvent::AuthRejected { reason }),
        arb_server_message().prop_map(ServerEvent::MessageReceived),
        (prop::option::of(arb_temp_id()), ".{0,128}").prop_map(
            |(client_temp_id, reason)| ServerEvent::MessageError {
                client_temp_id,
                reason,
            }
        ),
        (arb_conversation_id(), arb_user_id()).prop_map(|(conversation, user_id)| {
            ServerEvent::UserTyping {
                conversation,
                user_id,
            }
        }),
        arb_user_id().prop_map(|user_id| ServerEvent::UserConnected { user_id }),
        arb_user_id().prop_map(|user_id| ServerEvent::UserDisconnected { user_id }),
        prop::collection::vec(arb_user_id(), 0..16)
            .prop_map(|users| ServerEvent::OnlineUsersUpdated { users }),
        arb_call_info().prop_map(|call| ServerEvent::CallStarted { call }),
        arb_activity().prop_map(ServerEvent::Activity),
    ]
}

// --- Property tests ---

proptest! {
    /// Any valid ClientEvent survives an encode → decode round-trip.
    #[test]
    fn client_event_round_trip(event in arb_client_event()) {
        let bytes = codec::encode(&event).expect("encode should succeed");
        let decoded: ClientEvent = codec::decode(&bytes).expect("decode should succeed");
        prop_assert_eq!(event, decoded);
    }

    /// Any valid ServerEvent survives an encode → decode round-trip.
    #[test]
    fn server_event_round_trip(event in arb_server_event()) {
        let bytes = codec::encode(&event).expect("encode should succeed");
        let decoded: ServerEvent = codec::decode(&bytes).expect("decode should succeed");
        prop_assert_eq!(event, decoded);
    }

    /// Any valid ServerMessage survives a round-trip with its
    /// correlation token intact.
    #[test]
    fn correlation_token_is_preserved(message in arb_server_message()) {
        let event = ServerEvent::MessageReceived(message.clone());
        let bytes = codec::encode(&event).expect("encode should succeed");
        let ServerEvent::MessageReceived(decoded) =
            codec::decode(&bytes).expect("decode should succeed")
        else {
            return Err(TestCaseError::fail("wrong variant after decode"));
        };
        prop_assert_eq!(message.client_temp_id, decoded.client_temp_id);
    }

    /// Random bytes never cause a panic when decoded — they return Err
    /// or an accidental value, never a crash.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode::<ClientEvent>(&bytes);
        let _ = codec::decode::<ServerEvent>(&bytes);
    }
}
