//! Channel event enums: the bidirectional protocol between a Huddle
//! client and the server.
//!
//! Every frame on the channel is exactly one [`ClientEvent`] (outbound)
//! or [`ServerEvent`] (inbound), postcard-encoded by [`crate::codec`].

use serde::{Deserialize, Serialize};

use crate::call::CallInfo;
use crate::ids::{ConversationId, TempId, UserId};
use crate::message::{MessageBody, ServerMessage};

/// Events sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// Authenticated handshake; must be the first frame after connect.
    Authenticate {
        /// Bearer credential from the session context.
        token: String,
    },
    /// Announce interest in a conversation's events.
    ///
    /// Server-side subscription state is not durable across transport
    /// drops, so this is re-sent after every reconnect.
    JoinGroup {
        /// The conversation to subscribe to.
        conversation: ConversationId,
    },
    /// Submit a message, tagged with its correlation token.
    SendMessage {
        /// Target conversation.
        conversation: ConversationId,
        /// Client-generated token matching the optimistic local entry.
        client_temp_id: TempId,
        /// Message content.
        body: MessageBody,
    },
    /// Fire-and-forget "user is composing" signal.
    Typing {
        /// Conversation the user is typing in.
        conversation: ConversationId,
    },
    /// Ask for a full authoritative online-users snapshot.
    RequestOnlineUsers,
}

/// Events pushed from the server to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Handshake accepted.
    Authenticated {
        /// The authenticated user's identity.
        user_id: UserId,
    },
    /// Handshake rejected; the client must not retry with the same token.
    AuthRejected {
        /// Human-readable rejection reason.
        reason: String,
    },
    /// A message was committed server-side (echo of an own send, or a
    /// message from another participant).
    MessageReceived(ServerMessage),
    /// A submitted message was rejected.
    MessageError {
        /// Token of the failed send attempt; servers are not required
        /// to echo it back.
        client_temp_id: Option<TempId>,
        /// Why the send failed.
        reason: String,
    },
    /// A peer is composing in a conversation.
    UserTyping {
        /// Where the typing is happening.
        conversation: ConversationId,
        /// Who is typing.
        user_id: UserId,
    },
    /// A peer's channel came up.
    UserConnected {
        /// The peer that connected.
        user_id: UserId,
    },
    /// A peer's channel went away.
    UserDisconnected {
        /// The peer that disconnected.
        user_id: UserId,
    },
    /// Full authoritative snapshot of online users.
    OnlineUsersUpdated {
        /// Every currently-online user; absence means offline.
        users: Vec<UserId>,
    },
    /// A call was started in a conversation the user belongs to.
    CallStarted {
        /// Metadata of the new call.
        call: CallInfo,
    },
    /// Task/objective activity, forwarded verbatim to the UI layer.
    Activity(ActivityEvent),
}

/// Which kind of task/objective activity occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    /// A task was marked completed.
    TaskCompleted,
    /// A new objective was created.
    ObjectiveCreated,
    /// An objective was completed.
    ObjectiveCompleted,
    /// Objective progress changed.
    ProgressUpdate,
}

/// A task/objective notification.
///
/// The payload is an opaque JSON document the core never interprets;
/// it is handed to the UI layer unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// What happened.
    pub kind: ActivityKind,
    /// Opaque JSON payload, forwarded verbatim.
    pub payload: String,
}
