//! Call signaling API seam.
//!
//! The coordinator talks to the hub's call endpoints through this
//! trait, so the state machine can be driven by a fake in tests and by
//! an HTTP client in the application shell.

use std::future::Future;

use huddle_proto::call::{CallInfo, CallType, Participant};
use huddle_proto::ids::{CallId, ConversationId};

/// Errors from call signaling operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The conversation already has an active call.
    #[error("conversation already has an active call")]
    Conflict(CallInfo),

    /// The call no longer exists on the server.
    #[error("call no longer exists")]
    Gone,

    /// The server refused the operation for this user.
    #[error("operation not permitted")]
    PermissionDenied,

    /// The request never reached the server.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server reported a failure.
    #[error("server error: {0}")]
    Server(String),
}

/// Call signaling operations against the hub.
pub trait CallApi: Send + Sync + 'static {
    /// Creates a call in a conversation.
    ///
    /// Fails with [`ApiError::Conflict`] carrying the existing call
    /// when one is already active there.
    fn create_call(
        &self,
        conversation: &ConversationId,
        call_type: CallType,
    ) -> impl Future<Output = Result<CallInfo, ApiError>> + Send;

    /// Joins an existing call.
    fn join_call(&self, call_id: &CallId)
    -> impl Future<Output = Result<CallInfo, ApiError>> + Send;

    /// Removes the local user from a call.
    fn leave_call(&self, call_id: &CallId) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Ends a call for everyone.
    fn end_call(&self, call_id: &CallId) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Clears whatever call state the conversation has, regardless of
    /// its consistency. Admin-only on the server side.
    fn force_cleanup(
        &self,
        conversation: &ConversationId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Current participant list of a call.
    fn participants(
        &self,
        call_id: &CallId,
    ) -> impl Future<Output = Result<Vec<Participant>, ApiError>> + Send;
}

/// Maps a server failure string to an [`ApiError`].
///
/// Hubs phrase stale-call failures several ways; anything that means
/// "that call isn't there anymore" must become [`ApiError::Gone`] so
/// teardown paths treat it as success.
#[must_use]
pub fn classify_failure(reason: &str) -> ApiError {
    let lowered = reason.to_lowercase();
    if lowered.contains("not found")
        || lowered.contains("no such call")
        || lowered.contains("already ended")
    {
        ApiError::Gone
    } else if lowered.contains("forbidden") || lowered.contains("permission") {
        ApiError::PermissionDenied
    } else {
        ApiError::Server(reason.to_string())
    }
}
