//! Authenticated session context.
//!
//! The session is built once at login and threaded explicitly through
//! component constructors — there is no ambient credential store. The
//! bearer token is attached by the channel at connect time and never
//! logged.

use huddle_proto::ids::UserId;

/// The local user's role, as known at login.
///
/// Privileged operations (ending someone else's call, forced cleanup)
/// are rejected locally for non-admins before any request is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Regular team member.
    Member,
    /// Administrator.
    Admin,
}

/// Identity and credential for one authenticated session.
#[derive(Clone)]
pub struct SessionContext {
    /// The local user's identity.
    pub user_id: UserId,
    /// Display name used for optimistic local entries.
    pub user_name: String,
    /// The local user's role.
    pub role: Role,
    token: String,
}

impl SessionContext {
    /// Creates a session context from login data.
    pub fn new(
        user_id: UserId,
        user_name: impl Into<String>,
        role: Role,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            role,
            token: token.into(),
        }
    }

    /// Returns the bearer credential.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether this session may perform admin-only operations.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The token is deliberately redacted.
        f.debug_struct("SessionContext")
            .field("user_id", &self.user_id)
            .field("user_name", &self.user_name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
