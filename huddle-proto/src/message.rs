//! Message body and server-confirmed message types.

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, TempId, Timestamp, UserId};

/// Maximum allowed message text size in bytes (16 KiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// A file or image attached to a message, referenced by URL.
///
/// Attachment upload happens through the request/response API before the
/// message is sent; the channel only carries the resulting references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Display name of the attachment.
    pub name: String,
    /// Where the uploaded content can be fetched from.
    pub url: String,
}

/// User-authored content of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// The message text (may be empty when attachments are present).
    pub text: String,
    /// Attached files, possibly empty.
    pub attachments: Vec<Attachment>,
}

impl MessageBody {
    /// Creates a text-only message body.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    /// Validates this body for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if there is neither text nor an
    /// attachment, or [`ValidationError::TooLarge`] if the text exceeds
    /// [`MAX_MESSAGE_SIZE`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.text.is_empty() && self.attachments.is_empty() {
            return Err(ValidationError::Empty);
        }
        if self.text.len() > MAX_MESSAGE_SIZE {
            return Err(ValidationError::TooLarge {
                size: self.text.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }
}

/// Error returned when a message body fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message has neither text nor attachments.
    #[error("message is empty")]
    Empty,
    /// Message text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// A server-confirmed message as pushed over the channel.
///
/// `client_temp_id` is echoed back when the server received it with the
/// send; some delivery paths omit it, which is why the client keeps a
/// content-based fallback for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Server-assigned message identifier.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation: ConversationId,
    /// Who sent the message.
    pub sender: UserId,
    /// Display name of the sender at send time.
    pub sender_name: String,
    /// The message content.
    pub body: MessageBody,
    /// Server-side creation time.
    pub created_at: Timestamp,
    /// Correlation token from the originating send, when preserved.
    pub client_temp_id: Option<TempId>,
}
