//! Optimistic message reconciliation.
//!
//! Local sends appear in the conversation log immediately as pending
//! entries; confirmed copies arriving from the hub are merged onto them
//! in place, so a message never moves or duplicates when its echo comes
//! back. Entries whose send demonstrably failed stay visible in a
//! failed state until resubmitted or discarded by the user.

pub mod reconcile;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use huddle_proto::event::ClientEvent;
use huddle_proto::ids::{ConversationId, MessageId, TempId, Timestamp, UserId};
use huddle_proto::message::{MessageBody, ServerMessage, ValidationError};

use crate::channel::EventSink;
use crate::session::SessionContext;
use reconcile::Slot;

/// Delivery state of a conversation log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Sent locally, not yet confirmed by the hub.
    Optimistic,
    /// Confirmed; carries a server-assigned id.
    Confirmed,
    /// The send failed. The entry remains until resubmitted or removed.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

/// One entry in a conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Server-assigned id, present once confirmed.
    pub id: Option<MessageId>,
    /// Correlation token for optimistic sends.
    pub client_temp_id: Option<TempId>,
    /// Conversation this entry belongs to.
    pub conversation: ConversationId,
    /// Author of the message.
    pub sender: UserId,
    /// Author's display name.
    pub sender_name: String,
    /// Message content.
    pub body: MessageBody,
    /// Creation time; replaced by the server's clock on confirmation.
    pub created_at: Timestamp,
    /// Delivery state.
    pub state: DeliveryState,
}

/// Events emitted by the chat manager for the presentation layer.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A new entry was appended at `index`.
    EntryAppended {
        /// Conversation the entry belongs to.
        conversation: ConversationId,
        /// Position in the conversation log.
        index: usize,
        /// The appended entry.
        entry: ChatEntry,
    },
    /// The entry at `index` changed in place (confirmation, failure,
    /// or resubmission).
    EntryUpdated {
        /// Conversation the entry belongs to.
        conversation: ConversationId,
        /// Position in the conversation log.
        index: usize,
        /// The updated entry.
        entry: ChatEntry,
    },
    /// A message from another user arrived in a conversation that is
    /// not currently active.
    Notification {
        /// Conversation the message arrived in.
        conversation: ConversationId,
        /// Sender's display name.
        sender_name: String,
        /// Message text for the notification preview.
        preview: String,
    },
}

/// Errors from explicit chat operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The message content failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No entry with the given correlation token exists.
    #[error("no entry with the given token")]
    UnknownEntry,

    /// Only failed entries can be resubmitted.
    #[error("entry is not in a failed state")]
    NotFailed,
}

/// Manages per-conversation logs and reconciles echoes onto them.
pub struct ChatManager<S: EventSink> {
    sink: Arc<S>,
    session: SessionContext,
    logs: parking_lot::Mutex<HashMap<ConversationId, Vec<ChatEntry>>>,
    active: parking_lot::Mutex<Option<ConversationId>>,
    events_tx: mpsc::Sender<ChatEvent>,
}

impl<S: EventSink> ChatManager<S> {
    /// Creates a manager and the receiver for its presentation events.
    pub fn new(
        sink: Arc<S>,
        session: SessionContext,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (events_tx, events_rx) = mpsc::channel(event_buffer);
        (
            Self {
                sink,
                session,
                logs: parking_lot::Mutex::new(HashMap::new()),
                active: parking_lot::Mutex::new(None),
                events_tx,
            },
            events_rx,
        )
    }

    /// Sends a message optimistically.
    ///
    /// The entry is appended as pending before any network activity. If
    /// queuing on the channel fails, the entry flips to failed in place
    /// rather than disappearing; the returned token is valid either way.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for empty or oversized content — in
    /// that case nothing is appended.
    pub fn send(
        &self,
        conversation: &ConversationId,
        body: MessageBody,
    ) -> Result<TempId, ValidationError> {
        body.validate()?;

        let temp_id = TempId::new();
        let entry = ChatEntry {
            id: None,
            client_temp_id: Some(temp_id),
            conversation: conversation.clone(),
            sender: self.session.user_id.clone(),
            sender_name: self.session.user_name.clone(),
            body: body.clone(),
            created_at: Timestamp::now(),
            state: DeliveryState::Optimistic,
        };

        let index = {
            let mut logs = self.logs.lock();
            let log = logs.entry(conversation.clone()).or_default();
            log.push(entry.clone());
            log.len() - 1
        };
        self.emit(ChatEvent::EntryAppended {
            conversation: conversation.clone(),
            index,
            entry,
        });

        let outbound = ClientEvent::SendMessage {
            conversation: conversation.clone(),
            client_temp_id: temp_id,
            body,
        };
        if let Err(e) = self.sink.send_event(outbound) {
            tracing::warn!(err = %e, temp_id = %temp_id, "queuing message failed");
            self.fail_entry(conversation, temp_id, &e.to_string());
        }

        Ok(temp_id)
    }

    /// Reconciles a confirmed message from the hub into the log.
    pub fn apply_incoming(&self, message: ServerMessage) {
        let conversation = message.conversation.clone();
        let event = {
            let mut logs = self.logs.lock();
            let log = logs.entry(conversation.clone()).or_default();
            match reconcile::find_slot(log, &message, &self.session.user_id) {
                Slot::Confirm(index) => {
                    let entry = &mut log[index];
                    entry.id = Some(message.id);
                    entry.created_at = message.created_at;
                    entry.state = DeliveryState::Confirmed;
                    Some(ChatEvent::EntryUpdated {
                        conversation: conversation.clone(),
                        index,
                        entry: entry.clone(),
                    })
                }
                Slot::Duplicate => {
                    tracing::debug!(id = message.id.as_i64(), "duplicate message dropped");
                    None
                }
                Slot::Append => {
                    let entry = ChatEntry {
                        id: Some(message.id),
                        client_temp_id: message.client_temp_id,
                        conversation: conversation.clone(),
                        sender: message.sender.clone(),
                        sender_name: message.sender_name.clone(),
                        body: message.body.clone(),
                        created_at: message.created_at,
                        state: DeliveryState::Confirmed,
                    };
                    log.push(entry.clone());
                    Some(ChatEvent::EntryAppended {
                        conversation: conversation.clone(),
                        index: log.len() - 1,
                        entry,
                    })
                }
            }
        };

        let appended_from_other = matches!(event, Some(ChatEvent::EntryAppended { .. }))
            && message.sender != self.session.user_id;
        if let Some(event) = event {
            self.emit(event);
        }
        if appended_from_other && self.active.lock().as_ref() != Some(&conversation) {
            self.emit(ChatEvent::Notification {
                conversation,
                sender_name: message.sender_name,
                preview: message.body.text,
            });
        }
    }

    /// Marks the entry for a failed send, identified by its token.
    ///
    /// Errors without a token cannot be correlated and are only logged.
    pub fn apply_send_error(&self, client_temp_id: Option<TempId>, reason: &str) {
        let Some(temp_id) = client_temp_id else {
            tracing::warn!(reason, "send error without correlation token, ignoring");
            return;
        };
        let hit = {
            let logs = self.logs.lock();
            logs.iter().find_map(|(conversation, log)| {
                log.iter()
                    .any(|e| {
                        e.client_temp_id == Some(temp_id)
                            && !matches!(e.state, DeliveryState::Confirmed)
                    })
                    .then(|| conversation.clone())
            })
        };
        match hit {
            Some(conversation) => self.fail_entry(&conversation, temp_id, reason),
            None => {
                // Confirmation may have raced ahead of the error report.
                tracing::debug!(temp_id = %temp_id, "send error for unknown or confirmed entry");
            }
        }
    }

    /// Resubmits a failed entry.
    ///
    /// The entry is replaced in place with a fresh correlation token so
    /// a late echo of the original send cannot confirm the new attempt.
    ///
    /// # Errors
    ///
    /// [`ChatError::UnknownEntry`] if no entry carries the token,
    /// [`ChatError::NotFailed`] if the entry is not in a failed state.
    pub fn resubmit(
        &self,
        conversation: &ConversationId,
        temp_id: TempId,
    ) -> Result<TempId, ChatError> {
        let new_temp_id = TempId::new();
        let (index, entry, body) = {
            let mut logs = self.logs.lock();
            let log = logs.get_mut(conversation).ok_or(ChatError::UnknownEntry)?;
            let index = log
                .iter()
                .position(|e| e.client_temp_id == Some(temp_id))
                .ok_or(ChatError::UnknownEntry)?;
            if !matches!(log[index].state, DeliveryState::Failed { .. }) {
                return Err(ChatError::NotFailed);
            }
            let entry = &mut log[index];
            entry.client_temp_id = Some(new_temp_id);
            entry.created_at = Timestamp::now();
            entry.state = DeliveryState::Optimistic;
            (index, entry.clone(), entry.body.clone())
        };
        self.emit(ChatEvent::EntryUpdated {
            conversation: conversation.clone(),
            index,
            entry,
        });

        let outbound = ClientEvent::SendMessage {
            conversation: conversation.clone(),
            client_temp_id: new_temp_id,
            body,
        };
        if let Err(e) = self.sink.send_event(outbound) {
            tracing::warn!(err = %e, temp_id = %new_temp_id, "resubmit queuing failed");
            self.fail_entry(conversation, new_temp_id, &e.to_string());
        }
        Ok(new_temp_id)
    }

    /// Replaces a conversation's confirmed history.
    ///
    /// Confirmed entries are ordered by server timestamp; unconfirmed
    /// local entries survive the reload and stay appended after the
    /// history in their original order.
    pub fn load_history(&self, conversation: &ConversationId, mut history: Vec<ServerMessage>) {
        history.sort_by_key(|m| m.created_at.as_millis());
        let mut logs = self.logs.lock();
        let log = logs.entry(conversation.clone()).or_default();
        let pending: Vec<ChatEntry> = log
            .iter()
            .filter(|e| !matches!(e.state, DeliveryState::Confirmed))
            .cloned()
            .collect();
        log.clear();
        for message in history {
            log.push(ChatEntry {
                id: Some(message.id),
                client_temp_id: message.client_temp_id,
                conversation: conversation.clone(),
                sender: message.sender,
                sender_name: message.sender_name,
                body: message.body,
                created_at: message.created_at,
                state: DeliveryState::Confirmed,
            });
        }
        log.extend(pending);
    }

    /// Fails every pending entry, across all conversations.
    ///
    /// Called when the channel reports a persistent disconnect: nothing
    /// still pending can be confirmed anymore.
    pub fn mark_unconfirmed_failed(&self, reason: &str) {
        let mut updates = Vec::new();
        {
            let mut logs = self.logs.lock();
            for (conversation, log) in logs.iter_mut() {
                for (index, entry) in log.iter_mut().enumerate() {
                    if matches!(entry.state, DeliveryState::Optimistic) {
                        entry.state = DeliveryState::Failed {
                            reason: reason.to_string(),
                        };
                        updates.push(ChatEvent::EntryUpdated {
                            conversation: conversation.clone(),
                            index,
                            entry: entry.clone(),
                        });
                    }
                }
            }
        }
        for event in updates {
            self.emit(event);
        }
    }

    /// Sets the conversation considered active for notification
    /// suppression.
    pub fn set_active_conversation(&self, conversation: Option<ConversationId>) {
        *self.active.lock() = conversation;
    }

    /// Snapshot of a conversation's log.
    #[must_use]
    pub fn entries(&self, conversation: &ConversationId) -> Vec<ChatEntry> {
        self.logs
            .lock()
            .get(conversation)
            .cloned()
            .unwrap_or_default()
    }

    fn fail_entry(&self, conversation: &ConversationId, temp_id: TempId, reason: &str) {
        let update = {
            let mut logs = self.logs.lock();
            logs.get_mut(conversation).and_then(|log| {
                log.iter_mut().enumerate().find_map(|(index, entry)| {
                    (entry.client_temp_id == Some(temp_id)
                        && !matches!(entry.state, DeliveryState::Confirmed))
                    .then(|| {
                        entry.state = DeliveryState::Failed {
                            reason: reason.to_string(),
                        };
                        ChatEvent::EntryUpdated {
                            conversation: conversation.clone(),
                            index,
                            entry: entry.clone(),
                        }
                    })
                })
            })
        };
        if let Some(event) = update {
            self.emit(event);
        }
    }

    fn emit(&self, event: ChatEvent) {
        if self.events_tx.try_send(event).is_err() {
            // The log itself stays correct; the UI resynchronizes from
            // entries() when it catches up.
            tracing::warn!("chat event buffer full, event dropped");
        }
    }
}
