//! Client facade.
//!
//! Wires the channel to the per-concern components: one dispatch task
//! fans the server event stream out to chat, presence, typing and
//! calls, and a status task reacts to connection transitions (failing
//! pending sends on a persistent disconnect, refreshing presence after
//! a reconnect). The UI talks to this type only.

use std::sync::Arc;

use tokio::sync::mpsc;

use huddle_proto::event::{ActivityEvent, ServerEvent};
use huddle_proto::ids::{ConversationId, TempId, UserId};
use huddle_proto::message::{MessageBody, ValidationError};

use crate::call::api::CallApi;
use crate::call::{CallCoordinator, CallEvent};
use crate::channel::{Channel, ChannelError, ChannelStatus};
use crate::chat::{ChatEntry, ChatError, ChatEvent, ChatManager};
use crate::config::ClientConfig;
use crate::media::{MediaController, MediaDevices};
use crate::presence::{PresenceTracker, PresenceView};
use crate::session::SessionContext;
use crate::typing::TypingTracker;

/// Receivers for everything the client surfaces to the UI.
pub struct ClientEvents {
    /// Conversation log changes and notifications.
    pub chat: mpsc::Receiver<ChatEvent>,
    /// Call state machine events.
    pub calls: mpsc::Receiver<CallEvent>,
    /// Workspace activity items (tasks, objectives), passed through
    /// verbatim for the activity feed.
    pub activity: mpsc::Receiver<ActivityEvent>,
}

/// The assembled Huddle client.
pub struct HuddleClient<A: CallApi, D: MediaDevices> {
    channel: Channel,
    chat: Arc<ChatManager<Channel>>,
    presence: Arc<PresenceTracker<Channel>>,
    typing: Arc<TypingTracker<Channel>>,
    calls: Arc<CallCoordinator<A, D>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl<A: CallApi, D: MediaDevices> HuddleClient<A, D> {
    /// Connects the channel and assembles all components.
    ///
    /// # Errors
    ///
    /// Propagates [`ChannelError`] from the initial connection and
    /// handshake.
    pub async fn connect(
        config: ClientConfig,
        session: SessionContext,
        api: A,
        devices: D,
    ) -> Result<(Self, ClientEvents), ChannelError> {
        let channel = Channel::connect(config.channel, &session).await?;
        let sink = Arc::new(channel.clone());

        let (chat, chat_rx) =
            ChatManager::new(Arc::clone(&sink), session.clone(), config.chat.event_buffer);
        let chat = Arc::new(chat);
        let presence = Arc::new(PresenceTracker::new(
            Arc::clone(&sink),
            config.presence.refresh_timeout,
        ));
        let typing = Arc::new(TypingTracker::new(
            Arc::clone(&sink),
            session.user_id.clone(),
            config.typing.quiet_window,
        ));
        let (calls, calls_rx) = CallCoordinator::new(
            api,
            MediaController::new(devices),
            session,
            &config.call,
        );
        let (activity_tx, activity_rx) = mpsc::channel(config.chat.event_buffer);

        let dispatch = tokio::spawn(dispatch_events(
            channel.subscribe(),
            Arc::clone(&chat),
            Arc::clone(&presence),
            Arc::clone(&typing),
            Arc::clone(&calls),
            activity_tx,
        ));
        let status = tokio::spawn(watch_status(
            channel.status(),
            Arc::clone(&chat),
            Arc::clone(&presence),
            Arc::clone(&typing),
        ));

        // Seed the presence snapshot.
        presence.request_refresh();

        Ok((
            Self {
                channel,
                chat,
                presence,
                typing,
                calls,
                tasks: vec![dispatch, status],
            },
            ClientEvents {
                chat: chat_rx,
                calls: calls_rx,
                activity: activity_rx,
            },
        ))
    }

    /// Switches the active conversation: announces membership to the
    /// hub and scopes notifications.
    ///
    /// # Errors
    ///
    /// Propagates channel errors from the membership announcement.
    pub fn set_active_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<(), ChannelError> {
        self.chat.set_active_conversation(Some(conversation.clone()));
        self.channel.set_conversation(conversation)
    }

    /// Sends a message in a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for unsendable content.
    pub fn send_message(
        &self,
        conversation: &ConversationId,
        body: MessageBody,
    ) -> Result<TempId, ValidationError> {
        self.chat.send(conversation, body)
    }

    /// Resubmits a failed message.
    ///
    /// # Errors
    ///
    /// Propagates [`ChatError`].
    pub fn resubmit(
        &self,
        conversation: &ConversationId,
        temp_id: TempId,
    ) -> Result<TempId, ChatError> {
        self.chat.resubmit(conversation, temp_id)
    }

    /// Snapshot of a conversation's log.
    #[must_use]
    pub fn entries(&self, conversation: &ConversationId) -> Vec<ChatEntry> {
        self.chat.entries(conversation)
    }

    /// Announces the local user typing in a conversation.
    pub fn announce_typing(&self, conversation: &ConversationId) {
        self.typing.announce(conversation);
    }

    /// Peers currently typing in a conversation.
    #[must_use]
    pub fn typing_users(&self, conversation: &ConversationId) -> Vec<UserId> {
        self.typing.typing_users(conversation)
    }

    /// Current presence view.
    #[must_use]
    pub fn presence(&self) -> PresenceView {
        self.presence.view()
    }

    /// The call coordinator.
    #[must_use]
    pub fn calls(&self) -> &Arc<CallCoordinator<A, D>> {
        &self.calls
    }

    /// Current channel status.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.channel.current_status()
    }

    /// Watch receiver for channel status changes.
    #[must_use]
    pub fn status_watch(&self) -> tokio::sync::watch::Receiver<ChannelStatus> {
        self.channel.status()
    }

    /// Leaves any active call, closes the channel, and stops the
    /// background tasks.
    pub async fn shutdown(mut self) {
        self.calls.leave().await;
        self.channel.shutdown().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Fans the server event stream out to the components.
async fn dispatch_events<A: CallApi, D: MediaDevices>(
    mut events: tokio::sync::broadcast::Receiver<ServerEvent>,
    chat: Arc<ChatManager<Channel>>,
    presence: Arc<PresenceTracker<Channel>>,
    typing: Arc<TypingTracker<Channel>>,
    calls: Arc<CallCoordinator<A, D>>,
    activity_tx: mpsc::Sender<ActivityEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => match event {
                ServerEvent::MessageReceived(message) => chat.apply_incoming(message),
                ServerEvent::MessageError {
                    client_temp_id,
                    reason,
                } => chat.apply_send_error(client_temp_id, &reason),
                ServerEvent::UserTyping { .. } => typing.handle_event(&event),
                ServerEvent::OnlineUsersUpdated { .. }
                | ServerEvent::UserConnected { .. }
                | ServerEvent::UserDisconnected { .. } => presence.handle_event(&event),
                ServerEvent::CallStarted { .. } => calls.handle_event(&event),
                ServerEvent::Activity(activity) => {
                    if activity_tx.try_send(activity).is_err() {
                        tracing::warn!("activity buffer full, event dropped");
                    }
                }
                ServerEvent::Authenticated { .. } | ServerEvent::AuthRejected { .. } => {
                    // Handshake frames; nothing to do mid-session.
                }
            },
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event dispatch lagged, resyncing presence");
                presence.request_refresh();
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::debug!("event dispatch task exiting");
}

/// Reacts to channel status transitions.
async fn watch_status(
    mut status: tokio::sync::watch::Receiver<ChannelStatus>,
    chat: Arc<ChatManager<Channel>>,
    presence: Arc<PresenceTracker<Channel>>,
    typing: Arc<TypingTracker<Channel>>,
) {
    let mut was_down = false;
    loop {
        let current = *status.borrow_and_update();
        match current {
            ChannelStatus::Disconnected => {
                // Terminal: nothing pending can be confirmed anymore.
                chat.mark_unconfirmed_failed("connection lost");
                presence.clear();
                typing.clear();
                break;
            }
            ChannelStatus::Reconnecting { .. } => {
                was_down = true;
                typing.clear();
            }
            ChannelStatus::Connected if was_down => {
                was_down = false;
                // Whatever happened while we were away, the hub knows.
                presence.request_refresh();
            }
            ChannelStatus::Connected | ChannelStatus::Connecting => {}
        }
        if status.changed().await.is_err() {
            break;
        }
    }
    tracing::debug!("status watch task exiting");
}
