//! Hub core: client registry, group membership, and event fan-out.
//!
//! Sessions authenticate first: the initial frame must be
//! `Authenticate`, and for this development hub the token doubles as
//! the user id. An empty token is rejected. After that, events are
//! routed per the channel protocol: messages get a server id and are
//! echoed to every group member (sender included), typing and presence
//! fan out, and `RequestOnlineUsers` answers with the full online set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use huddle_proto::call::CallInfo;
use huddle_proto::codec;
use huddle_proto::event::{ActivityEvent, ClientEvent, ServerEvent};
use huddle_proto::ids::{ConversationId, MessageId, TempId, Timestamp, UserId};
use huddle_proto::message::ServerMessage;

/// Behavior switches, mostly for exercising client edge cases.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Strip the correlation token from message echoes, forcing
    /// clients onto their content-matching fallback.
    pub drop_temp_ids: bool,
    /// Reject any message whose text contains this marker with a
    /// `MessageError` instead of echoing it.
    pub fail_marker: Option<String>,
}

/// Shared hub state.
pub struct HubState {
    /// Connected clients, by user id.
    clients: RwLock<HashMap<UserId, mpsc::UnboundedSender<Message>>>,
    /// Group membership.
    groups: RwLock<HashMap<ConversationId, HashSet<UserId>>>,
    /// Monotonic message id source.
    next_message_id: AtomicI64,
    config: HubConfig,
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

impl HubState {
    /// Creates hub state with default behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Creates hub state with the given behavior switches.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            next_message_id: AtomicI64::new(1),
            config,
        }
    }

    async fn register(
        &self,
        user_id: &UserId,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        self.clients.write().await.insert(user_id.clone(), sender)
    }

    async fn unregister(&self, user_id: &UserId) {
        self.clients.write().await.remove(user_id);
        let mut groups = self.groups.write().await;
        for members in groups.values_mut() {
            members.remove(user_id);
        }
    }

    async fn online_users(&self) -> Vec<UserId> {
        self.clients.read().await.keys().cloned().collect()
    }

    /// Sends an event to one connected client.
    async fn send_to(&self, user_id: &UserId, event: &ServerEvent) {
        if let Some(sender) = self.clients.read().await.get(user_id)
            && let Ok(bytes) = codec::encode(event)
        {
            let _ = sender.send(Message::Binary(bytes.into()));
        }
    }

    /// Sends an event to every connected client.
    async fn broadcast(&self, event: &ServerEvent) {
        let Ok(bytes) = codec::encode(event) else {
            return;
        };
        let clients = self.clients.read().await;
        for sender in clients.values() {
            let _ = sender.send(Message::Binary(bytes.clone().into()));
        }
    }

    /// Sends an event to every member of a group.
    async fn broadcast_group(
        &self,
        conversation: &ConversationId,
        event: &ServerEvent,
        exclude: Option<&UserId>,
    ) {
        let Ok(bytes) = codec::encode(event) else {
            return;
        };
        let members = {
            let groups = self.groups.read().await;
            groups.get(conversation).cloned().unwrap_or_default()
        };
        let clients = self.clients.read().await;
        for member in &members {
            if Some(member) == exclude {
                continue;
            }
            if let Some(sender) = clients.get(member) {
                let _ = sender.send(Message::Binary(bytes.clone().into()));
            }
        }
    }

    /// Pushes a call announcement to all clients. Test hook for the
    /// incoming-call flow.
    pub async fn push_call(&self, call: CallInfo) {
        self.broadcast(&ServerEvent::CallStarted { call }).await;
    }

    /// Pushes a workspace activity event to all clients. Test hook for
    /// the activity feed passthrough.
    pub async fn push_activity(&self, activity: ActivityEvent) {
        self.broadcast(&ServerEvent::Activity(activity)).await;
    }

    /// Sends a close frame to every connected client. Used to exercise
    /// client reconnection.
    pub async fn close_all_connections(&self) {
        let clients = self.clients.read().await;
        for (user_id, sender) in clients.iter() {
            tracing::info!(user_id = %user_id, "closing client connection");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles one upgraded WebSocket connection.
pub async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(user_id) = authenticate(&mut ws_sender, &mut ws_receiver).await else {
        return;
    };
    tracing::info!(user_id = %user_id, "client authenticated");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    if state.register(&user_id, tx).await.is_some() {
        tracing::info!(user_id = %user_id, "replaced existing connection");
    }

    state
        .broadcast(&ServerEvent::UserConnected {
            user_id: user_id.clone(),
        })
        .await;

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let reader_user = user_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_client_event(&reader_user, &data, &reader_state).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(&user_id).await;
    state
        .broadcast(&ServerEvent::UserDisconnected {
            user_id: user_id.clone(),
        })
        .await;
    tracing::info!(user_id = %user_id, "client disconnected");
}

/// Performs the authenticate-first handshake. Returns the user id on
/// success; on failure the rejection has already been sent.
async fn authenticate(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    ws_receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<UserId> {
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Binary(data) => match codec::decode::<ClientEvent>(&data) {
                Ok(ClientEvent::Authenticate { token }) => {
                    if token.is_empty() {
                        let rejection = ServerEvent::AuthRejected {
                            reason: "empty token".into(),
                        };
                        if let Ok(bytes) = codec::encode(&rejection) {
                            let _ = ws_sender.send(Message::Binary(bytes.into())).await;
                        }
                        return None;
                    }
                    // Development hub: the token IS the user id.
                    let user_id = UserId::new(token);
                    let ack = ServerEvent::Authenticated {
                        user_id: user_id.clone(),
                    };
                    let bytes = codec::encode(&ack).ok()?;
                    ws_sender.send(Message::Binary(bytes.into())).await.ok()?;
                    return Some(user_id);
                }
                Ok(other) => {
                    tracing::warn!(?other, "expected Authenticate as first event");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode handshake frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Handles one decoded client event from an authenticated session.
async fn handle_client_event(user_id: &UserId, data: &[u8], state: &Arc<HubState>) {
    let event = match codec::decode::<ClientEvent>(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "failed to decode event");
            return;
        }
    };

    match event {
        ClientEvent::JoinGroup { conversation } => {
            tracing::debug!(user_id = %user_id, conversation = %conversation, "joined group");
            state
                .groups
                .write()
                .await
                .entry(conversation)
                .or_default()
                .insert(user_id.clone());
        }
        ClientEvent::SendMessage {
            conversation,
            client_temp_id,
            body,
        } => {
            handle_send_message(user_id, conversation, client_temp_id, body, state).await;
        }
        ClientEvent::Typing { conversation } => {
            let event = ServerEvent::UserTyping {
                conversation: conversation.clone(),
                user_id: user_id.clone(),
            };
            state
                .broadcast_group(&conversation, &event, Some(user_id))
                .await;
        }
        ClientEvent::RequestOnlineUsers => {
            let users = state.online_users().await;
            state
                .send_to(user_id, &ServerEvent::OnlineUsersUpdated { users })
                .await;
        }
        ClientEvent::Authenticate { .. } => {
            tracing::warn!(user_id = %user_id, "duplicate Authenticate ignored");
        }
    }
}

async fn handle_send_message(
    user_id: &UserId,
    conversation: ConversationId,
    client_temp_id: TempId,
    body: huddle_proto::message::MessageBody,
    state: &Arc<HubState>,
) {
    if let Some(marker) = &state.config.fail_marker
        && body.text.contains(marker.as_str())
    {
        let error = ServerEvent::MessageError {
            client_temp_id: Some(client_temp_id),
            reason: "rejected by hub".into(),
        };
        state.send_to(user_id, &error).await;
        return;
    }

    let id = MessageId::new(state.next_message_id.fetch_add(1, Ordering::Relaxed));
    let message = ServerMessage {
        id,
        conversation: conversation.clone(),
        sender: user_id.clone(),
        sender_name: user_id.as_str().to_string(),
        body,
        created_at: Timestamp::now(),
        client_temp_id: if state.config.drop_temp_ids {
            None
        } else {
            Some(client_temp_id)
        },
    };
    tracing::debug!(user_id = %user_id, id = id.as_i64(), "message accepted");
    state
        .broadcast_group(&conversation, &ServerEvent::MessageReceived(message), None)
        .await;
}

/// Starts the hub on the given address.
///
/// Returns the bound address, the shared state (for test hooks), and
/// the server task handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, Arc<HubState>, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(HubState::new())).await
}

/// Starts the hub with pre-configured state.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<HubState>,
) -> Result<
    (std::net::SocketAddr, Arc<HubState>, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, state, handle))
}

/// axum handler upgrading HTTP to WebSocket.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<HubState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
