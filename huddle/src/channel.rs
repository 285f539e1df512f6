//! Persistent event channel to the hub.
//!
//! Owns a single authenticated WebSocket connection for the lifetime of
//! the client session. Consumers publish [`ClientEvent`]s through the
//! [`EventSink`] trait and subscribe to [`ServerEvent`]s via a broadcast
//! channel; connection state is observable through a watch channel so
//! the UI can show connected / reconnecting / offline without polling.
//!
//! Reconnection is supervised with a linear backoff (initial delay plus
//! a fixed step per attempt, capped) and a bounded attempt count. After
//! a successful reconnect the supervisor re-announces the active
//! conversation so the hub restores group membership.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use huddle_proto::codec::{self, CodecError};
use huddle_proto::event::{ClientEvent, ServerEvent};
use huddle_proto::ids::ConversationId;

use crate::config::ChannelConfig;
use crate::session::SessionContext;

/// Write half of the WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Observable connection state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Initial connection in progress.
    Connecting,
    /// Connected and authenticated.
    Connected,
    /// Connection lost; reconnect attempt `attempt` is pending or running.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
    },
    /// Gave up (attempts exhausted, credentials rejected, or shut down).
    Disconnected,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Errors surfaced by the channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No credential is available; connecting would be pointless.
    #[error("no credentials available for the event channel")]
    MissingCredentials,

    /// The configured channel URL is invalid.
    #[error("invalid channel url: {0}")]
    InvalidUrl(String),

    /// Connect or handshake step timed out.
    #[error("channel operation timed out")]
    Timeout,

    /// The hub rejected the credential. Not retryable.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The channel is not currently connected.
    #[error("event channel is not connected")]
    NotConnected,

    /// The outbound queue is full.
    #[error("outbound event queue is full")]
    QueueFull,

    /// The channel has been shut down.
    #[error("event channel is closed")]
    Closed,

    /// Wire encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Underlying WebSocket failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Something that accepts outbound protocol events.
///
/// The channel implements this for real traffic; tests substitute a
/// recording sink to observe what components emit without a socket.
pub trait EventSink: Send + Sync {
    /// Queues an event for delivery to the hub.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] when the channel is down,
    /// [`ChannelError::QueueFull`] when the outbound buffer is full, or
    /// [`ChannelError::Closed`] after shutdown.
    fn send_event(&self, event: ClientEvent) -> Result<(), ChannelError>;
}

/// Handle to the event channel. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    outbound_tx: mpsc::Sender<ClientEvent>,
    events_tx: broadcast::Sender<ServerEvent>,
    status_tx: watch::Sender<ChannelStatus>,
    conversation_tx: watch::Sender<Option<ConversationId>>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Channel {
    /// Connects to the hub and performs the authenticated handshake.
    ///
    /// The initial connection is established inline so the caller gets
    /// a definitive result; afterwards a supervisor task owns the
    /// socket and handles reconnection.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::MissingCredentials`] if the session token is
    ///   empty (checked before any I/O).
    /// - [`ChannelError::AuthRejected`] if the hub refuses the token.
    /// - [`ChannelError::Timeout`] / [`ChannelError::Transport`] for
    ///   connection failures.
    pub async fn connect(
        config: ChannelConfig,
        session: &SessionContext,
    ) -> Result<Self, ChannelError> {
        if session.token().is_empty() {
            return Err(ChannelError::MissingCredentials);
        }
        config
            .validate()
            .map_err(|e| ChannelError::InvalidUrl(e.to_string()))?;

        let (status_tx, _) = watch::channel(ChannelStatus::Connecting);
        let token = session.token().to_string();

        let (ws_sender, ws_reader) = match establish(&config, &token).await {
            Ok(halves) => halves,
            Err(EstablishError::Fatal(e) | EstablishError::Retryable(e)) => {
                status_tx.send_replace(ChannelStatus::Disconnected);
                return Err(e);
            }
        };
        status_tx.send_replace(ChannelStatus::Connected);

        let (outbound_tx, outbound_rx) = mpsc::channel(config.event_buffer);
        let (events_tx, _) = broadcast::channel(config.event_buffer);
        let (conversation_tx, conversation_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = tokio::spawn(supervise(
            config,
            token,
            ws_sender,
            ws_reader,
            outbound_rx,
            events_tx.clone(),
            status_tx.clone(),
            conversation_rx,
            shutdown_rx,
        ));

        Ok(Self {
            inner: Arc::new(ChannelInner {
                outbound_tx,
                events_tx,
                status_tx,
                conversation_tx,
                shutdown_tx,
                supervisor: parking_lot::Mutex::new(Some(supervisor)),
            }),
        })
    }

    /// Subscribes to the stream of server events.
    ///
    /// Each subscriber gets its own receiver; slow subscribers may
    /// observe `Lagged` and should resynchronize from component state.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Returns a watch receiver for the connection status.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Current status snapshot.
    #[must_use]
    pub fn current_status(&self) -> ChannelStatus {
        *self.inner.status_tx.borrow()
    }

    /// Announces the active conversation to the hub and remembers it so
    /// the supervisor can re-announce after a reconnect.
    ///
    /// # Errors
    ///
    /// Propagates [`EventSink::send_event`] errors for the join
    /// announcement.
    pub fn set_conversation(&self, conversation: ConversationId) -> Result<(), ChannelError> {
        self.inner
            .conversation_tx
            .send_replace(Some(conversation.clone()));
        self.send_event(ClientEvent::JoinGroup { conversation })
    }

    /// Shuts the channel down and waits for the supervisor to exit.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let handle = self.inner.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.status_tx.send_replace(ChannelStatus::Disconnected);
    }
}

impl EventSink for Channel {
    fn send_event(&self, event: ClientEvent) -> Result<(), ChannelError> {
        if *self.inner.status_tx.borrow() != ChannelStatus::Connected {
            return Err(ChannelError::NotConnected);
        }
        self.inner.outbound_tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }
}

/// Why `establish` failed: fatal errors stop the reconnect loop.
enum EstablishError {
    /// Credential rejection. Retrying cannot help.
    Fatal(ChannelError),
    /// Network-level failure; worth retrying.
    Retryable(ChannelError),
}

/// Connects the WebSocket and completes the authenticated handshake.
///
/// The first frame on a fresh connection is always `Authenticate`; the
/// hub answers with `Authenticated` or `AuthRejected` before any other
/// traffic.
async fn establish(
    config: &ChannelConfig,
    token: &str,
) -> Result<(WsSender, WsReader), EstablishError> {
    let (ws_stream, _response) =
        tokio::time::timeout(config.connect_timeout, connect_async(&config.url))
            .await
            .map_err(|_| {
                tracing::warn!(url = %config.url, "channel connect timed out");
                EstablishError::Retryable(ChannelError::Timeout)
            })?
            .map_err(|e| {
                tracing::warn!(url = %config.url, err = %e, "channel connect failed");
                EstablishError::Retryable(ChannelError::Transport(e.to_string()))
            })?;

    let (mut ws_sender, mut ws_reader) = ws_stream.split();

    let auth = ClientEvent::Authenticate {
        token: token.to_string(),
    };
    let bytes = codec::encode(&auth)
        .map_err(|e| EstablishError::Fatal(ChannelError::Codec(e)))?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| EstablishError::Retryable(ChannelError::Transport(e.to_string())))?;

    let deadline = tokio::time::Instant::now() + config.auth_timeout;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = %config.url, "authentication handshake timed out");
                EstablishError::Retryable(ChannelError::Timeout)
            })?;

        match frame {
            Some(Ok(Message::Binary(data))) => match codec::decode::<ServerEvent>(&data) {
                Ok(ServerEvent::Authenticated { user_id }) => {
                    tracing::info!(user_id = %user_id, url = %config.url, "channel authenticated");
                    return Ok((ws_sender, ws_reader));
                }
                Ok(ServerEvent::AuthRejected { reason }) => {
                    tracing::warn!(reason = %reason, "channel authentication rejected");
                    return Err(EstablishError::Fatal(ChannelError::AuthRejected(reason)));
                }
                Ok(other) => {
                    // Events that raced ahead of the handshake answer are dropped.
                    tracing::debug!(?other, "event before handshake completion, skipping");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed frame during handshake, skipping");
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(EstablishError::Retryable(ChannelError::Transport(
                    "connection closed during handshake".into(),
                )));
            }
            Some(Ok(_)) => {
                // Ping/pong/text frames are irrelevant to the handshake.
            }
            Some(Err(e)) => {
                return Err(EstablishError::Retryable(ChannelError::Transport(
                    e.to_string(),
                )));
            }
        }
    }
}

/// Linear backoff: `initial + step * (attempt - 1)`, capped.
fn reconnect_delay(config: &ChannelConfig, attempt: u32) -> Duration {
    let extra = config
        .reconnect_step
        .saturating_mul(attempt.saturating_sub(1));
    config
        .reconnect_initial_delay
        .saturating_add(extra)
        .min(config.reconnect_max_delay)
}

/// How a pump run over one connection ended.
enum PumpExit {
    /// Shutdown was requested.
    Shutdown,
    /// The connection dropped; the supervisor should reconnect.
    ConnectionLost,
}

/// Supervisor task: pumps one connection at a time, reconnecting with
/// bounded linear backoff when the socket drops.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    config: ChannelConfig,
    token: String,
    mut ws_sender: WsSender,
    mut ws_reader: WsReader,
    mut outbound_rx: mpsc::Receiver<ClientEvent>,
    events_tx: broadcast::Sender<ServerEvent>,
    status_tx: watch::Sender<ChannelStatus>,
    conversation_rx: watch::Receiver<Option<ConversationId>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let exit = pump(
            &mut ws_sender,
            &mut ws_reader,
            &mut outbound_rx,
            &events_tx,
            &mut shutdown_rx,
        )
        .await;

        match exit {
            PumpExit::Shutdown => {
                let _ = ws_sender.close().await;
                tracing::info!("channel supervisor shutting down");
                return;
            }
            PumpExit::ConnectionLost => {
                tracing::warn!("channel connection lost, entering reconnect");
            }
        }

        let mut attempt: u32 = 1;
        loop {
            if attempt > config.max_reconnect_attempts {
                tracing::error!(
                    attempts = config.max_reconnect_attempts,
                    "reconnect attempts exhausted, channel giving up"
                );
                status_tx.send_replace(ChannelStatus::Disconnected);
                return;
            }
            status_tx.send_replace(ChannelStatus::Reconnecting { attempt });

            let delay = reconnect_delay(&config, attempt);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    status_tx.send_replace(ChannelStatus::Disconnected);
                    return;
                }
            }

            match establish(&config, &token).await {
                Ok((sender, reader)) => {
                    ws_sender = sender;
                    ws_reader = reader;
                    // Restore group membership before resuming traffic.
                    let active = conversation_rx.borrow().clone();
                    if let Some(conversation) = active {
                        let join = ClientEvent::JoinGroup { conversation };
                        if let Ok(bytes) = codec::encode(&join)
                            && ws_sender.send(Message::Binary(bytes.into())).await.is_err()
                        {
                            tracing::warn!("re-announce failed, retrying reconnect");
                            attempt += 1;
                            continue;
                        }
                    }
                    tracing::info!(attempt, "channel reconnected");
                    status_tx.send_replace(ChannelStatus::Connected);
                    break;
                }
                Err(EstablishError::Fatal(e)) => {
                    tracing::error!(err = %e, "fatal error during reconnect, channel giving up");
                    status_tx.send_replace(ChannelStatus::Disconnected);
                    return;
                }
                Err(EstablishError::Retryable(e)) => {
                    tracing::debug!(attempt, err = %e, "reconnect attempt failed");
                    attempt += 1;
                }
            }
        }
    }
}

/// Pumps outbound events and inbound frames over one live connection.
async fn pump(
    ws_sender: &mut WsSender,
    ws_reader: &mut WsReader,
    outbound_rx: &mut mpsc::Receiver<ClientEvent>,
    events_tx: &broadcast::Sender<ServerEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> PumpExit {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return PumpExit::Shutdown;
                }
            }
            event = outbound_rx.recv() => {
                let Some(event) = event else {
                    // All handles dropped; treat as shutdown.
                    return PumpExit::Shutdown;
                };
                let bytes = match codec::encode(&event) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!(err = %e, "failed to encode outbound event, dropping");
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Binary(bytes.into())).await {
                    tracing::warn!(err = %e, "outbound send failed");
                    // A message lost on a dying socket must still resolve
                    // locally, otherwise its optimistic entry hangs forever.
                    if let ClientEvent::SendMessage { client_temp_id, .. } = event {
                        let _ = events_tx.send(ServerEvent::MessageError {
                            client_temp_id: Some(client_temp_id),
                            reason: "connection lost before the message was sent".into(),
                        });
                    }
                    return PumpExit::ConnectionLost;
                }
            }
            frame = ws_reader.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        match codec::decode::<ServerEvent>(&data) {
                            Ok(event) => {
                                // No subscribers is fine; ignore the error.
                                let _ = events_tx.send(event);
                            }
                            Err(e) => {
                                // Malformed frames are skipped, not fatal.
                                tracing::warn!(err = %e, "malformed channel frame, skipping");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("channel closed by server");
                        return PumpExit::ConnectionLost;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong/text frames are ignored.
                    }
                    Some(Err(e)) => {
                        tracing::warn!(err = %e, "channel read error");
                        return PumpExit::ConnectionLost;
                    }
                    None => {
                        return PumpExit::ConnectionLost;
                    }
                }
            }
        }
    }
}
