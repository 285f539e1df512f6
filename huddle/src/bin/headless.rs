//! Headless Huddle client for development and diagnostics.
//!
//! Connects the sync core to a hub without any UI: stdin lines become
//! messages, incoming events are printed to stdout. Calls and media are
//! stubbed out — this binary has no devices and no call signaling
//! endpoint.
//!
//! ```bash
//! cargo run --bin headless -- --server-url ws://127.0.0.1:9100/ws \
//!     --user-id alice --token alice
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use huddle::call::api::{ApiError, CallApi};
use huddle::chat::ChatEvent;
use huddle::client::HuddleClient;
use huddle::config::{CliArgs, ClientConfig};
use huddle::media::{MediaDevices, MediaError, MediaTrack};
use huddle::presence::PresenceView;
use huddle::session::{Role, SessionContext};
use huddle_proto::call::{CallInfo, CallType, Participant};
use huddle_proto::ids::{CallId, ConversationId, UserId};
use huddle_proto::message::MessageBody;

/// Call signaling stub: this binary has no call endpoint.
struct NoCallApi;

impl CallApi for NoCallApi {
    async fn create_call(
        &self,
        _conversation: &ConversationId,
        _call_type: CallType,
    ) -> Result<CallInfo, ApiError> {
        Err(ApiError::Server("calls are not available headless".into()))
    }

    async fn join_call(&self, _call_id: &CallId) -> Result<CallInfo, ApiError> {
        Err(ApiError::Server("calls are not available headless".into()))
    }

    async fn leave_call(&self, _call_id: &CallId) -> Result<(), ApiError> {
        Ok(())
    }

    async fn end_call(&self, _call_id: &CallId) -> Result<(), ApiError> {
        Ok(())
    }

    async fn force_cleanup(&self, _conversation: &ConversationId) -> Result<(), ApiError> {
        Ok(())
    }

    async fn participants(&self, _call_id: &CallId) -> Result<Vec<Participant>, ApiError> {
        Ok(Vec::new())
    }
}

/// Device stub: a headless process has no microphone or camera.
struct NoDevices;

impl MediaDevices for NoDevices {
    async fn acquire(
        &self,
        _audio: bool,
        _video: bool,
    ) -> Result<Vec<Arc<MediaTrack>>, MediaError> {
        Err(MediaError::Unavailable)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let config = ClientConfig::load(&cli)?;
    let user_id = cli.user_id.clone().unwrap_or_else(|| "anonymous".into());
    let session = SessionContext::new(
        UserId::new(user_id.clone()),
        cli.user_name.clone().unwrap_or(user_id),
        if cli.admin { Role::Admin } else { Role::Member },
        cli.token.clone().unwrap_or_default(),
    );

    tracing::info!(user = %session.user_id, "headless client starting");
    let (client, mut events) =
        HuddleClient::connect(config, session, NoCallApi, NoDevices).await?;

    let conversation = ConversationId::new(cli.conversation.clone());
    client.set_active_conversation(conversation.clone())?;
    println!("joined #{conversation} — type to chat, /help for commands");

    let mut conversation = conversation;
    let mut status = client.status_watch();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if !handle_line(&client, &mut conversation, &line) {
                    break;
                }
            }
            event = events.chat.recv() => {
                let Some(event) = event else { break };
                print_chat_event(&event);
            }
            activity = events.activity.recv() => {
                if let Some(activity) = activity {
                    println!("[activity] {:?}: {}", activity.kind, activity.payload);
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("[channel] {}", *status.borrow_and_update());
            }
        }
    }

    client.shutdown().await;
    tracing::info!("headless client exiting");
    Ok(())
}

/// Handles one stdin line. Returns `false` to quit.
fn handle_line(
    client: &HuddleClient<NoCallApi, NoDevices>,
    conversation: &mut ConversationId,
    line: &str,
) -> bool {
    match line.split_once(' ') {
        Some(("/join", name)) => {
            *conversation = ConversationId::new(name.trim());
            match client.set_active_conversation(conversation.clone()) {
                Ok(()) => println!("joined #{conversation}"),
                Err(e) => println!("join failed: {e}"),
            }
        }
        _ if line == "/who" => match client.presence() {
            PresenceView::Unknown => println!("presence unknown"),
            PresenceView::Snapshot(online) => {
                let mut names: Vec<&str> = online.iter().map(UserId::as_str).collect();
                names.sort_unstable();
                println!("online: {}", names.join(", "));
            }
        },
        _ if line == "/typing" => {
            let users = client.typing_users(conversation);
            if users.is_empty() {
                println!("nobody is typing");
            } else {
                let names: Vec<&str> = users.iter().map(UserId::as_str).collect();
                println!("typing: {}", names.join(", "));
            }
        }
        _ if line == "/quit" => return false,
        _ if line == "/help" => {
            println!("/join <name>  switch conversation");
            println!("/who          list online users");
            println!("/typing       list typing users");
            println!("/quit         exit");
        }
        _ => {
            client.announce_typing(conversation);
            if let Err(e) = client.send_message(conversation, MessageBody::text(line)) {
                println!("not sent: {e}");
            }
        }
    }
    true
}

fn print_chat_event(event: &ChatEvent) {
    match event {
        ChatEvent::EntryAppended { entry, .. } | ChatEvent::EntryUpdated { entry, .. } => {
            println!(
                "[{}] #{} <{}> {} ({:?})",
                format_timestamp_ms(entry.created_at.as_millis()),
                entry.conversation,
                entry.sender_name,
                entry.body.text,
                entry.state,
            );
        }
        ChatEvent::Notification {
            conversation,
            sender_name,
            preview,
        } => {
            println!("[notify] #{conversation} {sender_name}: {preview}");
        }
    }
}

/// Format an epoch-millisecond timestamp as "HH:MM:SS".
fn format_timestamp_ms(ms: u64) -> String {
    use chrono::{Local, TimeZone};
    let secs = (ms / 1000).cast_signed();
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    match Local.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => dt.format("%H:%M:%S").to_string(),
        _ => "??:??:??".to_string(),
    }
}

/// Initialize logging: to a file when given, stderr otherwise.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if let Some(path) = file_path {
        let dir = path.parent()?;
        let file_name = path.file_name()?.to_str()?;
        let file_appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_env_filter(env_filter)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        None
    }
}
