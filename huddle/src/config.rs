//! Configuration for the Huddle client core.
//!
//! Layered resolution with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attributes)
//! 3. TOML config file (`~/.config/huddle/config.toml`)
//! 4. Compiled defaults
//!
//! A missing config file is not an error (defaults are used). An
//! explicit `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The channel URL is not a valid ws:// or wss:// URL.
    #[error("invalid channel url {url}: {reason}")]
    InvalidChannelUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    channel: ChannelFileConfig,
    presence: PresenceFileConfig,
    typing: TypingFileConfig,
    call: CallFileConfig,
    chat: ChatFileConfig,
}

/// `[channel]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChannelFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    auth_timeout_secs: Option<u64>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_step_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    event_buffer: Option<usize>,
}

/// `[presence]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PresenceFileConfig {
    refresh_timeout_secs: Option<u64>,
}

/// `[typing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TypingFileConfig {
    quiet_window_ms: Option<u64>,
}

/// `[call]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct CallFileConfig {
    participant_poll_interval_secs: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Channel connection and reconnection settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket URL of the event channel (`ws://` or `wss://`).
    pub url: String,
    /// Timeout for establishing the transport connection.
    pub connect_timeout: Duration,
    /// Timeout for the authenticated handshake after connecting.
    pub auth_timeout: Duration,
    /// Delay before the first reconnect attempt.
    pub reconnect_initial_delay: Duration,
    /// Linear increment added per subsequent attempt.
    pub reconnect_step: Duration,
    /// Upper bound on the per-attempt delay.
    pub reconnect_max_delay: Duration,
    /// Attempts before surfacing a persistent-disconnect state.
    pub max_reconnect_attempts: u32,
    /// Capacity of the outbound queue and inbound broadcast buffer.
    pub event_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9100/ws".into(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_step: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            event_buffer: 256,
        }
    }
}

impl ChannelConfig {
    /// Validates the channel URL (must parse and use ws:// or wss://).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidChannelUrl`] on a malformed URL or
    /// an unsupported scheme.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidChannelUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(ConfigError::InvalidChannelUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
        Ok(())
    }
}

/// Presence tracker settings.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// How long an unanswered full-list request may be outstanding
    /// before presence is reported as unknown instead of stale.
    pub refresh_timeout: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(10),
        }
    }
}

/// Typing indicator settings.
#[derive(Debug, Clone)]
pub struct TypingConfig {
    /// Quiet window after which a peer's typing flag expires.
    pub quiet_window: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            quiet_window: Duration::from_secs(3),
        }
    }
}

/// Call coordinator settings.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Interval of the participant refresh poll while a call is active.
    pub participant_poll_interval: Duration,
    /// Capacity of the call event channel.
    pub event_buffer: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            participant_poll_interval: Duration::from_secs(5),
            event_buffer: 64,
        }
    }
}

/// Message reconciliation settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Capacity of the chat event channel.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Channel connection settings.
    pub channel: ChannelConfig,
    /// Presence tracker settings.
    pub presence: PresenceConfig,
    /// Typing indicator settings.
    pub typing: TypingConfig,
    /// Call coordinator settings.
    pub call: CallConfig,
    /// Message reconciliation settings.
    pub chat: ChatConfig,
}

/// Command-line arguments for the headless client binary.
#[derive(Debug, clap::Parser)]
#[command(name = "huddle", about = "Huddle headless client")]
pub struct CliArgs {
    /// Path to a TOML config file (defaults to ~/.config/huddle/config.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// WebSocket URL of the event channel.
    #[arg(long, env = "HUDDLE_SERVER_URL")]
    pub server_url: Option<String>,

    /// Bearer credential for the authenticated handshake.
    #[arg(long, env = "HUDDLE_TOKEN")]
    pub token: Option<String>,

    /// Local user identity.
    #[arg(long, env = "HUDDLE_USER_ID")]
    pub user_id: Option<String>,

    /// Display name (defaults to the user id).
    #[arg(long)]
    pub user_name: Option<String>,

    /// Treat the local user as an administrator.
    #[arg(long)]
    pub admin: bool,

    /// Conversation to join on startup.
    #[arg(long, default_value = "general")]
    pub conversation: String,

    /// Log level filter (e.g. `info`, `huddle=debug`).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Optional log file path (logs go to stderr when omitted).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ClientConfig {
    /// Loads and resolves configuration for the given CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicitly-specified config file
    /// cannot be read, the TOML fails to parse, or the resolved channel
    /// URL is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => Some(read_config_file(path)?),
            None => default_config_path()
                .filter(|p| p.exists())
                .map(|p| read_config_file(&p))
                .transpose()?,
        };

        let mut config = Self::default();
        if let Some(file) = file {
            config.apply_file(file);
        }
        if let Some(url) = &cli.server_url {
            config.channel.url.clone_from(url);
        }
        config.channel.validate()?;
        Ok(config)
    }

    /// Overlays values from a parsed config file onto `self`.
    fn apply_file(&mut self, file: ConfigFile) {
        let ch = file.channel;
        if let Some(url) = ch.url {
            self.channel.url = url;
        }
        if let Some(secs) = ch.connect_timeout_secs {
            self.channel.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = ch.auth_timeout_secs {
            self.channel.auth_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = ch.reconnect_initial_delay_ms {
            self.channel.reconnect_initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = ch.reconnect_step_ms {
            self.channel.reconnect_step = Duration::from_millis(ms);
        }
        if let Some(ms) = ch.reconnect_max_delay_ms {
            self.channel.reconnect_max_delay = Duration::from_millis(ms);
        }
        if let Some(n) = ch.max_reconnect_attempts {
            self.channel.max_reconnect_attempts = n;
        }
        if let Some(n) = ch.event_buffer {
            self.channel.event_buffer = n;
        }
        if let Some(secs) = file.presence.refresh_timeout_secs {
            self.presence.refresh_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.typing.quiet_window_ms {
            self.typing.quiet_window = Duration::from_millis(ms);
        }
        if let Some(secs) = file.call.participant_poll_interval_secs {
            self.call.participant_poll_interval = Duration::from_secs(secs);
        }
        if let Some(n) = file.call.event_buffer {
            self.call.event_buffer = n;
        }
        if let Some(n) = file.chat.event_buffer {
            self.chat.event_buffer = n;
        }
    }
}

/// Reads and parses a config file.
fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Default config file location (`~/.config/huddle/config.toml`).
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("huddle").join("config.toml"))
}
