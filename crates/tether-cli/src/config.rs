//! Configuration system for the Tether CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_core::{DEFAULT_CHUNK_SIZE, DEFAULT_RELAY_PORT, RELAY_WS_PATH};
use tether_files::{DEFAULT_SESSION_IDLE_TIMEOUT, FileChunker, ReceiverConfig};
use tether_relay::{HANDSHAKE_TIMEOUT, MAX_MESSAGE_SIZE, RelayServerConfig};

/// Tether configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node identity
    #[serde(default)]
    pub node: NodeConfig,
    /// Relay hub and relay connection
    #[serde(default)]
    pub relay: RelayConfig,
    /// File transfer
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id registered with the relay
    #[serde(default = "default_node_id")]
    pub id: String,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address `tether relay` listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Relay URL nodes connect to
    #[serde(default = "default_relay_url")]
    pub url: String,
    /// Largest WebSocket message the relay accepts
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Seconds allowed for the registration frame
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Root for received files
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Seconds before an idle receive session is evicted
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_node_id() -> String {
    "node_1".to_string()
}

fn default_listen_addr() -> String {
    format!("0.0.0.0:{DEFAULT_RELAY_PORT}")
}

fn default_relay_url() -> String {
    format!("ws://localhost:{DEFAULT_RELAY_PORT}{RELAY_WS_PATH}")
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_handshake_timeout_secs() -> u64 {
    HANDSHAKE_TIMEOUT.as_secs()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tether/storage")
}

fn default_session_idle_timeout_secs() -> u64 {
    DEFAULT_SESSION_IDLE_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            url: default_relay_url(),
            max_message_size: default_max_message_size(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            storage_dir: default_storage_dir(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("tether/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse relay listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.relay.listen_addr.parse()?)
    }

    /// Relay server settings
    #[must_use]
    pub fn relay_server_config(&self) -> RelayServerConfig {
        RelayServerConfig {
            max_message_size: self.relay.max_message_size,
            handshake_timeout: Duration::from_secs(self.relay.handshake_timeout_secs),
        }
    }

    /// Receiver settings, storing under `storage_dir`
    #[must_use]
    pub fn receiver_config(&self, storage_dir: PathBuf) -> ReceiverConfig {
        ReceiverConfig {
            storage_root: storage_dir,
            idle_timeout: Duration::from_secs(self.transfer.session_idle_timeout_secs),
        }
    }

    /// Chunker for outgoing files
    #[must_use]
    pub fn chunker(&self) -> FileChunker {
        FileChunker::with_chunk_size(self.transfer.chunk_size)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        tether_files::storage::validate_name(&self.node.id)
            .map_err(|_| anyhow::anyhow!("Invalid node id: {:?}", self.node.id))?;

        self.parse_listen_addr()?;

        if !(self.relay.url.starts_with("ws://") || self.relay.url.starts_with("wss://")) {
            anyhow::bail!(
                "Invalid relay url: {}. Must start with ws:// or wss://",
                self.relay.url
            );
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > 16 * 1024 * 1024 {
            anyhow::bail!("Chunk size must be between 1 and 16MB");
        }

        // A base64 chunk plus envelope must fit in one relay message
        let encoded_chunk = self.transfer.chunk_size.div_ceil(3) * 4 + 1024;
        if self.relay.max_message_size < encoded_chunk {
            anyhow::bail!(
                "Max message size {} is too small for chunk size {} (need at least {})",
                self.relay.max_message_size,
                self.transfer.chunk_size,
                encoded_chunk
            );
        }

        if self.relay.handshake_timeout_secs == 0 {
            anyhow::bail!("Handshake timeout must be at least 1 second");
        }

        if self.transfer.session_idle_timeout_secs == 0 {
            anyhow::bail!("Session idle timeout must be at least 1 second");
        }

        Ok(())
    }
}
