//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It is built once at startup and then shared (behind an `Arc`) by every
//! connection task.
//!
//! [`FileConfig`] is the on-disk shape of the same settings.  Every field has
//! a serde default, so a TOML file only needs to name what it changes:
//!
//! ```toml
//! bind_address = "127.0.0.1"
//! port = 9001
//! max_message_size = 1048576
//! close_timeout_ms = 2000
//! log_level = "debug"
//! ```
//!
//! The binary layers its CLI flags on top of the file values and then calls
//! [`FileConfig::into_server_config`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use plug_core::SessionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `bind_address` is not an IP address.
    #[error("invalid bind address: '{0}'")]
    InvalidBindAddress(String),

    /// A size limit is zero.
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

// ── Runtime config ────────────────────────────────────────────────────────────

/// All runtime configuration for the server.
///
/// # Example
///
/// ```rust
/// use plug_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 9001);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address and port the listener binds to.
    pub bind_addr: SocketAddr,

    /// Largest HTTP upgrade request head accepted before answering 400.
    pub max_handshake_size: usize,

    /// Largest WebSocket message (after reassembly) accepted from a peer.
    /// Larger messages close the connection with status 1009.
    pub max_message_size: usize,

    /// Size of the buffer used for each transport read.
    pub read_buffer_size: usize,

    /// How long a locally initiated close waits for the peer's Close frame
    /// before the transport is released anyway.
    pub close_timeout: Duration,

    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl ServerConfig {
    /// The per-connection protocol settings derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_message_size: self.max_message_size,
        }
    }
}

impl Default for ServerConfig {
    /// | Field              | Default         |
    /// |--------------------|-----------------|
    /// | bind_addr          | `0.0.0.0:9001`  |
    /// | max_handshake_size | 8 KiB           |
    /// | max_message_size   | 16 MiB          |
    /// | read_buffer_size   | 4 KiB           |
    /// | close_timeout      | 5 seconds       |
    /// | log_level          | `info`          |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), default_port()),
            max_handshake_size: default_max_handshake_size(),
            max_message_size: default_max_message_size(),
            read_buffer_size: default_read_buffer_size(),
            close_timeout: Duration::from_millis(default_close_timeout_ms()),
            log_level: default_log_level(),
        }
    }
}

// ── File config ───────────────────────────────────────────────────────────────

/// Configuration as stored in a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_handshake_size")]
    pub max_handshake_size: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9001
}
fn default_max_handshake_size() -> usize {
    8 * 1024
}
fn default_max_message_size() -> usize {
    plug_core::session::machine::DEFAULT_MAX_MESSAGE_SIZE
}
fn default_read_buffer_size() -> usize {
    4 * 1024
}
fn default_close_timeout_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_handshake_size: default_max_handshake_size(),
            max_message_size: default_max_message_size(),
            read_buffer_size: default_read_buffer_size(),
            close_timeout_ms: default_close_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

impl FileConfig {
    /// Parses TOML text.  Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Validates the file values and converts them into a [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidBindAddress`] if `bind_address` is not an IP.
    /// - [`ConfigError::ZeroLimit`] if any size limit is zero.
    pub fn into_server_config(self) -> Result<ServerConfig, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))?;

        for (name, value) in [
            ("max_handshake_size", self.max_handshake_size),
            ("max_message_size", self.max_message_size),
            ("read_buffer_size", self.read_buffer_size),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(name));
            }
        }

        Ok(ServerConfig {
            bind_addr: SocketAddr::new(ip, self.port),
            max_handshake_size: self.max_handshake_size,
            max_message_size: self.max_message_size,
            read_buffer_size: self.read_buffer_size,
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            log_level: self.log_level,
        })
    }
}

/// Loads a [`FileConfig`] from `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read (including when it
/// does not exist: an explicitly named config file is required) or
/// [`ConfigError::Parse`] if it is not valid.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    FileConfig::from_toml(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
