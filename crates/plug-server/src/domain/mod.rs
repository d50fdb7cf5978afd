//! Domain layer for plug-server.
//!
//! Plain types that describe the server without doing any I/O: runtime
//! configuration, connection identity and the errors callers can observe.

pub mod config;
pub mod error;

pub use config::{load_file_config, ConfigError, FileConfig, ServerConfig};
pub use error::ServerError;

/// Identifies one upgraded connection for its whole lifetime.
///
/// A random (v4) UUID is assigned when the handshake succeeds.
pub type ConnectionId = uuid::Uuid;
