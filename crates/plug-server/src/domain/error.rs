//! Errors surfaced to collaborators that address connections by id.

use plug_core::ConnectionState;
use thiserror::Error;

use crate::domain::ConnectionId;

/// Error type for operations on registered connections.
#[derive(Debug, Error)]
pub enum ServerError {
    /// No connection with this id is registered (never was, or already removed).
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The connection exists but can no longer send.
    #[error("connection {id} is {state}")]
    ConnectionClosed {
        id: ConnectionId,
        state: ConnectionState,
    },

    /// Reading from or writing to the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl ServerError {
    /// `true` if the error means the connection is gone or going away.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ServerError::ConnectionNotFound(_) | ServerError::ConnectionClosed { .. }
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
