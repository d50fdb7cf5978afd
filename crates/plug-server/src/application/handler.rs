//! The seams between the server and the embedding application.
//!
//! - [`MessageHandler`] is implemented by the application.  The server calls
//!   it when a connection opens, for every complete message, and when the
//!   connection is gone.
//! - [`MessageSink`] is implemented by the server.  Handlers use it to send
//!   messages to (or close) any registered connection by id.
//!
//! Handlers are invoked from the connection's reader task with no connection
//! lock held, so a handler may freely call back into the sink, including for
//! the connection that produced the message.

use async_trait::async_trait;
use plug_core::{CloseReason, Message};
use tracing::{debug, info, warn};

use crate::domain::{ConnectionId, ServerError};

/// Outbound operations on registered connections.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Sends one message to connection `id`.
    ///
    /// # Errors
    ///
    /// - [`ServerError::ConnectionNotFound`] if `id` is not registered.
    /// - [`ServerError::ConnectionClosed`] if the connection is no longer open.
    /// - [`ServerError::Transport`] if the write fails.
    async fn send(&self, id: ConnectionId, message: Message) -> Result<(), ServerError>;

    /// Starts the closing handshake on connection `id`.
    ///
    /// # Errors
    ///
    /// Same as [`MessageSink::send`].
    async fn close(&self, id: ConnectionId, reason: CloseReason) -> Result<(), ServerError>;
}

/// Application callbacks for connection events.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Called once, after the 101 response is written and the connection is
    /// registered.
    async fn on_open(&self, _sink: &dyn MessageSink, _id: ConnectionId) {}

    /// Called for every complete Text or Binary message, in arrival order.
    async fn on_message(&self, sink: &dyn MessageSink, id: ConnectionId, message: Message);

    /// Called once, after the connection has been removed from the directory.
    ///
    /// `reason` is the peer's Close payload when the peer sent one.
    async fn on_close(&self, _id: ConnectionId, _reason: Option<CloseReason>) {}
}

// ── Stock handlers ────────────────────────────────────────────────────────────

/// Sends every message straight back to the connection it came from.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn on_message(&self, sink: &dyn MessageSink, id: ConnectionId, message: Message) {
        if let Err(e) = sink.send(id, message).await {
            if e.is_closed() {
                debug!("connection {id}: echo dropped, {e}");
            } else {
                warn!("connection {id}: echo failed: {e}");
            }
        }
    }
}

/// Logs connection events and message sizes without replying.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn on_open(&self, _sink: &dyn MessageSink, id: ConnectionId) {
        info!("connection {id}: opened");
    }

    async fn on_message(&self, _sink: &dyn MessageSink, id: ConnectionId, message: Message) {
        match &message {
            Message::Text(text) => info!("connection {id}: text message ({} bytes)", text.len()),
            Message::Binary(data) => info!("connection {id}: binary message ({} bytes)", data.len()),
        }
    }

    async fn on_close(&self, id: ConnectionId, reason: Option<CloseReason>) {
        match reason.and_then(|r| r.code) {
            Some(code) => info!("connection {id}: closed by peer with {code}"),
            None => info!("connection {id}: closed"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use plug_core::ConnectionState;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Records every call so handler behaviour can be asserted.
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(ConnectionId, Message)>>,
        closed: Mutex<Vec<(ConnectionId, CloseReason)>>,
        refuse: bool,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, id: ConnectionId, message: Message) -> Result<(), ServerError> {
            if self.refuse {
                return Err(ServerError::ConnectionClosed {
                    id,
                    state: ConnectionState::Closing,
                });
            }
            self.sent.lock().await.push((id, message));
            Ok(())
        }

        async fn close(&self, id: ConnectionId, reason: CloseReason) -> Result<(), ServerError> {
            self.closed.lock().await.push((id, reason));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_echo_handler_sends_message_back_to_origin() {
        // Arrange
        let sink = RecordingSink::default();
        let id = Uuid::new_v4();

        // Act
        EchoHandler
            .on_message(&sink, id, Message::from("ping me"))
            .await;

        // Assert
        let sent = sink.sent.lock().await;
        assert_eq!(sent.as_slice(), &[(id, Message::from("ping me"))]);
    }

    #[tokio::test]
    async fn test_echo_handler_preserves_binary_messages() {
        let sink = RecordingSink::default();
        let id = Uuid::new_v4();

        EchoHandler
            .on_message(&sink, id, Message::Binary(vec![0, 1, 2]))
            .await;

        assert_eq!(sink.sent.lock().await[0].1, Message::Binary(vec![0, 1, 2]));
    }

    #[tokio::test]
    async fn test_echo_handler_tolerates_closed_connection() {
        let sink = RecordingSink {
            refuse: true,
            ..RecordingSink::default()
        };
        EchoHandler
            .on_message(&sink, Uuid::new_v4(), Message::from("late"))
            .await;
        assert!(sink.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_log_handler_never_replies() {
        let sink = RecordingSink::default();
        let id = Uuid::new_v4();

        LogHandler.on_open(&sink, id).await;
        LogHandler.on_message(&sink, id, Message::from("quiet")).await;
        LogHandler.on_close(id, Some(CloseReason::normal())).await;

        assert!(sink.sent.lock().await.is_empty());
        assert!(sink.closed.lock().await.is_empty());
    }
}
