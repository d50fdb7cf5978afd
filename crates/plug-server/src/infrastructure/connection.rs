//! One upgraded connection: a `plug-core` [`Session`] bound to the write half
//! of its transport.
//!
//! # Who touches what
//!
//! - The connection's reader task (see `server.rs`) owns the transport's read
//!   half and feeds every chunk it reads into [`Connection::on_bytes`].
//! - Any task may call [`Connection::send`] or [`Connection::close`] through
//!   the server handle.
//!
//! Both paths go through one async `Mutex` around the session and the writer,
//! so frames are never interleaved on the wire and the session is only ever
//! mutated by one task at a time.  Messages are returned to the caller rather
//! than delivered under the lock.
//!
//! The write half lives in an `Option` and is `take()`n by
//! [`Connection::release`], which makes releasing the transport an exactly
//! once operation no matter how many paths race to do it.

use std::net::SocketAddr;

use plug_core::{CloseReason, ConnectionState, Message, Session, SessionAction, SessionConfig};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::domain::{ConnectionId, ServerError};

/// The boxed write half of a transport.
pub type TransportWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The result of feeding one chunk of bytes to a connection.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Inbound {
    /// Complete messages for the application, in arrival order.
    pub messages: Vec<Message>,
    /// The session asked for the transport to be released.
    pub release: bool,
}

struct ConnectionInner {
    session: Session,
    writer: Option<TransportWriter>,
}

/// A registered WebSocket connection.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    inner: Mutex<ConnectionInner>,
    /// Signalled when a local close is sent, so the reader can arm its timeout.
    closing: Notify,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates an `Open` connection over `writer`.
    ///
    /// Call this only after the 101 response has been written.
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        writer: TransportWriter,
        config: SessionConfig,
    ) -> Self {
        let mut session = Session::new(config);
        session.open();
        Self {
            id,
            peer,
            inner: Mutex::new(ConnectionInner {
                session,
                writer: Some(writer),
            }),
            closing: Notify::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.session.state()
    }

    /// Sends one message as a single unmasked frame.
    ///
    /// # Errors
    ///
    /// - [`ServerError::ConnectionClosed`] unless the connection is `Open`.
    /// - [`ServerError::Transport`] if the write fails.
    pub async fn send(&self, message: &Message) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().await;
        let state = inner.session.state();
        let bytes = inner
            .session
            .encode_message(message)
            .map_err(|_| ServerError::ConnectionClosed { id: self.id, state })?;
        write_to(&mut inner.writer, &bytes, self.id, state).await
    }

    /// Sends a Close frame and moves the connection to `Closing`.
    ///
    /// The reader task keeps running until the peer answers or the close
    /// timeout expires.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn close(&self, reason: CloseReason) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().await;
        let state = inner.session.state();
        let bytes = inner
            .session
            .close(&reason)
            .map_err(|_| ServerError::ConnectionClosed { id: self.id, state })?;
        debug!("connection {}: sending close {:?}", self.id, reason.code);
        let result = write_to(&mut inner.writer, &bytes, self.id, state).await;
        self.closing.notify_one();
        result
    }

    /// Feeds one chunk read from the transport through the session.
    ///
    /// Writes any frames the session produces (pongs, close replies) before
    /// returning the delivered messages.
    ///
    /// # Errors
    ///
    /// [`ServerError::Transport`] if one of those writes fails.
    pub async fn on_bytes(&self, chunk: &[u8]) -> Result<Inbound, ServerError> {
        let mut inner = self.inner.lock().await;
        let mut inbound = Inbound::default();
        for action in inner.session.on_bytes(chunk) {
            match action {
                SessionAction::Write(bytes) => {
                    let Some(writer) = inner.writer.as_mut() else {
                        debug!("connection {}: dropping write after release", self.id);
                        continue;
                    };
                    writer.write_all(&bytes).await?;
                    writer.flush().await?;
                }
                SessionAction::Deliver(message) => inbound.messages.push(message),
                SessionAction::Release => inbound.release = true,
            }
        }
        Ok(inbound)
    }

    /// Resolves once a local close has been sent.
    pub async fn closed_locally(&self) {
        self.closing.notified().await;
    }

    /// Releases the transport and marks the connection `Closed`.
    ///
    /// Only the first call shuts the writer down; later calls are no-ops.
    /// Returns the peer's Close payload if one arrived.
    pub async fn release(&self) -> Option<CloseReason> {
        let mut inner = self.inner.lock().await;
        inner.session.on_transport_closed();
        if let Some(mut writer) = inner.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("connection {}: shutdown failed: {e}", self.id);
            }
        }
        inner.session.peer_close_reason().cloned()
    }
}

async fn write_to(
    writer: &mut Option<TransportWriter>,
    bytes: &[u8],
    id: ConnectionId,
    state: ConnectionState,
) -> Result<(), ServerError> {
    let writer = writer
        .as_mut()
        .ok_or(ServerError::ConnectionClosed { id, state })?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
