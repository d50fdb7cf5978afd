//! WebSocket server: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Accepting transport connections from a [`TransportListener`].
//! 2. Reading each HTTP upgrade request head and negotiating the handshake.
//! 3. Writing the 101 response (or a 400 and closing the transport).
//! 4. Registering each upgraded [`Connection`] in the [`ConnectionDirectory`].
//! 5. Running one reader task per connection that feeds bytes to the session
//!    and dispatches complete messages to the [`MessageHandler`].
//! 6. Removing the connection and notifying the handler when it closes.
//! 7. Gracefully shutting down when the `running` flag is cleared: every
//!    open connection is sent `1001 Going Away`.
//!
//! # Scalability
//!
//! Each connection runs in its own Tokio task.  The accept loop never blocks
//! on a connection: it accepts, spawns, and goes straight back to accepting.
//! A slow handler only delays the connection whose message it is handling.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use plug_core::{negotiate, CloseReason, HandshakeError, HandshakeRequest, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpListener;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::{ConnectionDirectory, MessageHandler, MessageSink};
use crate::domain::{ConnectionId, ServerConfig, ServerError};
use crate::infrastructure::connection::Connection;
use crate::infrastructure::transport::TransportListener;

/// How often the accept loop wakes up to check the `running` flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How often shutdown re-checks whether every connection has drained.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ── Server handle ─────────────────────────────────────────────────────────────

/// A cheap, cloneable handle for addressing connections by id.
///
/// This is the [`MessageSink`] handed to every [`MessageHandler`] callback,
/// and can also be held by code outside the server.
#[derive(Debug, Clone, Default)]
pub struct ServerHandle {
    directory: Arc<ConnectionDirectory<Connection>>,
}

impl ServerHandle {
    async fn lookup(&self, id: ConnectionId) -> Result<Arc<Connection>, ServerError> {
        self.directory
            .get(&id)
            .await
            .ok_or(ServerError::ConnectionNotFound(id))
    }

    /// Sends `message` to connection `id`.
    ///
    /// # Errors
    ///
    /// See [`MessageSink::send`].
    pub async fn send(&self, id: ConnectionId, message: Message) -> Result<(), ServerError> {
        self.lookup(id).await?.send(&message).await
    }

    /// Starts the closing handshake on connection `id`.
    ///
    /// # Errors
    ///
    /// See [`MessageSink::close`].
    pub async fn close(&self, id: ConnectionId, reason: CloseReason) -> Result<(), ServerError> {
        self.lookup(id).await?.close(reason).await
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.directory.contains(&id).await
    }

    /// Number of registered (upgraded, not yet released) connections.
    pub async fn len(&self) -> usize {
        self.directory.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.directory.is_empty().await
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.directory.ids().await
    }

    /// Sends `reason` to every open connection.
    ///
    /// Connections that are already closing are skipped.
    pub async fn close_all(&self, reason: &CloseReason) {
        for conn in self.directory.snapshot().await {
            if let Err(e) = conn.close(reason.clone()).await {
                debug!("connection {}: not closed on shutdown: {e}", conn.id());
            }
        }
    }
}

#[async_trait]
impl MessageSink for ServerHandle {
    async fn send(&self, id: ConnectionId, message: Message) -> Result<(), ServerError> {
        ServerHandle::send(self, id, message).await
    }

    async fn close(&self, id: ConnectionId, reason: CloseReason) -> Result<(), ServerError> {
        ServerHandle::close(self, id, reason).await
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// State shared by the accept loop and every connection task.
struct Shared<H> {
    config: ServerConfig,
    handler: H,
    handle: ServerHandle,
}

/// The WebSocket upgrade server.
pub struct Server<H> {
    shared: Arc<Shared<H>>,
}

impl<H: MessageHandler> Server<H> {
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                handler,
                handle: ServerHandle::default(),
            }),
        }
    }

    /// A handle for addressing this server's connections.
    pub fn handle(&self) -> ServerHandle {
        self.shared.handle.clone()
    }

    /// Runs the accept loop on `listener` until `running` is set to `false`.
    ///
    /// On shutdown every open connection is sent `1001 Going Away`, and the
    /// call returns once they have all been released or `close_timeout` has
    /// passed.
    pub async fn serve<L: TransportListener>(&self, mut listener: L, running: Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // A short timeout lets the loop notice the flag with no traffic.
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    debug!("new transport connection from {peer}");
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        handle_stream(stream, peer, shared).await;
                    });
                }
                Ok(Err(e)) => {
                    // Transient accept error (e.g., too many open file descriptors).
                    error!("accept error: {e}");
                }
                Err(_) => {}
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&self) {
        let handle = &self.shared.handle;
        let open = handle.len().await;
        if open == 0 {
            return;
        }
        info!("closing {open} open connection(s)");
        handle.close_all(&CloseReason::going_away()).await;

        let deadline = Instant::now() + self.shared.config.close_timeout;
        while !handle.is_empty().await {
            if Instant::now() >= deadline {
                warn!(
                    "{} connection(s) still open after close timeout",
                    handle.len().await
                );
                break;
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

/// Binds a TCP listener on `config.bind_addr` and serves `handler` on it until
/// `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (e.g., the port is already
/// in use or the process lacks permission to bind).
pub async fn run_server<H: MessageHandler>(
    config: ServerConfig,
    handler: H,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;
    let local = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!("WebSocket server listening on {local}");

    Server::new(config, handler).serve(listener, running).await;
    Ok(())
}

// ── Per-connection task ───────────────────────────────────────────────────────

/// The outcome of reading an upgrade request head.
enum RequestHead {
    /// A complete head, plus any bytes the peer sent after it.
    Complete(HandshakeRequest, Vec<u8>),
    /// The head is malformed or too large.
    Rejected(HandshakeError),
    /// The peer closed the transport before finishing the head.
    Eof,
}

/// Top-level handler for one accepted transport.
///
/// Wraps [`run_connection`] and logs the outcome.
async fn handle_stream<S, H>(stream: S, peer: SocketAddr, shared: Arc<Shared<H>>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    H: MessageHandler,
{
    match run_connection(stream, peer, shared).await {
        Ok(()) => debug!("transport {peer} finished"),
        Err(e) => warn!("transport {peer} finished with error: {e}"),
    }
}

/// Runs the complete lifecycle of one transport: handshake, registration,
/// message pump, and cleanup.
async fn run_connection<S, H>(
    stream: S,
    peer: SocketAddr,
    shared: Arc<Shared<H>>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    H: MessageHandler,
{
    let config = &shared.config;
    let (mut reader, mut writer) = tokio::io::split(stream);

    // ── Step 1: Handshake ─────────────────────────────────────────────────────
    let (request, leftover) =
        match read_request_head(&mut reader, config.max_handshake_size, config.read_buffer_size)
            .await?
        {
            RequestHead::Complete(request, leftover) => (request, leftover),
            RequestHead::Rejected(e) => return reject(&mut writer, peer, &e).await,
            RequestHead::Eof => {
                debug!("transport {peer} closed before completing the handshake");
                return Ok(());
            }
        };

    let response = match negotiate(&request) {
        Ok(response) => response,
        Err(e) => return reject(&mut writer, peer, &e).await,
    };
    writer.write_all(&response.to_bytes()).await?;
    writer.flush().await?;

    // ── Step 2: Register ──────────────────────────────────────────────────────
    let id = Uuid::new_v4();
    let conn = Arc::new(Connection::new(
        id,
        peer,
        Box::new(writer),
        config.session_config(),
    ));
    if !shared.handle.directory.insert(id, Arc::clone(&conn)).await {
        // A v4 collision: refuse rather than shadow the live entry.
        error!("connection id {id} already registered; dropping {peer}");
        conn.release().await;
        return Ok(());
    }
    info!("connection {id} opened from {peer} (path {})", request.path);
    shared.handler.on_open(&shared.handle, id).await;

    // ── Step 3: Message pump ──────────────────────────────────────────────────
    let result = pump(&conn, reader, &leftover, &shared).await;

    // ── Step 4: Cleanup ───────────────────────────────────────────────────────
    let reason = conn.release().await;
    shared.handle.directory.remove(&id).await;
    info!("connection {id} closed");
    shared.handler.on_close(id, reason).await;
    result
}

/// Reads from `reader` until a complete request head has arrived.
async fn read_request_head<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
    chunk_size: usize,
) -> Result<RequestHead, ServerError> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; chunk_size.min(max_size).max(1)];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(RequestHead::Eof);
        }
        buf.extend_from_slice(&chunk[..n]);

        match HandshakeRequest::parse(&buf) {
            Ok(Some((request, head_len))) => {
                return Ok(RequestHead::Complete(request, buf.split_off(head_len)));
            }
            Ok(None) if buf.len() >= max_size => {
                return Ok(RequestHead::Rejected(HandshakeError::BadRequest(format!(
                    "request head exceeds {max_size} bytes"
                ))));
            }
            Ok(None) => {}
            Err(e) => return Ok(RequestHead::Rejected(e)),
        }
    }
}

/// Writes the 400 response for `error` and releases the transport.
async fn reject<W: AsyncWrite + Unpin>(
    writer: &mut W,
    peer: SocketAddr,
    error: &HandshakeError,
) -> Result<(), ServerError> {
    warn!("rejecting upgrade from {peer}: {error}");
    writer.write_all(&error.response_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Feeds transport bytes to `conn` and delivers messages until the session
/// asks for release, the transport ends, or a local close times out.
async fn pump<S, H>(
    conn: &Connection,
    mut reader: ReadHalf<S>,
    leftover: &[u8],
    shared: &Shared<H>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    H: MessageHandler,
{
    // Bytes pipelined behind the request head are the first frames.
    if !leftover.is_empty() && dispatch(conn, leftover, shared).await? {
        return Ok(());
    }

    let mut buf = vec![0u8; shared.config.read_buffer_size];
    let mut close_deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    debug!("connection {}: transport closed by peer", conn.id());
                    return Ok(());
                }
                if dispatch(conn, &buf[..n], shared).await? {
                    return Ok(());
                }
            }
            _ = conn.closed_locally(), if close_deadline.is_none() => {
                close_deadline = Some(Instant::now() + shared.config.close_timeout);
            }
            _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                debug!("connection {}: no close reply within timeout", conn.id());
                return Ok(());
            }
        }
    }
}

/// Passes one chunk to the connection and the resulting messages to the
/// handler.  Returns `true` when the transport should be released.
async fn dispatch<H: MessageHandler>(
    conn: &Connection,
    chunk: &[u8],
    shared: &Shared<H>,
) -> Result<bool, ServerError> {
    let inbound = conn.on_bytes(chunk).await?;
    for message in inbound.messages {
        shared
            .handler
            .on_message(&shared.handle, conn.id(), message)
            .await;
    }
    Ok(inbound.release)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::EchoHandler;
    use plug_core::{decode_frame, encode_frame, CloseCode, OpCode};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    const UPGRADE: &str = "GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    /// Hands pre-made in-memory streams to the server.
    struct ChannelListener {
        rx: mpsc::Receiver<DuplexStream>,
    }

    #[async_trait]
    impl TransportListener for ChannelListener {
        type Stream = DuplexStream;

        async fn accept(&mut self) -> std::io::Result<(DuplexStream, SocketAddr)> {
            match self.rx.recv().await {
                Some(stream) => Ok((stream, "127.0.0.1:40000".parse().unwrap())),
                None => std::future::pending().await,
            }
        }
    }

    struct Harness {
        streams: mpsc::Sender<DuplexStream>,
        handle: ServerHandle,
        running: Arc<AtomicBool>,
        server: tokio::task::JoinHandle<()>,
    }

    fn start(config: ServerConfig) -> Harness {
        let (tx, rx) = mpsc::channel(8);
        let server = Server::new(config, EchoHandler);
        let handle = server.handle();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let task = tokio::spawn(async move {
            server.serve(ChannelListener { rx }, flag).await;
        });
        Harness {
            streams: tx,
            handle,
            running,
            server: task,
        }
    }

    async fn connect(harness: &Harness) -> DuplexStream {
        let (client, server_side) = tokio::io::duplex(64 * 1024);
        harness.streams.send(server_side).await.unwrap();
        client
    }

    /// Reads until the end of an HTTP response head and returns it.
    async fn read_head(stream: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        String::from_utf8(head).unwrap()
    }

    /// Reads exactly one frame from the stream.
    async fn read_frame(stream: &mut DuplexStream) -> plug_core::Frame {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if let Ok((frame, _)) = decode_frame(&buf) {
                return frame;
            }
            stream.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
        }
    }

    async fn wait_for_len(handle: &ServerHandle, expected: usize) {
        timeout(Duration::from_secs(2), async {
            while handle.len().await != expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("directory did not reach expected size");
    }

    #[tokio::test]
    async fn test_upgrade_then_echo() {
        // Arrange
        let harness = start(ServerConfig::default());
        let mut client = connect(&harness).await;

        // Act
        client.write_all(UPGRADE.as_bytes()).await.unwrap();
        let head = read_head(&mut client).await;
        client
            .write_all(&encode_frame(OpCode::Text, b"hello", true, true))
            .await
            .unwrap();
        let frame = read_frame(&mut client).await;

        // Assert
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"hello");
        assert!(!frame.is_masked());
        assert_eq!(harness.handle.len().await, 1);
    }

    #[tokio::test]
    async fn test_frame_pipelined_with_request_is_delivered() {
        let harness = start(ServerConfig::default());
        let mut client = connect(&harness).await;

        let mut bytes = UPGRADE.as_bytes().to_vec();
        bytes.extend(encode_frame(OpCode::Binary, &[9, 8, 7], true, true));
        client.write_all(&bytes).await.unwrap();
        read_head(&mut client).await;
        let frame = read_frame(&mut client).await;

        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload, [9, 8, 7]);
    }

    #[tokio::test]
    async fn test_bad_request_gets_400_and_is_not_registered() {
        // Arrange
        let harness = start(ServerConfig::default());
        let mut client = connect(&harness).await;

        // Act
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        // Assert
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(harness.handle.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_request_head_is_rejected() {
        let harness = start(ServerConfig {
            max_handshake_size: 64,
            ..ServerConfig::default()
        });
        let mut client = connect(&harness).await;

        client.write_all(UPGRADE.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        assert!(response.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn test_peer_close_removes_connection() {
        // Arrange
        let harness = start(ServerConfig::default());
        let mut client = connect(&harness).await;
        client.write_all(UPGRADE.as_bytes()).await.unwrap();
        read_head(&mut client).await;
        wait_for_len(&harness.handle, 1).await;

        // Act
        let payload = CloseReason::normal().encode();
        client
            .write_all(&encode_frame(OpCode::Close, &payload, true, true))
            .await
            .unwrap();
        let echo = read_frame(&mut client).await;

        // Assert
        assert_eq!(echo.opcode, OpCode::Close);
        assert_eq!(echo.payload, payload);
        wait_for_len(&harness.handle, 0).await;
    }

    #[tokio::test]
    async fn test_dropped_transport_removes_connection() {
        let harness = start(ServerConfig::default());
        let mut client = connect(&harness).await;
        client.write_all(UPGRADE.as_bytes()).await.unwrap();
        read_head(&mut client).await;
        wait_for_len(&harness.handle, 1).await;

        drop(client);

        wait_for_len(&harness.handle, 0).await;
    }

    #[tokio::test]
    async fn test_handle_send_reaches_client_and_unknown_id_fails() {
        let harness = start(ServerConfig::default());
        let mut client = connect(&harness).await;
        client.write_all(UPGRADE.as_bytes()).await.unwrap();
        read_head(&mut client).await;
        wait_for_len(&harness.handle, 1).await;
        let id = harness.handle.ids().await[0];

        harness
            .handle
            .send(id, Message::from("server push"))
            .await
            .unwrap();
        let frame = read_frame(&mut client).await;
        let missing = harness
            .handle
            .send(Uuid::new_v4(), Message::from("nobody"))
            .await;

        assert_eq!(frame.payload, b"server push");
        assert!(harness.handle.contains(id).await);
        assert!(matches!(missing, Err(ServerError::ConnectionNotFound(_))));
    }

    #[tokio::test]
    async fn test_local_close_without_reply_times_out() {
        let harness = start(ServerConfig {
            close_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        });
        let mut client = connect(&harness).await;
        client.write_all(UPGRADE.as_bytes()).await.unwrap();
        read_head(&mut client).await;
        wait_for_len(&harness.handle, 1).await;
        let id = harness.handle.ids().await[0];

        harness
            .handle
            .close(id, CloseReason::new(CloseCode::PolicyViolation, "bye"))
            .await
            .unwrap();
        let frame = read_frame(&mut client).await;

        assert_eq!(frame.opcode, OpCode::Close);
        wait_for_len(&harness.handle, 0).await;
    }

    #[tokio::test]
    async fn test_shutdown_sends_going_away() {
        // Arrange
        let harness = start(ServerConfig {
            close_timeout: Duration::from_millis(200),
            ..ServerConfig::default()
        });
        let mut client = connect(&harness).await;
        client.write_all(UPGRADE.as_bytes()).await.unwrap();
        read_head(&mut client).await;
        wait_for_len(&harness.handle, 1).await;

        // Act
        harness.running.store(false, Ordering::Relaxed);
        let frame = read_frame(&mut client).await;
        client
            .write_all(&encode_frame(OpCode::Close, &frame.payload, true, true))
            .await
            .unwrap();

        // Assert
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(
            CloseReason::parse(&frame.payload).unwrap().code,
            Some(CloseCode::GoingAway)
        );
        timeout(Duration::from_secs(2), harness.server)
            .await
            .expect("server must stop")
            .unwrap();
        assert!(harness.handle.is_empty().await);
    }
}
