//! The listener seam the server accepts connections from.
//!
//! Any byte stream works as a transport as long as it is readable, writable
//! and can move between tasks.  Production uses TCP; tests hand the server
//! in-memory `tokio::io::duplex` pipes.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// A source of inbound transport connections.
#[async_trait]
pub trait TransportListener: Send + 'static {
    /// The byte stream produced for each accepted connection.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Waits for the next inbound connection.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.  The server logs it and keeps
    /// accepting.
    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;
}

#[async_trait]
impl TransportListener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        // Small frames (pongs, close echoes) should not wait for Nagle.
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_listener_accepts_and_reports_peer() {
        // Arrange
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
            stream.local_addr().unwrap()
        });

        // Act
        let (mut stream, peer) = TransportListener::accept(&mut listener).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();

        // Assert
        assert_eq!(&buf, b"hi");
        assert_eq!(peer, client.await.unwrap());
        assert!(stream.nodelay().unwrap());
    }
}
