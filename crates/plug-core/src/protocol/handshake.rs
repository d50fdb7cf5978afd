//! HTTP/1.1 → WebSocket upgrade negotiation (RFC 6455 §4.2).
//!
//! # What happens during the handshake? (for beginners)
//!
//! Every WebSocket connection starts life as an ordinary HTTP request:
//!
//! ```text
//! GET /chat HTTP/1.1
//! Host: example.com:8000
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! The server proves it understood the request by hashing the client's random
//! key together with a fixed GUID and sending the digest back:
//!
//! ```text
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! After the blank line that ends the response, both sides stop speaking HTTP
//! and exchange WebSocket frames on the same TCP connection.
//!
//! Everything in this module is pure: it turns request bytes into response
//! bytes and never touches a socket.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// The GUID appended to the client key before hashing (RFC 6455 §1.3).
pub const WS_MAGIC_STRING: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const SUPPORTED_VERSION: &str = "13";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const KEY_LEN: usize = 16;

/// Reasons an upgrade request is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The request is not a well-formed WebSocket upgrade.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// `Sec-WebSocket-Version` is missing or not `13`.
    #[error("unsupported WebSocket version: {0:?}")]
    UnsupportedVersion(String),
}

impl HandshakeError {
    /// The `400 Bad Request` response to write before closing the transport.
    pub fn response_bytes(&self) -> Vec<u8> {
        let body = self.to_string();
        let mut response = String::from("HTTP/1.1 400 Bad Request\r\n");
        response.push_str("Content-Type: text/plain\r\n");
        response.push_str("Connection: close\r\n");
        if let HandshakeError::UnsupportedVersion(_) = self {
            response.push_str(&format!("Sec-WebSocket-Version: {SUPPORTED_VERSION}\r\n"));
        }
        response.push_str(&format!("Content-Length: {}\r\n", body.len()));
        response.push_str("\r\n");
        response.push_str(&body);
        response.into_bytes()
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// A parsed HTTP request head.
///
/// Built once per inbound connection, handed to [`negotiate`], then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    /// Header lines in arrival order, names as sent by the client.
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Parses the request head at the start of `bytes`.
    ///
    /// Returns `Ok(None)` until the blank line ending the head has arrived,
    /// then `Ok(Some((request, head_len)))`.  Bytes after `head_len` belong to
    /// the WebSocket stream (a client may send its first frame immediately).
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::BadRequest`] if the head is not valid UTF-8,
    /// the request line is malformed, or a header line has no `:`.
    pub fn parse(bytes: &[u8]) -> Result<Option<(Self, usize)>, HandshakeError> {
        let Some(end) = find_head_end(bytes) else {
            return Ok(None);
        };
        let head_len = end + HEAD_TERMINATOR.len();
        let text = std::str::from_utf8(&bytes[..end])
            .map_err(|_| HandshakeError::BadRequest("request head is not UTF-8".to_string()))?;

        let mut lines = text.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ').filter(|p| !p.is_empty());
        let (method, path, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(path), Some(version), None) => (method, path, version),
            _ => {
                return Err(HandshakeError::BadRequest(format!(
                    "malformed request line: {request_line:?}"
                )))
            }
        };
        if version != "HTTP/1.1" {
            return Err(HandshakeError::BadRequest(format!(
                "unsupported HTTP version: {version}"
            )));
        }

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                HandshakeError::BadRequest(format!("malformed header line: {line:?}"))
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Some((
            Self {
                method: method.to_string(),
                path: path.to_string(),
                version: version.to_string(),
                headers,
            },
            head_len,
        )))
    }

    /// Case-insensitive header lookup; returns the first occurrence.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// A successful upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The `Sec-WebSocket-Accept` digest.
    pub accept: String,
}

impl HandshakeResponse {
    /// The `101 Switching Protocols` response, terminated by an empty line.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            self.accept
        )
        .into_bytes()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decides whether to accept an upgrade request.
///
/// Checks, in order: method is `GET`; `Upgrade` is `websocket`; `Connection`
/// lists `Upgrade`; `Sec-WebSocket-Key` is base64 of 16 bytes;
/// `Sec-WebSocket-Version` is `13`.
///
/// # Errors
///
/// [`HandshakeError::BadRequest`] for the first four checks,
/// [`HandshakeError::UnsupportedVersion`] for the last one.
///
/// # Examples
///
/// ```rust
/// use plug_core::protocol::handshake::{negotiate, HandshakeRequest};
///
/// let raw = b"GET /chat HTTP/1.1\r\n\
///             Host: example.com\r\n\
///             Upgrade: websocket\r\n\
///             Connection: Upgrade\r\n\
///             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
///             Sec-WebSocket-Version: 13\r\n\r\n";
/// let (request, _) = HandshakeRequest::parse(raw).unwrap().unwrap();
/// let response = negotiate(&request).unwrap();
/// assert_eq!(response.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn negotiate(request: &HandshakeRequest) -> Result<HandshakeResponse, HandshakeError> {
    if request.method != "GET" {
        return Err(HandshakeError::BadRequest(format!(
            "method must be GET, got {}",
            request.method
        )));
    }

    let upgrade = request.header("Upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::BadRequest(
            "Upgrade header must be \"websocket\"".to_string(),
        ));
    }

    let connection = request.header("Connection").unwrap_or_default();
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(HandshakeError::BadRequest(
            "Connection header must contain \"Upgrade\"".to_string(),
        ));
    }

    let key = request
        .header("Sec-WebSocket-Key")
        .ok_or_else(|| HandshakeError::BadRequest("missing Sec-WebSocket-Key".to_string()))?;
    match BASE64.decode(key) {
        Ok(nonce) if nonce.len() == KEY_LEN => {}
        _ => {
            return Err(HandshakeError::BadRequest(
                "Sec-WebSocket-Key must be base64 of 16 bytes".to_string(),
            ))
        }
    }

    let version = request.header("Sec-WebSocket-Version").unwrap_or_default();
    if version != SUPPORTED_VERSION {
        return Err(HandshakeError::UnsupportedVersion(version.to_string()));
    }

    Ok(HandshakeResponse {
        accept: compute_accept_key(key),
    })
}

/// `base64(SHA-1(key + GUID))`.
pub fn compute_accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(WS_MAGIC_STRING.as_bytes());
    BASE64.encode(sha.finalize())
}

fn find_head_end(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
