//! # plug-core
//!
//! The WebSocket protocol layer for Plug: frame codec, upgrade handshake,
//! close-frame payloads, and a per-connection session state machine.
//!
//! This crate never touches a socket.  Callers feed it bytes and get back
//! bytes to write and messages to deliver, which keeps every rule of the
//! protocol testable without a network.
//!
//! # Architecture overview (for beginners)
//!
//! A WebSocket connection starts life as an ordinary HTTP/1.1 request.  The
//! client asks to "upgrade" the connection; if the server agrees it answers
//! `101 Switching Protocols`, and from then on both sides exchange *frames*
//! instead of HTTP messages.
//!
//! - **`protocol`** – The wire formats.  `handshake` parses the upgrade
//!   request and builds the 101 (or 400) response; `frame` encodes and decodes
//!   individual frames; `close` handles the status code carried by Close
//!   frames; `message` is the complete Text/Binary payload the application
//!   sees.
//!
//! - **`session`** – What one connection remembers between reads.  The
//!   `Session` decodes buffered bytes into frames, answers Pings, reassembles
//!   fragmented messages, runs the closing handshake, and turns any protocol
//!   violation into the right Close status code.

pub mod protocol;
pub mod session;

// Re-export the most-used types at the crate root so callers can write
// `plug_core::Message` instead of `plug_core::protocol::message::Message`.
pub use protocol::close::{CloseCode, CloseReason};
pub use protocol::frame::{decode_frame, encode_frame, Frame, FrameError, OpCode};
pub use protocol::handshake::{
    compute_accept_key, negotiate, HandshakeError, HandshakeRequest, HandshakeResponse,
};
pub use protocol::message::Message;
pub use session::{ConnectionState, Session, SessionAction, SessionConfig, SessionError};
