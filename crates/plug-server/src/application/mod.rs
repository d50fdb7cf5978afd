//! Application layer for plug-server.
//!
//! Knows *what* happens to connections and messages, but not *how* bytes move.
//!
//! # Responsibilities
//!
//! - Keeping the table of live connections ([`ConnectionDirectory`])
//! - Defining the seam the embedding application implements ([`MessageHandler`])
//!   and the seam it uses to talk back ([`MessageSink`])
//! - Shipping the stock handlers used by the binary
//!
//! # What does NOT belong here?
//!
//! - Sockets, the handshake, or frame encoding (that is infrastructure and
//!   `plug-core`)

pub mod directory;
pub mod handler;

pub use directory::ConnectionDirectory;
pub use handler::{EchoHandler, LogHandler, MessageHandler, MessageSink};
