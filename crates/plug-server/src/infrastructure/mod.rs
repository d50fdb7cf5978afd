//! Infrastructure layer for plug-server.
//!
//! Handles all I/O: accepting transport connections, running the upgrade
//! handshake on the wire, and moving frame bytes between each transport and
//! its `plug-core` session.
//!
//! # Responsibilities
//!
//! - The `TransportListener` seam and its TCP implementation
//! - Binding one session to one transport write half (`Connection`)
//! - The accept loop, per-connection tasks and graceful shutdown (`Server`)
//!
//! # What does NOT belong here?
//!
//! - Frame or handshake byte formats (that is `plug-core`)
//! - What to do with a message (that is the application's `MessageHandler`)
//! - Configuration parsing (that is done in `main.rs`)

pub mod connection;
pub mod server;
pub mod transport;

pub use connection::{Connection, Inbound};
pub use server::{run_server, Server, ServerHandle};
pub use transport::TransportListener;
