//! plug-server library crate.
//!
//! Accepts transport connections, upgrades them to WebSocket with the
//! `plug-core` handshake negotiator, and exchanges messages with each peer
//! through an application-supplied [`MessageHandler`](application::MessageHandler).
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Peer (HTTP upgrade, then WebSocket frames)
//!         ↕
//! [plug-server]
//!   ├── domain/           Pure types: ServerConfig, ConnectionId, ServerError
//!   ├── application/      ConnectionDirectory, MessageHandler trait, handlers
//!   └── infrastructure/
//!         ├── transport/  TransportListener trait + TCP implementation
//!         ├── connection/ One Session bound to one transport write half
//!         └── server/     Accept loop and per-connection tasks
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `plug-core` only (plus tokio's
//!   synchronization primitives).
//! - `infrastructure` depends on all other layers plus tokio's networking.

/// Domain layer: configuration, identifiers and error types (no I/O).
pub mod domain;

/// Application layer: connection directory and message handlers.
pub mod application;

/// Infrastructure layer: transport listener, connection driver, server loop.
pub mod infrastructure;
