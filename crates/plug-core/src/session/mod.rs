//! Sans-I/O connection logic: the per-connection state machine and its
//! receive buffer.
//!
//! Nothing here reads or writes a socket.  A [`Session`] is fed the bytes the
//! transport delivered and answers with [`SessionAction`]s (bytes to write,
//! messages to hand to the application, "release the transport now").  The
//! server crate owns the transport and carries the actions out.

pub mod buffer;
pub mod machine;
pub mod state;

pub use buffer::FrameBuffer;
pub use machine::{Session, SessionAction, SessionConfig, SessionError};
pub use state::ConnectionState;
