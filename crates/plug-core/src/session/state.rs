//! Connection lifecycle states.
//!
//! ```text
//! Connecting ──► Open ──► Closing ──► Closed
//!                  │                    ▲
//!                  └────────────────────┘  (transport error)
//! ```
//!
//! - `Connecting`: the upgrade handshake has not completed yet.
//! - `Open`: messages may be sent and received.
//! - `Closing`: a Close frame has been sent or received; no more data is sent.
//! - `Closed`: the transport has been released.  Terminal.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Only an open connection may send data messages.
    pub fn can_send(self) -> bool {
        self == ConnectionState::Open
    }

    /// `Closed` is the only terminal state.
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
