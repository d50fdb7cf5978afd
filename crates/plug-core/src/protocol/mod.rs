//! Protocol module: frame codec, close payloads, messages, and the upgrade handshake.

pub mod close;
pub mod frame;
pub mod handshake;
pub mod message;

pub use close::{CloseCode, CloseReason};
pub use frame::{decode_frame, decode_frame_with_limit, encode_frame, Frame, FrameError, OpCode};
pub use handshake::{negotiate, HandshakeError, HandshakeRequest, HandshakeResponse};
pub use message::Message;
