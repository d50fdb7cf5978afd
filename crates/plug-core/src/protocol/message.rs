//! Application-level messages carried by Text and Binary frames.

use crate::protocol::frame::{encode_frame, FrameError, OpCode};

/// A complete data message, as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    /// Builds a message from a data opcode and its (unmasked) payload.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidEncoding`] if a Text payload is not UTF-8.
    /// - [`FrameError::UnexpectedContinuation`] if `opcode` is not Text or
    ///   Binary.  Continuation frames are resolved to their starting opcode by
    ///   the session before a message is built.
    pub fn from_parts(opcode: OpCode, payload: Vec<u8>) -> Result<Self, FrameError> {
        match opcode {
            OpCode::Text => String::from_utf8(payload)
                .map(Message::Text)
                .map_err(|_| FrameError::InvalidEncoding),
            OpCode::Binary => Ok(Message::Binary(payload)),
            _ => Err(FrameError::UnexpectedContinuation),
        }
    }

    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes the message as one final, unmasked frame (server role).
    pub fn to_frame_bytes(&self) -> Vec<u8> {
        encode_frame(self.opcode(), self.as_bytes(), true, false)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(data)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
