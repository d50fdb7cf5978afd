//! Close status codes and the close-frame payload (RFC 6455 §5.5.1, §7.4).
//!
//! A Close frame payload is either empty, or a 2-byte big-endian status code
//! optionally followed by a UTF-8 reason:
//!
//! ```text
//! [code:2][reason:0..=123]
//! ```

use crate::protocol::frame::{FrameError, MAX_CONTROL_PAYLOAD};

/// Longest reason text that still fits in a control frame next to the code.
pub const MAX_REASON_LEN: usize = MAX_CONTROL_PAYLOAD - 2;

/// Status codes carried by Close frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: the endpoint is going away (server shutdown, page navigation).
    GoingAway,
    /// 1002: the peer violated the framing protocol.
    ProtocolError,
    /// 1003: the endpoint cannot accept this type of data.
    Unsupported,
    /// 1005: no status code was present.  Never sent on the wire.
    NoStatusReceived,
    /// 1006: the transport closed without a Close frame.  Never sent on the wire.
    Abnormal,
    /// 1007: a text message was not valid UTF-8.
    InvalidPayload,
    /// 1008: the message violates endpoint policy.
    PolicyViolation,
    /// 1009: the message is too big to process.
    MessageTooBig,
    /// 1010: the client expected an extension the server did not negotiate.
    MandatoryExtension,
    /// 1011: the server hit an unexpected condition.
    InternalError,
    /// 1015: TLS handshake failure.  Never sent on the wire.
    TlsHandshake,
    /// Any other code, e.g. the application range 3000..=4999.
    Other(u16),
}

impl CloseCode {
    /// Maps a raw status code to its named variant.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1015 => CloseCode::TlsHandshake,
            other => CloseCode::Other(other),
        }
    }

    /// Returns `true` if a peer may legitimately put this code in a Close frame.
    ///
    /// Valid on the wire: 1000–1003, 1007–1014 and 3000–4999.
    pub fn is_valid_on_wire(self) -> bool {
        matches!(u16::from(self), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// A parsed Close frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseReason {
    /// `None` when the peer sent an empty Close payload.
    pub code: Option<CloseCode>,
    pub reason: String,
}

impl CloseReason {
    /// Builds a close reason, truncating `reason` to fit in a control frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_REASON_LEN {
            let mut cut = MAX_REASON_LEN;
            while !reason.is_char_boundary(cut) {
                cut -= 1;
            }
            reason.truncate(cut);
        }
        Self {
            code: Some(code),
            reason,
        }
    }

    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "")
    }

    pub fn going_away() -> Self {
        Self::new(CloseCode::GoingAway, "")
    }

    /// Parses a Close frame payload.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidClosePayload`] for a 1-byte payload or a status
    ///   code that is not allowed on the wire.
    /// - [`FrameError::InvalidEncoding`] if the reason is not UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        match payload.len() {
            0 => Ok(Self::default()),
            1 => Err(FrameError::InvalidClosePayload(
                "close payload of 1 byte".to_string(),
            )),
            _ => {
                let code = CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_valid_on_wire() {
                    return Err(FrameError::InvalidClosePayload(format!(
                        "status code {code} is not allowed on the wire"
                    )));
                }
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| FrameError::InvalidEncoding)?
                    .to_string();
                Ok(Self {
                    code: Some(code),
                    reason,
                })
            }
        }
    }

    /// Serializes this reason as a Close frame payload.
    pub fn encode(&self) -> Vec<u8> {
        match self.code {
            None => Vec::new(),
            Some(code) => {
                let mut buf = Vec::with_capacity(2 + self.reason.len());
                buf.extend_from_slice(&u16::from(code).to_be_bytes());
                buf.extend_from_slice(self.reason.as_bytes());
                buf
            }
        }
    }

    /// The reply to send when this reason arrives from the peer.
    ///
    /// Echoes the peer's status code; an empty Close is answered with 1000.
    pub fn echo(&self) -> Self {
        Self::new(self.code.unwrap_or(CloseCode::Normal), "")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
