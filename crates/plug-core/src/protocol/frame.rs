//! Binary codec for WebSocket frames (RFC 6455 §5.2).
//!
//! Wire format:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//! All multi-byte integers are big-endian.
//!
//! # Streaming decode (for beginners)
//!
//! TCP delivers a byte *stream*, not frames.  A single read may return half a
//! frame, or three frames glued together.  [`decode_frame`] therefore never
//! blocks and never assumes it was handed exactly one frame: it either returns
//! the first complete frame plus the number of bytes it used, or
//! [`FrameError::Incomplete`] to say "buffer more bytes and call me again".
//! `Incomplete` is not a failure; every other [`FrameError`] is a protocol
//! violation that ends the connection.

use thiserror::Error;

use crate::protocol::close::CloseCode;

/// Largest payload a control frame (close/ping/pong) may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Smallest possible frame header: the two fixed bytes.
pub const MIN_HEADER_SIZE: usize = 2;

/// Largest possible frame header: 2 fixed + 8 extended length + 4 mask key.
pub const MAX_HEADER_SIZE: usize = 14;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LENGTH_BITS: u8 = 0x7F;

const LENGTH_16_MARKER: u8 = 126;
const LENGTH_64_MARKER: u8 = 127;
const LENGTH_64_TOP_BIT: u64 = 1 << 63;

// ── Opcode ────────────────────────────────────────────────────────────────────

/// The 4-bit frame type tag.
///
/// Values `0x3..=0x7` and `0xB..=0xF` are reserved for future use and rejected
/// by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continues a message started by a Text or Binary frame with `fin = false`.
    Continuation = 0x0,
    /// UTF-8 text data.
    Text = 0x1,
    /// Arbitrary binary data.
    Binary = 0x2,
    /// Connection close, optionally carrying a status code and reason.
    Close = 0x8,
    /// Keepalive request; the peer must answer with a Pong.
    Ping = 0x9,
    /// Keepalive reply.
    Pong = 0xA,
}

impl OpCode {
    /// Returns `true` for Close, Ping and Pong.
    pub fn is_control(self) -> bool {
        (self as u8) & 0x08 != 0
    }

    /// Returns `true` for Continuation, Text and Binary.
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(()),
        }
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One decoded WebSocket frame.
///
/// `payload` is always stored *unmasked*.  `mask` records the key the frame
/// carried on the wire; it is `Some` exactly when the MASK bit was set, so the
/// "masking key present iff masked" rule cannot be broken by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// `true` if this is the final fragment of a message.
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Serializes the frame, reusing the masking key it carries (if any).
    pub fn encode(&self) -> Vec<u8> {
        encode_frame_with_key(self.opcode, &self.payload, self.fin, self.mask)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can occur while decoding frames or interpreting their payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not an error: the buffer ends before the frame does.
    #[error("incomplete frame: need at least {needed} bytes, got {available}")]
    Incomplete { needed: usize, available: usize },

    /// RSV1..RSV3 must be zero because no extension is ever negotiated.
    #[error("reserved bits set: 0b{0:03b}")]
    ReservedBits(u8),

    /// The opcode nibble is one of the reserved values.
    #[error("reserved opcode: 0x{0:X}")]
    ReservedOpcode(u8),

    /// A 64-bit extended length with the most significant bit set.
    #[error("64-bit payload length has its most significant bit set")]
    LengthOverflow,

    /// Control frames must not be fragmented.
    #[error("fragmented {0:?} control frame")]
    FragmentedControl(OpCode),

    /// Control frames carry at most 125 payload bytes.
    #[error("{opcode:?} control frame payload of {len} bytes exceeds 125")]
    ControlTooLong { opcode: OpCode, len: u64 },

    /// The declared payload (or reassembled message) is over the configured limit.
    #[error("payload of {len} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { len: u64, max: u64 },

    /// A text payload is not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidEncoding,

    /// A close payload is one byte long or carries a status code that may not
    /// appear on the wire.
    #[error("invalid close payload: {0}")]
    InvalidClosePayload(String),

    /// A client-to-server frame arrived without the MASK bit.
    #[error("client frame is not masked")]
    UnmaskedFrame,

    /// A Continuation frame arrived with no fragmented message in progress.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// A new Text/Binary frame arrived while a fragmented message is unfinished.
    #[error("new data frame while a fragmented message is in progress")]
    InterleavedDataFrame,
}

impl FrameError {
    /// Returns `true` for the "need more bytes" signal.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, FrameError::Incomplete { .. })
    }

    /// The close status code a server sends when it tears a connection down
    /// because of this error.
    pub fn close_code(&self) -> CloseCode {
        match self {
            FrameError::InvalidEncoding => CloseCode::InvalidPayload,
            FrameError::PayloadTooLarge { .. } => CloseCode::MessageTooBig,
            _ => CloseCode::ProtocolError,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a single frame.
///
/// When `mask` is `true` a fresh masking key is drawn from the thread-local
/// CSPRNG.  Servers pass `mask = false`; clients must pass `true`.
///
/// # Examples
///
/// ```rust
/// use plug_core::protocol::frame::{decode_frame, encode_frame, OpCode};
///
/// let bytes = encode_frame(OpCode::Text, b"hi", true, false);
/// assert_eq!(bytes, [0x81, 0x02, b'h', b'i']);
///
/// let (frame, consumed) = decode_frame(&bytes).unwrap();
/// assert_eq!(frame.payload, b"hi");
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_frame(opcode: OpCode, payload: &[u8], fin: bool, mask: bool) -> Vec<u8> {
    let key = if mask { Some(generate_mask_key()) } else { None };
    encode_frame_with_key(opcode, payload, fin, key)
}

/// Encodes a single frame with an explicit masking key (or none).
///
/// This is the deterministic core of [`encode_frame`].
pub fn encode_frame_with_key(
    opcode: OpCode,
    payload: &[u8],
    fin: bool,
    mask: Option<[u8; 4]>,
) -> Vec<u8> {
    let len = payload.len();
    let mut buf = Vec::with_capacity(header_len(len, mask.is_some()) + len);

    // RSV bits are always written as zero.
    buf.push((if fin { FIN_BIT } else { 0 }) | opcode as u8);

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    if len <= 125 {
        buf.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(mask_bit | LENGTH_16_MARKER);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        // A Vec never holds more than isize::MAX bytes, so the top bit of the
        // 64-bit field is always clear here.
        buf.push(mask_bit | LENGTH_64_MARKER);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            buf.extend_from_slice(&key);
            let start = buf.len();
            buf.extend_from_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.extend_from_slice(payload),
    }
    buf
}

/// Decodes one frame from the beginning of `bytes` with no payload limit.
///
/// Returns the frame and the total number of bytes consumed (header + mask
/// key + payload), so the caller can advance its read cursor.
///
/// # Errors
///
/// Returns [`FrameError::Incomplete`] if `bytes` ends before the frame does,
/// or another [`FrameError`] variant if the frame violates RFC 6455.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), FrameError> {
    decode_frame_with_limit(bytes, usize::MAX)
}

/// Decodes one frame, rejecting declared payloads larger than `max_payload`.
///
/// The limit is checked against the *declared* length, before any payload
/// byte has to be buffered.
///
/// # Errors
///
/// See [`decode_frame`]; additionally [`FrameError::PayloadTooLarge`].
pub fn decode_frame_with_limit(
    bytes: &[u8],
    max_payload: usize,
) -> Result<(Frame, usize), FrameError> {
    let first = *bytes.first().ok_or(FrameError::Incomplete {
        needed: MIN_HEADER_SIZE,
        available: 0,
    })?;

    let rsv = (first & RSV_BITS) >> 4;
    if rsv != 0 {
        return Err(FrameError::ReservedBits(rsv));
    }
    let raw_opcode = first & OPCODE_BITS;
    let opcode = OpCode::try_from(raw_opcode).map_err(|_| FrameError::ReservedOpcode(raw_opcode))?;
    let fin = first & FIN_BIT != 0;

    require(bytes, MIN_HEADER_SIZE)?;
    let second = bytes[1];
    let masked = second & MASK_BIT != 0;
    let indicator = second & LENGTH_BITS;

    let (payload_len, mut offset) = match indicator {
        LENGTH_16_MARKER => {
            require(bytes, 4)?;
            (u64::from(u16::from_be_bytes([bytes[2], bytes[3]])), 4)
        }
        LENGTH_64_MARKER => {
            require(bytes, 10)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[2..10]);
            let len = u64::from_be_bytes(raw);
            if len & LENGTH_64_TOP_BIT != 0 {
                return Err(FrameError::LengthOverflow);
            }
            (len, 10)
        }
        short => (u64::from(short), MIN_HEADER_SIZE),
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControl(opcode));
        }
        if payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlTooLong {
                opcode,
                len: payload_len,
            });
        }
    }

    let too_large = FrameError::PayloadTooLarge {
        len: payload_len,
        max: max_payload as u64,
    };
    if payload_len > max_payload as u64 {
        return Err(too_large);
    }
    let len = usize::try_from(payload_len).map_err(|_| too_large.clone())?;

    let mask = if masked {
        require(bytes, offset + 4)?;
        let key = [
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let total = offset.checked_add(len).ok_or(too_large)?;
    require(bytes, total)?;

    let mut payload = bytes[offset..total].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok((
        Frame {
            fin,
            opcode,
            mask,
            payload,
        },
        total,
    ))
}

/// XORs `payload` in place with `key[i % 4]`.
///
/// Masking and unmasking are the same operation.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Number of header bytes (including the masking key) for a payload of `len`.
pub fn header_len(len: usize, masked: bool) -> usize {
    let base = if len <= 125 {
        2
    } else if len <= u16::MAX as usize {
        4
    } else {
        10
    };
    if masked {
        base + 4
    } else {
        base
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn generate_mask_key() -> [u8; 4] {
    rand::random()
}

fn require(bytes: &[u8], needed: usize) -> Result<(), FrameError> {
    if bytes.len() < needed {
        Err(FrameError::Incomplete {
            needed,
            available: bytes.len(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Sample frames from RFC 6455 §5.7.
    const RFC_UNMASKED_HELLO: [u8; 7] = [0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
    const RFC_MASKED_HELLO: [u8; 11] = [
        0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
    ];
    const RFC_MASK_KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    // ── Opcode ────────────────────────────────────────────────────────────────

    #[test]
    fn test_opcode_control_classification() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(OpCode::Text.is_data());
        assert!(OpCode::Binary.is_data());
        assert!(OpCode::Continuation.is_data());
    }

    #[test]
    fn test_opcode_reserved_values_rejected() {
        for raw in (0x3..=0x7).chain(0xB..=0xF) {
            assert!(OpCode::try_from(raw).is_err(), "0x{raw:X} must be reserved");
        }
    }

    // ── Encoding ──────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_unmasked_matches_rfc_sample() {
        let bytes = encode_frame(OpCode::Text, b"Hello", true, false);
        assert_eq!(bytes, RFC_UNMASKED_HELLO);
    }

    #[test]
    fn test_encode_with_key_matches_rfc_masked_sample() {
        let bytes = encode_frame_with_key(OpCode::Text, b"Hello", true, Some(RFC_MASK_KEY));
        assert_eq!(bytes, RFC_MASKED_HELLO);
    }

    #[test]
    fn test_encode_125_bytes_uses_single_byte_length() {
        let bytes = encode_frame(OpCode::Binary, &[0u8; 125], true, false);
        assert_eq!(bytes[1], 125);
        assert_eq!(bytes.len(), 2 + 125);
    }

    #[test]
    fn test_encode_126_bytes_uses_16_bit_length() {
        let bytes = encode_frame(OpCode::Binary, &[0u8; 126], true, false);
        assert_eq!(bytes[1], 126);
        assert_eq!(&bytes[2..4], &126u16.to_be_bytes());
        assert_eq!(bytes.len(), 4 + 126);
    }

    #[test]
    fn test_encode_65535_bytes_still_uses_16_bit_length() {
        let bytes = encode_frame(OpCode::Binary, &vec![0u8; 65535], true, false);
        assert_eq!(bytes[1], 126);
        assert_eq!(&bytes[2..4], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_encode_65536_bytes_uses_64_bit_length() {
        let bytes = encode_frame(OpCode::Binary, &vec![0u8; 65536], true, false);
        assert_eq!(bytes[1], 127);
        assert_eq!(&bytes[2..10], &65536u64.to_be_bytes());
        assert_eq!(bytes.len(), 10 + 65536);
    }

    #[test]
    fn test_encode_sets_mask_bit_only_when_masked() {
        let plain = encode_frame(OpCode::Text, b"x", true, false);
        let masked = encode_frame(OpCode::Text, b"x", true, true);
        assert_eq!(plain[1] & MASK_BIT, 0);
        assert_eq!(masked[1] & MASK_BIT, MASK_BIT);
        assert_eq!(masked.len(), plain.len() + 4);
    }

    #[test]
    fn test_encode_non_final_clears_fin_bit() {
        let bytes = encode_frame(OpCode::Text, b"part", false, false);
        assert_eq!(bytes[0], 0x01);
    }

    #[test]
    fn test_masked_payload_differs_from_plaintext_but_unmasks_exactly() {
        // Arrange
        let plaintext = b"the quick brown fox".to_vec();

        // Act
        let bytes = encode_frame(OpCode::Binary, &plaintext, true, true);
        let key = [bytes[2], bytes[3], bytes[4], bytes[5]];
        let mut wire_payload = bytes[6..].to_vec();

        // Assert: unmasking the raw bytes recovers the original.
        if key != [0, 0, 0, 0] {
            assert_ne!(wire_payload, plaintext);
        }
        apply_mask(&mut wire_payload, key);
        assert_eq!(wire_payload, plaintext);
    }

    #[test]
    fn test_apply_mask_twice_is_identity() {
        let mut data = b"abcdefg".to_vec();
        apply_mask(&mut data, [1, 2, 3, 4]);
        apply_mask(&mut data, [1, 2, 3, 4]);
        assert_eq!(data, b"abcdefg");
    }

    // ── Decoding ──────────────────────────────────────────────────────────────

    #[test]
    fn test_decode_rfc_masked_sample() {
        let (frame, consumed) = decode_frame(&RFC_MASKED_HELLO).unwrap();
        assert_eq!(consumed, RFC_MASKED_HELLO.len());
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.mask, Some(RFC_MASK_KEY));
        assert_eq!(frame.payload, b"Hello");
    }

    #[test]
    fn test_decode_reports_consumed_with_trailing_bytes() {
        // Arrange: one full frame followed by the first byte of another.
        let mut bytes = RFC_UNMASKED_HELLO.to_vec();
        bytes.push(0x82);

        // Act
        let (frame, consumed) = decode_frame(&bytes).unwrap();

        // Assert
        assert_eq!(frame.payload, b"Hello");
        assert_eq!(consumed, RFC_UNMASKED_HELLO.len());
    }

    #[test]
    fn test_decode_empty_buffer_is_incomplete() {
        let err = decode_frame(&[]).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn test_decode_every_truncation_is_incomplete() {
        let bytes = encode_frame_with_key(OpCode::Binary, &[7u8; 300], true, Some([9, 8, 7, 6]));
        for cut in 0..bytes.len() {
            let err = decode_frame(&bytes[..cut]).unwrap_err();
            assert!(err.is_incomplete(), "cut at {cut} gave {err:?}");
        }
    }

    #[test]
    fn test_decode_incomplete_reports_needed_extended_length() {
        let err = decode_frame(&[0x82, 126, 0x01]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Incomplete {
                needed: 4,
                available: 3
            }
        );
    }

    #[test]
    fn test_decode_rejects_each_reserved_bit() {
        for bit in [0x40u8, 0x20, 0x10] {
            let err = decode_frame(&[0x81 | bit, 0x00]).unwrap_err();
            assert_eq!(err, FrameError::ReservedBits(bit >> 4));
            assert_eq!(err.close_code(), CloseCode::ProtocolError);
        }
    }

    #[test]
    fn test_decode_rejects_opcode_0x3() {
        let err = decode_frame(&[0x83, 0x00]).unwrap_err();
        assert_eq!(err, FrameError::ReservedOpcode(0x3));
    }

    #[test]
    fn test_decode_rejects_reserved_opcode_from_first_byte_alone() {
        // A single byte is enough to spot a bad opcode.
        let err = decode_frame(&[0x8B]).unwrap_err();
        assert_eq!(err, FrameError::ReservedOpcode(0xB));
    }

    #[test]
    fn test_decode_rejects_64_bit_length_with_top_bit() {
        let mut bytes = vec![0x82, 127];
        bytes.extend_from_slice(&(1u64 << 63).to_be_bytes());
        assert_eq!(decode_frame(&bytes).unwrap_err(), FrameError::LengthOverflow);
    }

    #[test]
    fn test_decode_rejects_fragmented_ping() {
        let err = decode_frame(&[0x09, 0x00]).unwrap_err();
        assert_eq!(err, FrameError::FragmentedControl(OpCode::Ping));
    }

    #[test]
    fn test_decode_rejects_oversized_control_frame() {
        let bytes = encode_frame(OpCode::Ping, &[0u8; 126], true, false);
        let err = decode_frame(&bytes).unwrap_err();
        assert_eq!(
            err,
            FrameError::ControlTooLong {
                opcode: OpCode::Ping,
                len: 126
            }
        );
    }

    #[test]
    fn test_decode_with_limit_rejects_before_payload_arrives() {
        // Arrange: only the header of a 1000-byte frame has arrived.
        let bytes = encode_frame(OpCode::Binary, &[0u8; 1000], true, false);
        let header = &bytes[..4];

        // Act
        let err = decode_frame_with_limit(header, 512).unwrap_err();

        // Assert
        assert_eq!(err, FrameError::PayloadTooLarge { len: 1000, max: 512 });
        assert_eq!(err.close_code(), CloseCode::MessageTooBig);
    }

    #[test]
    fn test_decode_with_limit_accepts_payload_at_limit() {
        let bytes = encode_frame(OpCode::Binary, &[1u8; 512], true, false);
        let (frame, _) = decode_frame_with_limit(&bytes, 512).unwrap();
        assert_eq!(frame.payload.len(), 512);
    }

    #[test]
    fn test_frame_encode_reuses_its_mask_key() {
        let (frame, _) = decode_frame(&RFC_MASKED_HELLO).unwrap();
        assert_eq!(frame.encode(), RFC_MASKED_HELLO);
    }

    #[test]
    fn test_header_len_boundaries() {
        assert_eq!(header_len(0, false), 2);
        assert_eq!(header_len(125, false), 2);
        assert_eq!(header_len(126, false), 4);
        assert_eq!(header_len(65535, false), 4);
        assert_eq!(header_len(65536, false), 10);
        assert_eq!(header_len(65536, true), MAX_HEADER_SIZE);
    }

    #[test]
    fn test_invalid_encoding_maps_to_invalid_payload_close_code() {
        assert_eq!(FrameError::InvalidEncoding.close_code(), CloseCode::InvalidPayload);
    }
}
