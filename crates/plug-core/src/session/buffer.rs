//! Receive buffer with a read cursor.
//!
//! Bytes arrive from the transport in arbitrary chunks.  [`FrameBuffer`]
//! accumulates them and hands out complete frames one at a time, keeping any
//! partial frame at the tail until the rest of it arrives.
//!
//! Consumed bytes are not removed immediately: the cursor advances, and the
//! vector is compacted only when everything has been consumed or the dead
//! prefix grows past [`COMPACT_THRESHOLD`].  This keeps the common case (many
//! small frames in one read) free of repeated `memmove`s.

use crate::protocol::frame::{decode_frame_with_limit, Frame, FrameError};

/// Dead-prefix size that triggers a compaction.
pub const COMPACT_THRESHOLD: usize = 4096;

#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes delivered by the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet consumed by a decoded frame.
    pub fn len(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    /// Decodes the next complete frame, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Any [`FrameError`] other than `Incomplete`.
    pub fn next_frame(&mut self, max_payload: usize) -> Result<Option<Frame>, FrameError> {
        match decode_frame_with_limit(&self.data[self.cursor..], max_payload) {
            Ok((frame, consumed)) => {
                self.cursor += consumed;
                self.compact();
                Ok(Some(frame))
            }
            Err(err) if err.is_incomplete() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn compact(&mut self) {
        if self.cursor == self.data.len() {
            self.clear();
        } else if self.cursor >= COMPACT_THRESHOLD {
            self.data.drain(..self.cursor);
            self.cursor = 0;
        }
    }
}
