//! Per-connection reassembly buffer.
//!
//! Non-blocking reads hand back arbitrary slices of the byte stream: a
//! frame's length prefix or payload can be split across any number of
//! readiness events. `FrameBuffer` accumulates those slices in a `BytesMut`
//! and hands out whole messages.
//!
//! Bytes are never reordered or dropped. The buffer grows only through
//! `feed` and shrinks only by the bytes a successful decode consumed.

use crate::protocol::{self, Decoded, FrameError, Message, DEFAULT_MAX_PAYLOAD_LEN, FRAME_LEN};
use bytes::{Buf, BytesMut};

/// Accumulates raw reads for one connection and extracts complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    max_payload_len: u32,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_LEN)
    }
}

impl FrameBuffer {
    pub fn new(max_payload_len: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(FRAME_LEN * 4),
            max_payload_len,
        }
    }

    /// Append newly read bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pull the next complete message out of the buffer.
    ///
    /// Returns `Ok(None)` when only a partial frame is buffered. A protocol
    /// error leaves the buffer untouched; the connection is expected to be
    /// dropped.
    pub fn try_extract_frame(&mut self) -> Result<Option<Message>, FrameError> {
        match protocol::decode(&self.buffer, self.max_payload_len) {
            Decoded::Complete(message, consumed) => {
                self.buffer.advance(consumed);
                Ok(Some(message))
            }
            Decoded::Incomplete => Ok(None),
            Decoded::Malformed(e) => Err(e),
        }
    }

    /// Bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
