//! Binary frame codec for the counter protocol.
//!
//! Every message travels as a length-prefixed frame:
//!
//! ```text
//! +-------------------+-----------------+----------------------+
//! | length (u32, BE)  | kind (u32, BE)  | argument (i64, BE)   |
//! +-------------------+-----------------+----------------------+
//!       4 bytes            4 bytes             8 bytes
//! ```
//!
//! `length` counts the payload bytes that follow (always 12). Kinds:
//! 1 = ADD, 2 = SUBTRACT, 3 = TERMINATE, 4 = COUNTER_REPLY.
//!
//! The codec is stateless: `decode` looks at a byte slice, and either
//! returns one complete message with the exact number of bytes it used,
//! asks for more data, or reports the stream as malformed.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Size of a serialized payload (kind + argument).
pub const PAYLOAD_LEN: usize = 12;

/// Size of a complete frame on the wire.
pub const FRAME_LEN: usize = HEADER_LEN + PAYLOAD_LEN;

/// Default upper bound accepted for a declared payload length.
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 4096;

/// Wire tag identifying the operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Kind {
    Add = 1,
    Subtract = 2,
    Terminate = 3,
    CounterReply = 4,
}

impl TryFrom<u32> for Kind {
    type Error = FrameError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Kind::Add),
            2 => Ok(Kind::Subtract),
            3 => Ok(Kind::Terminate),
            4 => Ok(Kind::CounterReply),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Add the operand to the counter.
    Add(i64),
    /// Subtract the operand from the counter.
    Subtract(i64),
    /// End of session; the server answers with a `CounterReply`.
    Terminate,
    /// Counter value observed when the session terminated.
    CounterReply(i64),
}

impl Message {
    /// Wire tag for this message.
    pub fn kind(&self) -> Kind {
        match self {
            Message::Add(_) => Kind::Add,
            Message::Subtract(_) => Kind::Subtract,
            Message::Terminate => Kind::Terminate,
            Message::CounterReply(_) => Kind::CounterReply,
        }
    }

    /// Operand as carried on the wire. TERMINATE is always sent as 0.
    pub fn argument(&self) -> i64 {
        match *self {
            Message::Add(v) | Message::Subtract(v) | Message::CounterReply(v) => v,
            Message::Terminate => 0,
        }
    }

    fn from_parts(kind: Kind, argument: i64) -> Self {
        match kind {
            Kind::Add => Message::Add(argument),
            Kind::Subtract => Message::Subtract(argument),
            Kind::Terminate => Message::Terminate,
            Kind::CounterReply => Message::CounterReply(argument),
        }
    }

    /// Append this message as one frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(FRAME_LEN);
        dst.put_u32(PAYLOAD_LEN as u32);
        dst.put_u32(self.kind() as u32);
        dst.put_i64(self.argument());
    }

    /// Serialize into a fixed-size array, for callers that write without allocating.
    pub fn to_frame(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[..4].copy_from_slice(&(PAYLOAD_LEN as u32).to_be_bytes());
        frame[4..8].copy_from_slice(&(self.kind() as u32).to_be_bytes());
        frame[8..].copy_from_slice(&self.argument().to_be_bytes());
        frame
    }
}

/// Protocol violations. Any of these poisons the stream it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("declared payload length {len} exceeds limit {max}")]
    Oversized { len: u32, max: u32 },

    #[error("declared payload length {0} does not match the 12-byte payload")]
    BadLength(u32),

    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    #[error("unexpected {0:?} message")]
    UnexpectedKind(Kind),
}

/// Outcome of a decode attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// One message and the number of bytes it occupied.
    Complete(Message, usize),
    /// The slice holds only part of a frame.
    Incomplete,
    /// The stream cannot be parsed any further.
    Malformed(FrameError),
}

/// Encode a message as a standalone frame.
pub fn encode(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_LEN);
    message.encode_into(&mut buf);
    buf.freeze()
}

/// Decode the first frame in `input`.
///
/// Consumes exactly `4 + length` bytes on success; anything after that is
/// left for the next call. Length violations are reported as soon as the
/// prefix is readable.
pub fn decode(input: &[u8], max_payload_len: u32) -> Decoded {
    if input.len() < HEADER_LEN {
        return Decoded::Incomplete;
    }

    let len = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
    if len > max_payload_len {
        return Decoded::Malformed(FrameError::Oversized {
            len,
            max: max_payload_len,
        });
    }
    if len as usize != PAYLOAD_LEN {
        return Decoded::Malformed(FrameError::BadLength(len));
    }
    if input.len() < FRAME_LEN {
        return Decoded::Incomplete;
    }

    let payload = &input[HEADER_LEN..FRAME_LEN];
    let tag = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let kind = match Kind::try_from(tag) {
        Ok(kind) => kind,
        Err(e) => return Decoded::Malformed(e),
    };

    let mut argument = [0u8; 8];
    argument.copy_from_slice(&payload[4..12]);

    Decoded::Complete(
        Message::from_parts(kind, i64::from_be_bytes(argument)),
        FRAME_LEN,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_frame(len: u32, kind: u32, argument: i64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&kind.to_be_bytes());
        buf.extend_from_slice(&argument.to_be_bytes());
        buf
    }

    #[test]
    fn test_round_trip_boundaries() {
        let messages = [
            Message::Add(0),
            Message::Add(i64::MAX),
            Message::Add(i64::MIN),
            Message::Subtract(0),
            Message::Subtract(i64::MIN),
            Message::Subtract(i64::MAX),
            Message::Terminate,
            Message::CounterReply(-1),
            Message::CounterReply(i64::MIN),
            Message::CounterReply(i64::MAX),
        ];

        for message in messages {
            let frame = encode(&message);
            assert_eq!(frame.len(), FRAME_LEN);
            assert_eq!(
                decode(&frame, DEFAULT_MAX_PAYLOAD_LEN),
                Decoded::Complete(message, FRAME_LEN)
            );
        }
    }

    #[test]
    fn test_wire_layout() {
        let frame = encode(&Message::Subtract(2));
        assert_eq!(&frame[..], &raw_frame(12, 2, 2)[..]);
        assert_eq!(&frame[..], &Message::Subtract(2).to_frame()[..]);
    }

    #[test]
    fn test_terminate_ignores_argument() {
        let frame = raw_frame(12, 3, 99);
        assert_eq!(
            decode(&frame, DEFAULT_MAX_PAYLOAD_LEN),
            Decoded::Complete(Message::Terminate, FRAME_LEN)
        );
    }

    #[test]
    fn test_incomplete_prefixes() {
        let frame = encode(&Message::Add(5));
        for cut in 0..FRAME_LEN {
            assert_eq!(
                decode(&frame[..cut], DEFAULT_MAX_PAYLOAD_LEN),
                Decoded::Incomplete,
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_trailing_bytes_untouched() {
        let mut buf = BytesMut::new();
        Message::Add(7).encode_into(&mut buf);
        Message::Terminate.encode_into(&mut buf);
        buf.put_u8(0xAB);

        let Decoded::Complete(first, used) = decode(&buf, DEFAULT_MAX_PAYLOAD_LEN) else {
            panic!("expected a complete frame");
        };
        assert_eq!(first, Message::Add(7));
        assert_eq!(used, FRAME_LEN);

        let rest = &buf[used..];
        assert_eq!(
            decode(rest, DEFAULT_MAX_PAYLOAD_LEN),
            Decoded::Complete(Message::Terminate, FRAME_LEN)
        );
        assert_eq!(rest.len(), FRAME_LEN + 1);
    }

    #[test]
    fn test_unknown_kind() {
        for tag in [0u32, 5, 42, u32::MAX] {
            let frame = raw_frame(12, tag, 1);
            assert_eq!(
                decode(&frame, DEFAULT_MAX_PAYLOAD_LEN),
                Decoded::Malformed(FrameError::UnknownKind(tag))
            );
        }
    }

    #[test]
    fn test_oversized_length_rejected_from_prefix() {
        let prefix = 1_000_000u32.to_be_bytes();
        assert_eq!(
            decode(&prefix, DEFAULT_MAX_PAYLOAD_LEN),
            Decoded::Malformed(FrameError::Oversized {
                len: 1_000_000,
                max: DEFAULT_MAX_PAYLOAD_LEN
            })
        );
    }

    #[test]
    fn test_bad_length() {
        assert_eq!(
            decode(&0u32.to_be_bytes(), DEFAULT_MAX_PAYLOAD_LEN),
            Decoded::Malformed(FrameError::BadLength(0))
        );
        assert_eq!(
            decode(&raw_frame(16, 1, 1), DEFAULT_MAX_PAYLOAD_LEN),
            Decoded::Malformed(FrameError::BadLength(16))
        );
    }

    #[test]
    fn test_ascii_length_prefix_is_rejected() {
        // "12" packed as ASCII digits into the prefix
        let mut frame = b"12\0\0".to_vec();
        frame.extend_from_slice(&raw_frame(12, 1, 1)[4..]);
        assert!(matches!(
            decode(&frame, DEFAULT_MAX_PAYLOAD_LEN),
            Decoded::Malformed(FrameError::Oversized { .. })
        ));
    }

    #[test]
    fn test_kind_try_from() {
        assert_eq!(Kind::try_from(1), Ok(Kind::Add));
        assert_eq!(Kind::try_from(4), Ok(Kind::CounterReply));
        assert_eq!(Kind::try_from(9), Err(FrameError::UnknownKind(9)));
    }
}
