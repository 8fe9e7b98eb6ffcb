//! Frame type combining a fixed header and a JSON payload.
//!
//! Layout on the wire:
//!
//! ```text
//! 0        4         5        6          8               12
//! ┌────────┬─────────┬────────┬──────────┬───────────────┬──────────────┐
//! │ "HELI" │ version │ opcode │ reserved │ payload_len   │ payload ...  │
//! │ u32 BE │ u8      │ u8     │ u16 = 0  │ u32 BE        │ JSON bytes   │
//! └────────┴─────────┴────────┴──────────┴───────────────┴──────────────┘
//! ```
//!
//! This is a pure data holder. For typed access see [`Message::into_frame`]
//! and [`Message::from_frame`](crate::Message::from_frame).
//!
//! [`Message::into_frame`]: crate::Message::into_frame

use bytes::{Buf, BufMut, Bytes};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame.
///
/// # Invariants
///
/// - **Size Limit**: `payload.len()` MUST NOT exceed
///   [`Frame::MAX_PAYLOAD_SIZE`]. Violations are rejected by
///   [`Frame::encode`] and [`Frame::decode`].
/// - **Exact Length**: a decoded frame consumes exactly `HEADER_SIZE +
///   payload_len` bytes; trailing garbage is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload type
    pub opcode: Opcode,
    /// Raw payload bytes (already JSON-encoded)
    pub payload: Bytes,
}

impl Frame {
    /// Magic number: ASCII "HELI"
    pub const MAGIC: u32 = 0x4845_4C49;

    /// Current protocol version
    pub const VERSION: u8 = 1;

    /// Fixed header size in bytes
    pub const HEADER_SIZE: usize = 12;

    /// Largest payload accepted in either direction.
    ///
    /// The biggest legitimate message (a beacon) is well under 512 bytes.
    pub const MAX_PAYLOAD_SIZE: usize = 4096;

    /// Create a frame from an opcode and encoded payload.
    #[must_use]
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self { opcode, payload: payload.into() }
    }

    /// Total encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len()
    }

    /// Encode the frame into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the payload exceeds
    /// [`Frame::MAX_PAYLOAD_SIZE`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        dst.put_u32(Self::MAGIC);
        dst.put_u8(Self::VERSION);
        dst.put_u8(self.opcode.to_u8());
        dst.put_u16(0);
        // Bounded by MAX_PAYLOAD_SIZE above.
        #[allow(clippy::cast_possible_truncation)]
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode a frame from a complete buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is short or malformed, the opcode is
    /// unknown, the payload is oversized or truncated, or bytes remain after
    /// the declared payload.
    ///
    /// # Security
    ///
    /// - **Size Validation First**: the declared payload length is checked
    ///   against [`Frame::MAX_PAYLOAD_SIZE`] before anything is copied.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: Self::HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut header = &bytes[..Self::HEADER_SIZE];
        if header.get_u32() != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        let version = header.get_u8();
        if version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let raw_opcode = header.get_u8();
        let opcode = Opcode::from_u8(raw_opcode).ok_or(ProtocolError::InvalidOpcode(raw_opcode))?;

        let reserved = header.get_u16();
        if reserved != 0 {
            return Err(ProtocolError::ReservedBitsSet(reserved));
        }

        let payload_len = header.get_u32() as usize;
        if payload_len > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        let body = &bytes[Self::HEADER_SIZE..];
        if body.len() < payload_len {
            return Err(ProtocolError::FrameTruncated { expected: payload_len, actual: body.len() });
        }
        if body.len() > payload_len {
            return Err(ProtocolError::PayloadSizeMismatch {
                header: payload_len,
                actual: body.len(),
            });
        }

        Ok(Self { opcode, payload: Bytes::copy_from_slice(body) })
    }
}
