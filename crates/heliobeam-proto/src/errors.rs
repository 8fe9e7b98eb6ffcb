//! Error types for the wire format.
//!
//! All errors are structured, testable, and provide actionable information.

use thiserror::Error;

/// Errors that can occur while framing, encoding or decoding messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // Frame parsing errors
    /// Input is shorter than the fixed header
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Invalid magic number in frame header
    #[error("invalid magic number: expected 0x48454C49 (\"HELI\")")]
    InvalidMagic,

    /// Unsupported protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid or unknown opcode
    #[error("invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),

    /// Reserved header bytes must be zero
    #[error("reserved header bits set: {0:#06x}")]
    ReservedBitsSet(u16),

    /// Payload exceeds maximum allowed size
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Header claims more payload than is available
    #[error("frame truncated: header claims {expected} payload bytes, but only {actual} available")]
    FrameTruncated {
        /// Payload size from the header
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Trailing bytes after the declared payload
    #[error("payload size mismatch: header says {header} bytes, actual {actual}")]
    PayloadSizeMismatch {
        /// Size claimed in header
        header: usize,
        /// Actual payload size
        actual: usize,
    },

    // JSON errors (wrapped for testability)
    /// Failed to encode a payload as JSON
    #[error("failed to encode JSON: {0}")]
    JsonEncode(String),

    /// Failed to decode a JSON payload
    #[error("failed to decode JSON: {0}")]
    JsonDecode(String),

    // Field errors
    /// A hex field could not be decoded
    #[error("invalid hex in field `{field}`: {reason}")]
    InvalidHex {
        /// Field name
        field: &'static str,
        /// Decoder message
        reason: String,
    },

    /// A decoded field has the wrong length
    #[error("invalid length for field `{field}`: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Field name
        field: &'static str,
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },
}

/// Convenient Result type alias for wire operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
