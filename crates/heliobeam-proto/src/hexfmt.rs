//! Hex helpers for fixed-size binary fields.
//!
//! Signatures, public keys, nonces and MACs travel as lowercase hex strings.
//! Decoding is strict about length so that a short or padded value is an
//! error rather than a silently truncated key.

use crate::errors::{ProtocolError, Result};

/// Encode bytes as lowercase hex.
#[must_use]
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(bytes)
}

/// Decode a hex field into exactly `N` bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidHex`] for non-hex input and
/// [`ProtocolError::InvalidLength`] if the decoded length is not `N`.
pub fn decode_fixed<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N]> {
    let bytes =
        hex::decode(value).map_err(|e| ProtocolError::InvalidHex { field, reason: e.to_string() })?;

    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| ProtocolError::InvalidLength {
        field,
        expected: N,
        actual: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fixed_accepts_exact_length() {
        let bytes: [u8; 4] = decode_fixed("mac", "deadBEEF").unwrap();
        assert_eq!(bytes, [0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(encode(bytes), "deadbeef");
    }

    #[test]
    fn decode_fixed_rejects_wrong_length() {
        let result = decode_fixed::<4>("mac", "dead");
        assert_eq!(
            result,
            Err(ProtocolError::InvalidLength { field: "mac", expected: 4, actual: 2 })
        );
    }

    #[test]
    fn decode_fixed_rejects_non_hex() {
        let result = decode_fixed::<2>("nonce", "zz00");
        assert!(matches!(result, Err(ProtocolError::InvalidHex { field: "nonce", .. })));
    }
}
