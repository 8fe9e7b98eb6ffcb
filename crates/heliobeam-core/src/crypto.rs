//! Keyed hashes, nonces and session keys.
//!
//! Every MAC in the protocol is HMAC-SHA256. Inputs are domain separated so
//! that a value computed for one message type can never be replayed as
//! another:
//!
//! | Value | Key | Input |
//! |-------|-----|-------|
//! | session key | device secret | `nonce_hex` |
//! | `response_hmac` | session key | `nonce_hex` |
//! | `ack_hmac` | session key | `"ack:" ‖ nonce_hex` |
//! | heartbeat `hmac` | session key | decimal timestamp |
//! | heartbeat ack `hmac` | session key | `"hb-ack:" ‖ decimal timestamp` |
//!
//! # Security
//!
//! - All comparisons of nonces and tags go through [`subtle`], never through
//!   `==` on byte slices.
//! - Session keys are zeroized on drop and redacted in `Debug`.

use std::fmt;

use heliobeam_proto::{ProtocolError, hexfmt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{env::Environment, secrets::DeviceSecret};

type HmacSha256 = Hmac<Sha256>;

/// Nonce length in bytes (128 bits of entropy).
pub const NONCE_LEN: usize = 16;

/// Tag length in bytes.
pub const TAG_LEN: usize = 32;

const ACK_LABEL: &[u8] = b"ack:";
const HEARTBEAT_ACK_LABEL: &[u8] = b"hb-ack:";

fn keyed_hash(key: &[u8], parts: &[&[u8]]) -> [u8; TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    for part in parts {
        mac.update(part);
    }

    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Constant-time equality over byte strings of possibly different length.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Single-use challenge value.
#[derive(Clone, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Draw a fresh nonce from the environment's RNG.
    pub fn random(env: &impl Environment) -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        env.random_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw nonce bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the value is not exactly 16 hex bytes.
    pub fn from_hex(value: &str) -> Result<Self, ProtocolError> {
        hexfmt::decode_fixed("nonce", value).map(Self)
    }

    /// Canonical wire form: lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hexfmt::encode(self.0)
    }

    /// Constant-time comparison.
    #[must_use]
    pub fn ct_eq(&self, other: &Nonce) -> bool {
        ct_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.to_hex())
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// An HMAC-SHA256 output.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag([u8; TAG_LEN]);

impl Tag {
    /// Parse a hex tag from a named wire field.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the value is not exactly 32 hex bytes.
    pub fn from_hex(field: &'static str, value: &str) -> Result<Self, ProtocolError> {
        hexfmt::decode_fixed(field, value).map(Self)
    }

    /// Wire form: lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hexfmt::encode(self.0)
    }

    /// Constant-time comparison.
    #[must_use]
    pub fn ct_eq(&self, other: &Tag) -> bool {
        ct_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.to_hex())
    }
}

/// Ephemeral per-session key, derived independently on both ends.
///
/// `session_key = HMAC(device_secret, nonce_hex)`
pub struct SessionKey(Zeroizing<[u8; TAG_LEN]>);

impl SessionKey {
    /// Derive the session key for a challenge nonce.
    #[must_use]
    pub fn derive(secret: &DeviceSecret, nonce: &Nonce) -> Self {
        Self(Zeroizing::new(keyed_hash(secret.expose(), &[nonce.to_hex().as_bytes()])))
    }

    /// `response_hmac = HMAC(session_key, nonce_hex)`
    #[must_use]
    pub fn response_tag(&self, nonce: &Nonce) -> Tag {
        Tag(keyed_hash(self.0.as_slice(), &[nonce.to_hex().as_bytes()]))
    }

    /// `ack_hmac = HMAC(session_key, "ack:" ‖ nonce_hex)`
    #[must_use]
    pub fn ack_tag(&self, nonce: &Nonce) -> Tag {
        Tag(keyed_hash(self.0.as_slice(), &[ACK_LABEL, nonce.to_hex().as_bytes()]))
    }

    /// Heartbeat `hmac = HMAC(session_key, decimal(timestamp))`
    #[must_use]
    pub fn heartbeat_tag(&self, timestamp: u64) -> Tag {
        Tag(keyed_hash(self.0.as_slice(), &[timestamp.to_string().as_bytes()]))
    }

    /// Heartbeat ack `hmac = HMAC(session_key, "hb-ack:" ‖ decimal(timestamp))`
    #[must_use]
    pub fn heartbeat_ack_tag(&self, timestamp: u64) -> Tag {
        Tag(keyed_hash(self.0.as_slice(), &[HEARTBEAT_ACK_LABEL, timestamp.to_string().as_bytes()]))
    }

    /// Constant-time key comparison.
    #[must_use]
    pub fn ct_eq(&self, other: &SessionKey) -> bool {
        ct_eq(self.0.as_slice(), other.0.as_slice())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::DEVICE_SECRET_LEN;

    fn secret() -> DeviceSecret {
        DeviceSecret::from_bytes(*b"puf_secret_key_32_bytes_long!!!!")
    }

    fn nonce() -> Nonce {
        Nonce::from_hex("7f869285e68697e37f7766d1239c871b").unwrap()
    }

    #[test]
    fn session_key_is_hmac_of_nonce_hex() {
        let expected = keyed_hash(secret().expose(), &[b"7f869285e68697e37f7766d1239c871b".as_slice()]);
        let key = SessionKey::derive(&secret(), &nonce());
        assert_eq!(key.0.as_slice(), &expected);
    }

    #[test]
    fn both_ends_derive_identical_keys() {
        let grn = SessionKey::derive(&secret(), &nonce());
        let mor = SessionKey::derive(&secret(), &nonce());

        assert!(grn.ct_eq(&mor));
        assert!(grn.response_tag(&nonce()).ct_eq(&mor.response_tag(&nonce())));
    }

    #[test]
    fn different_secrets_disagree() {
        let other = DeviceSecret::from_bytes([0u8; DEVICE_SECRET_LEN]);
        let a = SessionKey::derive(&secret(), &nonce());
        let b = SessionKey::derive(&other, &nonce());
        assert!(!a.ct_eq(&b));
    }

    #[test]
    fn tags_are_domain_separated() {
        let key = SessionKey::derive(&secret(), &nonce());

        assert!(!key.response_tag(&nonce()).ct_eq(&key.ack_tag(&nonce())));
        assert!(!key.heartbeat_tag(42).ct_eq(&key.heartbeat_ack_tag(42)));
        assert!(!key.heartbeat_tag(42).ct_eq(&key.heartbeat_tag(43)));
    }

    #[test]
    fn tag_hex_parsing() {
        let key = SessionKey::derive(&secret(), &nonce());
        let tag = key.heartbeat_tag(1);

        assert_eq!(Tag::from_hex("hmac", &tag.to_hex()).unwrap(), tag);
        assert!(Tag::from_hex("hmac", "abcd").is_err());
    }

    #[test]
    fn nonce_hex_is_canonical_lowercase() {
        let upper = Nonce::from_hex("7F869285E68697E37F7766D1239C871B").unwrap();
        assert!(upper.ct_eq(&nonce()));
        assert_eq!(upper.to_hex(), "7f869285e68697e37f7766d1239c871b");
    }

    #[test]
    fn ct_eq_handles_length_mismatch() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abcd"));
        assert!(!ct_eq(b"", b"a"));
    }

    #[test]
    fn session_key_debug_is_redacted() {
        let key = SessionKey::derive(&secret(), &nonce());
        assert_eq!(format!("{key:?}"), "SessionKey(<redacted>)");
    }
}
