//! Typed protocol messages.
//!
//! Field names and JSON types are part of the wire contract:
//!
//! | Message | Fields |
//! |---------|--------|
//! | [`Beacon`] | `node_id`, `requested_power_w`, `timestamp`, `signature`, `public_key` |
//! | [`Challenge`] | `node_id`, `nonce` |
//! | [`Response`] | `node_id`, `nonce`, `response_hmac` |
//! | [`SessionAck`] | `node_id`, `nonce`, `ack_hmac` |
//! | [`Heartbeat`] | `node_id`, `timestamp`, `hmac` |
//! | [`HeartbeatAck`] | `node_id`, `timestamp`, `hmac` |

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    Frame, Opcode,
    errors::{ProtocolError, Result},
};

/// Signed authorization request from a GRN.
///
/// The signature covers `node_id`, `requested_power_w` and `timestamp`, so a
/// change to any of them invalidates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    /// Issuing node identity
    pub node_id: String,
    /// Requested beam power in watts
    pub requested_power_w: u64,
    /// Issue time, whole seconds since the UNIX epoch
    #[serde(deserialize_with = "unix_seconds")]
    pub timestamp: u64,
    /// Ed25519 signature over the canonical message, hex
    pub signature: String,
    /// Ed25519 public key of the issuer, hex
    pub public_key: String,
}

/// Single-use nonce issued by a MOR after accepting a beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Issuing MOR identity
    pub node_id: String,
    /// 128-bit nonce, hex
    pub nonce: String,
}

/// GRN answer to a [`Challenge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Responding GRN identity
    pub node_id: String,
    /// Echo of the challenge nonce
    pub nonce: String,
    /// MAC proving knowledge of the derived session key, hex
    pub response_hmac: String,
}

/// MOR confirmation that it derived the same session key as the GRN.
///
/// This is the acknowledgment round of activation: the GRN does not enter
/// Active until it has verified this message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAck {
    /// Acknowledging MOR identity
    pub node_id: String,
    /// Nonce of the session being acknowledged
    pub nonce: String,
    /// MAC over the nonce under the session key, hex
    pub ack_hmac: String,
}

/// Periodic proof of life from the GRN.
///
/// `timestamp` is an integer count of milliseconds since the UNIX epoch.
/// Fractional values are refused at decode time rather than truncated,
/// since the MAC is computed over the decimal integer form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Sending GRN identity
    pub node_id: String,
    /// Sender wall clock, milliseconds since the UNIX epoch
    #[serde(deserialize_with = "unix_millis")]
    pub timestamp: u64,
    /// MAC over the timestamp under the session key, hex
    pub hmac: String,
}

/// MOR receipt for a verified [`Heartbeat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    /// Acknowledging MOR identity
    pub node_id: String,
    /// Timestamp of the heartbeat being acknowledged
    #[serde(deserialize_with = "unix_millis")]
    pub timestamp: u64,
    /// MAC over the timestamp under the session key, hex
    pub hmac: String,
}

/// All protocol messages.
///
/// The variant is identified by the frame opcode; the JSON payload is the
/// bare inner struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// GRN authorization request
    Beacon(Beacon),
    /// MOR nonce challenge
    Challenge(Challenge),
    /// GRN challenge answer
    Response(Response),
    /// MOR session confirmation
    SessionAck(SessionAck),
    /// GRN proof of life
    Heartbeat(Heartbeat),
    /// MOR heartbeat receipt
    HeartbeatAck(HeartbeatAck),
}

impl Message {
    /// Opcode for this variant.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Beacon(_) => Opcode::Beacon,
            Self::Challenge(_) => Opcode::Challenge,
            Self::Response(_) => Opcode::Response,
            Self::SessionAck(_) => Opcode::SessionAck,
            Self::Heartbeat(_) => Opcode::Heartbeat,
            Self::HeartbeatAck(_) => Opcode::HeartbeatAck,
        }
    }

    /// Identity of the sender, as claimed by the message.
    #[must_use]
    pub fn node_id(&self) -> &str {
        match self {
            Self::Beacon(m) => &m.node_id,
            Self::Challenge(m) => &m.node_id,
            Self::Response(m) => &m.node_id,
            Self::SessionAck(m) => &m.node_id,
            Self::Heartbeat(m) => &m.node_id,
            Self::HeartbeatAck(m) => &m.node_id,
        }
    }

    /// Encode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::JsonEncode`] if serialization fails.
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Self::Beacon(inner) => serde_json::to_vec(inner),
            Self::Challenge(inner) => serde_json::to_vec(inner),
            Self::Response(inner) => serde_json::to_vec(inner),
            Self::SessionAck(inner) => serde_json::to_vec(inner),
            Self::Heartbeat(inner) => serde_json::to_vec(inner),
            Self::HeartbeatAck(inner) => serde_json::to_vec(inner),
        }
        .map_err(|e| ProtocolError::JsonEncode(e.to_string()))
    }

    /// Decode a JSON payload for the given opcode.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] before parsing if the input
    /// exceeds [`Frame::MAX_PAYLOAD_SIZE`], and [`ProtocolError::JsonDecode`]
    /// if the JSON does not match the opcode's shape.
    pub fn decode_payload(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > Frame::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: Frame::MAX_PAYLOAD_SIZE,
            });
        }

        let decoded = match opcode {
            Opcode::Beacon => serde_json::from_slice(bytes).map(Self::Beacon),
            Opcode::Challenge => serde_json::from_slice(bytes).map(Self::Challenge),
            Opcode::Response => serde_json::from_slice(bytes).map(Self::Response),
            Opcode::SessionAck => serde_json::from_slice(bytes).map(Self::SessionAck),
            Opcode::Heartbeat => serde_json::from_slice(bytes).map(Self::Heartbeat),
            Opcode::HeartbeatAck => serde_json::from_slice(bytes).map(Self::HeartbeatAck),
        };

        decoded.map_err(|e| ProtocolError::JsonDecode(e.to_string()))
    }

    /// Wrap this message in a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the payload is oversized.
    pub fn into_frame(&self) -> Result<Frame> {
        let payload = self.encode_payload()?;
        if payload.len() > Frame::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: Frame::MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Frame::new(self.opcode(), payload))
    }

    /// Extract a typed message from a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not decode for the frame opcode.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        Self::decode_payload(frame.opcode, &frame.payload)
    }

    /// Encode straight to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the payload is oversized.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let frame = self.into_frame()?;
        let mut buf = Vec::with_capacity(frame.encoded_len());
        frame.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode wire bytes into a typed message.
    ///
    /// # Errors
    ///
    /// Returns an error for any framing or payload problem.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_frame(&Frame::decode(bytes)?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} from {}", self.opcode(), self.node_id())
    }
}

/// Accept beacon timestamps as a JSON integer or a decimal string.
fn unix_seconds<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Accept heartbeat timestamps only as integer milliseconds.
fn unix_millis<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Integer(u64),
        Other(f64),
    }

    match Millis::deserialize(deserializer)? {
        Millis::Integer(n) => Ok(n),
        Millis::Other(f) => Err(serde::de::Error::custom(format!(
            "timestamp must be integer milliseconds since the UNIX epoch, got {f}"
        ))),
    }
}
