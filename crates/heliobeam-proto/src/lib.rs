//! # Heliosphere beam authorization: wire format
//!
//! This crate defines the messages exchanged between a ground transmission
//! node (GRN) and an orbital receiver (MOR) while they negotiate and maintain
//! an energy beam session.
//!
//! ## Protocol Design
//!
//! Every message travels inside a [`Frame`]:
//! - **Header**: 12 bytes of raw binary (Big Endian) carrying magic, version,
//!   opcode and payload length
//! - **Payload**: a JSON object whose field names and types match the
//!   published message shapes exactly (hex strings for signatures, keys and
//!   MACs)
//!
//! The opcode in the header selects the payload type, so the JSON itself
//! carries no variant tag and the field layout stays identical to the
//! documented shapes.
//!
//! ## Security Properties
//!
//! - **Size Limits**: payloads above [`Frame::MAX_PAYLOAD_SIZE`] are rejected
//!   before any JSON parsing happens.
//! - **No Trust in Structure**: a decoded message is only structurally valid.
//!   Signatures, MACs and nonces are checked by `heliobeam-core`.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod hexfmt;
pub mod message;
pub mod opcodes;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use message::{Beacon, Challenge, Heartbeat, HeartbeatAck, Message, Response, SessionAck};
pub use opcodes::Opcode;
