//! Heliosphere beam authorization core logic
//!
//! This crate contains the pure state machine logic for the anti-betrayal
//! protocol between a ground transmission node (GRN) and an orbital receiver
//! (MOR). The beam may only be active while both ends keep proving liveness;
//! any lapse fails safe by defocusing.
//!
//! # Architecture: "The Hollow Shell"
//!
//! Protocol logic is strictly separated from transport and hardware:
//!
//! ```text
//!      ┌──────────────────────────────┐
//!      │ heliobeam-core               │
//!      │ - Beacon issue / verify      │
//!      │ - Challenge-response         │
//!      │ - Heartbeat liveness         │
//!      │ - Beam activation            │
//!      └──────────────────────────────┘
//!         ↓ NodeAction::Send      ↓ NodeAction::Actuate
//! ┌──────────────────┐    ┌──────────────────┐
//! │ link driver      │    │ BeamActuator     │
//! │ (harness / radio)│    │ (harness / HW)   │
//! └──────────────────┘    └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in Core: never read the clock or OS entropy directly; time comes
//!   in as a [`env::Moment`] and randomness through [`env::Environment`]
//! - Fail Safe: every uncertain outcome (missing key, timeout, failed check)
//!   resolves to a defocused beam
//! - Deterministic: given the same inputs and environment state, produce the
//!   same outputs
//!
//! # Protocol Run
//!
//! ```text
//! GRN                                   MOR
//!  │ ── Beacon(node, power, ts, sig) ──> │ verify identity, ceiling, credential
//!  │ <────────── Challenge(nonce) ────── │ Authorized
//!  │ ── Response(HMAC(k, nonce)) ──────> │ k = HMAC(device_secret, nonce)
//!  │ <────── SessionAck(HMAC(k, ack)) ── │ Active
//!  │ Active                              │
//!  │ ── Heartbeat(ts, HMAC(k, ts)) ────> │ every interval
//!  │ <──────── HeartbeatAck ──────────── │
//! ```
//!
//! # Modules
//!
//! - [`env`]: Environment abstraction (time, RNG)
//! - [`identity`]: Node identity and role
//! - [`secrets`]: Per-device secret provisioning
//! - [`crypto`]: Keyed hashes, nonces, session keys
//! - [`credential`]: Pluggable beacon signature verification
//! - [`beacon`]: Beacon issuer and policy verifier
//! - [`challenge`]: Challenge-response authenticator
//! - [`heartbeat`]: Heartbeat emitter and liveness monitor
//! - [`activation`]: Beam state machine and actuator seam
//! - [`ground`]: GRN node
//! - [`orbital`]: MOR node
//! - [`safety`]: Beam geometry exposure analysis
//! - [`routing`]: Power allocation across demands
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod action;
pub mod activation;
pub mod beacon;
pub mod challenge;
pub mod credential;
pub mod crypto;
pub mod env;
pub mod error;
pub mod ground;
pub mod heartbeat;
pub mod identity;
pub mod orbital;
pub mod routing;
pub mod safety;
pub mod secrets;

pub use action::NodeAction;
pub use activation::{BeamActuator, BeamCommand, BeamState};
pub use env::{Environment, Moment, SystemEnv};
pub use error::BeamAuthError;
pub use ground::{GroundConfig, GroundNode};
pub use identity::{NodeId, Role};
pub use orbital::{OrbitalConfig, OrbitalNode};
