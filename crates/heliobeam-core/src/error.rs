//! Error types for the beam authorization core.
//!
//! Every protocol check is an explicit gate that returns one of these errors.
//! A returned error never advances protocol state; where a failure must cut
//! the beam, the state machine does so before returning.

use std::time::Duration;

use heliobeam_proto::{Opcode, ProtocolError};
use thiserror::Error;

use crate::{
    activation::BeamState, beacon::BeaconRejection, challenge::ResponseRejection,
    heartbeat::HeartbeatRejection, identity::NodeId, safety::SafetyViolation,
};

/// Errors returned by node state machine operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BeamAuthError {
    /// Beacon failed identity, policy, freshness or credential checks
    #[error("invalid beacon: {0}")]
    InvalidBeacon(#[from] BeaconRejection),

    /// Challenge response did not match the pending nonce or expected MAC
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] ResponseRejection),

    /// Heartbeat or activation attempted without a session key
    #[error("session not established: cannot {operation} without a session key")]
    SessionNotEstablished {
        /// Operation that was attempted
        operation: &'static str,
    },

    /// No challenge is pending (never issued, already consumed, or expired)
    #[error("stale or duplicate nonce: no matching challenge is pending")]
    StaleOrDuplicateNonce,

    /// Liveness window exceeded; the session has been torn down
    #[error("liveness timeout after {elapsed:?}")]
    LivenessTimeout {
        /// Time since the last verified proof of life, or since the
        /// challenge was answered when no ack ever arrived
        elapsed: Duration,
    },

    /// Heartbeat (or heartbeat ack) failed verification
    #[error("invalid heartbeat: {0}")]
    InvalidHeartbeat(#[from] HeartbeatRejection),

    /// Operation not allowed in the current beam state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: BeamState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Message type this node never handles, or not in this state
    #[error("unexpected {opcode:?} message in state {state:?}")]
    UnexpectedMessage {
        /// Current state when the message arrived
        state: BeamState,
        /// Opcode of the message
        opcode: Opcode,
    },

    /// The secret provider has no secret for this device
    #[error("no device secret provisioned for {node_id}")]
    MissingDeviceSecret {
        /// Device that was looked up
        node_id: NodeId,
    },

    /// Safety gate refused activation at the requested power
    #[error("beam refused by safety analysis: {0}")]
    UnsafeBeam(#[from] SafetyViolation),

    /// Node configuration violates a protocol constraint
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong
        reason: String,
    },

    /// Malformed field or frame
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl BeamAuthError {
    /// Returns true if restarting the cycle from a fresh beacon may succeed.
    ///
    /// Timeouts and stale nonces happen on lossy links with honest peers.
    /// Everything else indicates a broken, misconfigured or hostile peer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LivenessTimeout { .. } | Self::StaleOrDuplicateNonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_stale_nonces_are_transient() {
        assert!(BeamAuthError::LivenessTimeout { elapsed: Duration::from_millis(101) }.is_transient());
        assert!(BeamAuthError::StaleOrDuplicateNonce.is_transient());
    }

    #[test]
    fn verification_failures_are_fatal() {
        assert!(!BeamAuthError::InvalidResponse(ResponseRejection::MacMismatch).is_transient());
        assert!(!BeamAuthError::InvalidHeartbeat(HeartbeatRejection::MacMismatch).is_transient());
        assert!(!BeamAuthError::SessionNotEstablished { operation: "send_heartbeat" }.is_transient());
        assert!(
            !BeamAuthError::InvalidState { state: BeamState::Idle, operation: "activate" }
                .is_transient()
        );
        assert!(!BeamAuthError::Protocol(ProtocolError::InvalidMagic).is_transient());
    }

    #[test]
    fn display_is_actionable() {
        let err = BeamAuthError::InvalidState { state: BeamState::Active, operation: "generate_beacon" };
        assert_eq!(err.to_string(), "invalid state transition: cannot generate_beacon from Active");

        let err = BeamAuthError::SessionNotEstablished { operation: "send_heartbeat" };
        assert_eq!(
            err.to_string(),
            "session not established: cannot send_heartbeat without a session key"
        );
    }
}
