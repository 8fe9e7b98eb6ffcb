//! Challenge-response authentication and session key agreement.
//!
//! The MOR side is an [`Authenticator`] holding at most one pending
//! challenge. The GRN side is stateless: [`answer_challenge`] derives the
//! session key and the response in one step.
//!
//! ```text
//!             MOR                                 GRN
//! send_challenge: nonce ←── RNG
//!                 pending = (nonce, peer, t) ──>  k = HMAC(secret, nonce)
//!                                           <──  HMAC(k, nonce)
//! receive_response: nonce == pending?
//!                   k' = HMAC(secret, nonce)
//!                   HMAC(k', nonce) == response_hmac?
//!                   pending = None
//! ```
//!
//! # Pending challenge policy
//!
//! | Outcome | Result | Pending challenge |
//! |---------|--------|-------------------|
//! | nothing pending, or past TTL | `StaleOrDuplicateNonce` | cleared |
//! | nonce differs | `NonceMismatch` | kept |
//! | wrong peer | `PeerMismatch` | kept |
//! | no device secret | `MissingDeviceSecret` | consumed |
//! | malformed or wrong MAC | `MacMismatch` / `Malformed` | consumed |
//! | valid | session key | consumed |
//!
//! A response that quotes the right nonce but fails the MAC burns the nonce:
//! there is no retry against the same challenge, so an attacker gets exactly
//! one guess per challenge. A response that does not even quote the nonce
//! cannot be an attempt at it and leaves the challenge in place.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use heliobeam_proto::{ProtocolError, Response, SessionAck};
use thiserror::Error;

use crate::{
    crypto::{Nonce, SessionKey, Tag, ct_eq},
    env::Environment,
    error::BeamAuthError,
    identity::NodeId,
    secrets::{DeviceSecret, SecretProvider},
};

/// Challenge timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeConfig {
    /// How long an unanswered challenge stays valid
    pub ttl: Duration,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(5) }
    }
}

/// Why a response (or session ack) was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseRejection {
    /// Quoted nonce is not the pending one
    #[error("nonce does not match the pending challenge")]
    NonceMismatch,

    /// Message came from a node other than the challenged one
    #[error("expected {expected}, got {actual}")]
    PeerMismatch {
        /// Node the challenge was bound to
        expected: NodeId,
        /// Node named in the message
        actual: String,
    },

    /// MAC does not match the locally derived session key
    #[error("MAC mismatch")]
    MacMismatch,

    /// MAC field is not 32 bytes of hex
    #[error("malformed MAC: {0}")]
    Malformed(ProtocolError),
}

#[derive(Debug)]
struct PendingChallenge {
    nonce: Nonce,
    peer: NodeId,
    issued_at: Instant,
}

/// MOR-side challenge issuer and response verifier.
pub struct Authenticator {
    config: ChallengeConfig,
    secrets: Arc<dyn SecretProvider>,
    pending: Option<PendingChallenge>,
}

impl Authenticator {
    /// Create an authenticator with no pending challenge.
    pub fn new(config: ChallengeConfig, secrets: Arc<dyn SecretProvider>) -> Self {
        Self { config, secrets, pending: None }
    }

    /// Issue a fresh nonce for `peer`, replacing any pending challenge.
    pub fn send_challenge(&mut self, env: &impl Environment, peer: NodeId, now: Instant) -> Nonce {
        let nonce = Nonce::random(env);

        if let Some(previous) = self.pending.take() {
            tracing::debug!(peer = %previous.peer, "pending challenge superseded");
        }

        self.pending = Some(PendingChallenge { nonce: nonce.clone(), peer, issued_at: now });
        nonce
    }

    /// Pending nonce, if any.
    pub fn pending_nonce(&self) -> Option<&Nonce> {
        self.pending.as_ref().map(|p| &p.nonce)
    }

    /// Drop the pending challenge if it outlived its TTL.
    ///
    /// Returns `true` if one was dropped.
    pub fn expire(&mut self, now: Instant) -> bool {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.issued_at) > self.config.ttl);

        if expired {
            self.pending = None;
            tracing::debug!("pending challenge expired");
        }
        expired
    }

    /// Forget any pending challenge.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Verify a response against the pending challenge.
    ///
    /// On success the nonce is consumed and the session key returned. See
    /// the module docs for what happens to the pending challenge on each
    /// failure.
    ///
    /// # Errors
    ///
    /// - `StaleOrDuplicateNonce` if nothing is pending or it expired
    /// - `InvalidResponse` on nonce, peer or MAC mismatch
    /// - `MissingDeviceSecret` if the peer has no provisioned secret
    pub fn receive_response(
        &mut self,
        response: &Response,
        now: Instant,
    ) -> Result<SessionKey, BeamAuthError> {
        if self.expire(now) {
            return Err(BeamAuthError::StaleOrDuplicateNonce);
        }
        let Some(pending) = self.pending.as_ref() else {
            return Err(BeamAuthError::StaleOrDuplicateNonce);
        };

        if !ct_eq(response.nonce.as_bytes(), pending.nonce.to_hex().as_bytes()) {
            return Err(ResponseRejection::NonceMismatch.into());
        }
        if !pending.peer.matches(&response.node_id) {
            return Err(ResponseRejection::PeerMismatch {
                expected: pending.peer.clone(),
                actual: response.node_id.clone(),
            }
            .into());
        }

        let Some(PendingChallenge { nonce, peer, .. }) = self.pending.take() else {
            return Err(BeamAuthError::StaleOrDuplicateNonce);
        };

        let secret = self
            .secrets
            .device_secret(&peer)
            .ok_or(BeamAuthError::MissingDeviceSecret { node_id: peer })?;
        let key = SessionKey::derive(&secret, &nonce);

        let presented = Tag::from_hex("response_hmac", &response.response_hmac)
            .map_err(ResponseRejection::Malformed)?;
        if !key.response_tag(&nonce).ct_eq(&presented) {
            return Err(ResponseRejection::MacMismatch.into());
        }

        Ok(key)
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("config", &self.config)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

/// GRN side: derive the session key for `nonce` and build the response.
pub fn answer_challenge(
    node_id: &NodeId,
    secret: &DeviceSecret,
    nonce: &Nonce,
) -> (SessionKey, Response) {
    let key = SessionKey::derive(secret, nonce);
    let response = Response {
        node_id: node_id.to_string(),
        nonce: nonce.to_hex(),
        response_hmac: key.response_tag(nonce).to_hex(),
    };
    (key, response)
}

/// MOR side: confirm the agreed session key to the GRN.
pub fn session_ack(node_id: &NodeId, key: &SessionKey, nonce: &Nonce) -> SessionAck {
    SessionAck {
        node_id: node_id.to_string(),
        nonce: nonce.to_hex(),
        ack_hmac: key.ack_tag(nonce).to_hex(),
    }
}

/// GRN side: check a [`SessionAck`] against the locally derived key.
///
/// # Errors
///
/// Returns the first mismatch among peer, nonce and MAC.
pub fn verify_session_ack(
    ack: &SessionAck,
    peer: &NodeId,
    key: &SessionKey,
    nonce: &Nonce,
) -> Result<(), ResponseRejection> {
    if !peer.matches(&ack.node_id) {
        return Err(ResponseRejection::PeerMismatch {
            expected: peer.clone(),
            actual: ack.node_id.clone(),
        });
    }
    if !ct_eq(ack.nonce.as_bytes(), nonce.to_hex().as_bytes()) {
        return Err(ResponseRejection::NonceMismatch);
    }

    let presented = Tag::from_hex("ack_hmac", &ack.ack_hmac).map_err(ResponseRejection::Malformed)?;
    if key.ack_tag(nonce).ct_eq(&presented) {
        Ok(())
    } else {
        Err(ResponseRejection::MacMismatch)
    }
}
