//! Beacon issuance (GRN) and verification (MOR).
//!
//! A beacon asks an orbital receiver for beam power. The issuer signs the
//! canonical message `"{node_id}:{requested_power_w}:{timestamp}"` so that
//! altering any of the three fields invalidates the signature.
//!
//! Verification runs four gates in order and stops at the first failure:
//!
//! 1. identity is on the allow-list
//! 2. requested power is within the policy ceiling
//! 3. timestamp is inside the freshness window
//! 4. the injected [`CredentialVerifier`] accepts the signature

use std::{fmt, time::Duration};

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use heliobeam_proto::Beacon;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::{
    credential::{CredentialError, CredentialVerifier},
    env::{Environment, Moment},
    error::BeamAuthError,
    identity::NodeId,
};

/// Bytes covered by a beacon signature.
#[must_use]
pub fn canonical_message(node_id: &str, requested_power_w: u64, timestamp: u64) -> Vec<u8> {
    format!("{node_id}:{requested_power_w}:{timestamp}").into_bytes()
}

/// Signs beacons on behalf of one GRN.
pub struct BeaconIssuer {
    node_id: NodeId,
    signing_key: SigningKey,
}

impl BeaconIssuer {
    /// Issuer with an existing signing key.
    pub fn new(node_id: NodeId, signing_key: SigningKey) -> Self {
        Self { node_id, signing_key }
    }

    /// Issuer with a fresh key drawn from the environment RNG.
    pub fn generate(node_id: NodeId, env: &impl Environment) -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        env.random_bytes(&mut seed[..]);
        Self::new(node_id, SigningKey::from_bytes(&seed))
    }

    /// Identity this issuer signs for.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Public half of the signing key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Build and sign a beacon stamped with `at` (whole seconds).
    ///
    /// Freshness is not checked here; that is the verifier's job.
    pub fn generate_beacon(&self, requested_power_w: u64, at: Moment) -> Beacon {
        let timestamp = at.unix_secs();
        let message = canonical_message(self.node_id.as_str(), requested_power_w, timestamp);
        let signature = self.signing_key.sign(&message);

        Beacon {
            node_id: self.node_id.to_string(),
            requested_power_w,
            timestamp,
            signature: hex::encode(signature.to_bytes()),
            public_key: hex::encode(self.verifying_key().as_bytes()),
        }
    }
}

impl fmt::Debug for BeaconIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeaconIssuer")
            .field("node_id", &self.node_id)
            .field("public_key", &hex::encode(self.verifying_key().as_bytes()))
            .finish_non_exhaustive()
    }
}

/// Acceptance policy for incoming beacons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconPolicy {
    /// Identities allowed to request power
    pub allowed_nodes: Vec<NodeId>,
    /// Power ceiling in watts (inclusive)
    pub max_power_w: u64,
    /// Oldest beacon accepted
    pub max_age: Duration,
    /// How far ahead of the local clock a beacon may be stamped
    pub max_future_skew: Duration,
}

impl Default for BeaconPolicy {
    fn default() -> Self {
        Self {
            allowed_nodes: vec![NodeId::from("GRN-001")],
            max_power_w: 1_000_000,
            max_age: Duration::from_secs(30),
            max_future_skew: Duration::from_secs(5),
        }
    }
}

impl BeaconPolicy {
    fn allows(&self, node_id: &str) -> bool {
        self.allowed_nodes.iter().any(|allowed| allowed.matches(node_id))
    }
}

/// Why a beacon was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconRejection {
    /// Identity is not on the allow-list
    #[error("node {node_id} is not allowed to request power")]
    UnknownIdentity {
        /// Claimed identity
        node_id: String,
    },

    /// Requested power exceeds the ceiling
    #[error("requested {requested_w} W exceeds ceiling of {max_w} W")]
    PowerAboveCeiling {
        /// Requested power
        requested_w: u64,
        /// Policy ceiling
        max_w: u64,
    },

    /// Beacon is older than the freshness window
    #[error("beacon is {age:?} old (max {max_age:?})")]
    Expired {
        /// Age at verification time
        age: Duration,
        /// Policy limit
        max_age: Duration,
    },

    /// Beacon is stamped too far in the future
    #[error("beacon is stamped {ahead:?} ahead of local clock (max {max_skew:?})")]
    FromFuture {
        /// How far ahead
        ahead: Duration,
        /// Policy limit
        max_skew: Duration,
    },

    /// Credential verifier refused the signature
    #[error("credential check failed: {0}")]
    Credential(#[from] CredentialError),
}

/// A beacon that passed every gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedRequest {
    /// Verified identity
    pub node_id: NodeId,
    /// Granted power in watts
    pub requested_power_w: u64,
    /// Beacon timestamp, seconds since the UNIX epoch
    pub issued_at: u64,
}

/// Checks beacons against a policy and a credential verifier.
pub struct BeaconVerifier {
    policy: BeaconPolicy,
    credentials: Box<dyn CredentialVerifier>,
}

impl BeaconVerifier {
    /// Verifier with the given policy and credential check.
    pub fn new(policy: BeaconPolicy, credentials: Box<dyn CredentialVerifier>) -> Self {
        Self { policy, credentials }
    }

    /// Active policy.
    pub fn policy(&self) -> &BeaconPolicy {
        &self.policy
    }

    /// Run all gates against `beacon` as of `at`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBeacon` with the first failing gate.
    pub fn receive_beacon(
        &self,
        beacon: &Beacon,
        at: Moment,
    ) -> Result<AuthorizedRequest, BeamAuthError> {
        self.check(beacon, at).map_err(|rejection| {
            tracing::warn!(node_id = %beacon.node_id, reason = %rejection, "beacon rejected");
            BeamAuthError::InvalidBeacon(rejection)
        })?;

        Ok(AuthorizedRequest {
            node_id: NodeId::from(beacon.node_id.as_str()),
            requested_power_w: beacon.requested_power_w,
            issued_at: beacon.timestamp,
        })
    }

    fn check(&self, beacon: &Beacon, at: Moment) -> Result<(), BeaconRejection> {
        if !self.policy.allows(&beacon.node_id) {
            return Err(BeaconRejection::UnknownIdentity { node_id: beacon.node_id.clone() });
        }

        if beacon.requested_power_w > self.policy.max_power_w {
            return Err(BeaconRejection::PowerAboveCeiling {
                requested_w: beacon.requested_power_w,
                max_w: self.policy.max_power_w,
            });
        }

        let now = at.unix_secs();
        if beacon.timestamp > now {
            let ahead = Duration::from_secs(beacon.timestamp - now);
            if ahead > self.policy.max_future_skew {
                return Err(BeaconRejection::FromFuture {
                    ahead,
                    max_skew: self.policy.max_future_skew,
                });
            }
        } else {
            let age = Duration::from_secs(now - beacon.timestamp);
            if age > self.policy.max_age {
                return Err(BeaconRejection::Expired { age, max_age: self.policy.max_age });
            }
        }

        self.credentials.verify(beacon)?;
        Ok(())
    }
}

impl fmt::Debug for BeaconVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeaconVerifier").field("policy", &self.policy).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::credential::{PolicyOnlyVerifier, TrustedRegistry};

    const EPOCH: u64 = 1_700_000_000;

    fn at(secs: u64) -> Moment {
        Moment::new(Instant::now(), Duration::from_secs(secs))
    }

    fn issuer() -> BeaconIssuer {
        BeaconIssuer::new(NodeId::from("GRN-001"), SigningKey::from_bytes(&[3u8; 32]))
    }

    fn registry_verifier() -> BeaconVerifier {
        let registry = TrustedRegistry::new().with(NodeId::from("GRN-001"), issuer().verifying_key());
        BeaconVerifier::new(BeaconPolicy::default(), Box::new(registry))
    }

    #[test]
    fn canonical_message_layout() {
        assert_eq!(canonical_message("GRN-001", 1_000_000, 42), b"GRN-001:1000000:42".to_vec());
    }

    #[test]
    fn beacon_fields_are_hex_encoded() {
        let beacon = issuer().generate_beacon(500, at(EPOCH));

        assert_eq!(beacon.node_id, "GRN-001");
        assert_eq!(beacon.timestamp, EPOCH);
        assert_eq!(beacon.signature.len(), 128);
        assert_eq!(beacon.public_key.len(), 64);
    }

    #[test]
    fn accepts_power_at_ceiling() {
        let beacon = issuer().generate_beacon(1_000_000, at(EPOCH));
        let request = registry_verifier().receive_beacon(&beacon, at(EPOCH)).unwrap();

        assert_eq!(request.node_id, NodeId::from("GRN-001"));
        assert_eq!(request.requested_power_w, 1_000_000);
        assert_eq!(request.issued_at, EPOCH);
    }

    #[test]
    fn rejects_power_above_ceiling() {
        let beacon = issuer().generate_beacon(1_000_001, at(EPOCH));
        let err = registry_verifier().receive_beacon(&beacon, at(EPOCH)).unwrap_err();

        assert_eq!(
            err,
            BeamAuthError::InvalidBeacon(BeaconRejection::PowerAboveCeiling {
                requested_w: 1_000_001,
                max_w: 1_000_000,
            })
        );
    }

    #[test]
    fn identity_is_checked_before_power() {
        let rogue = BeaconIssuer::new(NodeId::from("GRN-666"), SigningKey::from_bytes(&[4u8; 32]));
        let beacon = rogue.generate_beacon(u64::MAX, at(EPOCH));
        let err = registry_verifier().receive_beacon(&beacon, at(EPOCH)).unwrap_err();

        assert!(matches!(
            err,
            BeamAuthError::InvalidBeacon(BeaconRejection::UnknownIdentity { .. })
        ));
    }

    #[test]
    fn freshness_window() {
        let verifier = registry_verifier();
        let beacon = issuer().generate_beacon(10, at(EPOCH));

        assert!(verifier.receive_beacon(&beacon, at(EPOCH + 30)).is_ok());
        assert!(verifier.receive_beacon(&beacon, at(EPOCH - 5)).is_ok());

        assert!(matches!(
            verifier.receive_beacon(&beacon, at(EPOCH + 31)),
            Err(BeamAuthError::InvalidBeacon(BeaconRejection::Expired { .. }))
        ));
        assert!(matches!(
            verifier.receive_beacon(&beacon, at(EPOCH - 6)),
            Err(BeamAuthError::InvalidBeacon(BeaconRejection::FromFuture { .. }))
        ));
    }

    #[test]
    fn credential_failure_is_reported() {
        let mut beacon = issuer().generate_beacon(10, at(EPOCH));
        beacon.requested_power_w = 20;

        assert_eq!(
            registry_verifier().receive_beacon(&beacon, at(EPOCH)),
            Err(BeamAuthError::InvalidBeacon(BeaconRejection::Credential(
                CredentialError::BadSignature
            )))
        );
    }

    #[test]
    fn policy_only_verifier_skips_signature() {
        let verifier = BeaconVerifier::new(BeaconPolicy::default(), Box::new(PolicyOnlyVerifier));
        let mut beacon = issuer().generate_beacon(10, at(EPOCH));
        beacon.signature = "mock_signature".to_string();

        assert!(verifier.receive_beacon(&beacon, at(EPOCH)).is_ok());
    }
}
