//! Pluggable beacon credential verification.
//!
//! The beacon verifier checks identity and power policy itself but delegates
//! signature authenticity to a [`CredentialVerifier`]. Which one is used is
//! a deployment decision:
//!
//! - [`TrustedRegistry`]: local table of Ed25519 keys per node identity
//! - [`OnChainVerifier`]: asks an authorization contract through a
//!   [`ContractClient`]
//! - [`PolicyOnlyVerifier`]: no signature check at all. Simulation only.
//!
//! # Security
//!
//! A beacon carries its own `public_key`. That key is never trusted on its
//! own: the registry requires it to equal the key registered for the claimed
//! identity, and the contract verifier leaves that binding to the contract.

use std::collections::HashMap;

use ed25519_dalek::{Signature, VerifyingKey};
use heliobeam_proto::{Beacon, ProtocolError, hexfmt};
use thiserror::Error;

use crate::{beacon::canonical_message, crypto::ct_eq, identity::NodeId};

/// Reasons a credential check can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No trusted key exists for the claimed identity
    #[error("no trusted key registered for {0}")]
    UnknownIdentity(String),

    /// Beacon key differs from the registered key
    #[error("public key does not match the key registered for {0}")]
    KeyMismatch(String),

    /// Signature or key field is not valid hex of the right length
    #[error("malformed credential field: {0}")]
    Malformed(#[from] ProtocolError),

    /// Key bytes are not a valid Ed25519 point
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    /// Signature does not verify over the canonical message
    #[error("signature verification failed")]
    BadSignature,

    /// The external verifier rejected the credential
    #[error("credential rejected by authorization contract")]
    Rejected,

    /// The external verifier could not be reached
    #[error("credential verifier unavailable: {0}")]
    Unavailable(String),
}

/// Verifies that a beacon was issued by the node it names.
pub trait CredentialVerifier: Send + Sync {
    /// Check the beacon's signature and key binding.
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] describing the first failed check.
    fn verify(&self, beacon: &Beacon) -> Result<(), CredentialError>;
}

/// Accepts every beacon without looking at the signature.
///
/// Only identity and power policy are enforced (by the beacon verifier).
/// Suitable for simulations; never for a deployment that can be reached by
/// an adversary.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyOnlyVerifier;

impl CredentialVerifier for PolicyOnlyVerifier {
    fn verify(&self, beacon: &Beacon) -> Result<(), CredentialError> {
        tracing::debug!(node_id = %beacon.node_id, "beacon signature not checked (policy-only verifier)");
        Ok(())
    }
}

/// Table of trusted Ed25519 keys, one per node identity.
#[derive(Debug, Clone, Default)]
pub struct TrustedRegistry {
    keys: HashMap<NodeId, VerifyingKey>,
}

impl TrustedRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `key` for `node_id`, returning the key it replaces.
    pub fn register(&mut self, node_id: NodeId, key: VerifyingKey) -> Option<VerifyingKey> {
        self.keys.insert(node_id, key)
    }

    /// Stop trusting `node_id`.
    pub fn remove(&mut self, node_id: &NodeId) -> Option<VerifyingKey> {
        self.keys.remove(node_id)
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, node_id: NodeId, key: VerifyingKey) -> Self {
        self.register(node_id, key);
        self
    }
}

impl CredentialVerifier for TrustedRegistry {
    fn verify(&self, beacon: &Beacon) -> Result<(), CredentialError> {
        let trusted = self
            .keys
            .get(beacon.node_id.as_str())
            .ok_or_else(|| CredentialError::UnknownIdentity(beacon.node_id.clone()))?;

        let claimed: [u8; 32] = hexfmt::decode_fixed("public_key", &beacon.public_key)?;
        if !ct_eq(&claimed, trusted.as_bytes()) {
            return Err(CredentialError::KeyMismatch(beacon.node_id.clone()));
        }

        let signature = decode_signature(beacon)?;
        let message = canonical_message(&beacon.node_id, beacon.requested_power_w, beacon.timestamp);

        trusted.verify_strict(&message, &signature).map_err(|_| CredentialError::BadSignature)
    }
}

/// Client for an on-chain authorization contract.
pub trait ContractClient: Send + Sync {
    /// Ask the contract whether `node_id` may sign `message` with
    /// `public_key`, and whether `signature` is valid.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Unavailable`] if the contract cannot be
    /// queried.
    fn verify_node(
        &self,
        node_id: &str,
        message: &[u8],
        signature: &Signature,
        public_key: &VerifyingKey,
    ) -> Result<bool, CredentialError>;
}

/// Delegates credential checks to an authorization contract.
#[derive(Debug, Clone)]
pub struct OnChainVerifier<C> {
    client: C,
}

impl<C: ContractClient> OnChainVerifier<C> {
    /// Wrap a contract client.
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: ContractClient> CredentialVerifier for OnChainVerifier<C> {
    fn verify(&self, beacon: &Beacon) -> Result<(), CredentialError> {
        let key_bytes: [u8; 32] = hexfmt::decode_fixed("public_key", &beacon.public_key)?;
        let public_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        let signature = decode_signature(beacon)?;
        let message = canonical_message(&beacon.node_id, beacon.requested_power_w, beacon.timestamp);

        if self.client.verify_node(&beacon.node_id, &message, &signature, &public_key)? {
            Ok(())
        } else {
            Err(CredentialError::Rejected)
        }
    }
}

fn decode_signature(beacon: &Beacon) -> Result<Signature, CredentialError> {
    let bytes: [u8; 64] = hexfmt::decode_fixed("signature", &beacon.signature)?;
    Ok(Signature::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::{beacon::BeaconIssuer, env::Moment};

    fn issuer() -> BeaconIssuer {
        BeaconIssuer::new(NodeId::from("GRN-001"), SigningKey::from_bytes(&[7u8; 32]))
    }

    fn beacon() -> Beacon {
        let at = Moment::new(Instant::now(), Duration::from_secs(1_700_000_000));
        issuer().generate_beacon(1_000_000, at)
    }

    fn registry() -> TrustedRegistry {
        TrustedRegistry::new().with(NodeId::from("GRN-001"), issuer().verifying_key())
    }

    #[test]
    fn registry_accepts_genuine_beacon() {
        assert_eq!(registry().verify(&beacon()), Ok(()));
    }

    #[test]
    fn registry_rejects_tampered_fields() {
        let mut tampered = beacon();
        tampered.requested_power_w += 1;
        assert_eq!(registry().verify(&tampered), Err(CredentialError::BadSignature));

        let mut tampered = beacon();
        tampered.timestamp -= 1;
        assert_eq!(registry().verify(&tampered), Err(CredentialError::BadSignature));
    }

    #[test]
    fn registry_rejects_unknown_identity() {
        let mut other = beacon();
        other.node_id = "GRN-999".to_string();
        assert_eq!(
            registry().verify(&other),
            Err(CredentialError::UnknownIdentity("GRN-999".to_string()))
        );
    }

    #[test]
    fn registry_rejects_self_signed_impostor() {
        let impostor = BeaconIssuer::new(NodeId::from("GRN-001"), SigningKey::from_bytes(&[9u8; 32]));
        let at = Moment::new(Instant::now(), Duration::from_secs(1_700_000_000));
        let forged = impostor.generate_beacon(1_000_000, at);

        assert_eq!(
            registry().verify(&forged),
            Err(CredentialError::KeyMismatch("GRN-001".to_string()))
        );
    }

    #[test]
    fn registry_rejects_malformed_signature() {
        let mut malformed = beacon();
        malformed.signature = "not hex".to_string();
        assert!(matches!(registry().verify(&malformed), Err(CredentialError::Malformed(_))));
    }

    #[test]
    fn policy_only_accepts_anything() {
        let mut junk = beacon();
        junk.signature = "mock_signature".to_string();
        junk.public_key = "mock_public_key".to_string();
        assert_eq!(PolicyOnlyVerifier.verify(&junk), Ok(()));
    }

    #[derive(Clone, Default)]
    struct FakeContract {
        answer: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ContractClient for FakeContract {
        fn verify_node(
            &self,
            node_id: &str,
            message: &[u8],
            signature: &Signature,
            public_key: &VerifyingKey,
        ) -> Result<bool, CredentialError> {
            self.calls.lock().unwrap().push(node_id.to_string());
            Ok(self.answer && public_key.verify_strict(message, signature).is_ok())
        }
    }

    #[test]
    fn on_chain_delegates_to_contract() {
        let contract = FakeContract { answer: true, ..FakeContract::default() };
        let verifier = OnChainVerifier::new(contract.clone());

        assert_eq!(verifier.verify(&beacon()), Ok(()));
        assert_eq!(contract.calls.lock().unwrap().as_slice(), ["GRN-001".to_string()]);
    }

    #[test]
    fn on_chain_rejection_is_reported() {
        let verifier = OnChainVerifier::new(FakeContract::default());
        assert_eq!(verifier.verify(&beacon()), Err(CredentialError::Rejected));
    }

    #[test]
    fn on_chain_never_calls_contract_with_malformed_key() {
        let contract = FakeContract { answer: true, ..FakeContract::default() };
        let verifier = OnChainVerifier::new(contract.clone());

        let mut malformed = beacon();
        malformed.public_key = "00".to_string();

        assert!(matches!(verifier.verify(&malformed), Err(CredentialError::Malformed(_))));
        assert!(contract.calls.lock().unwrap().is_empty());
    }
}
