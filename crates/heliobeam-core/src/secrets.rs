//! Per-device secret provisioning.
//!
//! Each GRN holds a device-unique secret (in hardware, derived from a PUF).
//! The MOR holds the matching secret for every GRN it will serve, keyed by
//! node identity. Secrets are never transmitted; only values derived from
//! them are.
//!
//! Nodes receive secrets through the [`SecretProvider`] trait so that the
//! backing store (secure element, HSM, in-memory table) is injected rather
//! than compiled in.
//!
//! # Lifecycle
//!
//! ```text
//! provision ──> generation 1 ──rotate──> generation 2 ──rotate──> ...
//!                    │                        │
//!                    └────────revoke──────────┴──> absent
//! ```
//!
//! Rotation takes effect for the next challenge. A session already keyed
//! from the previous generation keeps its session key until it ends.

use std::{
    collections::HashMap,
    fmt,
    sync::{PoisonError, RwLock},
};

use thiserror::Error;
use zeroize::Zeroizing;

use crate::identity::NodeId;

/// Length of a device secret in bytes.
pub const DEVICE_SECRET_LEN: usize = 32;

/// Device-unique secret. Zeroized on drop, redacted in `Debug`.
#[derive(Clone)]
pub struct DeviceSecret(Zeroizing<[u8; DEVICE_SECRET_LEN]>);

impl DeviceSecret {
    /// Wrap raw secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; DEVICE_SECRET_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Draw a fresh secret from an environment's RNG.
    pub fn generate(env: &impl crate::env::Environment) -> Self {
        let mut bytes = Zeroizing::new([0u8; DEVICE_SECRET_LEN]);
        env.random_bytes(&mut bytes[..]);
        Self(bytes)
    }

    /// Borrow the raw bytes for key derivation.
    #[must_use]
    pub fn expose(&self) -> &[u8; DEVICE_SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for DeviceSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceSecret(<redacted>)")
    }
}

/// Source of device secrets, keyed by node identity.
pub trait SecretProvider: Send + Sync {
    /// Current secret for `node_id`, or `None` if the device is unknown or
    /// revoked.
    fn device_secret(&self, node_id: &NodeId) -> Option<DeviceSecret>;
}

/// Errors from the provisioning lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    /// A secret already exists for this node
    #[error("device {0} is already provisioned")]
    AlreadyProvisioned(NodeId),

    /// No secret exists for this node
    #[error("device {0} is not provisioned")]
    NotProvisioned(NodeId),
}

struct Entry {
    secret: DeviceSecret,
    generation: u64,
}

/// In-memory secret store with an explicit provisioning lifecycle.
///
/// Shareable behind an `Arc` between a provisioning task and the node that
/// reads from it.
#[derive(Default)]
pub struct SecretStore {
    entries: RwLock<HashMap<NodeId, Entry>>,
}

impl SecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the first secret for a device.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::AlreadyProvisioned`] if the device already has
    /// a secret; use [`SecretStore::rotate`] to replace it.
    pub fn provision(&self, node_id: NodeId, secret: DeviceSecret) -> Result<(), SecretError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&node_id) {
            return Err(SecretError::AlreadyProvisioned(node_id));
        }

        tracing::debug!(node_id = %node_id, "provisioned device secret");
        entries.insert(node_id, Entry { secret, generation: 1 });
        Ok(())
    }

    /// Replace a device secret, returning the new generation.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::NotProvisioned`] for unknown devices.
    pub fn rotate(&self, node_id: &NodeId, secret: DeviceSecret) -> Result<u64, SecretError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry =
            entries.get_mut(node_id).ok_or_else(|| SecretError::NotProvisioned(node_id.clone()))?;

        entry.secret = secret;
        entry.generation += 1;

        tracing::debug!(node_id = %node_id, generation = entry.generation, "rotated device secret");
        Ok(entry.generation)
    }

    /// Remove a device secret. Later challenges for it fail.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::NotProvisioned`] for unknown devices.
    pub fn revoke(&self, node_id: &NodeId) -> Result<(), SecretError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(node_id).ok_or_else(|| SecretError::NotProvisioned(node_id.clone()))?;

        tracing::debug!(node_id = %node_id, "revoked device secret");
        Ok(())
    }

    /// Current generation of a device secret, if provisioned.
    #[must_use]
    pub fn generation(&self, node_id: &NodeId) -> Option<u64> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(node_id).map(|entry| entry.generation)
    }
}

impl SecretProvider for SecretStore {
    fn device_secret(&self, node_id: &NodeId) -> Option<DeviceSecret> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(node_id).map(|entry| entry.secret.clone())
    }
}

impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SecretStore").field("devices", &entries.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(byte: u8) -> DeviceSecret {
        DeviceSecret::from_bytes([byte; DEVICE_SECRET_LEN])
    }

    #[test]
    fn provision_then_lookup() {
        let store = SecretStore::new();
        let grn = NodeId::from("GRN-001");

        store.provision(grn.clone(), secret(7)).unwrap();

        assert_eq!(store.device_secret(&grn).unwrap().expose(), &[7; DEVICE_SECRET_LEN]);
        assert_eq!(store.generation(&grn), Some(1));
        assert!(store.device_secret(&NodeId::from("GRN-002")).is_none());
    }

    #[test]
    fn double_provision_is_rejected() {
        let store = SecretStore::new();
        let grn = NodeId::from("GRN-001");

        store.provision(grn.clone(), secret(1)).unwrap();
        assert_eq!(
            store.provision(grn.clone(), secret(2)),
            Err(SecretError::AlreadyProvisioned(grn.clone()))
        );
        assert_eq!(store.device_secret(&grn).unwrap().expose(), &[1; DEVICE_SECRET_LEN]);
    }

    #[test]
    fn rotate_bumps_generation() {
        let store = SecretStore::new();
        let grn = NodeId::from("GRN-001");

        store.provision(grn.clone(), secret(1)).unwrap();
        assert_eq!(store.rotate(&grn, secret(2)), Ok(2));
        assert_eq!(store.rotate(&grn, secret(3)), Ok(3));
        assert_eq!(store.device_secret(&grn).unwrap().expose(), &[3; DEVICE_SECRET_LEN]);
    }

    #[test]
    fn revoke_removes_secret() {
        let store = SecretStore::new();
        let grn = NodeId::from("GRN-001");

        store.provision(grn.clone(), secret(1)).unwrap();
        store.revoke(&grn).unwrap();

        assert!(store.device_secret(&grn).is_none());
        assert_eq!(store.revoke(&grn), Err(SecretError::NotProvisioned(grn.clone())));
        assert_eq!(store.rotate(&grn, secret(2)), Err(SecretError::NotProvisioned(grn)));
    }

    #[test]
    fn debug_never_prints_secret_bytes() {
        let rendered = format!("{:?}", secret(0xAB));
        assert_eq!(rendered, "DeviceSecret(<redacted>)");
    }
}
