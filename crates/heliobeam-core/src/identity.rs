//! Node identity.
//!
//! A node's identity is fixed at process start and never changes for the
//! lifetime of the node.

use std::{borrow::Borrow, fmt};

/// Stable identifier of a protocol node, e.g. `GRN-001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a wire-level `node_id` field names this node.
    #[must_use]
    pub fn matches(&self, claimed: &str) -> bool {
        self.0 == claimed
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets maps keyed by `NodeId` be queried with a wire-level `&str`.
impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which end of the link a node sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Ground transmission node: issues beacons, answers challenges, sends
    /// heartbeats
    Grn,
    /// Orbital receiver: verifies beacons and responses, monitors heartbeats
    Mor,
}

impl Role {
    /// The other end of the link.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Self::Grn => Self::Mor,
            Self::Mor => Self::Grn,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grn => f.write_str("GRN"),
            Self::Mor => f.write_str("MOR"),
        }
    }
}
