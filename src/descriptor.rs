// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use libp2p_identity::ed25519;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::epoch::Epoch;

/// Long-lived Ed25519 identity key of a node.
pub type IdentityKey = ed25519::PublicKey;
/// X25519 key used to authenticate the wire transport.
pub type LinkKey = x25519_dalek::PublicKey;
/// Per-epoch X25519 packet processing key.
pub type MixPublicKey = x25519_dalek::PublicKey;

/// Length in bytes of a [`NodeId`].
pub const NODE_ID_LENGTH: usize = 32;

/// Fixed-length identifier of a node, the raw bytes of its identity key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LENGTH]);

impl NodeId {
    pub const fn new(bytes: [u8; NODE_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_identity(key: &IdentityKey) -> Self {
        Self(key.to_bytes())
    }

    /// Parses an identifier from untrusted bytes, rejecting any other length.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; NODE_ID_LENGTH] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LENGTH] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

/// Function a node serves in the network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Mix,
    Provider,
}

/// Position of a descriptor within the network topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Mix(u8),
    Provider,
}

/// A single node's published identity, link key, addresses and mix keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MixDescriptor {
    pub name: String,
    pub identity_key: IdentityKey,
    pub link_key: LinkKey,
    pub addresses: Vec<String>,
    /// Only authorities assign mix layers; nodes self-assign `Provider` at most.
    pub layer: Option<Layer>,
    pub mix_keys: BTreeMap<Epoch, MixPublicKey>,
}

impl MixDescriptor {
    pub fn new(
        name: impl Into<String>,
        identity_key: IdentityKey,
        link_key: LinkKey,
        addresses: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            identity_key,
            link_key,
            addresses,
            layer: None,
            mix_keys: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn node_id(&self) -> NodeId {
        NodeId::from_identity(&self.identity_key)
    }

    /// Compares `key` against the listed link key in constant time.
    pub fn link_key_matches(&self, key: &LinkKey) -> bool {
        self.link_key.as_bytes().ct_eq(key.as_bytes()).into()
    }
}

/// Credentials a transport extracted from a peer during its handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerCredentials {
    /// Handshake additional data; a [`NodeId`] when the peer is a mix.
    pub additional_data: Vec<u8>,
    pub public_key: LinkKey,
}

impl PeerCredentials {
    pub fn new(additional_data: Vec<u8>, public_key: LinkKey) -> Self {
        Self {
            additional_data,
            public_key,
        }
    }

    pub fn for_node(id: NodeId, public_key: LinkKey) -> Self {
        Self::new(id.as_bytes().to_vec(), public_key)
    }

    /// The claimed node identifier, if the additional data has the right length.
    pub fn node_id(&self) -> Option<NodeId> {
        NodeId::from_slice(&self.additional_data)
    }
}
