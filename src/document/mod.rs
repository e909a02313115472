// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

//! Consensus documents as seen from this node's position in the topology.

/// Epoch-indexed cache of validated documents.
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::NodeConfig;
use crate::descriptor::{IdentityKey, MixDescriptor, NodeId, Role};
use crate::epoch::Epoch;

pub use store::DocumentStore;

/// Document as returned by an authority, before it is sliced for this node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawDocument {
    pub epoch: Epoch,
    /// Mix layers ordered from the entry layer to the exit layer.
    pub topology: Vec<Vec<MixDescriptor>>,
    pub providers: Vec<MixDescriptor>,
}

/// Errors turning a [`RawDocument`] into a [`Document`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document for epoch {epoch} has an empty topology")]
    EmptyTopology { epoch: Epoch },
    #[error("document for epoch {epoch} does not list this node")]
    SelfNotListed { epoch: Epoch },
    #[error("document for epoch {epoch} lists this node in the wrong role, expected {expected:?}")]
    RoleMismatch { epoch: Epoch, expected: Role },
}

/// Local sanity check failures on this node's own listing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelfCheckError {
    #[error("self name {listed:?} does not match identifier {configured:?}")]
    NameMismatch { listed: String, configured: String },
    #[error("self identity key mismatch")]
    IdentityKeyMismatch,
    #[error("self link key mismatch")]
    LinkKeyMismatch,
}

type DescriptorMap = HashMap<NodeId, Arc<MixDescriptor>>;

/// Immutable snapshot of network membership for a single epoch.
#[derive(Clone, Debug)]
pub struct Document {
    epoch: Epoch,
    incoming: DescriptorMap,
    outgoing: DescriptorMap,
    self_descriptor: Option<Arc<MixDescriptor>>,
}

impl Document {
    /// Builds a document from already sliced peer sets.
    pub fn new(
        epoch: Epoch,
        incoming: impl IntoIterator<Item = MixDescriptor>,
        outgoing: impl IntoIterator<Item = MixDescriptor>,
        self_descriptor: Option<MixDescriptor>,
    ) -> Self {
        Self {
            epoch,
            incoming: index(incoming.into_iter().map(Arc::new)),
            outgoing: index(outgoing.into_iter().map(Arc::new)),
            self_descriptor: self_descriptor.map(Arc::new),
        }
    }

    /// Slices an authority document into the peers that connect to this
    /// node and the peers this node connects to.
    ///
    /// Providers accept connections from the exit layer and connect to the
    /// entry layer. A mix at layer `L` accepts from layer `L - 1` (or the
    /// providers for the entry layer) and connects to layer `L + 1` (or the
    /// providers for the exit layer).
    pub fn from_raw(
        raw: RawDocument,
        identity: &IdentityKey,
        role: Role,
    ) -> Result<Self, DocumentError> {
        let epoch = raw.epoch;
        if raw.topology.is_empty() {
            return Err(DocumentError::EmptyTopology { epoch });
        }
        let me = NodeId::from_identity(identity);
        let topology: Vec<Vec<Arc<MixDescriptor>>> = raw
            .topology
            .into_iter()
            .map(|layer| layer.into_iter().map(Arc::new).collect())
            .collect();
        let providers: Vec<Arc<MixDescriptor>> = raw.providers.into_iter().map(Arc::new).collect();

        let find = |set: &[Arc<MixDescriptor>]| set.iter().find(|d| d.node_id() == me).cloned();
        let mix_position = topology
            .iter()
            .enumerate()
            .find_map(|(layer, set)| find(set).map(|desc| (layer, desc)));
        let as_provider = find(&providers);
        let last = topology.len() - 1;

        let (incoming, outgoing, self_descriptor) = match role {
            Role::Provider => {
                let Some(desc) = as_provider else {
                    return Err(mismatch_or_absent(epoch, mix_position.is_some(), role));
                };
                (
                    index(topology[last].iter().cloned()),
                    index(topology[0].iter().cloned()),
                    desc,
                )
            }
            Role::Mix => {
                let Some((layer, desc)) = mix_position else {
                    return Err(mismatch_or_absent(epoch, as_provider.is_some(), role));
                };
                let incoming = if layer == 0 {
                    index(providers.iter().cloned())
                } else {
                    index(topology[layer - 1].iter().cloned())
                };
                let outgoing = if layer == last {
                    index(providers.iter().cloned())
                } else {
                    index(topology[layer + 1].iter().cloned())
                };
                (incoming, outgoing, desc)
            }
        };

        Ok(Self {
            epoch,
            incoming,
            outgoing,
            self_descriptor: Some(self_descriptor),
        })
    }

    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Peer allowed to connect to this node, if listed.
    pub fn incoming_by_id(&self, id: &NodeId) -> Option<&Arc<MixDescriptor>> {
        self.incoming.get(id)
    }

    /// Peer this node may connect to, if listed.
    pub fn outgoing_by_id(&self, id: &NodeId) -> Option<&Arc<MixDescriptor>> {
        self.outgoing.get(id)
    }

    pub fn incoming(&self) -> impl Iterator<Item = &Arc<MixDescriptor>> {
        self.incoming.values()
    }

    pub fn outgoing(&self) -> impl Iterator<Item = &Arc<MixDescriptor>> {
        self.outgoing.values()
    }

    /// This node's descriptor as the document lists it.
    pub fn self_descriptor(&self) -> Option<&Arc<MixDescriptor>> {
        self.self_descriptor.as_ref()
    }
}

fn index(descriptors: impl Iterator<Item = Arc<MixDescriptor>>) -> DescriptorMap {
    descriptors.map(|desc| (desc.node_id(), desc)).collect()
}

fn mismatch_or_absent(epoch: Epoch, listed_elsewhere: bool, expected: Role) -> DocumentError {
    if listed_elsewhere {
        DocumentError::RoleMismatch { epoch, expected }
    } else {
        DocumentError::SelfNotListed { epoch }
    }
}

/// Light-weight check of this node's own listing against local configuration.
///
/// Authorities are the trust root, so this only catches local
/// misconfiguration. A document without a self entry passes.
pub fn validate_self(document: &Document, config: &NodeConfig) -> Result<(), SelfCheckError> {
    let Some(desc) = document.self_descriptor() else {
        return Ok(());
    };
    if desc.name != config.identifier() {
        return Err(SelfCheckError::NameMismatch {
            listed: desc.name.clone(),
            configured: config.identifier().to_owned(),
        });
    }
    if desc.identity_key != config.identity_public() {
        return Err(SelfCheckError::IdentityKeyMismatch);
    }
    if !desc.link_key_matches(&config.link_public()) {
        return Err(SelfCheckError::LinkKeyMismatch);
    }
    Ok(())
}
