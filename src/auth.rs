// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

//! Peer authentication against the cached PKI documents.
//!
//! Connections are judged against every document whose epoch is close
//! enough to now for clock skew between nodes to matter. Sending is held
//! to tighter windows than connecting. Outgoing connections may only send
//! under the current document.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::debug::{link_key_string, printable_bytes};
use crate::descriptor::{MixDescriptor, NodeId, PeerCredentials};
use crate::document::{Document, DocumentStore};
use crate::epoch::{Epoch, EpochClock, EpochTime};

/// Connections for the next epoch are accepted this long before it starts.
pub const EARLY_CONNECT_SLACK: Duration = Duration::from_secs(30 * 60);
/// Connections for the previous epoch are accepted this long after it ended.
pub const LATE_CONNECT_SLACK: Duration = Duration::from_secs(3 * 60);
/// Inbound peers of the next epoch may send this long before it starts.
pub const EARLY_SEND_SLACK: Duration = Duration::from_secs(2 * 60);
/// Inbound peers of the previous epoch may send this long after it ended.
pub const LATE_SEND_SLACK: Duration = Duration::from_secs(2 * 60);

/// Verdict on a peer that connected to this node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IncomingAuth {
    pub can_send: bool,
    pub is_valid: bool,
}

/// Verdict on a peer this node connected to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingAuth {
    /// Descriptor of the peer as listed in the last matching document.
    pub descriptor: Option<Arc<MixDescriptor>>,
    pub can_send: bool,
    pub is_valid: bool,
}

/// Epochs whose documents are consulted at `time`, current epoch first.
///
/// The next epoch is added inside the early connect slack; otherwise the
/// previous one is added inside the late connect slack.
pub fn authentication_epochs(time: EpochTime) -> Vec<Epoch> {
    let now = time.epoch;
    let mut epochs = vec![now];
    if time.till < EARLY_CONNECT_SLACK {
        epochs.push(now.saturating_add(1));
    } else if time.elapsed < LATE_CONNECT_SLACK && now > 0 {
        epochs.push(now - 1);
    }
    epochs
}

fn incoming_send_permitted(epoch: Epoch, time: EpochTime) -> bool {
    let now = time.epoch;
    epoch == now
        || (epoch == now.saturating_add(1) && time.till < EARLY_SEND_SLACK)
        || (now > 0 && epoch == now - 1 && time.elapsed < LATE_SEND_SLACK)
}

/// Read-only view of the document store for the transport layer.
///
/// Cheap to clone; every call takes a single clock snapshot.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<DocumentStore>,
    clock: Arc<dyn EpochClock>,
    disabled: bool,
}

impl Authenticator {
    /// `disabled` accepts every peer without consulting the documents and
    /// must only be used for debugging.
    pub fn new(store: Arc<DocumentStore>, clock: Arc<dyn EpochClock>, disabled: bool) -> Self {
        Self {
            store,
            clock,
            disabled,
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Documents to authenticate against, and the epoch they were chosen for.
    pub fn documents_for_authentication(&self) -> (Vec<Arc<Document>>, Epoch) {
        let time = self.clock.now();
        (self.documents_at(time), time.epoch)
    }

    /// Document for the current epoch, if it has been fetched.
    pub fn current_document(&self) -> Option<Arc<Document>> {
        self.store.get(self.clock.now().epoch)
    }

    pub fn authenticate_incoming(&self, creds: &PeerCredentials) -> IncomingAuth {
        if self.disabled {
            debug!(peer = %PeerLog(creds), "blindly authenticating incoming peer");
            return IncomingAuth {
                can_send: true,
                is_valid: true,
            };
        }
        let Some(id) = creds.node_id() else {
            debug!(peer = %PeerLog(creds), "incoming peer presented malformed additional data");
            return IncomingAuth::default();
        };

        let time = self.clock.now();
        let mut auth = IncomingAuth::default();
        for document in self.documents_at(time) {
            let Some(descriptor) = document.incoming_by_id(&id) else {
                continue;
            };
            if !descriptor.link_key_matches(&creds.public_key) {
                warn!(
                    peer = %PeerLog(creds),
                    epoch = document.epoch(),
                    "incoming peer link key mismatch"
                );
                continue;
            }
            auth.is_valid = true;
            if incoming_send_permitted(document.epoch(), time) {
                auth.can_send = true;
                break;
            }
        }
        auth
    }

    pub fn authenticate_outgoing(&self, creds: &PeerCredentials) -> OutgoingAuth {
        if self.disabled {
            debug!(peer = %PeerLog(creds), "blindly authenticating outgoing peer");
            return OutgoingAuth {
                descriptor: None,
                can_send: true,
                is_valid: true,
            };
        }
        let Some(id) = creds.node_id() else {
            debug!(peer = %PeerLog(creds), "outgoing peer presented malformed additional data");
            return OutgoingAuth::default();
        };

        let time = self.clock.now();
        let mut auth = OutgoingAuth::default();
        for document in self.documents_at(time) {
            let Some(descriptor) = document.outgoing_by_id(&id) else {
                continue;
            };
            if !descriptor.link_key_matches(&creds.public_key) {
                warn!(
                    peer = %PeerLog(creds),
                    epoch = document.epoch(),
                    "outgoing peer link key mismatch"
                );
                continue;
            }
            auth.descriptor = Some(Arc::clone(descriptor));
            auth.is_valid = true;
            if document.epoch() == time.epoch {
                auth.can_send = true;
                break;
            }
        }
        auth
    }

    /// Whether packets may be forwarded to `id` under the current document.
    pub fn is_valid_forward_destination(&self, id: &NodeId) -> bool {
        if self.disabled {
            debug!(peer = %id, "blindly authenticating forward destination");
            return true;
        }
        self.current_document()
            .is_some_and(|document| document.outgoing_by_id(id).is_some())
    }

    /// Every peer this node should hold an outgoing connection to.
    ///
    /// When several documents list the same peer, the earliest candidate
    /// document's descriptor is kept.
    pub fn outgoing_destinations(&self) -> HashMap<NodeId, Arc<MixDescriptor>> {
        let (documents, _) = self.documents_for_authentication();
        let mut destinations = HashMap::new();
        for document in documents {
            for descriptor in document.outgoing() {
                destinations
                    .entry(descriptor.node_id())
                    .or_insert_with(|| Arc::clone(descriptor));
            }
        }
        destinations
    }

    fn documents_at(&self, time: EpochTime) -> Vec<Arc<Document>> {
        self.store.get_many(&authentication_epochs(time))
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("documents", &self.store.epochs())
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

struct PeerLog<'a>(&'a PeerCredentials);

impl fmt::Display for PeerLog<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' ({})",
            printable_bytes(&self.0.additional_data),
            link_key_string(&self.0.public_key)
        )
    }
}
