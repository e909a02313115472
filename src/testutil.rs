// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

//! Shared fixtures for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use libp2p_identity::ed25519;
use rand_core_06::OsRng;
use x25519_dalek::StaticSecret;

use crate::authority::Authority;
use crate::config::NodeConfig;
use crate::descriptor::{IdentityKey, Layer, LinkKey, MixDescriptor, NodeId, PeerCredentials, Role};
use crate::document::RawDocument;
use crate::epoch::Epoch;
use crate::events::{PkiEvents, TickReport};

pub const TEST_ADDRESS: &str = "tcp://127.0.0.1:29483";

/// Freshly keyed node.
#[derive(Clone)]
pub struct TestNode {
    pub name: String,
    pub identity: ed25519::Keypair,
    pub link: StaticSecret,
}

impl TestNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            identity: ed25519::Keypair::generate(),
            link: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId::from_identity(&self.identity_public())
    }

    pub fn identity_public(&self) -> IdentityKey {
        self.identity.public()
    }

    pub fn link_public(&self) -> LinkKey {
        LinkKey::from(&self.link)
    }

    pub fn descriptor(&self) -> MixDescriptor {
        MixDescriptor::new(
            self.name.clone(),
            self.identity_public(),
            self.link_public(),
            vec![TEST_ADDRESS.to_owned()],
        )
    }

    pub fn descriptor_with_layer(&self, layer: Layer) -> MixDescriptor {
        let mut descriptor = self.descriptor();
        descriptor.layer = Some(layer);
        descriptor
    }

    pub fn config(&self, role: Role) -> NodeConfig {
        NodeConfig::new(
            self.name.clone(),
            self.identity.clone(),
            self.link.clone(),
            role,
            vec![TEST_ADDRESS.to_owned()],
        )
        .expect("test config")
    }

    /// Handshake credentials this node presents to its peers.
    pub fn credentials(&self) -> PeerCredentials {
        PeerCredentials::for_node(self.id(), self.link_public())
    }
}

/// Authority document with one node list per mix layer.
pub fn raw_document(
    epoch: Epoch,
    topology: &[&[&TestNode]],
    providers: &[&TestNode],
) -> RawDocument {
    RawDocument {
        epoch,
        topology: topology
            .iter()
            .enumerate()
            .map(|(layer, nodes)| {
                nodes
                    .iter()
                    .map(|node| node.descriptor_with_layer(Layer::Mix(layer as u8)))
                    .collect()
            })
            .collect(),
        providers: providers
            .iter()
            .map(|node| node.descriptor_with_layer(Layer::Provider))
            .collect(),
    }
}

/// Event sink counting every notification.
#[derive(Default)]
pub struct RecordingEvents {
    peers: AtomicUsize,
    keys: AtomicUsize,
    reports: Mutex<Vec<TickReport>>,
}

impl RecordingEvents {
    pub fn peer_changes(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }

    pub fn key_changes(&self) -> usize {
        self.keys.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<TickReport> {
        self.reports.lock().expect("reports lock").clone()
    }
}

impl PkiEvents for RecordingEvents {
    fn peers_changed(&self) {
        self.peers.fetch_add(1, Ordering::SeqCst);
    }

    fn keys_changed(&self) {
        self.keys.fetch_add(1, Ordering::SeqCst);
    }

    fn tick_completed(&self, report: &TickReport) {
        self.reports.lock().expect("reports lock").push(report.clone());
    }
}

/// In-memory authority serving a fixed set of documents.
#[derive(Default)]
pub struct ScriptedAuthority {
    documents: Mutex<HashMap<Epoch, RawDocument>>,
    failing_posts: Mutex<HashSet<Epoch>>,
    hang_get: AtomicBool,
    hang_post: AtomicBool,
    gets: Mutex<Vec<Epoch>>,
    posts: Mutex<Vec<(Epoch, MixDescriptor)>>,
}

impl ScriptedAuthority {
    /// Serves `document` for `epoch`, which need not match the document's
    /// own epoch.
    pub fn serve(&self, epoch: Epoch, document: RawDocument) {
        self.documents
            .lock()
            .expect("documents lock")
            .insert(epoch, document);
    }

    pub fn fail_posts_for(&self, epoch: Epoch) {
        self.failing_posts.lock().expect("posts lock").insert(epoch);
    }

    pub fn accept_posts_for(&self, epoch: Epoch) {
        self.failing_posts.lock().expect("posts lock").remove(&epoch);
    }

    /// Makes every subsequent `get` wait forever.
    pub fn hang_gets(&self, hang: bool) {
        self.hang_get.store(hang, Ordering::SeqCst);
    }

    /// Makes every subsequent `post` wait forever.
    pub fn hang_posts(&self, hang: bool) {
        self.hang_post.store(hang, Ordering::SeqCst);
    }

    pub fn gets(&self) -> Vec<Epoch> {
        self.gets.lock().expect("gets lock").clone()
    }

    pub fn posts(&self) -> Vec<(Epoch, MixDescriptor)> {
        self.posts.lock().expect("posts lock").clone()
    }

    pub fn posted_epochs(&self) -> Vec<Epoch> {
        self.posts().into_iter().map(|(epoch, _)| epoch).collect()
    }
}

#[async_trait]
impl Authority for ScriptedAuthority {
    async fn get(&self, epoch: Epoch) -> anyhow::Result<RawDocument> {
        self.gets.lock().expect("gets lock").push(epoch);
        if self.hang_get.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.documents
            .lock()
            .expect("documents lock")
            .get(&epoch)
            .cloned()
            .ok_or_else(|| anyhow!("no document for epoch {epoch}"))
    }

    async fn post(
        &self,
        epoch: Epoch,
        _signing_key: &ed25519::Keypair,
        descriptor: &MixDescriptor,
    ) -> anyhow::Result<()> {
        if self.hang_post.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing_posts.lock().expect("posts lock").contains(&epoch) {
            return Err(anyhow!("authority rejected descriptor for epoch {epoch}"));
        }
        self.posts
            .lock()
            .expect("posts lock")
            .push((epoch, descriptor.clone()));
        Ok(())
    }
}
