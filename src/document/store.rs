// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use super::Document;
use crate::epoch::Epoch;

/// Cache of validated documents keyed by epoch.
///
/// The background worker is the only writer; authentication reads share
/// the lock. Documents are immutable once inserted, so the lock only
/// guards the map itself.
#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: RwLock<BTreeMap<Epoch, Arc<Document>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, epoch: Epoch) -> Option<Arc<Document>> {
        self.read().get(&epoch).cloned()
    }

    pub fn contains(&self, epoch: Epoch) -> bool {
        self.read().contains_key(&epoch)
    }

    /// Inserts `document` under its own epoch, replacing any earlier fetch.
    pub fn put(&self, document: Arc<Document>) {
        self.write().insert(document.epoch(), document);
    }

    /// Collects the documents present for `epochs`, preserving their order.
    pub fn get_many(&self, epochs: &[Epoch]) -> Vec<Arc<Document>> {
        let docs = self.read();
        epochs
            .iter()
            .filter_map(|epoch| docs.get(epoch).cloned())
            .collect()
    }

    /// Discards every document older than `now` and returns the removed epochs.
    pub fn prune(&self, now: Epoch) -> Vec<Epoch> {
        let mut docs = self.write();
        let retained = docs.split_off(&now);
        let removed: Vec<Epoch> = std::mem::replace(&mut *docs, retained)
            .into_keys()
            .collect();
        for epoch in &removed {
            debug!(epoch, "discarding PKI document");
        }
        for epoch in docs.keys().filter(|epoch| **epoch > now.saturating_add(1)) {
            warn!(epoch, now, "far future PKI document, clock ran backwards?");
        }
        removed
    }

    pub fn epochs(&self) -> Vec<Epoch> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Epoch, Arc<Document>>> {
        self.docs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<Epoch, Arc<Document>>> {
        self.docs.write().unwrap_or_else(PoisonError::into_inner)
    }
}
