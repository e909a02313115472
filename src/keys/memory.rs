// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use rand_core_06::OsRng;
use tracing::debug;
use x25519_dalek::StaticSecret;

use super::{MixKeyStore, NUM_MIX_KEYS, STATIC_KEY_EPOCH};
use crate::descriptor::MixPublicKey;
use crate::epoch::Epoch;

struct MixKeyPair {
    secret: StaticSecret,
    public: MixPublicKey,
}

impl MixKeyPair {
    fn new(secret: StaticSecret) -> Self {
        let public = MixPublicKey::from(&secret);
        Self { secret, public }
    }
}

/// Mix keys held in process memory; secrets are zeroized when dropped.
///
/// The key for the previous epoch survives pruning so packets in flight
/// across a transition can still be processed.
#[derive(Default)]
pub struct MemoryMixKeys {
    keys: BTreeMap<Epoch, MixKeyPair>,
}

impl MemoryMixKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding only the key published when rotation is disabled.
    pub fn with_static_key(secret: StaticSecret) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(STATIC_KEY_EPOCH, MixKeyPair::new(secret));
        Self { keys }
    }

    /// Secret for `epoch`, for the packet processing workers.
    pub fn secret_for(&self, epoch: Epoch) -> Option<&StaticSecret> {
        self.keys.get(&epoch).map(|pair| &pair.secret)
    }

    pub fn epochs(&self) -> Vec<Epoch> {
        self.keys.keys().copied().collect()
    }
}

impl MixKeyStore for MemoryMixKeys {
    fn key_for(&self, epoch: Epoch) -> Option<MixPublicKey> {
        self.keys.get(&epoch).map(|pair| pair.public)
    }

    fn generate_window(&mut self, target: Epoch) -> anyhow::Result<bool> {
        let mut generated = false;
        for epoch in target..target.saturating_add(NUM_MIX_KEYS) {
            if self.keys.contains_key(&epoch) {
                continue;
            }
            debug!(epoch, "generating mix key");
            self.keys
                .insert(epoch, MixKeyPair::new(StaticSecret::random_from_rng(OsRng)));
            generated = true;
        }
        Ok(generated)
    }

    fn prune_expired(&mut self, now: Epoch) -> bool {
        let horizon = now.saturating_sub(1);
        let before = self.keys.len();
        self.keys.retain(|epoch, _| {
            let keep = *epoch >= horizon;
            if !keep {
                debug!(epoch, "purging mix key");
            }
            keep
        });
        self.keys.len() != before
    }
}

impl fmt::Debug for MemoryMixKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMixKeys")
            .field("epochs", &self.epochs())
            .finish()
    }
}
