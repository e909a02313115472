// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

//! Mix key rotation driven by the publication schedule.
//!
//! The key bytes themselves live in a [`MixKeyStore`]; [`KeyRotation`]
//! only decides when to generate and prune, and gathers the public keys a
//! descriptor must advertise.

/// In-memory reference key store.
pub mod memory;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::descriptor::MixPublicKey;
use crate::epoch::Epoch;

pub use memory::MemoryMixKeys;

/// Number of consecutive epochs a descriptor advertises mix keys for.
pub const NUM_MIX_KEYS: u64 = 3;

/// Epoch slot holding the single key used when rotation is disabled.
pub const STATIC_KEY_EPOCH: Epoch = 0;

/// Storage of per-epoch mix key material.
pub trait MixKeyStore: Send + Sync {
    /// Public key for `epoch`, if one exists.
    fn key_for(&self, epoch: Epoch) -> Option<MixPublicKey>;
    /// Ensures keys exist for `[target, target + NUM_MIX_KEYS)`; returns
    /// whether any key was created.
    fn generate_window(&mut self, target: Epoch) -> anyhow::Result<bool>;
    /// Drops keys that can no longer be used at `now`; returns whether any
    /// key was removed.
    fn prune_expired(&mut self, now: Epoch) -> bool;
}

/// Failures preparing the keys for a descriptor.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to generate mix keys for epoch {target}: {source}")]
    Generate {
        target: Epoch,
        #[source]
        source: anyhow::Error,
    },
    #[error("mix key for epoch {epoch} was pruned before publication")]
    PrunedBeforePublish { epoch: Epoch, keys_changed: bool },
    #[error("static mix key is not available")]
    MissingStaticKey,
}

impl KeyError {
    /// Whether the key set changed before the error was raised.
    pub fn keys_changed(&self) -> bool {
        matches!(
            self,
            Self::PrunedBeforePublish {
                keys_changed: true,
                ..
            }
        )
    }
}

/// Mix keys covering a publication window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyWindow {
    pub keys: BTreeMap<Epoch, MixPublicKey>,
    pub generated: bool,
    pub pruned: bool,
}

impl KeyWindow {
    /// Whether dependent workers must reload their key set.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.generated || self.pruned
    }
}

/// Keeps a forward-looking window of mix keys ahead of publication.
///
/// Owned by the PKI worker; `&mut self` makes it the only writer.
#[derive(Debug)]
pub struct KeyRotation<K> {
    store: K,
    static_keys: bool,
}

impl<K: MixKeyStore> KeyRotation<K> {
    pub fn new(store: K, static_keys: bool) -> Self {
        Self { store, static_keys }
    }

    pub fn store(&self) -> &K {
        &self.store
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.static_keys
    }

    /// Guarantees a key for every epoch in `[target, target + NUM_MIX_KEYS)`.
    pub fn ensure_window(&mut self, target: Epoch, now: Epoch) -> Result<KeyWindow, KeyError> {
        let epochs = target..target.saturating_add(NUM_MIX_KEYS);
        if self.static_keys {
            let key = self
                .store
                .key_for(STATIC_KEY_EPOCH)
                .ok_or(KeyError::MissingStaticKey)?;
            return Ok(KeyWindow {
                keys: epochs.map(|epoch| (epoch, key)).collect(),
                generated: false,
                pruned: false,
            });
        }

        let generated = self
            .store
            .generate_window(target)
            .map_err(|source| KeyError::Generate { target, source })?;
        let pruned = self.store.prune_expired(now);

        let mut keys = BTreeMap::new();
        for epoch in epochs {
            let Some(key) = self.store.key_for(epoch) else {
                return Err(KeyError::PrunedBeforePublish {
                    epoch,
                    keys_changed: generated || pruned,
                });
            };
            keys.insert(epoch, key);
        }
        Ok(KeyWindow {
            keys,
            generated,
            pruned,
        })
    }
}
