// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::NodeConfig;
use crate::descriptor::{Layer, MixDescriptor, Role};
use crate::epoch::{Epoch, EpochTime};
use crate::events::PkiEvents;
use crate::keys::{KeyError, KeyRotation, MixKeyStore};

/// Descriptors for the next epoch must be posted while at least this much
/// of the current epoch remains.
pub const PUBLISH_DEADLINE: Duration = Duration::from_secs(3600);

/// Why a publication was scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishReason {
    /// Nothing has been published since startup.
    Initial,
    /// The current epoch is covered; publish ahead for the next one.
    NextEpoch,
    /// The last published epoch is unrelated to the current one.
    ClockJump,
}

/// Decision of a single planning step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishAction {
    Publish { target: Epoch, reason: PublishReason },
    MissedDeadline { target: Epoch },
    Idle,
}

/// Failures of a publication attempt. All of them are retried next pass.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("missed publication deadline for epoch {target}")]
    MissedDeadline { target: Epoch },
    #[error(transparent)]
    Keys(#[from] KeyError),
    #[error("failed to post descriptor for epoch {target}: {source}")]
    Post {
        target: Epoch,
        #[source]
        source: anyhow::Error,
    },
}

/// Last published epoch (0 when nothing was published) and the epoch a
/// missed deadline was last reported for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishState {
    last_published: Epoch,
    last_warned: Epoch,
}

impl PublishState {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn last_published(&self) -> Epoch {
        self.last_published
    }

    #[must_use]
    pub fn last_warned(&self) -> Epoch {
        self.last_warned
    }

    /// Decides what to publish at `time`.
    ///
    /// A missed deadline is reported once per epoch; the state is otherwise
    /// only changed by [`PublishState::mark_published`].
    pub fn plan(&mut self, time: EpochTime) -> PublishAction {
        let epoch = time.epoch;
        let next = epoch.saturating_add(1);
        match self.last_published {
            0 => PublishAction::Publish {
                target: epoch,
                reason: PublishReason::Initial,
            },
            last if last == epoch => {
                if time.till > PUBLISH_DEADLINE {
                    PublishAction::Publish {
                        target: next,
                        reason: PublishReason::NextEpoch,
                    }
                } else if self.last_warned != epoch {
                    self.last_warned = epoch;
                    PublishAction::MissedDeadline { target: next }
                } else {
                    PublishAction::Idle
                }
            }
            last if last == next => PublishAction::Idle,
            _ => PublishAction::Publish {
                target: epoch,
                reason: PublishReason::ClockJump,
            },
        }
    }

    pub fn mark_published(&mut self, target: Epoch) {
        self.last_published = target;
        self.last_warned = 0;
    }
}

/// Descriptor ready to be posted to the authorities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedPublication {
    pub target: Epoch,
    pub reason: PublishReason,
    pub descriptor: MixDescriptor,
}

/// Publication schedule plus the key rotation it drives.
#[derive(Debug)]
pub struct Publisher<K> {
    state: PublishState,
    keys: KeyRotation<K>,
}

impl<K: MixKeyStore> Publisher<K> {
    pub fn new(keys: KeyRotation<K>) -> Self {
        Self {
            state: PublishState::new(),
            keys,
        }
    }

    pub fn state(&self) -> PublishState {
        self.state
    }

    pub fn keys(&self) -> &KeyRotation<K> {
        &self.keys
    }

    /// Plans the pass at `time` and, when a descriptor is due, ensures its
    /// key window and builds it. `keys_changed` fires before this returns
    /// whenever the key set changed, even if the window is unusable.
    pub fn prepare(
        &mut self,
        time: EpochTime,
        config: &NodeConfig,
        events: &dyn PkiEvents,
    ) -> Result<Option<PreparedPublication>, PublishError> {
        let (target, reason) = match self.state.plan(time) {
            PublishAction::Idle => return Ok(None),
            PublishAction::MissedDeadline { target } => {
                return Err(PublishError::MissedDeadline { target })
            }
            PublishAction::Publish { target, reason } => (target, reason),
        };
        match reason {
            PublishReason::Initial => debug!(epoch = target, "initial descriptor publication"),
            PublishReason::NextEpoch => debug!(epoch = target, "within the publication time"),
            PublishReason::ClockJump => warn!(
                last_published = self.state.last_published(),
                epoch = time.epoch,
                "last published epoch is wildly disjointed from the current epoch"
            ),
        }

        let window = match self.keys.ensure_window(target, time.epoch) {
            Ok(window) => window,
            Err(error) => {
                if error.keys_changed() {
                    events.keys_changed();
                }
                return Err(error.into());
            }
        };
        if window.changed() {
            events.keys_changed();
        }

        let mut descriptor = build_descriptor(config);
        descriptor.mix_keys = window.keys;
        Ok(Some(PreparedPublication {
            target,
            reason,
            descriptor,
        }))
    }

    pub fn mark_published(&mut self, target: Epoch) {
        self.state.mark_published(target);
    }
}

/// The key-less part of this node's descriptor. Only providers assign
/// themselves a layer; mix layers are chosen by the authorities.
pub fn build_descriptor(config: &NodeConfig) -> MixDescriptor {
    let mut descriptor = MixDescriptor::new(
        config.identifier(),
        config.identity_public(),
        config.link_public(),
        config.addresses().to_vec(),
    );
    if config.role() == Role::Provider {
        descriptor.layer = Some(Layer::Provider);
    }
    descriptor
}
