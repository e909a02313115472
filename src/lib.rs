// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

//! PKI engine for mix network nodes.
//!
//! A background [`worker::PkiDriver`] keeps an epoch-indexed cache of
//! consensus documents fetched from the directory authorities, rotates
//! mix keys and publishes this node's descriptor ahead of each epoch.
//! The transport layer authenticates peers against that cache through an
//! [`auth::Authenticator`].

pub mod auth;
pub mod authority;
pub mod config;
pub mod debug;
pub mod descriptor;
pub mod document;
pub mod epoch;
pub mod events;
pub mod keys;
pub mod plan;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use auth::{Authenticator, IncomingAuth, OutgoingAuth};
pub use authority::Authority;
pub use config::{ConfigError, NodeConfig, NodeConfigFile};
pub use descriptor::{MixDescriptor, NodeId, PeerCredentials, Role};
pub use document::{Document, DocumentStore, RawDocument};
pub use epoch::{Epoch, EpochClock, EpochTime, SystemEpochClock};
pub use events::{NoopEvents, PkiEvents, PublishOutcome, TickReport};
pub use keys::{MemoryMixKeys, MixKeyStore};
pub use worker::{PkiDriver, PkiWorker};
