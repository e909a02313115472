// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use libp2p_identity::ed25519;
use rand_core_06::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::descriptor::{IdentityKey, LinkKey, NodeId, Role};

const DEFAULT_INITIAL_DELAY_SECS: u64 = 5;
const DEFAULT_RECHECK_INTERVAL_SECS: u64 = 60;
const SECRET_KEY_LEN: usize = 32;

/// Errors raised while loading or validating node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: Arc<PathBuf>,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: Arc<PathBuf>,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse node configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("node identifier must not be empty")]
    EmptyIdentifier,
    #[error("at least one advertised address is required")]
    NoAddresses,
    #[error("invalid hex encoding for {field}")]
    InvalidHex { field: &'static str },
    #[error("{field} must be {expected} bytes, got {actual}")]
    InvalidKeyLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid identity secret key")]
    InvalidIdentityKey,
}

/// Debug switches. Every one of them weakens the node and defaults to off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Publish one static mix key for every epoch instead of rotating.
    pub disable_key_rotation: bool,
    /// Accept every peer as an authenticated mix without consulting the PKI.
    pub disable_authentication: bool,
}

/// Background worker timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub initial_delay_secs: u64,
    pub recheck_interval_secs: u64,
}

impl WorkerConfig {
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    #[must_use]
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs.max(1))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: DEFAULT_INITIAL_DELAY_SECS,
            recheck_interval_secs: DEFAULT_RECHECK_INTERVAL_SECS,
        }
    }
}

/// Validated runtime configuration of the local node.
#[derive(Clone)]
pub struct NodeConfig {
    identifier: String,
    identity: ed25519::Keypair,
    link_secret: StaticSecret,
    role: Role,
    addresses: Vec<String>,
    debug: DebugConfig,
    worker: WorkerConfig,
}

impl NodeConfig {
    pub fn new(
        identifier: impl Into<String>,
        identity: ed25519::Keypair,
        link_secret: StaticSecret,
        role: Role,
        addresses: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(ConfigError::EmptyIdentifier);
        }
        if addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        Ok(Self {
            identifier,
            identity,
            link_secret,
            role,
            addresses,
            debug: DebugConfig::default(),
            worker: WorkerConfig::default(),
        })
    }

    #[must_use]
    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn identity_keypair(&self) -> &ed25519::Keypair {
        &self.identity
    }

    pub fn identity_public(&self) -> IdentityKey {
        self.identity.public()
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from_identity(&self.identity_public())
    }

    pub fn link_public(&self) -> LinkKey {
        LinkKey::from(&self.link_secret)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn debug(&self) -> DebugConfig {
        self.debug
    }

    pub fn worker(&self) -> WorkerConfig {
        self.worker
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("identifier", &self.identifier)
            .field("node_id", &self.node_id())
            .field("role", &self.role)
            .field("addresses", &self.addresses)
            .field("debug", &self.debug)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

/// On-disk JSON form of [`NodeConfig`] with hex encoded secrets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfigFile {
    pub identifier: String,
    /// Hex encoded 32-byte Ed25519 secret seed.
    pub identity_secret: String,
    /// Hex encoded 32-byte X25519 secret.
    pub link_secret: String,
    #[serde(default)]
    pub role: Role,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl NodeConfigFile {
    /// Fresh configuration with newly generated identity and link secrets.
    pub fn generate(identifier: impl Into<String>, role: Role, addresses: Vec<String>) -> Self {
        let identity = ed25519::Keypair::generate();
        let link = StaticSecret::random_from_rng(OsRng);
        let link_bytes = Zeroizing::new(link.to_bytes());
        Self {
            identifier: identifier.into(),
            identity_secret: hex::encode(identity.secret()),
            link_secret: hex::encode(&*link_bytes),
            role,
            addresses,
            debug: DebugConfig::default(),
            worker: WorkerConfig::default(),
        }
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: Arc::new(path.to_path_buf()),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::Write {
            path: Arc::new(path.to_path_buf()),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }

    /// Decodes the key material and validates the result.
    pub fn into_node_config(self) -> Result<NodeConfig, ConfigError> {
        let mut identity_bytes = decode_secret("identity_secret", &self.identity_secret)?;
        let identity_secret = ed25519::SecretKey::try_from_bytes(&mut identity_bytes[..])
            .map_err(|_| ConfigError::InvalidIdentityKey)?;
        let link_bytes = decode_secret("link_secret", &self.link_secret)?;
        let link_secret = StaticSecret::from(*link_bytes);

        Ok(NodeConfig::new(
            self.identifier,
            ed25519::Keypair::from(identity_secret),
            link_secret,
            self.role,
            self.addresses,
        )?
        .with_debug(self.debug)
        .with_worker(self.worker))
    }
}

fn decode_secret(
    field: &'static str,
    encoded: &str,
) -> Result<Zeroizing<[u8; SECRET_KEY_LEN]>, ConfigError> {
    let bytes = hex::decode(encoded.trim())
        .map(Zeroizing::new)
        .map_err(|_| ConfigError::InvalidHex { field })?;
    if bytes.len() != SECRET_KEY_LEN {
        return Err(ConfigError::InvalidKeyLength {
            field,
            expected: SECRET_KEY_LEN,
            actual: bytes.len(),
        });
    }
    let mut out = Zeroizing::new([0u8; SECRET_KEY_LEN]);
    out.copy_from_slice(&bytes);
    Ok(out)
}
