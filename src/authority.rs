// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use libp2p_identity::ed25519;

use crate::descriptor::MixDescriptor;
use crate::document::RawDocument;
use crate::epoch::Epoch;

type AnyResult<T> = anyhow::Result<T>;

/// Directory authority client.
///
/// Signature verification of documents and consensus are the client's
/// business; whatever `get` returns is trusted.
#[async_trait]
pub trait Authority: Send + Sync + 'static {
    /// Consensus document for `epoch`.
    async fn get(&self, epoch: Epoch) -> AnyResult<RawDocument>;
    /// Uploads this node's descriptor for `epoch`, signed with `signing_key`.
    async fn post(
        &self,
        epoch: Epoch,
        signing_key: &ed25519::Keypair,
        descriptor: &MixDescriptor,
    ) -> AnyResult<()>;
}
