// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

/// Which documents the worker still has to fetch.
pub mod fetch;
/// Descriptor publication schedule and key window preparation.
pub mod publish;

pub use fetch::{documents_to_fetch, NEXT_FETCH_TILL};
pub use publish::{
    build_descriptor, PreparedPublication, PublishAction, PublishError, PublishReason,
    PublishState, Publisher, PUBLISH_DEADLINE,
};
