// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

use std::time::Duration;

use crate::document::DocumentStore;
use crate::epoch::{Epoch, EpochTime};

/// Once less than this remains in the epoch, the next document is expected
/// to be available and is fetched ahead of the transition.
pub const NEXT_FETCH_TILL: Duration = Duration::from_secs(45 * 60);

/// Epochs whose documents are missing, current epoch first.
///
/// The previous epoch is never fetched.
pub fn documents_to_fetch(store: &DocumentStore, time: EpochTime) -> Vec<Epoch> {
    let mut epochs = Vec::with_capacity(2);
    if !store.contains(time.epoch) {
        epochs.push(time.epoch);
    }
    if time.till < NEXT_FETCH_TILL {
        let next = time.epoch.saturating_add(1);
        if !store.contains(next) {
            epochs.push(next);
        }
    }
    epochs
}
