// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

use crate::epoch::Epoch;

/// Notifications from the PKI worker to the rest of the node.
///
/// Called from the worker task; implementations must not block.
pub trait PkiEvents: Send + Sync {
    /// The document set changed; outgoing connections should be re-evaluated.
    fn peers_changed(&self) {}
    /// Mix keys were generated or pruned; packet workers should reload them.
    fn keys_changed(&self) {}
    /// Summary of a completed worker pass, for metrics sinks.
    fn tick_completed(&self, _report: &TickReport) {}
}

/// Event sink that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEvents;

impl PkiEvents for NoopEvents {}

/// What the publication step of a worker pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PublishOutcome {
    #[default]
    Idle,
    Published(Epoch),
    MissedDeadline(Epoch),
    Failed,
}

/// Per-pass counters reported through [`PkiEvents::tick_completed`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub epoch: Epoch,
    pub fetched: Vec<Epoch>,
    pub fetch_failures: usize,
    pub rejected: usize,
    pub self_check_failures: usize,
    pub pruned: Vec<Epoch>,
    pub publish: PublishOutcome,
}

impl TickReport {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }
}
