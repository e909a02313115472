// This file is part of mixpki and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

//! Epoch clock shared by every node in the network.
//!
//! All planners take an [`EpochTime`] rather than reading the wall clock
//! themselves, so time can be simulated with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Network epoch number.
pub type Epoch = u64;

/// Unix timestamp of the first epoch (2017-06-01T00:00:00Z).
pub const DEFAULT_EPOCH_BASE_UNIX: u64 = 1_496_275_200;

/// Length of a single epoch.
pub const DEFAULT_EPOCH_PERIOD: Duration = Duration::from_secs(3 * 60 * 60);

/// Position of a wall-clock instant within the epoch schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochTime {
    /// Current epoch.
    pub epoch: Epoch,
    /// Time elapsed since the start of `epoch`.
    pub elapsed: Duration,
    /// Time remaining until `epoch + 1` begins.
    pub till: Duration,
}

impl EpochTime {
    /// Derives the epoch position of `offset` time past the schedule base.
    pub fn from_offset(offset: Duration, period: Duration) -> Self {
        let period_ms = millis(period).max(1);
        let offset_ms = millis(offset);
        let elapsed_ms = offset_ms % period_ms;
        Self {
            epoch: offset_ms / period_ms,
            elapsed: Duration::from_millis(elapsed_ms),
            till: Duration::from_millis(period_ms - elapsed_ms),
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Source of the current [`EpochTime`].
pub trait EpochClock: Send + Sync {
    fn now(&self) -> EpochTime;
}

/// Epoch clock backed by the system's civil time.
#[derive(Clone, Debug)]
pub struct SystemEpochClock {
    base: SystemTime,
    period: Duration,
}

impl SystemEpochClock {
    pub fn new(base: SystemTime, period: Duration) -> Self {
        Self { base, period }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Epoch position of an arbitrary instant. Instants before the base
    /// collapse onto the start of epoch zero.
    pub fn at(&self, instant: SystemTime) -> EpochTime {
        let offset = instant.duration_since(self.base).unwrap_or_default();
        EpochTime::from_offset(offset, self.period)
    }
}

impl Default for SystemEpochClock {
    fn default() -> Self {
        Self::new(
            UNIX_EPOCH + Duration::from_secs(DEFAULT_EPOCH_BASE_UNIX),
            DEFAULT_EPOCH_PERIOD,
        )
    }
}

impl EpochClock for SystemEpochClock {
    fn now(&self) -> EpochTime {
        self.at(SystemTime::now())
    }
}

/// Manually driven clock for simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    offset_ms: AtomicU64,
    period: Duration,
}

impl ManualClock {
    pub fn new(period: Duration) -> Self {
        Self {
            offset_ms: AtomicU64::new(0),
            period,
        }
    }

    /// Clock positioned `elapsed` into `epoch`.
    pub fn at(epoch: Epoch, elapsed: Duration) -> Self {
        let clock = Self::new(DEFAULT_EPOCH_PERIOD);
        clock.set(epoch, elapsed);
        clock
    }

    pub fn set(&self, epoch: Epoch, elapsed: Duration) {
        let offset = epoch
            .saturating_mul(millis(self.period))
            .saturating_add(millis(elapsed));
        self.offset_ms.store(offset, Ordering::SeqCst);
    }

    /// Positions the clock so that `till` remains in `epoch`.
    pub fn set_till(&self, epoch: Epoch, till: Duration) {
        self.set(epoch, self.period.saturating_sub(till));
    }

    /// Moves the clock forward by `by`, saturating at the end of time.
    pub fn advance(&self, by: Duration) {
        let by = millis(by);
        // The closure never returns `None`, so the update cannot fail.
        let _ = self
            .offset_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |offset| {
                Some(offset.saturating_add(by))
            });
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DEFAULT_EPOCH_PERIOD)
    }
}

impl EpochClock for ManualClock {
    fn now(&self) -> EpochTime {
        let offset = Duration::from_millis(self.offset_ms.load(Ordering::SeqCst));
        EpochTime::from_offset(offset, self.period)
    }
}
