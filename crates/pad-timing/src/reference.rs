//! Absolute timing reference
//!
//! `start_timing` records a monotonic instant; later waits are expressed as
//! "N ms after the reference" so the overhead of the commands in between
//! never accumulates into drift.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::{sleep_interruptible, sleep_until_interruptible, CancelToken, SleepOutcome};

/// Result of [`TimingReference::wait_until`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitUntil {
    /// How the wait ended
    pub outcome: SleepOutcome,
    /// How far past the target the call already was (ms), if it was late
    pub overrun_ms: Option<f64>,
}

/// A monotonic schedule anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingReference {
    start: Instant,
}

impl TimingReference {
    /// Anchor the schedule at the current instant
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Anchor the schedule at a given instant
    pub fn at(start: Instant) -> Self {
        Self { start }
    }

    /// The anchor instant
    pub fn instant(&self) -> Instant {
        self.start
    }

    /// Milliseconds elapsed since the anchor
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Instant that lies `ms` milliseconds after the anchor
    ///
    /// `None` when that instant is not representable on this clock. Negative
    /// and NaN offsets mean the anchor itself.
    pub fn deadline(&self, ms: f64) -> Option<Instant> {
        let offset = if ms > 0.0 {
            Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        self.start.checked_add(offset)
    }

    /// Block until `target_ms` after the anchor
    ///
    /// Returns immediately (and reports the overrun) when the target has
    /// already passed.
    pub fn wait_until(&self, target_ms: f64, cancel: &CancelToken) -> WaitUntil {
        let elapsed = self.elapsed_ms();
        if elapsed >= target_ms {
            let overrun = elapsed - target_ms;
            warn!(target_ms, overrun_ms = overrun, "wait_until target already passed");
            return WaitUntil {
                outcome: SleepOutcome::Completed,
                overrun_ms: Some(overrun),
            };
        }

        let outcome = match self.deadline(target_ms) {
            Some(deadline) => sleep_until_interruptible(deadline, cancel),
            None => sleep_interruptible(Duration::MAX, cancel),
        };
        WaitUntil {
            outcome,
            overrun_ms: None,
        }
    }
}
