//! Hybrid sleep/spin waits
//!
//! Waits shorter than [`SPIN_THRESHOLD`] spin against the deadline. Longer
//! waits sleep in short chunks (deliberately asking for less than the time
//! left) until the threshold is reached, then spin the remainder. The stop
//! flag is checked once per chunk and on every spin iteration, which bounds
//! cancellation latency to about one chunk.
//!
//! A duration too large to add to the current instant never completes; the
//! wait lasts until the token is cancelled.

use std::time::{Duration, Instant};

use crate::CancelToken;

/// Below this remaining time the wait spins instead of sleeping
pub const SPIN_THRESHOLD: Duration = Duration::from_millis(2);

/// Bounds for a single coarse sleep request
const MIN_CHUNK: Duration = Duration::from_micros(500);
const MAX_CHUNK: Duration = Duration::from_millis(1);

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed
    Completed,
    /// The cancel token was set before the deadline
    Cancelled,
}

impl SleepOutcome {
    /// Whether the wait was cut short
    pub fn is_cancelled(self) -> bool {
        self == SleepOutcome::Cancelled
    }
}

/// Block for at least `duration` with sub-millisecond error
pub fn sleep_precise(duration: Duration) {
    wait_for(duration, None);
}

/// Block for `duration`, returning early once `cancel` is set
pub fn sleep_interruptible(duration: Duration, cancel: &CancelToken) -> SleepOutcome {
    wait_for(duration, Some(cancel))
}

/// Block until `deadline`, returning early once `cancel` is set
///
/// A deadline already in the past returns [`SleepOutcome::Completed`]
/// immediately.
pub fn sleep_until_interruptible(deadline: Instant, cancel: &CancelToken) -> SleepOutcome {
    wait_for_deadline(deadline, Some(cancel))
}

fn wait_for(duration: Duration, cancel: Option<&CancelToken>) -> SleepOutcome {
    match Instant::now().checked_add(duration) {
        Some(deadline) => wait_for_deadline(deadline, cancel),
        None => wait_for_cancel(cancel),
    }
}

fn wait_for_cancel(cancel: Option<&CancelToken>) -> SleepOutcome {
    loop {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return SleepOutcome::Cancelled;
        }
        std::thread::sleep(MAX_CHUNK);
    }
}

fn wait_for_deadline(deadline: Instant, cancel: Option<&CancelToken>) -> SleepOutcome {
    loop {
        let now = Instant::now();
        let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero()) else {
            return SleepOutcome::Completed;
        };

        if cancel.is_some_and(CancelToken::is_cancelled) {
            return SleepOutcome::Cancelled;
        }

        if remaining > SPIN_THRESHOLD {
            let chunk = (remaining - SPIN_THRESHOLD).clamp(MIN_CHUNK, MAX_CHUNK);
            std::thread::sleep(chunk);
        } else {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_precise_waits_at_least_duration() {
        for ms in [1u64, 5, 20] {
            let d = Duration::from_millis(ms);
            let start = Instant::now();
            sleep_precise(d);
            let elapsed = start.elapsed();
            assert!(elapsed >= d, "{elapsed:?} < {d:?}");
            assert!(elapsed < d + Duration::from_millis(10), "{elapsed:?} overshoot");
        }
    }

    #[test]
    fn test_zero_duration_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            sleep_interruptible(Duration::ZERO, &token),
            SleepOutcome::Completed
        );
    }

    #[test]
    fn test_cancelled_token_stops_wait_at_once() {
        let token = CancelToken::new();
        token.cancel();

        let start = Instant::now();
        let outcome = sleep_interruptible(Duration::from_secs(5), &token);
        assert!(outcome.is_cancelled());
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_sleep_interruptible_returns_soon_after_cancel() {
        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.cancel();
        });

        let start = Instant::now();
        let outcome = sleep_interruptible(Duration::from_millis(50), &token);
        let elapsed = start.elapsed();
        canceller.join().unwrap();

        assert!(outcome.is_cancelled());
        assert!(elapsed >= Duration::from_millis(10), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(30), "{elapsed:?}");
    }

    #[test]
    fn test_short_wait_spins_to_completion() {
        let token = CancelToken::new();
        let d = Duration::from_micros(800);
        let start = Instant::now();
        assert_eq!(sleep_interruptible(d, &token), SleepOutcome::Completed);
        assert!(start.elapsed() >= d);
    }

    #[test]
    fn test_unrepresentable_duration_waits_for_cancel() {
        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.cancel();
        });

        let start = Instant::now();
        let outcome = sleep_interruptible(Duration::MAX, &token);
        canceller.join().unwrap();

        assert!(outcome.is_cancelled());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_past_deadline_completes() {
        let token = CancelToken::new();
        let deadline = Instant::now();
        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(
            sleep_until_interruptible(deadline, &token),
            SleepOutcome::Completed
        );
    }
}
