//! Precision timing for padscript
//!
//! Host sleeps overshoot by anything from tens of microseconds to several
//! milliseconds, which is far too coarse for frame-perfect controller
//! input. This crate provides waits that combine short coarse sleeps with
//! a final spin against a monotonic deadline.
//!
//! # Key Types
//!
//! - [`CancelToken`] - shared cooperative stop flag
//! - [`sleep_precise`] / [`sleep_interruptible`] - the wait primitives
//! - [`TimingReference`] - absolute schedule anchor for `wait_until`

mod cancel;
mod precision;
mod reference;

pub use cancel::CancelToken;
pub use precision::{
    sleep_interruptible, sleep_precise, sleep_until_interruptible, SleepOutcome, SPIN_THRESHOLD,
};
pub use reference::{TimingReference, WaitUntil};
