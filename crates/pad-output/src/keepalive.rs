//! Periodic keep-alive thread

use std::thread::{self, JoinHandle};
use std::time::Duration;

use pad_timing::{sleep_interruptible, CancelToken};
use tracing::{debug, warn};

/// A background thread that calls `tick` every `interval`
///
/// The thread exits when `tick` returns false or when [`stop`] is called.
/// Dropping the handle stops and joins it.
///
/// [`stop`]: KeepAlive::stop
#[derive(Debug)]
pub struct KeepAlive {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let thread_name = format!("{name}-keepalive");

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(thread = %thread_name, ?interval, "keep-alive started");
                loop {
                    if sleep_interruptible(interval, &token).is_cancelled() {
                        break;
                    }
                    if !tick() {
                        warn!(thread = %thread_name, "keep-alive lost its transport");
                        break;
                    }
                }
                debug!(thread = %thread_name, "keep-alive stopped");
            })?;

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("keep-alive thread panicked");
            }
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut keepalive = KeepAlive::spawn("test", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        keepalive.stop();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 3, "only {seen} ticks");
        assert!(!keepalive.is_running());

        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_exits_when_tick_fails() {
        let keepalive = KeepAlive::spawn("test", Duration::from_millis(1), || false).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(!keepalive.is_running());
    }
}
