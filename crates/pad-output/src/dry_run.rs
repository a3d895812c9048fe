//! In-memory backend

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::backend::{BackendResult, Capability, OutputBackend};
use crate::button::Button;
use crate::link::{Link, Transport};
use crate::state::ButtonState;

const NAME: &str = "dry_run";

type History = Arc<Mutex<Vec<ButtonState>>>;

fn lock(history: &History) -> MutexGuard<'_, Vec<ButtonState>> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Recorder(History);

impl Transport for Recorder {
    fn send(&mut self, state: &ButtonState) -> io::Result<()> {
        lock(&self.0).push(state.clone());
        Ok(())
    }
}

/// Records every transmitted state instead of driving hardware
///
/// Starts connected and supports every capability. There is no keep-alive
/// thread, so the history holds exactly the immediate sends.
pub struct DryRunBackend {
    link: Link<Recorder>,
    history: History,
}

impl Default for DryRunBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunBackend {
    pub fn new() -> Self {
        let backend = Self {
            link: Link::new(NAME),
            history: History::default(),
        };
        backend.link.attach(Recorder(Arc::clone(&backend.history)));
        lock(&backend.history).clear();
        backend
    }

    /// Every state sent so far, oldest first
    pub fn history(&self) -> Vec<ButtonState> {
        lock(&self.history).clone()
    }

    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    /// How many times `button` went from released to pressed
    pub fn press_count(&self, button: Button) -> usize {
        let history = lock(&self.history);
        let mut was_pressed = false;
        let mut count = 0;
        for state in history.iter() {
            let pressed = state.is_pressed(button);
            if pressed && !was_pressed {
                count += 1;
            }
            was_pressed = pressed;
        }
        count
    }
}

impl OutputBackend for DryRunBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn connect(&self) -> BackendResult<()> {
        if !self.is_connected() {
            self.link.attach(Recorder(Arc::clone(&self.history)));
            debug!("dry-run backend connected");
        }
        Ok(())
    }

    fn disconnect(&self) {
        if self.is_connected() {
            let _ = self.reset_neutral();
            self.link.detach();
            debug!("dry-run backend disconnected");
        }
    }

    fn update_state(&self, change: &mut dyn FnMut(&mut ButtonState)) -> BackendResult<()> {
        self.link.update(change)
    }

    fn state(&self) -> ButtonState {
        self.link.snapshot()
    }
}
