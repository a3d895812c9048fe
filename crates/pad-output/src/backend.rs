//! Output backend contract

use std::fmt;
use std::time::Duration;

use pad_timing::{sleep_interruptible, CancelToken, SleepOutcome};
use thiserror::Error;

use crate::button::{Button, InterfaceButton, IrButton};
use crate::state::{ButtonState, Stick, TouchPoint};

/// Errors raised by output backends
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend} backend is not connected")]
    NotConnected { backend: &'static str },

    #[error("{backend} backend does not support {capability}")]
    Unsupported {
        backend: &'static str,
        capability: Capability,
    },

    #[error("failed to connect {backend} backend: {message}")]
    Connect {
        backend: &'static str,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Optional features beyond the shared button set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Sticks,
    Touch,
    IrButtons,
    InterfaceButtons,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Sticks => "analog sticks",
            Capability::Touch => "touch input",
            Capability::IrButtons => "ZL/ZR buttons",
            Capability::InterfaceButtons => "interface buttons",
        })
    }
}

/// A device link that transmits [`ButtonState`]
///
/// Implementors only provide the state primitive ([`update_state`]) and
/// lifecycle; every higher-level operation is built on it so each change
/// is read-modified-transmitted under the backend's single lock.
///
/// [`update_state`]: OutputBackend::update_state
pub trait OutputBackend: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    fn supports(&self, capability: Capability) -> bool;

    fn is_connected(&self) -> bool;

    fn connect(&self) -> BackendResult<()>;

    /// Release everything, stop the keep-alive and drop the transport
    fn disconnect(&self);

    /// Apply `change` to the current state and transmit the result
    ///
    /// Fails with [`BackendError::NotConnected`] when no transport is
    /// attached. A failed write is logged, marks the backend disconnected
    /// and still returns `Ok`.
    fn update_state(&self, change: &mut dyn FnMut(&mut ButtonState)) -> BackendResult<()>;

    /// Snapshot of the current state
    fn state(&self) -> ButtonState;

    fn require(&self, capability: Capability) -> BackendResult<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(BackendError::Unsupported {
                backend: self.name(),
                capability,
            })
        }
    }

    fn set_state(&self, state: &ButtonState) -> BackendResult<()> {
        self.update_state(&mut |current| *current = state.clone())
    }

    fn set_buttons(&self, buttons: &[Button]) -> BackendResult<()> {
        self.update_state(&mut |state| state.set_buttons(buttons))
    }

    fn set_ir_buttons(&self, buttons: &[IrButton]) -> BackendResult<()> {
        self.require(Capability::IrButtons)?;
        self.update_state(&mut |state| state.ir = buttons.iter().copied().collect())
    }

    fn set_interface_buttons(&self, buttons: &[InterfaceButton]) -> BackendResult<()> {
        self.require(Capability::InterfaceButtons)?;
        self.update_state(&mut |state| state.interface = buttons.iter().copied().collect())
    }

    fn set_left_stick(&self, x: f64, y: f64) -> BackendResult<()> {
        self.require(Capability::Sticks)?;
        self.update_state(&mut |state| state.left_stick = Stick::new(x, y))
    }

    fn set_right_stick(&self, x: f64, y: f64) -> BackendResult<()> {
        self.require(Capability::Sticks)?;
        self.update_state(&mut |state| state.right_stick = Stick::new(x, y))
    }

    fn set_touch(&self, touch: Option<TouchPoint>) -> BackendResult<()> {
        self.require(Capability::Touch)?;
        self.update_state(&mut |state| state.touch = touch)
    }

    /// Touch down at (x, y), hold `down`, release, then wait `settle`
    ///
    /// The touch is released even when the hold is cancelled.
    fn tap_touch(
        &self,
        x: i64,
        y: i64,
        down: Duration,
        settle: Duration,
        cancel: &CancelToken,
    ) -> BackendResult<SleepOutcome> {
        self.set_touch(Some(TouchPoint::new(x, y)))?;
        let held = sleep_interruptible(down, cancel);
        self.set_touch(None)?;
        if held.is_cancelled() {
            return Ok(held);
        }
        Ok(sleep_interruptible(settle, cancel))
    }

    /// Release all inputs
    fn reset_neutral(&self) -> BackendResult<()> {
        self.update_state(&mut |state| *state = ButtonState::neutral())
    }
}
