//! Controller output backends
//!
//! A backend owns the current [`ButtonState`] and a transport. Every state
//! change is encoded and transmitted immediately under one lock, and a
//! keep-alive thread resends the same guarded state periodically so the
//! receiving hardware never times out during idle stretches.
//!
//! # Backends
//!
//! - [`SerialBackend`] - 3-byte packets over a serial device
//! - [`PabotBackend`] - checksummed timed commands to PABotBase firmware
//! - [`ThreeDsBackend`] - 20-byte input-redirection datagrams over UDP
//! - [`DryRunBackend`] - records states in memory, no hardware

mod backend;
mod button;
mod dry_run;
mod keepalive;
mod link;
pub mod pabotbase;
pub mod serial;
mod state;
pub mod threeds;

pub use backend::{BackendError, BackendResult, Capability, OutputBackend};
pub use button::{Button, InterfaceButton, IrButton, UnknownButton};
pub use dry_run::DryRunBackend;
pub use keepalive::KeepAlive;
pub use pabotbase::{PabotBackend, PabotSettings};
pub use serial::{SerialBackend, SerialSettings};
pub use state::{ButtonState, Stick, TouchPoint, TOUCH_HEIGHT, TOUCH_WIDTH};
pub use threeds::ThreeDsBackend;
