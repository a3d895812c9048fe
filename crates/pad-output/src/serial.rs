//! Serial backend: 3-byte button packets
//!
//! Packet layout: `[0x54, high, low]` where `high` carries L/R/X/Y and
//! `low` carries A/B and the d-pad plus Select/Start. Sticks, touch and the
//! extra buttons have no representation on this link.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use pad_timing::sleep_precise;
use tracing::{info, instrument};

use crate::backend::{BackendError, BackendResult, Capability, OutputBackend};
use crate::button::Button;
use crate::keepalive::KeepAlive;
use crate::link::{Link, Transport};
use crate::state::ButtonState;

/// First byte of every button packet
pub const HEADER: u8 = 0x54;
/// First byte of a channel-set packet
pub const CHANNEL_HEADER: u8 = 0x43;

const NAME: &str = "serial";

/// Line speed the adapter firmware expects
pub const DEFAULT_BAUD: u32 = 1_000_000;

/// Upper bound on a single blocking write to the port
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// `(high, low)` bit for a button
fn bits(button: Button) -> (u8, u8) {
    match button {
        Button::L => (0x01, 0),
        Button::R => (0x02, 0),
        Button::X => (0x04, 0),
        Button::Y => (0x08, 0),
        Button::A => (0, 0x01),
        Button::B => (0, 0x02),
        Button::Right => (0, 0x04),
        Button::Left => (0, 0x08),
        Button::Up => (0, 0x10),
        Button::Down => (0, 0x20),
        Button::Select => (0, 0x40),
        Button::Start => (0, 0x80),
    }
}

/// Encode the pressed buttons of `state`
pub fn encode(state: &ButtonState) -> [u8; 3] {
    let (high, low) = state
        .buttons
        .iter()
        .fold((0u8, 0u8), |(h, l), &b| {
            let (bh, bl) = bits(b);
            (h | bh, l | bl)
        });
    [HEADER, high, low]
}

/// Encode a receiver channel selection
pub fn encode_channel(channel: u8) -> [u8; 3] {
    [CHANNEL_HEADER, channel, 0x00]
}

/// Opens the byte sink for a connection
pub type Opener = Box<dyn Fn() -> io::Result<Box<dyn Write + Send>> + Send + Sync>;

struct SerialWriter(Box<dyn Write + Send>);

impl Transport for SerialWriter {
    fn send(&mut self, state: &ButtonState) -> io::Result<()> {
        self.0.write_all(&encode(state))?;
        self.0.flush()
    }
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub baud: u32,
    pub keepalive: Duration,
    pub warmup: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            keepalive: Duration::from_millis(50),
            warmup: Duration::from_millis(1000),
        }
    }
}

/// Backend writing 3-byte packets to a serial device
pub struct SerialBackend {
    label: String,
    opener: Opener,
    settings: SerialSettings,
    link: Link<SerialWriter>,
    keepalive: Mutex<Option<KeepAlive>>,
}

impl SerialBackend {
    /// Backend for a device node such as `/dev/ttyUSB0`
    ///
    /// The port is opened 8N1 at `settings.baud` on every connect.
    pub fn open_device(device: impl Into<PathBuf>, settings: SerialSettings) -> Self {
        let device = device.into();
        let label = device.display().to_string();
        let path = label.clone();
        let baud = settings.baud;
        let opener: Opener = Box::new(move || {
            let port = serialport::new(path.as_str(), baud)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .timeout(WRITE_TIMEOUT)
                .open()?;
            Ok(Box::new(port) as Box<dyn Write + Send>)
        });
        Self::with_opener(label, opener, settings)
    }

    /// Configured line speed
    pub fn baud(&self) -> u32 {
        self.settings.baud
    }

    /// Backend over any byte sink
    pub fn with_opener(label: impl Into<String>, opener: Opener, settings: SerialSettings) -> Self {
        Self {
            label: label.into(),
            opener,
            settings,
            link: Link::new(NAME),
            keepalive: Mutex::new(None),
        }
    }

    /// Select the receiver channel
    pub fn set_channel(&self, channel: u8) -> BackendResult<()> {
        self.link.with_transport(|w| {
            w.0.write_all(&encode_channel(channel))?;
            w.0.flush()
        })
    }
}

impl OutputBackend for SerialBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    #[instrument(skip(self), fields(device = %self.label))]
    fn connect(&self) -> BackendResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let writer = (self.opener)().map_err(|e| BackendError::Connect {
            backend: NAME,
            message: format!("cannot open {}", self.label),
            source: Some(e),
        })?;
        self.link.attach(SerialWriter(writer));
        self.link.update(&mut |s| *s = ButtonState::neutral())?;

        let link = self.link.clone();
        let keepalive = KeepAlive::spawn(NAME, self.settings.keepalive, move || link.resend())?;
        *self.keepalive.lock().unwrap_or_else(PoisonError::into_inner) = Some(keepalive);

        // The receiver ignores input until it has seen neutral for a while
        sleep_precise(self.settings.warmup);
        info!("serial backend connected");
        Ok(())
    }

    fn disconnect(&self) {
        if self.is_connected() {
            let _ = self.reset_neutral();
        }
        if let Some(mut keepalive) = self
            .keepalive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            keepalive.stop();
        }
        if self.link.detach().is_some() {
            info!(device = %self.label, "serial backend disconnected");
        }
    }

    fn update_state(&self, change: &mut dyn FnMut(&mut ButtonState)) -> BackendResult<()> {
        self.link.update(change)
    }

    fn state(&self) -> ButtonState {
        self.link.snapshot()
    }
}

impl Drop for SerialBackend {
    fn drop(&mut self) {
        self.disconnect();
    }
}
