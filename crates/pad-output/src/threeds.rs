//! 3DS input-redirection backend
//!
//! Each state is sent as one 20-byte UDP datagram of five little-endian
//! words: HID pad, touch screen, circle pad, C-stick/IR and interface
//! buttons. Delivery is best-effort; the console reads whatever arrived last.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, instrument};

use crate::backend::{BackendError, BackendResult, Capability, OutputBackend};
use crate::button::{Button, InterfaceButton, IrButton};
use crate::keepalive::KeepAlive;
use crate::link::{Link, Transport};
use crate::state::{ButtonState, Stick, TOUCH_HEIGHT, TOUCH_WIDTH};

/// Default input-redirection port
pub const DEFAULT_PORT: u16 = 4950;
/// Datagram length
pub const PACKET_LEN: usize = 20;

const NAME: &str = "threeds";

const HID_AXIS_MAX: u32 = 0xFFF;
const CPAD_BOUND: f64 = 0x5D0 as f64;
const CPP_BOUND: f64 = 0x7F as f64;

const TOUCH_RELEASED: u32 = 0x0200_0000;
const CPAD_NEUTRAL: u32 = 0x007F_F7FF;
const CPP_NEUTRAL: u32 = 0x8080_0081;

fn hid_bit(button: Button) -> u32 {
    let index = match button {
        Button::A => 0,
        Button::B => 1,
        Button::Select => 2,
        Button::Start => 3,
        Button::Right => 4,
        Button::Left => 5,
        Button::Up => 6,
        Button::Down => 7,
        Button::R => 8,
        Button::L => 9,
        Button::X => 10,
        Button::Y => 11,
    };
    1 << index
}

fn ir_bit(button: IrButton) -> u32 {
    match button {
        IrButton::ZR => 1 << 1,
        IrButton::ZL => 1 << 2,
    }
}

fn interface_bit(button: InterfaceButton) -> u32 {
    match button {
        InterfaceButton::Home => 1 << 0,
        InterfaceButton::Power => 1 << 1,
        InterfaceButton::PowerLong => 1 << 2,
    }
}

/// Active-low button word
fn encode_hid_pad(state: &ButtonState) -> u32 {
    let mask = state.buttons.iter().fold(0, |m, &b| m | hid_bit(b));
    HID_AXIS_MAX & !mask
}

fn encode_touch(state: &ButtonState) -> u32 {
    let Some(touch) = state.touch else {
        return TOUCH_RELEASED;
    };
    let x = HID_AXIS_MAX * u32::from(touch.x) / u32::from(TOUCH_WIDTH);
    let y = HID_AXIS_MAX * u32::from(touch.y) / u32::from(TOUCH_HEIGHT);
    (1 << 24) | (y << 12) | x
}

/// Scale one axis around `center`, saturating at `max`
fn scale_axis(value: f64, bound: f64, center: f64, max: i64) -> u32 {
    let mut scaled = (value * bound + center).trunc() as i64;
    if scaled >= max {
        scaled = if value < 0.0 { 0 } else { max };
    }
    scaled.clamp(0, max) as u32
}

fn encode_circle_pad(stick: Stick) -> u32 {
    if stick.is_centered() {
        return CPAD_NEUTRAL;
    }
    let x = scale_axis(stick.x, CPAD_BOUND, 0x800 as f64, 0xFFF);
    let y = scale_axis(stick.y, CPAD_BOUND, 0x800 as f64, 0xFFF);
    (y << 12) | x
}

fn encode_cpp(state: &ButtonState) -> u32 {
    let ir = state.ir.iter().fold(0, |m, &b| m | ir_bit(b));
    let stick = state.right_stick;
    if stick.is_centered() && ir == 0 {
        return CPP_NEUTRAL;
    }

    // The C-stick reports in a frame rotated by 45 degrees
    let rx = std::f64::consts::FRAC_1_SQRT_2 * (stick.x + stick.y);
    let ry = std::f64::consts::FRAC_1_SQRT_2 * (stick.y - stick.x);
    let x = scale_axis(rx, CPP_BOUND, 0x80 as f64, 0xFF);
    let y = scale_axis(ry, CPP_BOUND, 0x80 as f64, 0xFF);
    (y << 24) | (x << 16) | (ir << 8) | 0x81
}

fn encode_interface(state: &ButtonState) -> u32 {
    state.interface.iter().fold(0, |m, &b| m | interface_bit(b))
}

/// Encode `state` as an input-redirection datagram
pub fn encode(state: &ButtonState) -> [u8; PACKET_LEN] {
    let words = [
        encode_hid_pad(state),
        encode_touch(state),
        encode_circle_pad(state.left_stick),
        encode_cpp(state),
        encode_interface(state),
    ];
    let mut packet = [0u8; PACKET_LEN];
    for (chunk, word) in packet.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    packet
}

struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl Transport for UdpTransport {
    fn send(&mut self, state: &ButtonState) -> io::Result<()> {
        self.socket.send_to(&encode(state), self.target).map(|_| ())
    }
}

/// Backend sending datagrams to a console running input redirection
pub struct ThreeDsBackend {
    host: String,
    port: u16,
    keepalive_interval: Duration,
    link: Link<UdpTransport>,
    keepalive: Mutex<Option<KeepAlive>>,
}

impl ThreeDsBackend {
    pub fn new(host: impl Into<String>, port: u16, keepalive_interval: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            keepalive_interval,
            link: Link::new(NAME),
            keepalive: Mutex::new(None),
        }
    }

    fn resolve(&self) -> BackendResult<SocketAddr> {
        let connect_err = |message: String, source: Option<io::Error>| BackendError::Connect {
            backend: NAME,
            message,
            source,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| connect_err(format!("cannot resolve {}", self.host), Some(e)))?
            .next()
            .ok_or_else(|| connect_err(format!("no address for {}", self.host), None))
    }
}

impl OutputBackend for ThreeDsBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    #[instrument(skip(self), fields(host = %self.host, port = self.port))]
    fn connect(&self) -> BackendResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let target = self.resolve()?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        self.link.attach(UdpTransport { socket, target });

        let link = self.link.clone();
        let keepalive = KeepAlive::spawn(NAME, self.keepalive_interval, move || link.resend())?;
        *self.keepalive.lock().unwrap_or_else(PoisonError::into_inner) = Some(keepalive);

        info!(%target, "3DS backend connected");
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
            info!(host = %self.host, "3DS backend disconnected");
        }
    }

    fn update_state(&self, change: &mut dyn FnMut(&mut ButtonState)) -> BackendResult<()> {
        self.link.update(change)
    }

    fn state(&self) -> ButtonState {
        self.link.snapshot()
    }
}

impl Drop for ThreeDsBackend {
    fn drop(&mut self) {
        self.disconnect();
    }
}
