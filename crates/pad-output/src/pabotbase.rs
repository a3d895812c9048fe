//! PABotBase backend: framed, checksummed controller commands
//!
//! Frame layout: `[!len, kind, payload.., crc]` where `len` counts the whole
//! frame and `crc` is a little-endian CRC-32C of everything before it,
//! seeded with `0xFFFFFFFF` and left uninverted. Requests and commands carry
//! a little-endian sequence number as the first four payload bytes; the
//! device echoes it in its acknowledgements.
//!
//! Every state goes out as a timed controller command that the firmware
//! holds for [`HOLD_MS`]. A changed state interrupts the running command;
//! a held, unchanged state is refreshed shortly before its hold expires.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crc::{Crc, CRC_32_ISCSI};
use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendError, BackendResult, Capability, OutputBackend};
use crate::button::{Button, InterfaceButton, IrButton};
use crate::keepalive::KeepAlive;
use crate::link::{Link, Transport};
use crate::state::{ButtonState, Stick};

/// Line speed of the PABotBase firmware
pub const DEFAULT_BAUD: u32 = 115_200;
/// How long the firmware holds each controller command
pub const HOLD_MS: u16 = 1000;

const NAME: &str = "pabotbase";

const OVERHEAD: usize = 6;
const MAX_FRAME: usize = 64;
const REFRESH_MARGIN: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);
const ACK_WAIT: Duration = Duration::from_millis(200);
const RETRANSMIT_DELAY: Duration = Duration::from_millis(100);
const RETRIES: usize = 5;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Message kinds used by this backend
pub mod kind {
    pub const ERROR_READY: u8 = 0x00;
    pub const ACK_COMMAND: u8 = 0x10;
    pub const ACK_REQUEST: u8 = 0x11;
    pub const ACK_REQUEST_DATA: u8 = 0x1F;
    pub const SEQNUM_RESET: u8 = 0x40;
    pub const REQUEST_STOP: u8 = 0x4B;
    pub const REQUEST_NEXT_CMD_INTERRUPT: u8 = 0x4C;
    pub const CONTROLLER_STATE: u8 = 0x90;
}

/// CRC-32C as the firmware computes it (no final inversion)
pub fn crc32c(bytes: &[u8]) -> u32 {
    !CASTAGNOLI.checksum(bytes)
}

/// One protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: u8, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// A request whose payload is just its sequence number
    pub fn request(kind: u8, seqnum: u32) -> Self {
        Self::new(kind, seqnum.to_le_bytes().to_vec())
    }

    /// Sequence number echoed in the first four payload bytes
    pub fn seqnum(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.payload.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    pub fn encode(&self) -> Vec<u8> {
        let len = OVERHEAD + self.payload.len();
        let mut out = Vec::with_capacity(len);
        out.push(!(len as u8));
        out.push(self.kind);
        out.extend_from_slice(&self.payload);
        let crc = crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Parse exactly one frame; `None` on a length or checksum mismatch
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < OVERHEAD || usize::from(!frame[0]) != frame.len() {
            return None;
        }
        let (body, crc) = frame.split_at(frame.len() - 4);
        let crc = u32::from_le_bytes(crc.try_into().ok()?);
        if crc32c(body) != crc {
            return None;
        }
        Some(Self::new(body[1], body[2..].to_vec()))
    }
}

fn is_request_ack(kind: u8) -> bool {
    (kind::ACK_REQUEST..=kind::ACK_REQUEST_DATA).contains(&kind)
}

/// Reassembles frames from a byte stream, skipping noise
#[derive(Debug, Default)]
struct Receiver {
    buf: Vec<u8>,
}

impl Receiver {
    fn next_message(&mut self) -> Option<Message> {
        for start in 0..self.buf.len() {
            let len = usize::from(!self.buf[start]);
            if !(OVERHEAD..=MAX_FRAME).contains(&len) || start + len > self.buf.len() {
                continue;
            }
            if let Some(message) = Message::decode(&self.buf[start..start + len]) {
                self.buf.drain(..start + len);
                return Some(message);
            }
        }
        None
    }
}

// Switch controller button flags
const FLAG_Y: u16 = 1 << 0;
const FLAG_B: u16 = 1 << 1;
const FLAG_A: u16 = 1 << 2;
const FLAG_X: u16 = 1 << 3;
const FLAG_L: u16 = 1 << 4;
const FLAG_R: u16 = 1 << 5;
const FLAG_ZL: u16 = 1 << 6;
const FLAG_ZR: u16 = 1 << 7;
const FLAG_MINUS: u16 = 1 << 8;
const FLAG_PLUS: u16 = 1 << 9;
const FLAG_HOME: u16 = 1 << 12;

const DPAD_NONE: u8 = 8;
const STICK_CENTER: u8 = 0x80;

/// Encoded neutral controller state
pub const NEUTRAL: [u8; 7] = [0, 0, DPAD_NONE, STICK_CENTER, STICK_CENTER, STICK_CENTER, STICK_CENTER];

fn button_flags(state: &ButtonState) -> u16 {
    let face = state.buttons.iter().map(|b| match b {
        Button::A => FLAG_A,
        Button::B => FLAG_B,
        Button::X => FLAG_X,
        Button::Y => FLAG_Y,
        Button::L => FLAG_L,
        Button::R => FLAG_R,
        Button::Start => FLAG_PLUS,
        Button::Select => FLAG_MINUS,
        Button::Up | Button::Down | Button::Left | Button::Right => 0,
    });
    let triggers = state.ir.iter().map(|b| match b {
        IrButton::ZL => FLAG_ZL,
        IrButton::ZR => FLAG_ZR,
    });
    // Power has no Switch counterpart
    let interface = state.interface.iter().map(|b| match b {
        InterfaceButton::Home => FLAG_HOME,
        InterfaceButton::Power | InterfaceButton::PowerLong => 0,
    });
    face.chain(triggers).chain(interface).fold(0, |acc, bit| acc | bit)
}

/// Hat position; opposing directions cancel
fn dpad(state: &ButtonState) -> u8 {
    let vertical = match (state.is_pressed(Button::Up), state.is_pressed(Button::Down)) {
        (true, false) => Some(Button::Up),
        (false, true) => Some(Button::Down),
        _ => None,
    };
    let horizontal = match (state.is_pressed(Button::Right), state.is_pressed(Button::Left)) {
        (true, false) => Some(Button::Right),
        (false, true) => Some(Button::Left),
        _ => None,
    };
    match (vertical, horizontal) {
        (Some(Button::Up), None) => 0,
        (Some(Button::Up), Some(Button::Right)) => 1,
        (None, Some(Button::Right)) => 2,
        (Some(Button::Down), Some(Button::Right)) => 3,
        (Some(Button::Down), None) => 4,
        (Some(Button::Down), Some(Button::Left)) => 5,
        (None, Some(Button::Left)) => 6,
        (Some(Button::Up), Some(Button::Left)) => 7,
        _ => DPAD_NONE,
    }
}

fn axis(value: f64) -> u8 {
    ((value.clamp(-1.0, 1.0) + 1.0) * 127.5).round() as u8
}

fn stick_bytes(stick: Stick) -> [u8; 2] {
    [axis(stick.x), axis(-stick.y)]
}

/// `[buttons lo, buttons hi, dpad, lx, ly, rx, ry]`
pub fn encode_state(state: &ButtonState) -> [u8; 7] {
    let [lo, hi] = button_flags(state).to_le_bytes();
    let [lx, ly] = stick_bytes(state.left_stick);
    let [rx, ry] = stick_bytes(state.right_stick);
    [lo, hi, dpad(state), lx, ly, rx, ry]
}

/// Controller command: seqnum, hold time, encoded state
pub fn controller_command(seqnum: u32, hold_ms: u16, encoded: [u8; 7]) -> Message {
    let mut payload = Vec::with_capacity(13);
    payload.extend_from_slice(&seqnum.to_le_bytes());
    payload.extend_from_slice(&hold_ms.to_le_bytes());
    payload.extend_from_slice(&encoded);
    Message::new(kind::CONTROLLER_STATE, payload)
}

/// Bidirectional byte link to the device
pub trait Port: Send {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Append input that is already buffered to `buf` without blocking
    fn receive(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;
}

struct SerialDevice(Box<dyn serialport::SerialPort>);

impl Port for SerialDevice {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.0.write_all(bytes)?;
        self.0.flush()
    }

    fn receive(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let waiting = self.0.bytes_to_read()? as usize;
        if waiting == 0 {
            return Ok(0);
        }
        let start = buf.len();
        buf.resize(start + waiting, 0);
        let read = self.0.read(&mut buf[start..])?;
        buf.truncate(start + read);
        Ok(read)
    }
}

/// Opens the device link for a connection
pub type Opener = Box<dyn Fn() -> io::Result<Box<dyn Port>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Sent {
    encoded: [u8; 7],
    at: Instant,
}

struct Session {
    port: Box<dyn Port>,
    seqnum: u32,
    receiver: Receiver,
    last: Option<Sent>,
}

impl Session {
    fn new(port: Box<dyn Port>) -> Self {
        Self {
            port,
            seqnum: 1,
            receiver: Receiver::default(),
            last: None,
        }
    }

    fn next_seqnum(&mut self) -> u32 {
        let seqnum = self.seqnum;
        self.seqnum = self.seqnum.wrapping_add(1);
        seqnum
    }

    fn poll(&mut self) -> io::Result<Option<Message>> {
        self.port.receive(&mut self.receiver.buf)?;
        Ok(self.receiver.next_message())
    }

    /// Send a request and wait for the matching acknowledgement
    fn request(&mut self, kind: u8) -> io::Result<Message> {
        let frame = Message::request(kind, self.seqnum).encode();
        for attempt in 1..=RETRIES {
            self.port.send(&frame)?;
            let deadline = Instant::now() + ACK_WAIT;
            while Instant::now() < deadline {
                match self.poll()? {
                    Some(reply) if is_request_ack(reply.kind) && reply.seqnum() == Some(self.seqnum) => {
                        self.next_seqnum();
                        return Ok(reply);
                    }
                    Some(other) => debug!(kind = other.kind, "ignoring message while awaiting ack"),
                    None => std::thread::sleep(Duration::from_millis(1)),
                }
            }
            debug!(attempt, kind, "no acknowledgement, retransmitting");
            std::thread::sleep(RETRANSMIT_DELAY);
        }
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("request 0x{kind:02X} was never acknowledged"),
        ))
    }

    /// Send a request without waiting for its acknowledgement
    fn notify(&mut self, kind: u8) -> io::Result<()> {
        let seqnum = self.next_seqnum();
        self.port.send(&Message::request(kind, seqnum).encode())
    }

    fn command(&mut self, encoded: [u8; 7], hold_ms: u16) -> io::Result<()> {
        let seqnum = self.next_seqnum();
        self.port.send(&controller_command(seqnum, hold_ms, encoded).encode())
    }

    /// Discard acknowledgements, surfacing device-side errors
    fn drain(&mut self) -> io::Result<()> {
        while let Some(message) = self.poll()? {
            if message.kind < kind::ACK_COMMAND && message.kind != kind::ERROR_READY {
                warn!(code = message.kind, "device reported an error");
            }
        }
        Ok(())
    }
}

impl Transport for Session {
    fn send(&mut self, state: &ButtonState) -> io::Result<()> {
        let encoded = encode_state(state);
        let now = Instant::now();
        let hold = Duration::from_millis(u64::from(HOLD_MS));

        let (due, interrupt) = match self.last {
            None => (true, false),
            Some(sent) if sent.encoded != encoded => (true, now.duration_since(sent.at) < hold),
            Some(sent) => (
                encoded != NEUTRAL && now.duration_since(sent.at) >= hold - REFRESH_MARGIN,
                false,
            ),
        };
        if !due {
            return Ok(());
        }

        self.command(encoded, HOLD_MS)?;
        if interrupt {
            self.notify(kind::REQUEST_NEXT_CMD_INTERRUPT)?;
        }
        self.drain()?;
        self.last = Some(Sent { encoded, at: now });
        Ok(())
    }
}

/// PABotBase link settings
#[derive(Debug, Clone, PartialEq)]
pub struct PabotSettings {
    pub baud: u32,
    /// How often the held state is checked for a refresh
    pub keepalive: Duration,
}

impl Default for PabotSettings {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            keepalive: Duration::from_millis(10),
        }
    }
}

/// Backend for PABotBase firmware on a serial device
pub struct PabotBackend {
    label: String,
    opener: Opener,
    settings: PabotSettings,
    link: Link<Session>,
    keepalive: Mutex<Option<KeepAlive>>,
}

impl PabotBackend {
    /// Backend for a device node such as `/dev/ttyACM0`
    pub fn open_device(device: impl Into<PathBuf>, settings: PabotSettings) -> Self {
        let label = device.into().display().to_string();
        let path = label.clone();
        let baud = settings.baud;
        let opener: Opener = Box::new(move || {
            let port = serialport::new(path.as_str(), baud)
                .timeout(WRITE_TIMEOUT)
                .open()?;
            Ok(Box::new(SerialDevice(port)) as Box<dyn Port>)
        });
        Self::with_opener(label, opener, settings)
    }

    /// Backend over any [`Port`]
    pub fn with_opener(label: impl Into<String>, opener: Opener, settings: PabotSettings) -> Self {
        Self {
            label: label.into(),
            opener,
            settings,
            link: Link::new(NAME),
            keepalive: Mutex::new(None),
        }
    }

    pub fn baud(&self) -> u32 {
        self.settings.baud
    }
}

impl OutputBackend for PabotBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::Sticks | Capability::IrButtons | Capability::InterfaceButtons
        )
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    #[instrument(skip(self), fields(device = %self.label))]
    fn connect(&self) -> BackendResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let connect_error = |message: String, e: io::Error| BackendError::Connect {
            backend: NAME,
            message,
            source: Some(e),
        };
        let port = (self.opener)().map_err(|e| connect_error(format!("cannot open {}", self.label), e))?;
        let mut session = Session::new(port);
        session
            .request(kind::SEQNUM_RESET)
            .map_err(|e| connect_error(format!("no PABotBase device answered on {}", self.label), e))?;

        self.link.attach(session);
        self.link.update(&mut |s| *s = ButtonState::neutral())?;

        let link = self.link.clone();
        let keepalive = KeepAlive::spawn(NAME, self.settings.keepalive, move || link.resend())?;
        *self.keepalive.lock().unwrap_or_else(PoisonError::into_inner) = Some(keepalive);

        info!(baud = self.settings.baud, "pabotbase backend connected");
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
        if let Err(e) = self.link.with_transport(|session| session.notify(kind::REQUEST_STOP)) {
            debug!(error = %e, "stop request not sent");
        }
        if self.link.detach().is_some() {
            info!(device = %self.label, "pabotbase backend disconnected");
        }
    }

    fn update_state(&self, change: &mut dyn FnMut(&mut ButtonState)) -> BackendResult<()> {
        self.link.update(change)
    }

    fn state(&self) -> ButtonState {
        self.link.snapshot()
    }
}

impl Drop for PabotBackend {
    fn drop(&mut self) {
        self.disconnect();
    }
}
