//! Button names as they appear in scripts

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A button name that no backend understands
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown button: {0}")]
pub struct UnknownButton(pub String);

/// Face, shoulder and d-pad buttons shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    X,
    Y,
    L,
    R,
    Up,
    Down,
    Left,
    Right,
    Start,
    Select,
}

impl Button {
    /// Every button, in display order
    pub const ALL: [Button; 12] = [
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
        Button::Start,
        Button::Select,
        Button::L,
        Button::R,
    ];

    /// Script-facing name
    pub fn as_str(self) -> &'static str {
        match self {
            Button::A => "A",
            Button::B => "B",
            Button::X => "X",
            Button::Y => "Y",
            Button::L => "L",
            Button::R => "R",
            Button::Up => "Up",
            Button::Down => "Down",
            Button::Left => "Left",
            Button::Right => "Right",
            Button::Start => "Start",
            Button::Select => "Select",
        }
    }
}

impl FromStr for Button {
    type Err = UnknownButton;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Button::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownButton(s.to_string()))
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra shoulder buttons carried in the 3DS C-stick/IR word
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IrButton {
    ZR,
    ZL,
}

impl FromStr for IrButton {
    type Err = UnknownButton;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ZR" => Ok(IrButton::ZR),
            "ZL" => Ok(IrButton::ZL),
            _ => Err(UnknownButton(s.to_string())),
        }
    }
}

/// System buttons (Home, Power)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InterfaceButton {
    Home,
    Power,
    PowerLong,
}

impl FromStr for InterfaceButton {
    type Err = UnknownButton;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "home" => Ok(InterfaceButton::Home),
            "power" => Ok(InterfaceButton::Power),
            "powerlong" => Ok(InterfaceButton::PowerLong),
            _ => Err(UnknownButton(s.to_string())),
        }
    }
}
