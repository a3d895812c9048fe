//! Controller state snapshot

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::button::{Button, InterfaceButton, IrButton};

/// Touch screen width in pixels
pub const TOUCH_WIDTH: u16 = 320;
/// Touch screen height in pixels
pub const TOUCH_HEIGHT: u16 = 240;

/// Analog stick position, each axis in [-1, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stick {
    pub x: f64,
    pub y: f64,
}

impl Stick {
    /// Centered stick
    pub const CENTER: Stick = Stick { x: 0.0, y: 0.0 };

    /// Build a stick position, clamping both axes to [-1, 1]
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: clamp_axis(x),
            y: clamp_axis(y),
        }
    }

    pub fn is_centered(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

fn clamp_axis(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(-1.0, 1.0)
    }
}

/// A touch point in screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchPoint {
    pub x: u16,
    pub y: u16,
}

impl TouchPoint {
    /// Build a touch point clamped to the screen
    pub fn new(x: i64, y: i64) -> Self {
        Self {
            x: x.clamp(0, i64::from(TOUCH_WIDTH - 1)) as u16,
            y: y.clamp(0, i64::from(TOUCH_HEIGHT - 1)) as u16,
        }
    }
}

/// Everything a backend transmits: pressed buttons, stick axes, touch
///
/// The default value is the neutral state (nothing pressed, sticks
/// centered, no touch).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ButtonState {
    pub buttons: BTreeSet<Button>,
    pub ir: BTreeSet<IrButton>,
    pub interface: BTreeSet<InterfaceButton>,
    pub left_stick: Stick,
    pub right_stick: Stick,
    pub touch: Option<TouchPoint>,
}

impl ButtonState {
    /// Neutral state
    pub fn neutral() -> Self {
        Self::default()
    }

    /// State with exactly `buttons` pressed
    pub fn with_buttons(buttons: impl IntoIterator<Item = Button>) -> Self {
        Self {
            buttons: buttons.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons.contains(&button)
    }

    /// Replace the pressed face/d-pad buttons
    pub fn set_buttons(&mut self, buttons: &[Button]) {
        self.buttons = buttons.iter().copied().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_neutral() {
        let state = ButtonState::neutral();
        assert!(state.is_neutral());
        assert!(state.left_stick.is_centered());
        assert!(state.touch.is_none());
    }

    #[test]
    fn test_stick_axes_are_clamped() {
        let stick = Stick::new(1.7, -3.0);
        assert_eq!(stick, Stick { x: 1.0, y: -1.0 });
        assert_eq!(Stick::new(f64::NAN, 0.5), Stick { x: 0.0, y: 0.5 });
    }

    #[test]
    fn test_touch_point_is_clamped() {
        assert_eq!(TouchPoint::new(400, -5), TouchPoint { x: 319, y: 0 });
        assert_eq!(TouchPoint::new(160, 120), TouchPoint { x: 160, y: 120 });
    }

    #[test]
    fn test_set_buttons_replaces() {
        let mut state = ButtonState::with_buttons([Button::A]);
        state.set_buttons(&[Button::B, Button::Start]);
        assert!(!state.is_pressed(Button::A));
        assert!(state.is_pressed(Button::B));
        assert!(!state.is_neutral());

        state.set_buttons(&[]);
        assert!(state.is_neutral());
    }
}
