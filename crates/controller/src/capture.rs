//! Gesture capture.
//!
//! Turns touch gestures on the phone into [`InputEvent`]s. Button presses
//! are sent on touch start only; releasing a button is local state. The
//! joystick pad reports the touch offset from its centre as a vector inside
//! the unit circle, and lifting the finger sends an explicit centred event.

use std::collections::BTreeSet;

use couchlink_wire::{Button, InputEvent, Millis};
use serde::{Deserialize, Serialize};

/// Length of the haptic pulse on a button press.
pub const HAPTIC_PULSE_MS: Millis = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMode {
    #[default]
    Dpad,
    Joystick,
    Gyro,
    Touch,
}

/// Capture preferences of one controller device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub mode: ControllerMode,
    pub vibration: bool,
    /// Multiplier on joystick deflection, applied before clamping.
    pub sensitivity: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            mode: ControllerMode::Dpad,
            vibration: true,
            sensitivity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GestureCapture {
    settings: ControllerSettings,
    pressed: BTreeSet<Button>,
}

impl GestureCapture {
    pub fn new(settings: ControllerSettings) -> Self {
        Self {
            settings,
            pressed: BTreeSet::new(),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ControllerSettings) {
        self.settings = settings;
    }

    /// Haptic pulse to play on a press, if vibration is enabled.
    pub fn pulse_ms(&self) -> Option<Millis> {
        self.settings.vibration.then_some(HAPTIC_PULSE_MS)
    }

    pub fn button_down(&mut self, button: Button, now: Millis) -> InputEvent {
        self.pressed.insert(button);
        InputEvent::Button {
            button,
            timestamp: now,
        }
    }

    /// Returns whether the button was held.
    pub fn button_up(&mut self, button: Button) -> bool {
        self.pressed.remove(&button)
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.pressed.contains(&button)
    }

    pub fn pressed(&self) -> Vec<Button> {
        self.pressed.iter().copied().collect()
    }

    /// Touch at (`dx`, `dy`) from the pad centre on a pad of `radius`.
    /// Returns `None` for a degenerate pad or non-finite offsets.
    pub fn joystick_move(&self, dx: f64, dy: f64, radius: f64, now: Millis) -> Option<InputEvent> {
        if !(radius > 0.0) || !dx.is_finite() || !dy.is_finite() {
            return None;
        }
        let mut x = dx / radius * self.settings.sensitivity;
        let mut y = dy / radius * self.settings.sensitivity;
        let length = x.hypot(y);
        if length > 1.0 {
            x /= length;
            y /= length;
        }
        Some(InputEvent::Joystick {
            x,
            y,
            timestamp: now,
        })
    }

    pub fn joystick_end(&self, now: Millis) -> InputEvent {
        InputEvent::Joystick {
            x: 0.0,
            y: 0.0,
            timestamp: now,
        }
    }
}
