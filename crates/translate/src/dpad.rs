//! Joystick → virtual d-pad.
//!
//! Each axis is compared against the deadzone independently, so two
//! directions may be held at once (diagonals). The pad only reports
//! transitions; a direction that stays past the threshold is reported once.

use couchlink_wire::Direction;

/// Transitions produced by one [`VirtualDpad::update`], in `Direction::ALL`
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DpadChange {
    /// Directions that crossed the deadzone outwards.
    pub pressed: Vec<Direction>,
    /// Directions that fell back inside the deadzone.
    pub released: Vec<Direction>,
}

impl DpadChange {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.pressed.is_empty() && self.released.is_empty()
    }
}

/// Tracks which of the four directions a stick currently holds.
#[derive(Debug, Clone)]
pub struct VirtualDpad {
    deadzone: f64,
    held: [bool; 4],
}

fn slot(direction: Direction) -> usize {
    match direction {
        Direction::Up => 0,
        Direction::Down => 1,
        Direction::Left => 2,
        Direction::Right => 3,
    }
}

impl VirtualDpad {
    /// A pad with nothing held. `deadzone` applies to each axis separately.
    pub fn new(deadzone: f64) -> Self {
        Self {
            deadzone,
            held: [false; 4],
        }
    }

    /// Whether `direction` is past the deadzone as of the last update.
    pub fn is_held(&self, direction: Direction) -> bool {
        self.held[slot(direction)]
    }

    /// Held directions in `Direction::ALL` order.
    pub fn held(&self) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|d| self.is_held(*d))
            .collect()
    }

    /// Feed a new stick position and report what changed.
    ///
    /// Positive `y` points down, matching screen coordinates. A direction
    /// is held only while its axis is strictly beyond the deadzone, so a
    /// value exactly on the threshold counts as centred. NaN never crosses
    /// the threshold and out-of-range values are not clamped.
    pub fn update(&mut self, x: f64, y: f64) -> DpadChange {
        let wanted = [
            y < -self.deadzone,
            y > self.deadzone,
            x < -self.deadzone,
            x > self.deadzone,
        ];

        let mut change = DpadChange::default();
        for direction in Direction::ALL {
            let i = slot(direction);
            match (self.held[i], wanted[i]) {
                (false, true) => change.pressed.push(direction),
                (true, false) => change.released.push(direction),
                _ => {}
            }
            self.held[i] = wanted[i];
        }
        change
    }

    /// Release everything, returning what was held.
    pub fn release_all(&mut self) -> Vec<Direction> {
        let held = self.held();
        self.held = [false; 4];
        held
    }
}
