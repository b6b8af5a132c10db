//! Dashboard cursor driven by controller buttons.
//!
//! The dashboard lays items out in rows of `columns`. Directional buttons
//! move one selected index, clamped to the collection; each direction is
//! throttled on its own so a phone's repeat events cannot skip cells.

use std::collections::HashMap;

use couchlink_wire::{Button, Direction, Millis};

/// What the dashboard should do in response to an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavCommand {
    /// The selection moved.
    Moved { from: usize, to: usize },
    /// Open the selected item.
    Open { index: usize },
}

#[derive(Debug, Clone)]
pub struct DashboardNavigator {
    len: usize,
    columns: usize,
    throttle_ms: Millis,
    selected: usize,
    last_step: HashMap<Direction, Millis>,
}

impl DashboardNavigator {
    pub fn new(len: usize, columns: usize, throttle_ms: Millis) -> Self {
        Self {
            len,
            columns: columns.max(1),
            throttle_ms,
            selected: 0,
            last_step: HashMap::new(),
        }
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Replace the collection size, keeping the cursor in range.
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    pub fn handle_button(&mut self, button: Button, now: Millis) -> Option<NavCommand> {
        if let Some(direction) = button.direction() {
            return self.step(direction, now);
        }
        match button {
            Button::A | Button::Start if !self.is_empty() => Some(NavCommand::Open {
                index: self.selected,
            }),
            _ => None,
        }
    }

    /// Move one step. Returns `None` when throttled or already at the edge.
    pub fn step(&mut self, direction: Direction, now: Millis) -> Option<NavCommand> {
        if self.is_empty() {
            return None;
        }
        if let Some(&last) = self.last_step.get(&direction)
            && now.saturating_sub(last) < self.throttle_ms
        {
            return None;
        }
        self.last_step.insert(direction, now);

        let last_index = self.len - 1;
        let from = self.selected;
        let to = match direction {
            Direction::Up => from.saturating_sub(self.columns),
            Direction::Down => (from + self.columns).min(last_index),
            Direction::Left => from.saturating_sub(1),
            Direction::Right => (from + 1).min(last_index),
        };
        if to == from {
            return None;
        }
        self.selected = to;
        Some(NavCommand::Moved { from, to })
    }
}
