//! Synthetic keyboard vocabulary and the fixed button → key table.

use couchlink_wire::{Button, Direction};

/// A key the translator can press on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Space,
    Escape,
    Shift,
    Control,
    Enter,
    Tab,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

impl Key {
    /// DOM `KeyboardEvent.key` value.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Space => " ",
            Self::Escape => "Escape",
            Self::Shift => "Shift",
            Self::Control => "Control",
            Self::Enter => "Enter",
            Self::Tab => "Tab",
            Self::ArrowUp => "ArrowUp",
            Self::ArrowDown => "ArrowDown",
            Self::ArrowLeft => "ArrowLeft",
            Self::ArrowRight => "ArrowRight",
        }
    }

    /// DOM `KeyboardEvent.code` value.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Space => "Space",
            Self::Escape => "Escape",
            Self::Shift => "ShiftLeft",
            Self::Control => "ControlLeft",
            Self::Enter => "Enter",
            Self::Tab => "Tab",
            Self::ArrowUp => "ArrowUp",
            Self::ArrowDown => "ArrowDown",
            Self::ArrowLeft => "ArrowLeft",
            Self::ArrowRight => "ArrowRight",
        }
    }

    /// Legacy `keyCode`, still read by many HTML5 games.
    pub fn key_code(&self) -> u32 {
        match self {
            Self::Space => 32,
            Self::Escape => 27,
            Self::Shift => 16,
            Self::Control => 17,
            Self::Enter => 13,
            Self::Tab => 9,
            Self::ArrowUp => 38,
            Self::ArrowDown => 40,
            Self::ArrowLeft => 37,
            Self::ArrowRight => 39,
        }
    }
}

pub fn key_for_direction(direction: Direction) -> Key {
    match direction {
        Direction::Up => Key::ArrowUp,
        Direction::Down => Key::ArrowDown,
        Direction::Left => Key::ArrowLeft,
        Direction::Right => Key::ArrowRight,
    }
}

pub fn key_for_button(button: Button) -> Key {
    match button {
        Button::A => Key::Space,
        Button::B => Key::Escape,
        Button::X => Key::Shift,
        Button::Y => Key::Control,
        Button::Start => Key::Enter,
        Button::Select => Key::Tab,
        Button::Up => Key::ArrowUp,
        Button::Down => Key::ArrowDown,
        Button::Left => Key::ArrowLeft,
        Button::Right => Key::ArrowRight,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    Down,
    Up,
}

/// One synthetic key transition to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyStroke {
    pub key: Key,
    pub action: KeyAction,
}

impl KeyStroke {
    pub fn down(key: Key) -> Self {
        Self {
            key,
            action: KeyAction::Down,
        }
    }

    pub fn up(key: Key) -> Self {
        Self {
            key,
            action: KeyAction::Up,
        }
    }
}
