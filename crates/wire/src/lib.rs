//! Couchlink Wire Types
//!
//! This crate defines the shared session model and the messages exchanged
//! over a controller link. Host, controller and translator crates all depend
//! on it so both ends of a link agree on one schema.
//!
//! # Message Categories
//!
//! - **Host → Controller**: `sync` (session view + assigned player number),
//!   `error` (admission rejected)
//! - **Controller → Host**: `input` (one abstract input event)
//! - **Host → Embedded game**: `controllerInput` (raw input forwarded verbatim)
//!
//! Every message is a small JSON object tagged by its `type` field, which
//! keeps the format identical to what a browser data channel carries.

#![deny(unsafe_code)]

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Type Aliases
// ============================================================================

/// Wall-clock milliseconds as reported by the sending device.
pub type Millis = u64;

/// Transport identity of a peer (host or controller).
pub type PeerId = String;

/// Short human-shareable session code.
pub type SessionCode = String;

// ============================================================================
// Addressing
// ============================================================================

/// Prefix of every host transport identity.
pub const HOST_ID_PREFIX: &str = "GH";

/// Rejection text sent to a controller when the session is at capacity.
pub const SESSION_FULL_MESSAGE: &str = "Session full";

/// Derive the host transport identity from a session code.
///
/// Controllers only ever learn the code, so this mapping must stay
/// deterministic on both ends.
pub fn host_peer_id(prefix: &str, code: &str) -> PeerId {
    format!("{prefix}-{code}")
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> Millis {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

/// Build the URL a controller device opens to join a session.
pub fn controller_url(origin: &str, code: &str) -> String {
    format!("{}/controller/{}", origin.trim_end_matches('/'), code)
}

// ============================================================================
// Input Events
// ============================================================================

/// Fixed button vocabulary of the phone controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    X,
    Y,
    #[serde(rename = "up")]
    Up,
    #[serde(rename = "down")]
    Down,
    #[serde(rename = "left")]
    Left,
    #[serde(rename = "right")]
    Right,
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "select")]
    Select,
}

impl Button {
    pub const ALL: [Button; 10] = [
        Self::A,
        Self::B,
        Self::X,
        Self::Y,
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::Start,
        Self::Select,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::X => "X",
            Self::Y => "Y",
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::Start => "start",
            Self::Select => "select",
        }
    }

    /// The d-pad direction this button stands for, if any.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Up => Some(Direction::Up),
            Self::Down => Some(Direction::Down),
            Self::Left => Some(Direction::Left),
            Self::Right => Some(Direction::Right),
            _ => None,
        }
    }
}

/// One of the four d-pad directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];
}

/// Abstract input event produced by a controller device.
///
/// Joystick axes are nominally in `[-1, 1]` (screen orientation: +x right,
/// +y down) but receivers must not rely on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    Button {
        button: Button,
        timestamp: Millis,
    },
    Joystick {
        x: f64,
        y: f64,
        timestamp: Millis,
    },
    /// Device orientation. Reserved; not translated on the host.
    Gyro {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alpha: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        beta: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gamma: Option<f64>,
        timestamp: Millis,
    },
    /// Touchpad position. Reserved; not translated on the host.
    Touch {
        x: f64,
        y: f64,
        timestamp: Millis,
    },
}

impl InputEvent {
    pub fn timestamp(&self) -> Millis {
        match self {
            Self::Button { timestamp, .. }
            | Self::Joystick { timestamp, .. }
            | Self::Gyro { timestamp, .. }
            | Self::Touch { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Button { .. } => "button",
            Self::Joystick { .. } => "joystick",
            Self::Gyro { .. } => "gyro",
            Self::Touch { .. } => "touch",
        }
    }
}

/// Host-side in-process event: an input attributed to the controller that
/// sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerInput {
    pub controller_id: PeerId,
    pub input: InputEvent,
}

// ============================================================================
// Session Model
// ============================================================================

/// One admitted controller as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerEntry {
    /// Transport identity of the connecting peer.
    pub id: PeerId,
    pub connected: bool,
    /// 1-based, assigned in admission order and never reused.
    pub player_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_input: Option<InputEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
}

impl ControllerEntry {
    pub fn new(id: PeerId, player_number: u32) -> Self {
        Self {
            id,
            connected: true,
            player_number,
            last_input: None,
            battery: None,
        }
    }
}

/// A host-owned session grouping connected controllers around one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionCode,
    pub game_id: String,
    pub host_id: PeerId,
    pub controllers: Vec<ControllerEntry>,
    pub created_at: Millis,
    pub max_players: usize,
}

impl Session {
    pub fn is_full(&self) -> bool {
        self.controllers.len() >= self.max_players
    }

    pub fn controller(&self, id: &str) -> Option<&ControllerEntry> {
        self.controllers.iter().find(|c| c.id == id)
    }
}

// ============================================================================
// Link Messages
// ============================================================================

/// Messages the host sends down a controller link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostMessage {
    Sync {
        session: Session,
        #[serde(rename = "playerNumber")]
        player_number: u32,
    },
    Error {
        message: String,
    },
}

impl HostMessage {
    pub fn session_full() -> Self {
        Self::Error {
            message: SESSION_FULL_MESSAGE.to_string(),
        }
    }
}

/// Messages a controller sends up to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControllerMessage {
    Input { input: InputEvent },
}

/// Message posted to an embedded game surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SurfaceMessage {
    #[serde(rename = "controllerInput", rename_all = "camelCase")]
    ControllerInput {
        controller_id: PeerId,
        input: InputEvent,
    },
}

impl From<ControllerInput> for SurfaceMessage {
    fn from(event: ControllerInput) -> Self {
        Self::ControllerInput {
            controller_id: event.controller_id,
            input: event.input,
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;

/// Encode a message as a JSON payload.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(WireError::Encode)
}

/// Decode a JSON payload. Unknown `type` tags and missing fields are errors.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(WireError::Decode)
}

// ============================================================================
// Tests
// ============================================================================
