//! Inbound payload validation.
//!
//! Rules for data arriving on an admitted link:
//! - Undecodable payload or unknown message type: DROP + LOG
//! - NaN/Inf in any axis: DROP + LOG
//! - Joystick magnitude > 1.0: ACCEPT unchanged + LOG (the translator
//!   tolerates any range and the embedded game gets the raw value)

use couchlink_wire::{ControllerMessage, InputEvent, decode};

/// Result of validating one inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Accepted(InputEvent),
    /// Accepted, but a joystick vector was longer than the unit circle.
    AcceptedOutOfRange(InputEvent),
    /// Dropped: not a controller message.
    DroppedMalformed,
    /// Dropped: NaN or Inf in an axis.
    DroppedNonFinite,
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::AcceptedOutOfRange(_))
    }

    pub fn into_input(self) -> Option<InputEvent> {
        match self {
            Self::Accepted(input) | Self::AcceptedOutOfRange(input) => Some(input),
            _ => None,
        }
    }
}

/// Validate a raw payload received from a controller.
pub fn validate_payload(payload: &[u8]) -> ValidationResult {
    match decode::<ControllerMessage>(payload) {
        Ok(ControllerMessage::Input { input }) => validate_input(input),
        Err(_) => ValidationResult::DroppedMalformed,
    }
}

pub fn validate_input(input: InputEvent) -> ValidationResult {
    let finite = match &input {
        InputEvent::Button { .. } => true,
        InputEvent::Joystick { x, y, .. } | InputEvent::Touch { x, y, .. } => {
            x.is_finite() && y.is_finite()
        }
        InputEvent::Gyro {
            alpha, beta, gamma, ..
        } => [alpha, beta, gamma]
            .into_iter()
            .flatten()
            .all(|v| v.is_finite()),
    };
    if !finite {
        return ValidationResult::DroppedNonFinite;
    }

    if let InputEvent::Joystick { x, y, .. } = &input
        && x * x + y * y > 1.0
    {
        return ValidationResult::AcceptedOutOfRange(input);
    }
    ValidationResult::Accepted(input)
}

#[cfg(test)]
mod tests {
    use couchlink_wire::Button;

    use super::*;

    #[test]
    fn test_valid_button_payload() {
        let raw = br#"{"type":"input","input":{"type":"button","button":"B","timestamp":1}}"#;
        let result = validate_payload(raw);
        assert!(result.is_accepted());
        assert_eq!(
            result.into_input(),
            Some(InputEvent::Button {
                button: Button::B,
                timestamp: 1
            })
        );
    }

    #[test]
    fn test_out_of_range_joystick_kept_verbatim() {
        let input = InputEvent::Joystick {
            x: 2.0,
            y: 0.0,
            timestamp: 1,
        };
        assert_eq!(
            validate_input(input.clone()),
            ValidationResult::AcceptedOutOfRange(input)
        );
    }

    #[test]
    fn test_non_finite_dropped() {
        let stick = InputEvent::Joystick {
            x: f64::NAN,
            y: 0.0,
            timestamp: 1,
        };
        assert_eq!(validate_input(stick), ValidationResult::DroppedNonFinite);

        let gyro = InputEvent::Gyro {
            alpha: None,
            beta: Some(f64::INFINITY),
            gamma: None,
            timestamp: 1,
        };
        assert_eq!(validate_input(gyro), ValidationResult::DroppedNonFinite);
    }

    /// Malformed payloads never panic and are never accepted.
    #[test]
    fn test_malformed_payloads_dropped() {
        let payloads: [&[u8]; 6] = [
            b"",
            b"garbage",
            br#"{"type":"sync"}"#,
            br#"{"type":"input"}"#,
            br#"{"type":"input","input":{"type":"joystick","x":"left","y":0,"timestamp":1}}"#,
            br#"{"type":"input","input":{"type":"button","button":"Z","timestamp":1}}"#,
        ];
        for payload in payloads {
            assert_eq!(validate_payload(payload), ValidationResult::DroppedMalformed);
        }
    }
}
