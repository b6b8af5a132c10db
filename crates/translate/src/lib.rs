//! Couchlink Input Translator
//!
//! Turns controller input events into host-side effects. In dashboard mode
//! directional buttons drive a grid cursor; in game mode buttons become
//! synthetic key taps and the joystick becomes a virtual d-pad with held keys.
//! Every event is also produced as a [`SurfaceMessage`] so an embedded game
//! can consume the raw input itself.
//!
//! # Constraints
//!
//! The translator MUST NOT:
//! - Perform I/O or dispatch keys itself
//! - Read wall-clock time
//! - Spawn timers
//!
//! Callers pass `now` into every operation and drive scheduled key releases
//! by calling [`InputTranslator::poll`] at or after
//! [`InputTranslator::next_release_at`]. This keeps every timing rule
//! testable with plain integers.

#![deny(unsafe_code)]

pub mod dashboard;
pub mod dpad;
pub mod keys;

use std::collections::{BTreeMap, HashMap, VecDeque};

use couchlink_wire::{ControllerInput, InputEvent, Millis, PeerId, SurfaceMessage};
use serde::{Deserialize, Serialize};

pub use dashboard::{DashboardNavigator, NavCommand};
pub use dpad::{DpadChange, VirtualDpad};
pub use keys::{Key, KeyAction, KeyStroke, key_for_button, key_for_direction};

// ============================================================================
// Parameters
// ============================================================================

/// Delay between the synthetic press and release of a button tap.
pub const TAP_RELEASE_MS: Millis = 100;

/// Joystick axis magnitude past which a direction is held.
pub const JOYSTICK_DEADZONE: f64 = 0.5;

/// Minimum spacing between two dashboard steps in the same direction.
pub const NAV_THROTTLE_MS: Millis = 250;

/// Dashboard row width.
pub const GRID_COLUMNS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub tap_release_ms: Millis,
    pub deadzone: f64,
    pub nav_throttle_ms: Millis,
    pub grid_columns: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            tap_release_ms: TAP_RELEASE_MS,
            deadzone: JOYSTICK_DEADZONE,
            nav_throttle_ms: NAV_THROTTLE_MS,
            grid_columns: GRID_COLUMNS,
        }
    }
}

// ============================================================================
// Translator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Pre-game browsing; buttons move the dashboard cursor.
    Dashboard,
    /// A game is the relay target; inputs become keys.
    Game,
}

/// Effects produced by one input event.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// Raw event for the embedded game surface. Always present.
    pub surface: SurfaceMessage,
    /// Key transitions to dispatch now, in order.
    pub keys: Vec<KeyStroke>,
    pub navigation: Option<NavCommand>,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledRelease {
    due: Millis,
    key: Key,
}

/// Per-session input translator.
///
/// A key is down from the game's point of view while the joystick holds it
/// or a tap on it is outstanding. Joystick changes only emit on the edges of
/// that combined state. Every button tap is a press of its own: tapping a
/// key that is already down releases and re-presses it, and the key comes up
/// once the last tap expires and no stick holds it.
#[derive(Debug, Clone)]
pub struct InputTranslator {
    config: TranslatorConfig,
    mode: Mode,
    navigator: DashboardNavigator,
    /// Joystick pad per controller.
    dpads: HashMap<PeerId, VirtualDpad>,
    /// Number of controllers whose stick holds each key.
    stick_held: BTreeMap<Key, u32>,
    /// Outstanding taps per key.
    taps: BTreeMap<Key, u32>,
    /// Tap releases, ordered by due time.
    releases: VecDeque<ScheduledRelease>,
}

impl InputTranslator {
    /// Create a translator in game mode.
    pub fn game(config: TranslatorConfig) -> Self {
        Self::new(config, Mode::Game, 0)
    }

    /// Create a translator in dashboard mode over `items` entries.
    pub fn dashboard(config: TranslatorConfig, items: usize) -> Self {
        Self::new(config, Mode::Dashboard, items)
    }

    fn new(config: TranslatorConfig, mode: Mode, items: usize) -> Self {
        let navigator = DashboardNavigator::new(items, config.grid_columns, config.nav_throttle_ms);
        Self {
            config,
            mode,
            navigator,
            dpads: HashMap::new(),
            stick_held: BTreeMap::new(),
            taps: BTreeMap::new(),
            releases: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn navigator(&self) -> &DashboardNavigator {
        &self.navigator
    }

    pub fn navigator_mut(&mut self) -> &mut DashboardNavigator {
        &mut self.navigator
    }

    /// Keys currently held by any joystick.
    pub fn held_keys(&self) -> Vec<Key> {
        self.stick_held.keys().copied().collect()
    }

    /// Switch mode. Leaving game mode releases every joystick hold.
    pub fn set_mode(&mut self, mode: Mode) -> Vec<KeyStroke> {
        let mut keys = Vec::new();
        if self.mode == Mode::Game && mode != Mode::Game {
            self.release_sticks(&mut keys);
        }
        self.mode = mode;
        keys
    }

    /// Translate one attributed input event.
    pub fn translate(&mut self, event: &ControllerInput, now: Millis) -> Translation {
        let mut keys = Vec::new();
        let mut navigation = None;

        match (self.mode, &event.input) {
            (Mode::Dashboard, InputEvent::Button { button, .. }) => {
                navigation = self.navigator.handle_button(*button, now);
            }
            (Mode::Game, InputEvent::Button { button, .. }) => {
                self.tap(key_for_button(*button), now, &mut keys);
            }
            (Mode::Game, InputEvent::Joystick { x, y, .. }) => {
                let deadzone = self.config.deadzone;
                let change = self
                    .dpads
                    .entry(event.controller_id.clone())
                    .or_insert_with(|| VirtualDpad::new(deadzone))
                    .update(*x, *y);
                self.apply_dpad(change, &mut keys);
            }
            _ => {}
        }

        Translation {
            surface: SurfaceMessage::from(event.clone()),
            keys,
            navigation,
        }
    }

    /// When the next scheduled release is due.
    pub fn next_release_at(&self) -> Option<Millis> {
        self.releases.front().map(|r| r.due)
    }

    /// Emit every tap release due at `now`.
    pub fn poll(&mut self, now: Millis) -> Vec<KeyStroke> {
        let mut keys = Vec::new();
        while let Some(release) = self.releases.front().copied() {
            if release.due > now {
                break;
            }
            self.releases.pop_front();
            let remaining = decrement(&mut self.taps, release.key);
            if remaining == 0 && !self.stick_held.contains_key(&release.key) {
                keys.push(KeyStroke::up(release.key));
            }
        }
        keys
    }

    /// Drop a controller's joystick state, releasing whatever it held.
    pub fn release_controller(&mut self, controller_id: &str) -> Vec<KeyStroke> {
        let mut keys = Vec::new();
        if let Some(mut dpad) = self.dpads.remove(controller_id) {
            for direction in dpad.release_all() {
                self.stick_release(key_for_direction(direction), &mut keys);
            }
        }
        keys
    }

    /// Release everything immediately, including outstanding taps.
    pub fn release_all(&mut self) -> Vec<KeyStroke> {
        let mut keys = Vec::new();
        self.release_sticks(&mut keys);
        for (key, _) in std::mem::take(&mut self.taps) {
            keys.push(KeyStroke::up(key));
        }
        self.releases.clear();
        keys
    }

    // ========================================================================
    // Internal Methods
    // ========================================================================

    fn tap(&mut self, key: Key, now: Millis, keys: &mut Vec<KeyStroke>) {
        // A key that is already down gets a fresh press edge.
        if self.is_down(key) {
            keys.push(KeyStroke::up(key));
        }
        keys.push(KeyStroke::down(key));
        *self.taps.entry(key).or_insert(0) += 1;

        let due = now.saturating_add(self.config.tap_release_ms);
        let at = self.releases.partition_point(|r| r.due <= due);
        self.releases.insert(at, ScheduledRelease { due, key });
    }

    fn is_down(&self, key: Key) -> bool {
        self.stick_held.contains_key(&key) || self.taps.contains_key(&key)
    }

    fn apply_dpad(&mut self, change: DpadChange, keys: &mut Vec<KeyStroke>) {
        for direction in change.released {
            self.stick_release(key_for_direction(direction), keys);
        }
        for direction in change.pressed {
            self.stick_press(key_for_direction(direction), keys);
        }
    }

    fn stick_press(&mut self, key: Key, keys: &mut Vec<KeyStroke>) {
        let count = self.stick_held.entry(key).or_insert(0);
        *count += 1;
        if *count == 1 && !self.taps.contains_key(&key) {
            keys.push(KeyStroke::down(key));
        }
    }

    fn stick_release(&mut self, key: Key, keys: &mut Vec<KeyStroke>) {
        if !self.stick_held.contains_key(&key) {
            return;
        }
        let remaining = decrement(&mut self.stick_held, key);
        if remaining == 0 && !self.taps.contains_key(&key) {
            keys.push(KeyStroke::up(key));
        }
    }

    fn release_sticks(&mut self, keys: &mut Vec<KeyStroke>) {
        let ids: Vec<PeerId> = self.dpads.keys().cloned().collect();
        for id in ids {
            keys.extend(self.release_controller(&id));
        }
    }
}

/// Decrement a refcount, removing the entry at zero. Returns what is left.
fn decrement(counts: &mut BTreeMap<Key, u32>, key: Key) -> u32 {
    let Some(count) = counts.get_mut(&key) else {
        return 0;
    };
    *count = count.saturating_sub(1);
    let left = *count;
    if left == 0 {
        counts.remove(&key);
    }
    left
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use couchlink_wire::Button;

    use super::*;

    fn button(controller: &str, button: Button) -> ControllerInput {
        ControllerInput {
            controller_id: controller.to_string(),
            input: InputEvent::Button {
                button,
                timestamp: 0,
            },
        }
    }

    fn stick(controller: &str, x: f64, y: f64) -> ControllerInput {
        ControllerInput {
            controller_id: controller.to_string(),
            input: InputEvent::Joystick { x, y, timestamp: 0 },
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = TranslatorConfig::default();
        assert_eq!(config.tap_release_ms, 100);
        assert_eq!(config.deadzone, 0.5);
        assert_eq!(config.nav_throttle_ms, 250);
        assert_eq!(config.grid_columns, 4);

        let partial: TranslatorConfig = serde_json::from_str(r#"{"deadzone":0.3}"#).unwrap();
        assert_eq!(partial.deadzone, 0.3);
        assert_eq!(partial.tap_release_ms, 100);
    }

    /// Button A becomes a space press now and a release no earlier than the
    /// tap delay.
    #[test]
    fn test_button_tap_press_then_delayed_release() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        let out = t.translate(&button("phone-1", Button::A), 1000);
        assert_eq!(out.keys, vec![KeyStroke::down(Key::Space)]);
        assert_eq!(out.navigation, None);
        assert_eq!(t.next_release_at(), Some(1100));

        assert!(t.poll(1099).is_empty());
        assert_eq!(t.poll(1100), vec![KeyStroke::up(Key::Space)]);
        assert_eq!(t.next_release_at(), None);
        assert!(t.poll(5000).is_empty());
    }

    #[test]
    fn test_every_button_maps_to_a_tap() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        for b in Button::ALL {
            let out = t.translate(&button("phone-1", b), 0);
            assert_eq!(out.keys, vec![KeyStroke::down(key_for_button(b))]);
        }
        let releases = t.poll(100);
        assert_eq!(releases.len(), Button::ALL.len());
        assert!(releases.iter().all(|k| k.action == KeyAction::Up));
    }

    #[test]
    fn test_overlapping_taps_release_in_order() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        t.translate(&button("phone-1", Button::B), 0);
        t.translate(&button("phone-1", Button::A), 40);
        assert_eq!(t.poll(100), vec![KeyStroke::up(Key::Escape)]);
        assert_eq!(t.poll(140), vec![KeyStroke::up(Key::Space)]);
    }

    /// A double tap inside the release window is two presses, and the second
    /// one is held for the full tap delay.
    #[test]
    fn test_repeated_tap_presses_again() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        assert_eq!(
            t.translate(&button("phone-1", Button::A), 0).keys,
            vec![KeyStroke::down(Key::Space)]
        );
        assert_eq!(
            t.translate(&button("phone-1", Button::A), 60).keys,
            vec![KeyStroke::up(Key::Space), KeyStroke::down(Key::Space)]
        );
        assert!(t.poll(100).is_empty());
        assert_eq!(t.poll(160), vec![KeyStroke::up(Key::Space)]);
        assert_eq!(t.next_release_at(), None);
    }

    #[test]
    fn test_taps_from_two_controllers_both_press() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        t.translate(&button("phone-1", Button::B), 0);
        let second = t.translate(&button("phone-2", Button::B), 10).keys;
        let downs = second.iter().filter(|k| k.action == KeyAction::Down).count();
        assert_eq!(downs, 1);
    }

    /// Holding right+down then easing back inside the deadzone releases
    /// both without a spurious press.
    #[test]
    fn test_joystick_diagonal_hold_and_release() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        let out = t.translate(&stick("phone-1", 0.8, 0.8), 0);
        assert_eq!(
            out.keys,
            vec![KeyStroke::down(Key::ArrowDown), KeyStroke::down(Key::ArrowRight)]
        );
        assert_eq!(t.held_keys(), vec![Key::ArrowDown, Key::ArrowRight]);

        let out = t.translate(&stick("phone-1", 0.3, 0.3), 10);
        assert_eq!(
            out.keys,
            vec![KeyStroke::up(Key::ArrowDown), KeyStroke::up(Key::ArrowRight)]
        );
        assert!(t.held_keys().is_empty());
    }

    /// Centering releases exactly the held directions, once.
    #[test]
    fn test_joystick_center_releases_once() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        t.translate(&stick("phone-1", -0.9, 0.0), 0);
        assert!(t.translate(&stick("phone-1", -0.95, 0.2), 5).keys.is_empty());

        let out = t.translate(&stick("phone-1", 0.0, 0.0), 10);
        assert_eq!(out.keys, vec![KeyStroke::up(Key::ArrowLeft)]);
        assert!(t.translate(&stick("phone-1", 0.0, 0.0), 20).keys.is_empty());
    }

    #[test]
    fn test_two_sticks_share_a_key() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        assert_eq!(
            t.translate(&stick("phone-1", 0.9, 0.0), 0).keys,
            vec![KeyStroke::down(Key::ArrowRight)]
        );
        assert!(t.translate(&stick("phone-2", 0.9, 0.0), 0).keys.is_empty());
        assert!(t.translate(&stick("phone-1", 0.0, 0.0), 5).keys.is_empty());
        assert_eq!(
            t.translate(&stick("phone-2", 0.0, 0.0), 6).keys,
            vec![KeyStroke::up(Key::ArrowRight)]
        );
    }

    /// A tap on a key the stick holds re-presses it; the key stays down
    /// until both the hold and the tap are over.
    #[test]
    fn test_tap_on_stick_held_key_presses_again() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        t.translate(&stick("phone-1", 0.0, -0.9), 0);
        assert_eq!(
            t.translate(&button("phone-2", Button::Up), 10).keys,
            vec![KeyStroke::up(Key::ArrowUp), KeyStroke::down(Key::ArrowUp)]
        );
        assert_eq!(t.next_release_at(), Some(110));
        assert!(t.translate(&stick("phone-1", 0.0, 0.0), 20).keys.is_empty());
        assert_eq!(t.poll(110), vec![KeyStroke::up(Key::ArrowUp)]);
    }

    #[test]
    fn test_stick_during_tap_does_not_repeat_down() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        t.translate(&button("phone-1", Button::Right), 0);
        // tap still outstanding: the key is already down
        assert!(t.translate(&stick("phone-2", 0.9, 0.0), 50).keys.is_empty());
        // tap release is absorbed by the hold
        assert!(t.poll(100).is_empty());
        assert_eq!(
            t.translate(&stick("phone-2", 0.0, 0.0), 200).keys,
            vec![KeyStroke::up(Key::ArrowRight)]
        );
    }

    #[test]
    fn test_release_controller_on_disconnect() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        t.translate(&stick("phone-1", 0.9, 0.9), 0);
        let keys = t.release_controller("phone-1");
        assert_eq!(keys, vec![KeyStroke::up(Key::ArrowDown), KeyStroke::up(Key::ArrowRight)]);
        assert!(t.release_controller("phone-1").is_empty());
        assert!(t.release_controller("never-seen").is_empty());
    }

    #[test]
    fn test_reserved_kinds_only_forwarded() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        let event = ControllerInput {
            controller_id: "phone-1".to_string(),
            input: InputEvent::Gyro {
                alpha: Some(1.0),
                beta: None,
                gamma: None,
                timestamp: 7,
            },
        };
        let out = t.translate(&event, 0);
        assert!(out.keys.is_empty());
        assert_eq!(out.surface, SurfaceMessage::from(event));
    }

    #[test]
    fn test_dashboard_mode_navigates_without_keys() {
        let mut t = InputTranslator::dashboard(TranslatorConfig::default(), 8);
        let out = t.translate(&button("phone-1", Button::Down), 0);
        assert!(out.keys.is_empty());
        assert_eq!(out.navigation, Some(NavCommand::Moved { from: 0, to: 4 }));

        // phone repeat inside the throttle window
        let out = t.translate(&button("phone-1", Button::Down), 100);
        assert_eq!(out.navigation, None);

        let out = t.translate(&button("phone-1", Button::A), 150);
        assert_eq!(out.navigation, Some(NavCommand::Open { index: 4 }));

        // joystick does nothing on the dashboard, but is still forwarded
        let out = t.translate(&stick("phone-1", 0.9, 0.9), 200);
        assert!(out.keys.is_empty());
        assert_eq!(out.navigation, None);
        assert!(matches!(out.surface, SurfaceMessage::ControllerInput { .. }));
    }

    #[test]
    fn test_leaving_game_mode_releases_holds() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        t.translate(&stick("phone-1", -0.9, 0.0), 0);
        let keys = t.set_mode(Mode::Dashboard);
        assert_eq!(keys, vec![KeyStroke::up(Key::ArrowLeft)]);
        assert_eq!(t.mode(), Mode::Dashboard);
        assert!(t.held_keys().is_empty());
    }

    #[test]
    fn test_release_all_flushes_taps() {
        let mut t = InputTranslator::game(TranslatorConfig::default());
        t.translate(&button("phone-1", Button::A), 0);
        t.translate(&stick("phone-1", 0.9, 0.0), 0);
        let keys = t.release_all();
        assert_eq!(keys, vec![KeyStroke::up(Key::ArrowRight), KeyStroke::up(Key::Space)]);
        assert_eq!(t.next_release_at(), None);
        assert!(t.poll(1000).is_empty());
    }
}
