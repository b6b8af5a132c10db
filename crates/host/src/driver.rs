//! Translator driver.
//!
//! Runs an [`InputTranslator`] against the host's input relay and hands the
//! results to an [`InputEffects`] implementation: key strokes for the
//! focused document, raw messages for an embedded game surface, and
//! dashboard navigation. The driver owns the clock; scheduled tap releases
//! fire from a `sleep_until` on the translator's next due time.
//!
//! Spawn one driver per session. Controllers that leave the roster have
//! their joystick holds released.

use std::collections::HashSet;
use std::time::Duration;

use couchlink_translate::{InputTranslator, KeyStroke, Mode, NavCommand};
use couchlink_wire::{ControllerEntry, ControllerInput, Millis, PeerId, SurfaceMessage};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{HostError, Result, SessionHost};

/// Whether a synthetic key stroke reached anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Nothing received the stroke, e.g. focus sits inside a cross-origin
    /// frame.
    NoEffect,
}

/// Application side effects of translated input.
pub trait InputEffects: Send {
    fn key(&mut self, stroke: KeyStroke) -> DispatchOutcome;
    fn post_to_surface(&mut self, message: &SurfaceMessage);
    fn navigate(&mut self, command: NavCommand);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    SetMode(Mode),
    SetDashboardLen(usize),
}

/// Control handle for a running driver.
pub struct DriverHandle<E> {
    commands: mpsc::UnboundedSender<DriverCommand>,
    task: JoinHandle<E>,
}

impl<E> DriverHandle<E> {
    /// Returns false if the driver has already stopped.
    pub fn set_mode(&self, mode: Mode) -> bool {
        self.commands.send(DriverCommand::SetMode(mode)).is_ok()
    }

    pub fn set_dashboard_len(&self, len: usize) -> bool {
        self.commands.send(DriverCommand::SetDashboardLen(len)).is_ok()
    }

    /// Stop the driver, releasing every key it still holds, and get the
    /// effects back.
    pub async fn shutdown(self) -> Option<E> {
        drop(self.commands);
        self.task.await.ok()
    }
}

/// Drive `translator` from the inputs and roster of `host`.
pub fn spawn<E>(
    host: &SessionHost,
    translator: InputTranslator,
    effects: E,
) -> Result<DriverHandle<E>>
where
    E: InputEffects + 'static,
{
    spawn_with(
        host.subscribe_inputs(),
        host.subscribe_controllers(),
        translator,
        effects,
    )
}

/// Drive `translator` from explicit input and roster sources.
pub fn spawn_with<E>(
    inputs: broadcast::Receiver<ControllerInput>,
    roster: watch::Receiver<Vec<ControllerEntry>>,
    translator: InputTranslator,
    effects: E,
) -> Result<DriverHandle<E>>
where
    E: InputEffects + 'static,
{
    let runtime = Handle::try_current().map_err(|_| HostError::NoRuntime)?;
    let (commands, command_rx) = mpsc::unbounded_channel();
    let driver = Driver {
        translator,
        effects,
        origin: Instant::now(),
        roster: HashSet::new(),
        warned: false,
    };
    let task = runtime.spawn(driver.run(inputs, roster, command_rx));
    Ok(DriverHandle { commands, task })
}

struct Driver<E> {
    translator: InputTranslator,
    effects: E,
    origin: Instant,
    roster: HashSet<PeerId>,
    /// The no-effect warning has been logged.
    warned: bool,
}

impl<E: InputEffects> Driver<E> {
    async fn run(
        mut self,
        mut inputs: broadcast::Receiver<ControllerInput>,
        mut roster: watch::Receiver<Vec<ControllerEntry>>,
        mut commands: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> E {
        self.on_roster(&roster.borrow_and_update());

        loop {
            let deadline = self
                .translator
                .next_release_at()
                .map(|due| self.origin + Duration::from_millis(due));
            let wake = deadline.unwrap_or(self.origin);

            // Roster first: an admission is always published before that
            // controller's first input.
            tokio::select! {
                biased;

                changed = roster.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let entries = roster.borrow_and_update().clone();
                    self.on_roster(&entries);
                }
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    let keys = self.translator.poll(self.now());
                    self.dispatch(keys);
                }
                received = inputs.recv() => match received {
                    Ok(event) => self.on_input(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "translator fell behind the input relay");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        let keys = self.translator.release_all();
        self.dispatch(keys);
        self.effects
    }

    fn now(&self) -> Millis {
        self.origin.elapsed().as_millis() as Millis
    }

    fn on_input(&mut self, event: &ControllerInput) {
        if !self.roster.contains(&event.controller_id) {
            debug!(controller = %event.controller_id, "input from departed controller");
            self.effects
                .post_to_surface(&SurfaceMessage::from(event.clone()));
            return;
        }

        let translation = self.translator.translate(event, self.now());
        self.effects.post_to_surface(&translation.surface);
        self.dispatch(translation.keys);
        if let Some(command) = translation.navigation {
            self.effects.navigate(command);
        }
    }

    fn on_roster(&mut self, entries: &[ControllerEntry]) {
        let current: HashSet<PeerId> = entries.iter().map(|c| c.id.clone()).collect();
        let departed: Vec<PeerId> = self.roster.difference(&current).cloned().collect();
        for id in departed {
            let keys = self.translator.release_controller(&id);
            self.dispatch(keys);
        }
        self.roster = current;
    }

    fn on_command(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::SetMode(mode) => {
                let keys = self.translator.set_mode(mode);
                self.dispatch(keys);
            }
            DriverCommand::SetDashboardLen(len) => self.translator.navigator_mut().set_len(len),
        }
    }

    fn dispatch(&mut self, keys: Vec<KeyStroke>) {
        for stroke in keys {
            if self.effects.key(stroke) == DispatchOutcome::NoEffect && !self.warned {
                self.warned = true;
                warn!(
                    key = stroke.key.key(),
                    "synthetic key had no effect; the embedded surface still gets raw input"
                );
            }
        }
    }
}
