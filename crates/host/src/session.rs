//! Session registry: the host's record of the one session it runs.

use couchlink_wire::{ControllerEntry, InputEvent, Millis, PeerId, Session, SessionCode};

/// Why a controller could not be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitError {
    Full,
    Duplicate,
}

/// Authoritative state for one live session.
///
/// Player numbers come from a counter that only grows, so a slot freed by a
/// disconnect is never handed to a later joiner. Only the number of
/// connected controllers counts against capacity.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    session: Session,
    next_player_number: u32,
}

impl SessionRegistry {
    pub fn new(
        id: SessionCode,
        game_id: String,
        host_id: PeerId,
        max_players: usize,
        created_at: Millis,
    ) -> Self {
        Self {
            session: Session {
                id,
                game_id,
                host_id,
                controllers: Vec::new(),
                created_at,
                max_players,
            },
            next_player_number: 1,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn controllers(&self) -> &[ControllerEntry] {
        &self.session.controllers
    }

    pub fn len(&self) -> usize {
        self.session.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session.controllers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.session.is_full()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.session.controller(id).is_some()
    }

    /// Append a controller and return its player number.
    pub fn admit(&mut self, id: &str) -> Result<u32, AdmitError> {
        if self.is_full() {
            return Err(AdmitError::Full);
        }
        if self.contains(id) {
            return Err(AdmitError::Duplicate);
        }
        let player_number = self.next_player_number;
        self.next_player_number += 1;
        self.session
            .controllers
            .push(ControllerEntry::new(id.to_string(), player_number));
        Ok(player_number)
    }

    pub fn remove(&mut self, id: &str) -> Option<ControllerEntry> {
        let index = self.session.controllers.iter().position(|c| c.id == id)?;
        Some(self.session.controllers.remove(index))
    }

    /// Store the latest input of a controller. Returns false for unknown ids.
    pub fn record_input(&mut self, id: &str, input: InputEvent) -> bool {
        match self.session.controllers.iter_mut().find(|c| c.id == id) {
            Some(entry) => {
                entry.last_input = Some(input);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.session.controllers.clear();
    }
}
