//! Controller link manager.
//!
//! Applies transport events for the host identity to the session registry:
//! admission against capacity, attribution of inputs to the sending
//! controller, and cleanup when a link goes away. Every handler runs to
//! completion; the caller serialises events.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use couchlink_transport::{Link, PeerEvent, PeerId};
use couchlink_wire::{ControllerInput, HostMessage, encode};
use tracing::{debug, info, warn};

use crate::relay::InputBus;
use crate::session::{AdmitError, SessionRegistry};
use crate::validation::{ValidationResult, validate_payload};

/// What a single transport event did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    /// A link was announced and is waiting to open.
    Pending { controller_id: PeerId },
    Admitted {
        controller_id: PeerId,
        player_number: u32,
    },
    /// Refused at capacity (or a duplicate identity); the link was closed.
    Rejected { controller_id: PeerId },
    Input {
        controller_id: PeerId,
        result: ValidationResult,
    },
    Removed { controller_id: PeerId },
    /// Nothing changed.
    Ignored,
}

impl LinkOutcome {
    /// Whether the controller list observers see has changed.
    pub fn changes_controllers(&self) -> bool {
        match self {
            Self::Admitted { .. } | Self::Removed { .. } => true,
            Self::Input { result, .. } => result.is_accepted(),
            _ => false,
        }
    }
}

pub struct LinkManager {
    registry: SessionRegistry,
    /// Links announced but not yet open.
    pending: HashMap<PeerId, Arc<dyn Link>>,
    /// Links of admitted controllers.
    links: HashMap<PeerId, Arc<dyn Link>>,
    inputs: InputBus,
}

impl LinkManager {
    pub fn new(registry: SessionRegistry, inputs: InputBus) -> Self {
        Self {
            registry,
            pending: HashMap::new(),
            links: HashMap::new(),
            inputs,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn handle(&mut self, event: PeerEvent) -> LinkOutcome {
        match event {
            PeerEvent::Connection { link } => {
                let controller_id = link.remote().to_string();
                debug!(controller = %controller_id, "inbound link announced");
                self.pending.insert(controller_id.clone(), link);
                LinkOutcome::Pending { controller_id }
            }
            PeerEvent::Open { remote } => self.on_open(remote),
            PeerEvent::Data { remote, payload } => self.on_data(remote, &payload),
            PeerEvent::Close { remote } => self.on_close(&remote),
            PeerEvent::Error {
                remote: Some(remote),
                error,
            } => {
                warn!(controller = %remote, error = %error, "controller link error");
                if let Some(link) = self.links.get(&remote) {
                    link.close();
                }
                self.on_close(&remote)
            }
            PeerEvent::Error {
                remote: None,
                error,
            } => {
                warn!(error = %error, "host transport error");
                LinkOutcome::Ignored
            }
        }
    }

    fn on_open(&mut self, controller_id: PeerId) -> LinkOutcome {
        let Some(link) = self.pending.remove(&controller_id) else {
            debug!(controller = %controller_id, "open for unknown link");
            return LinkOutcome::Ignored;
        };

        let player_number = match self.registry.admit(&controller_id) {
            Ok(n) => n,
            Err(reason) => {
                warn!(
                    controller = %controller_id,
                    session = %self.registry.session().id,
                    ?reason,
                    "controller rejected"
                );
                if reason == AdmitError::Full {
                    send(link.as_ref(), &HostMessage::session_full());
                }
                link.close();
                return LinkOutcome::Rejected { controller_id };
            }
        };

        self.links.insert(controller_id.clone(), Arc::clone(&link));
        send(
            link.as_ref(),
            &HostMessage::Sync {
                session: self.registry.session().clone(),
                player_number,
            },
        );
        info!(
            controller = %controller_id,
            session = %self.registry.session().id,
            player_number,
            "controller admitted"
        );
        LinkOutcome::Admitted {
            controller_id,
            player_number,
        }
    }

    fn on_data(&mut self, controller_id: PeerId, payload: &Bytes) -> LinkOutcome {
        if !self.links.contains_key(&controller_id) {
            debug!(controller = %controller_id, "data from unadmitted link dropped");
            return LinkOutcome::Ignored;
        }

        let result = validate_payload(payload);
        match &result {
            ValidationResult::Accepted(input) | ValidationResult::AcceptedOutOfRange(input) => {
                if matches!(result, ValidationResult::AcceptedOutOfRange(_)) {
                    debug!(controller = %controller_id, "joystick outside unit circle");
                }
                self.registry.record_input(&controller_id, input.clone());
                self.inputs.publish(ControllerInput {
                    controller_id: controller_id.clone(),
                    input: input.clone(),
                });
            }
            ValidationResult::DroppedMalformed | ValidationResult::DroppedNonFinite => {
                debug!(controller = %controller_id, ?result, "controller payload dropped");
            }
        }
        LinkOutcome::Input {
            controller_id,
            result,
        }
    }

    /// Close and error events only name the remote peer. Only a link that is
    /// no longer open is torn down, so the close of a second link from the
    /// same identity leaves the admitted one alone.
    fn on_close(&mut self, controller_id: &str) -> LinkOutcome {
        if self.pending.get(controller_id).is_some_and(|l| !l.is_open()) {
            self.pending.remove(controller_id);
        }
        match self.links.get(controller_id) {
            None => return LinkOutcome::Ignored,
            Some(link) if link.is_open() => {
                debug!(controller = %controller_id, "close of a secondary link ignored");
                return LinkOutcome::Ignored;
            }
            Some(_) => {}
        }
        self.links.remove(controller_id);
        self.registry.remove(controller_id);
        info!(
            controller = %controller_id,
            session = %self.registry.session().id,
            "controller removed"
        );
        LinkOutcome::Removed {
            controller_id: controller_id.to_string(),
        }
    }

    /// Host-initiated removal: close the link, then clean up as for a
    /// remote close. Returns false for unknown controllers.
    pub fn disconnect(&mut self, controller_id: &str) -> bool {
        match self.links.get(controller_id) {
            Some(link) => link.close(),
            None => return false,
        }
        matches!(self.on_close(controller_id), LinkOutcome::Removed { .. })
    }

    /// Close every link and forget every controller.
    pub fn close_all(&mut self) {
        for (_, link) in self.pending.drain().chain(self.links.drain()) {
            link.close();
        }
        self.registry.clear();
    }
}

fn send(link: &dyn Link, message: &HostMessage) {
    let payload = match encode(message) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to encode host message");
            return;
        }
    };
    if let Err(err) = link.send(Bytes::from(payload)) {
        debug!(controller = %link.remote(), error = %err, "host message not delivered");
    }
}
