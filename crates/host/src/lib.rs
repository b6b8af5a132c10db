//! Couchlink Host
//!
//! The host side of a phone-as-controller session. It owns:
//! - The session registry (one live session, ordered controller list)
//! - The controller link manager (admission, attribution, cleanup)
//! - The host side of the input relay (in-process broadcast)
//! - The translator driver that turns relayed inputs into key strokes,
//!   dashboard navigation and embedded-surface messages
//!
//! # Lifecycle
//!
//! `create_session` returns the session code immediately and spawns one task
//! that registers the host identity and then pumps the transport's event
//! stream. Every event is applied under a single lock and checked against the
//! session epoch; `end_session` bumps the epoch, so nothing queued for a
//! torn-down session can touch the next one.

#![deny(unsafe_code)]

pub mod driver;
pub mod error;
pub mod links;
pub mod relay;
pub mod session;
pub mod telemetry;
pub mod validation;

use std::sync::Arc;

use couchlink_transport::{Peer, PeerEvent, Registration, Transport, TransportError};
use couchlink_wire::{
    ControllerEntry, ControllerInput, HOST_ID_PREFIX, PeerId, Session, SessionCode,
    controller_url, host_peer_id, now_millis,
};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use error::{HostError, Result};
use links::LinkManager;
use relay::InputBus;
use session::SessionRegistry;

// ============================================================================
// Parameters
// ============================================================================

/// Default session capacity.
pub const DEFAULT_MAX_PLAYERS: usize = 4;

/// Default session code length.
pub const DEFAULT_CODE_LENGTH: usize = 6;

const CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub max_players: usize,
    pub code_length: usize,
    /// Prefix of the host transport identity (`<prefix>-<code>`).
    pub id_prefix: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_players: DEFAULT_MAX_PLAYERS,
            code_length: DEFAULT_CODE_LENGTH,
            id_prefix: HOST_ID_PREFIX.to_string(),
        }
    }
}

/// Random uppercase base-36 session code.
pub fn generate_code(len: usize) -> SessionCode {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

// ============================================================================
// Session Status
// ============================================================================

/// Observable state of the host's session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Idle,
    /// Code handed out, host identity not yet live.
    Pending { code: SessionCode },
    Live(Session),
    /// The host identity could not be registered. The session never becomes
    /// available; end it and create a new one.
    Failed {
        code: SessionCode,
        reason: TransportError,
    },
}

impl SessionStatus {
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Pending { code } | Self::Failed { code, .. } => Some(code),
            Self::Live(session) => Some(&session.id),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Live(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

// ============================================================================
// Session Host
// ============================================================================

#[derive(Default)]
struct HostState {
    /// Bumped whenever a session starts or ends.
    epoch: u64,
    code: Option<SessionCode>,
    task: Option<JoinHandle<()>>,
    peer: Option<Arc<dyn Peer>>,
    links: Option<LinkManager>,
}

struct Shared {
    state: Mutex<HostState>,
    status_tx: watch::Sender<SessionStatus>,
    controllers_tx: watch::Sender<Vec<ControllerEntry>>,
    inputs: InputBus,
}

impl Shared {
    /// Apply one transport event. Returns false once the epoch is stale.
    fn apply_event(&self, epoch: u64, event: PeerEvent) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        let Some(links) = state.links.as_mut() else {
            return false;
        };
        if links.handle(event).changes_controllers() {
            self.publish(links.registry());
        }
        true
    }

    fn publish(&self, registry: &SessionRegistry) {
        self.controllers_tx
            .send_replace(registry.controllers().to_vec());
        self.status_tx
            .send_replace(SessionStatus::Live(registry.session().clone()));
    }
}

/// Handle to the host side of a session. Cheap to clone; all clones drive
/// the same session.
#[derive(Clone)]
pub struct SessionHost {
    transport: Arc<dyn Transport>,
    config: HostConfig,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHost")
            .field("config", &self.config)
            .field("status", &*self.shared.status_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionHost {
    pub fn new(transport: Arc<dyn Transport>, config: HostConfig) -> Self {
        Self {
            transport,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(HostState::default()),
                status_tx: watch::channel(SessionStatus::Idle).0,
                controllers_tx: watch::channel(Vec::new()).0,
                inputs: InputBus::new(),
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn is_host(&self) -> bool {
        true
    }

    /// Start a session and return its code. The session becomes available
    /// once the transport confirms the host identity; watch
    /// [`subscribe_status`](Self::subscribe_status) for `Live`.
    pub fn create_session(
        &self,
        game_id: &str,
        max_players: Option<usize>,
    ) -> Result<SessionCode> {
        let code = generate_code(self.config.code_length);
        self.start(code, game_id, max_players)
    }

    fn start(
        &self,
        code: SessionCode,
        game_id: &str,
        max_players: Option<usize>,
    ) -> Result<SessionCode> {
        let runtime = Handle::try_current().map_err(|_| HostError::NoRuntime)?;
        let mut state = self.shared.state.lock();
        if state.code.is_some() {
            return Err(HostError::SessionActive);
        }

        state.epoch += 1;
        state.code = Some(code.clone());
        self.shared
            .status_tx
            .send_replace(SessionStatus::Pending { code: code.clone() });

        let plan = SessionPlan {
            epoch: state.epoch,
            host_id: host_peer_id(&self.config.id_prefix, &code),
            code: code.clone(),
            game_id: game_id.to_string(),
            max_players: max_players.unwrap_or(self.config.max_players),
        };
        info!(
            session = %code,
            game = %plan.game_id,
            max_players = plan.max_players,
            "session requested"
        );
        state.task = Some(runtime.spawn(run_session(
            Arc::clone(&self.shared),
            Arc::clone(&self.transport),
            plan,
        )));
        Ok(code)
    }

    /// Tear down the session: release the host identity and every link, and
    /// forget all controllers. Idempotent.
    pub fn end_session(&self) {
        let mut state = self.shared.state.lock();
        let Some(code) = state.code.take() else {
            return;
        };
        state.epoch += 1;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        if let Some(mut links) = state.links.take() {
            links.close_all();
        }
        if let Some(peer) = state.peer.take() {
            peer.destroy();
        }
        self.shared.controllers_tx.send_replace(Vec::new());
        self.shared.status_tx.send_replace(SessionStatus::Idle);
        info!(session = %code, "session ended");
    }

    /// Close one controller's link and remove it from the session.
    pub fn disconnect_controller(&self, controller_id: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        let links = state.links.as_mut().ok_or(HostError::NoSession)?;
        if !links.disconnect(controller_id) {
            return Err(HostError::UnknownController(controller_id.to_string()));
        }
        self.shared.publish(links.registry());
        Ok(())
    }

    /// Snapshot of the live session, if any.
    pub fn session(&self) -> Option<Session> {
        let state = self.shared.state.lock();
        state
            .links
            .as_ref()
            .map(|links| links.registry().session().clone())
    }

    pub fn controllers(&self) -> Vec<ControllerEntry> {
        self.shared.controllers_tx.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn subscribe_controllers(&self) -> watch::Receiver<Vec<ControllerEntry>> {
        self.shared.controllers_tx.subscribe()
    }

    pub fn subscribe_inputs(&self) -> broadcast::Receiver<ControllerInput> {
        self.shared.inputs.subscribe()
    }

    /// Join URL for the current session.
    pub fn controller_url(&self, origin: &str) -> Option<String> {
        let state = self.shared.state.lock();
        state.code.as_deref().map(|code| controller_url(origin, code))
    }
}

struct SessionPlan {
    epoch: u64,
    code: SessionCode,
    host_id: PeerId,
    game_id: String,
    max_players: usize,
}

async fn run_session(shared: Arc<Shared>, transport: Arc<dyn Transport>, plan: SessionPlan) {
    let Registration { peer, mut events } = match transport.register(Some(&plan.host_id)).await
    {
        Ok(registration) => registration,
        Err(err) => {
            warn!(session = %plan.code, error = %err, "host identity registration failed");
            let state = shared.state.lock();
            if state.epoch == plan.epoch {
                shared.status_tx.send_replace(SessionStatus::Failed {
                    code: plan.code,
                    reason: err,
                });
            }
            return;
        }
    };

    {
        let mut state = shared.state.lock();
        if state.epoch != plan.epoch {
            drop(state);
            peer.destroy();
            return;
        }
        let registry = SessionRegistry::new(
            plan.code.clone(),
            plan.game_id,
            plan.host_id,
            plan.max_players,
            now_millis(),
        );
        let links = LinkManager::new(registry, shared.inputs.clone());
        shared.publish(links.registry());
        state.links = Some(links);
        state.peer = Some(peer);
        info!(session = %plan.code, "session live");
    }

    while let Some(event) = events.recv().await {
        if !shared.apply_event(plan.epoch, event) {
            break;
        }
    }
}
