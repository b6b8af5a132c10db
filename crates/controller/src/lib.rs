//! Couchlink Controller
//!
//! The phone side of a session: join a host by session code, stream input
//! events over the single host link, and capture gestures into events.
//!
//! # Join handshake
//!
//! 1. Register an ephemeral transport identity
//! 2. Open a link to `<prefix>-<code>`
//! 3. Wait for the link to open AND the host's `sync`
//!
//! The whole handshake races a timeout. A `Session full` error from the
//! host, a transport error or the timeout all end the attempt and release
//! the identity. Once joined, a host-side close clears the local session;
//! there is no automatic reconnect.

#![deny(unsafe_code)]

pub mod capture;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use couchlink_transport::{Link, Peer, PeerEvent, Registration, Transport, TransportError};
use couchlink_wire::{
    ControllerMessage, HOST_ID_PREFIX, HostMessage, InputEvent, Millis, PeerId,
    SESSION_FULL_MESSAGE, Session, decode, encode, host_peer_id,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use capture::{ControllerMode, ControllerSettings, GestureCapture};
pub use store::{MemoryStore, PlayerNumberStore};

/// Upper bound on the join handshake.
pub const JOIN_TIMEOUT_MS: Millis = 10_000;

/// Join configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub timeout_ms: Millis,
    /// Must match the host's identity prefix.
    pub id_prefix: String,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            timeout_ms: JOIN_TIMEOUT_MS,
            id_prefix: HOST_ID_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JoinError {
    #[error("session is full")]
    SessionFull,
    #[error("host rejected the controller: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no answer from the host within {0} ms")]
    Timeout(Millis),
    #[error("link closed during the handshake")]
    Closed,
    #[error("already joined; leave first")]
    AlreadyJoined,
}

// ============================================================================
// Controller Client
// ============================================================================

#[derive(Default)]
struct ClientState {
    /// Bumped on every join attempt and every leave.
    epoch: u64,
    joining: bool,
    peer: Option<Arc<dyn Peer>>,
    link: Option<Arc<dyn Link>>,
    listener: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<ClientState>,
    session_tx: watch::Sender<Option<Session>>,
}

impl ClientState {
    fn teardown(&mut self) {
        self.joining = false;
        if let Some(link) = self.link.take() {
            link.close();
        }
        if let Some(peer) = self.peer.take() {
            peer.destroy();
        }
    }
}

impl Shared {
    /// Release everything held for `epoch`. No-op if a newer attempt or a
    /// leave owns the state.
    fn release(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return;
        }
        state.teardown();
        self.session_tx.send_replace(None);
    }
}

/// The controller's end of a session.
#[derive(Clone)]
pub struct ControllerClient {
    transport: Arc<dyn Transport>,
    config: JoinConfig,
    store: Arc<dyn PlayerNumberStore>,
    shared: Arc<Shared>,
}

struct Joined {
    link: Arc<dyn Link>,
    session: Session,
    player_number: u32,
    events: mpsc::UnboundedReceiver<PeerEvent>,
}

impl ControllerClient {
    pub fn new(transport: Arc<dyn Transport>, config: JoinConfig) -> Self {
        Self::with_store(transport, config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(
        transport: Arc<dyn Transport>,
        config: JoinConfig,
        store: Arc<dyn PlayerNumberStore>,
    ) -> Self {
        Self {
            transport,
            config,
            store,
            shared: Arc::new(Shared {
                state: Mutex::new(ClientState::default()),
                session_tx: watch::channel(None).0,
            }),
        }
    }

    pub fn is_host(&self) -> bool {
        false
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Join and report success as a flag. See [`try_join`](Self::try_join).
    pub async fn join_session(&self, code: &str) -> bool {
        match self.try_join(code).await {
            Ok(_) => true,
            Err(err) => {
                warn!(session = %code, error = %err, "join failed");
                false
            }
        }
    }

    /// Join the session `code` and return the assigned player number.
    pub async fn try_join(&self, code: &str) -> Result<u32, JoinError> {
        let epoch = {
            let mut state = self.shared.state.lock();
            if state.joining || state.link.is_some() {
                return Err(JoinError::AlreadyJoined);
            }
            state.epoch += 1;
            state.joining = true;
            state.epoch
        };

        let host_id = host_peer_id(&self.config.id_prefix, code);
        let limit = Duration::from_millis(self.config.timeout_ms);
        let outcome = match tokio::time::timeout(limit, self.handshake(epoch, &host_id)).await {
            Ok(result) => result,
            Err(_) => Err(JoinError::Timeout(self.config.timeout_ms)),
        };

        let joined = match outcome {
            Ok(joined) => joined,
            Err(err) => {
                self.shared.release(epoch);
                return Err(err);
            }
        };

        let Joined {
            link,
            session,
            player_number,
            events,
        } = joined;
        {
            let mut state = self.shared.state.lock();
            if state.epoch != epoch {
                link.close();
                return Err(JoinError::Closed);
            }
            state.joining = false;
            state.link = Some(link);
            self.store.save(player_number);
            self.shared.session_tx.send_replace(Some(session));
            state.listener = Some(tokio::spawn(listen(
                Arc::clone(&self.shared),
                epoch,
                host_id,
                events,
            )));
        }
        info!(session = %code, player_number, "joined session");
        Ok(player_number)
    }

    async fn handshake(&self, epoch: u64, host_id: &str) -> Result<Joined, JoinError> {
        let Registration { peer, mut events } = self.transport.register(None).await?;
        {
            let mut state = self.shared.state.lock();
            if state.epoch != epoch {
                drop(state);
                peer.destroy();
                return Err(JoinError::Closed);
            }
            state.peer = Some(Arc::clone(&peer));
        }
        debug!(controller = %peer.id(), host = %host_id, "connecting to host");
        let link = peer.connect(host_id)?;

        let mut open = false;
        let mut synced = None;
        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::Open { remote } if remote == host_id => open = true,
                PeerEvent::Data { remote, payload } if remote == host_id => {
                    match decode::<HostMessage>(&payload) {
                        Ok(HostMessage::Sync {
                            session,
                            player_number,
                        }) => synced = Some((session, player_number)),
                        Ok(HostMessage::Error { message }) if message == SESSION_FULL_MESSAGE => {
                            return Err(JoinError::SessionFull);
                        }
                        Ok(HostMessage::Error { message }) => {
                            return Err(JoinError::Rejected(message));
                        }
                        Err(err) => debug!(error = %err, "ignoring undecodable host message"),
                    }
                }
                PeerEvent::Close { remote } if remote == host_id => return Err(JoinError::Closed),
                PeerEvent::Error { error, .. } => return Err(JoinError::Transport(error)),
                _ => {}
            }

            if open && let Some((session, player_number)) = synced.take() {
                return Ok(Joined {
                    link,
                    session,
                    player_number,
                    events,
                });
            }
        }
        Err(JoinError::Closed)
    }

    /// Send one input to the host. Dropped (returns false) unless the host
    /// link is open; nothing is queued or retried.
    pub fn send_input(&self, input: InputEvent) -> bool {
        let state = self.shared.state.lock();
        let Some(link) = state.link.as_ref().filter(|l| l.is_open()) else {
            return false;
        };
        let payload = match encode(&ControllerMessage::Input { input }) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode input");
                return false;
            }
        };
        link.send(Bytes::from(payload)).is_ok()
    }

    /// Leave the session and release the transport identity. Idempotent.
    pub fn leave(&self) {
        let mut state = self.shared.state.lock();
        state.epoch += 1;
        if let Some(listener) = state.listener.take() {
            listener.abort();
        }
        state.teardown();
        self.shared.session_tx.send_replace(None);
    }

    /// The host's view of the session as of the last sync.
    pub fn session(&self) -> Option<Session> {
        self.shared.session_tx.borrow().clone()
    }

    pub fn is_joined(&self) -> bool {
        self.shared
            .state
            .lock()
            .link
            .as_ref()
            .is_some_and(|l| l.is_open())
    }

    /// Player number from the last successful join, as persisted.
    pub fn player_number(&self) -> Option<u32> {
        self.store.load()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Option<Session>> {
        self.shared.session_tx.subscribe()
    }
}

/// Follow the host link after a successful join.
async fn listen(
    shared: Arc<Shared>,
    epoch: u64,
    host_id: PeerId,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::Data { remote, payload } if remote == host_id => {
                if let Ok(HostMessage::Sync { session, .. }) = decode::<HostMessage>(&payload) {
                    let state = shared.state.lock();
                    if state.epoch == epoch {
                        shared.session_tx.send_replace(Some(session));
                    }
                }
            }
            PeerEvent::Close { remote } if remote == host_id => {
                info!(host = %host_id, "host closed the link");
                break;
            }
            PeerEvent::Error {
                remote: Some(remote),
                error,
            } if remote == host_id => {
                warn!(host = %host_id, error = %error, "host link failed");
                break;
            }
            _ => {}
        }
    }
    shared.release(epoch);
}

#[cfg(test)]
mod tests {
    use couchlink_transport::{MemoryOptions, MemoryTransport};
    use couchlink_wire::{Button, ControllerEntry};
    use tokio::time::Instant;

    use super::*;

    #[derive(Clone, Copy)]
    enum Reply {
        Sync,
        Full,
        Silent,
    }

    /// Minimal stand-in for a host: answers the first link per `reply` and
    /// forwards inputs it receives.
    async fn fake_host(
        transport: &MemoryTransport,
        code: &str,
        reply: Reply,
    ) -> (Arc<dyn Peer>, mpsc::UnboundedReceiver<InputEvent>) {
        let Registration { peer, mut events } = transport
            .register(Some(&host_peer_id(HOST_ID_PREFIX, code)))
            .await
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let code = code.to_string();
        tokio::spawn(async move {
            let mut links = Vec::new();
            while let Some(event) = events.recv().await {
                match event {
                    PeerEvent::Connection { link } => links.push(link),
                    PeerEvent::Open { remote } => {
                        let Some(link) = links.iter().find(|l| l.remote() == remote) else {
                            continue;
                        };
                        let message = match reply {
                            Reply::Sync => HostMessage::Sync {
                                session: Session {
                                    id: code.clone(),
                                    game_id: "p1".to_string(),
                                    host_id: format!("GH-{code}"),
                                    controllers: vec![ControllerEntry::new(remote.clone(), 3)],
                                    created_at: 0,
                                    max_players: 4,
                                },
                                player_number: 3,
                            },
                            Reply::Full => HostMessage::session_full(),
                            Reply::Silent => continue,
                        };
                        link.send(Bytes::from(encode(&message).unwrap())).unwrap();
                        if let Reply::Full = reply {
                            link.close();
                        }
                    }
                    PeerEvent::Data { payload, .. } => {
                        if let Ok(ControllerMessage::Input { input }) = decode(&payload) {
                            let _ = tx.send(input);
                        }
                    }
                    _ => {}
                }
            }
        });
        (peer, rx)
    }

    fn client(transport: &MemoryTransport) -> ControllerClient {
        ControllerClient::new(Arc::new(transport.clone()), JoinConfig::default())
    }

    #[tokio::test]
    async fn test_join_and_send_input() {
        let transport = MemoryTransport::new();
        let (_host, mut inputs) = fake_host(&transport, "ABC123", Reply::Sync).await;
        let phone = client(&transport);
        assert!(!phone.is_host());

        assert_eq!(phone.try_join("ABC123").await, Ok(3));
        assert!(phone.is_joined());
        assert_eq!(phone.player_number(), Some(3));
        assert_eq!(phone.session().unwrap().id, "ABC123");

        let input = InputEvent::Button {
            button: Button::Start,
            timestamp: 5,
        };
        assert!(phone.send_input(input.clone()));
        assert_eq!(inputs.recv().await, Some(input));

        assert_eq!(phone.try_join("ABC123").await, Err(JoinError::AlreadyJoined));
    }

    #[tokio::test]
    async fn test_session_full_fails_join() {
        let transport = MemoryTransport::new();
        let (_host, _inputs) = fake_host(&transport, "FULL01", Reply::Full).await;
        let phone = client(&transport);

        assert_eq!(phone.try_join("FULL01").await, Err(JoinError::SessionFull));
        assert!(phone.session().is_none());
        assert_eq!(phone.player_number(), None);
        // only the host identity remains registered
        assert_eq!(transport.peer_count(), 1);
    }

    /// An unreachable host resolves to failure once the timeout elapses.
    #[tokio::test(start_paused = true)]
    async fn test_unreachable_host_times_out() {
        let transport = MemoryTransport::new();
        let phone = client(&transport);

        let started = Instant::now();
        assert!(!phone.join_session("NOBODY").await);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(JOIN_TIMEOUT_MS));
        assert!(waited < Duration::from_millis(JOIN_TIMEOUT_MS + 1_000));
        assert_eq!(transport.peer_count(), 0);
    }

    /// A host that opens the link but never syncs is not a join.
    #[tokio::test(start_paused = true)]
    async fn test_open_without_sync_times_out() {
        let transport = MemoryTransport::new();
        let (_host, _inputs) = fake_host(&transport, "QUIET1", Reply::Silent).await;
        let phone = client(&transport);

        assert_eq!(
            phone.try_join("QUIET1").await,
            Err(JoinError::Timeout(JOIN_TIMEOUT_MS))
        );
        assert!(!phone.is_joined());
    }

    #[tokio::test]
    async fn test_transport_error_fails_fast() {
        let transport = MemoryTransport::with_options(MemoryOptions {
            fail_unknown_peers: true,
            ..Default::default()
        });
        let phone = client(&transport);
        assert!(matches!(
            phone.try_join("GONE00").await,
            Err(JoinError::Transport(TransportError::PeerUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_host_close_clears_session() {
        let transport = MemoryTransport::new();
        let (host, _inputs) = fake_host(&transport, "ABC123", Reply::Sync).await;
        let phone = client(&transport);
        phone.try_join("ABC123").await.unwrap();

        let mut session = phone.subscribe_session();
        host.destroy();
        session.wait_for(Option::is_none).await.unwrap();

        assert!(!phone.is_joined());
        assert!(!phone.send_input(InputEvent::Button {
            button: Button::A,
            timestamp: 0
        }));
        // the number survives for the next page load
        assert_eq!(phone.player_number(), Some(3));
    }

    #[tokio::test]
    async fn test_send_before_join_is_dropped() {
        let phone = client(&MemoryTransport::new());
        assert!(!phone.send_input(InputEvent::Joystick {
            x: 0.1,
            y: 0.1,
            timestamp: 0
        }));
    }

    #[tokio::test]
    async fn test_leave_releases_identity() {
        let transport = MemoryTransport::new();
        let (_host, _inputs) = fake_host(&transport, "ABC123", Reply::Sync).await;
        let phone = client(&transport);
        phone.try_join("ABC123").await.unwrap();
        assert_eq!(transport.peer_count(), 2);

        phone.leave();
        phone.leave();
        assert!(!phone.is_joined());
        assert!(phone.session().is_none());
        assert_eq!(transport.peer_count(), 1);

        // a fresh join is allowed after leaving
        assert_eq!(phone.try_join("ABC123").await, Ok(3));
    }

    #[tokio::test]
    async fn test_custom_store_receives_player_number() {
        let transport = MemoryTransport::new();
        let (_host, _inputs) = fake_host(&transport, "ABC123", Reply::Sync).await;
        let store = Arc::new(MemoryStore::new());
        let phone =
            ControllerClient::with_store(Arc::new(transport), JoinConfig::default(), store.clone());
        phone.try_join("ABC123").await.unwrap();
        assert_eq!(store.load(), Some(3));
    }
}
