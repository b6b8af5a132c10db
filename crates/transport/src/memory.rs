//! In-memory transport.
//!
//! Every [`MemoryTransport`] clone shares one network, so a host and any
//! number of controllers can be wired together inside a single process.
//! Used by tests and by the demo binary.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{Link, Peer, PeerEvent, PeerId, Registration, Result, Transport, TransportError};

/// Behaviour knobs for the in-memory network.
#[derive(Debug, Clone, Default)]
pub struct MemoryOptions {
    /// Delay before a registration resolves.
    pub registration_delay: Duration,
    /// Report connects to unknown identities as `PeerUnavailable`. When
    /// false such links silently never open, like an unreachable
    /// rendezvous.
    pub fail_unknown_peers: bool,
}

#[derive(Default)]
struct Network {
    options: MemoryOptions,
    peers: Mutex<HashMap<PeerId, PeerSlot>>,
}

struct PeerSlot {
    events: mpsc::UnboundedSender<PeerEvent>,
    links: Vec<Weak<MemoryLink>>,
}

impl Network {
    fn deliver(&self, to: &str, event: PeerEvent) -> bool {
        let peers = self.peers.lock();
        match peers.get(to) {
            Some(slot) => slot.events.send(event).is_ok(),
            None => false,
        }
    }
}

/// Shared in-process network.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    network: Arc<Network>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MemoryOptions) -> Self {
        Self {
            network: Arc::new(Network {
                options,
                peers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Whether an identity is currently registered.
    pub fn is_registered(&self, id: &str) -> bool {
        self.network.peers.lock().contains_key(id)
    }

    pub fn peer_count(&self) -> usize {
        self.network.peers.lock().len()
    }
}

fn ephemeral_id() -> PeerId {
    let mut rng = rand::thread_rng();
    format!("{:016x}", rng.r#gen::<u64>())
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn register(&self, name: Option<&str>) -> Result<Registration> {
        if !self.network.options.registration_delay.is_zero() {
            tokio::time::sleep(self.network.options.registration_delay).await;
        }

        let id = name.map(str::to_string).unwrap_or_else(ephemeral_id);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut peers = self.network.peers.lock();
            if peers.contains_key(&id) {
                return Err(TransportError::IdTaken(id));
            }
            peers.insert(
                id.clone(),
                PeerSlot {
                    events: tx,
                    links: Vec::new(),
                },
            );
        }
        debug!(peer = %id, "memory peer registered");

        let peer = MemoryPeer {
            id,
            network: Arc::clone(&self.network),
            destroyed: AtomicBool::new(false),
        };
        Ok(Registration {
            peer: Arc::new(peer),
            events: rx,
        })
    }
}

struct MemoryPeer {
    id: PeerId,
    network: Arc<Network>,
    destroyed: AtomicBool,
}

impl Peer for MemoryPeer {
    fn id(&self) -> &str {
        &self.id
    }

    fn connect(&self, remote: &str) -> Result<Arc<dyn Link>> {
        if self.is_destroyed() {
            return Err(TransportError::Destroyed);
        }

        let state = Arc::new(LinkState::default());
        let outbound = Arc::new(MemoryLink {
            local: self.id.clone(),
            remote: remote.to_string(),
            state: Arc::clone(&state),
            network: Arc::downgrade(&self.network),
        });

        let inbound = {
            let mut peers = self.network.peers.lock();
            if !peers.contains_key(remote) {
                drop(peers);
                if self.network.options.fail_unknown_peers {
                    self.network.deliver(
                        &self.id,
                        PeerEvent::Error {
                            remote: Some(remote.to_string()),
                            error: TransportError::PeerUnavailable(remote.to_string()),
                        },
                    );
                }
                return Ok(outbound);
            }

            let inbound = Arc::new(MemoryLink {
                local: remote.to_string(),
                remote: self.id.clone(),
                state,
                network: Arc::downgrade(&self.network),
            });
            if let Some(slot) = peers.get_mut(&self.id) {
                slot.links.push(Arc::downgrade(&outbound));
            }
            if let Some(slot) = peers.get_mut(remote) {
                slot.links.push(Arc::downgrade(&inbound));
                let _ = slot.events.send(PeerEvent::Connection {
                    link: inbound.clone(),
                });
            }
            inbound
        };

        inbound.state.open.store(true, Ordering::SeqCst);
        self.network.deliver(
            remote,
            PeerEvent::Open {
                remote: self.id.clone(),
            },
        );
        self.network.deliver(
            &self.id,
            PeerEvent::Open {
                remote: remote.to_string(),
            },
        );
        Ok(outbound)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let links: Vec<_> = {
            let mut peers = self.network.peers.lock();
            match peers.remove(&self.id) {
                Some(slot) => slot.links,
                None => Vec::new(),
            }
        };
        for link in links.iter().filter_map(Weak::upgrade) {
            link.close();
        }
        debug!(peer = %self.id, "memory peer destroyed");
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct LinkState {
    open: AtomicBool,
    closed: AtomicBool,
}

/// One end of an in-memory link. Both ends share open/closed state.
#[derive(Debug)]
pub struct MemoryLink {
    local: PeerId,
    remote: PeerId,
    state: Arc<LinkState>,
    network: Weak<Network>,
}

impl Link for MemoryLink {
    fn local(&self) -> &str {
        &self.local
    }

    fn remote(&self) -> &str {
        &self.remote
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst) && !self.state.closed.load(Ordering::SeqCst)
    }

    fn send(&self, payload: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let network = self.network.upgrade().ok_or(TransportError::Destroyed)?;
        let delivered = network.deliver(
            &self.remote,
            PeerEvent::Data {
                remote: self.local.clone(),
                payload,
            },
        );
        if delivered {
            Ok(())
        } else {
            Err(TransportError::PeerUnavailable(self.remote.clone()))
        }
    }

    fn close(&self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let was_open = self.state.open.swap(false, Ordering::SeqCst);
        let Some(network) = self.network.upgrade() else {
            return;
        };
        if !was_open {
            return;
        }
        network.deliver(
            &self.local,
            PeerEvent::Close {
                remote: self.remote.clone(),
            },
        );
        network.deliver(
            &self.remote,
            PeerEvent::Close {
                remote: self.local.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next(reg: &mut Registration) -> PeerEvent {
        reg.events.recv().await.expect("event stream open")
    }

    #[tokio::test]
    async fn test_register_named_and_ephemeral() {
        let transport = MemoryTransport::new();
        let host = transport.register(Some("GH-ABC123")).await.unwrap();
        assert_eq!(host.peer.id(), "GH-ABC123");

        let phone = transport.register(None).await.unwrap();
        assert_eq!(phone.peer.id().len(), 16);
        assert_ne!(phone.peer.id(), host.peer.id());
        assert_eq!(transport.peer_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let transport = MemoryTransport::new();
        let _host = transport.register(Some("GH-ABC123")).await.unwrap();
        let err = transport.register(Some("GH-ABC123")).await.unwrap_err();
        assert_eq!(err, TransportError::IdTaken("GH-ABC123".to_string()));
    }

    #[tokio::test]
    async fn test_connect_delivers_connection_then_open() {
        let transport = MemoryTransport::new();
        let mut host = transport.register(Some("GH-ABC123")).await.unwrap();
        let mut phone = transport.register(Some("phone")).await.unwrap();

        let link = phone.peer.connect("GH-ABC123").unwrap();
        assert!(link.is_open());

        match next(&mut host).await {
            PeerEvent::Connection { link } => assert_eq!(link.remote(), "phone"),
            other => panic!("expected connection, got {other:?}"),
        }
        assert!(matches!(next(&mut host).await, PeerEvent::Open { remote } if remote == "phone"));
        assert!(
            matches!(next(&mut phone).await, PeerEvent::Open { remote } if remote == "GH-ABC123")
        );
    }

    #[tokio::test]
    async fn test_data_is_ordered_within_link() {
        let transport = MemoryTransport::new();
        let mut host = transport.register(Some("host")).await.unwrap();
        let phone = transport.register(Some("phone")).await.unwrap();
        let link = phone.peer.connect("host").unwrap();
        let _ = next(&mut host).await;
        let _ = next(&mut host).await;

        for i in 0..5u8 {
            link.send(Bytes::from(vec![i])).unwrap();
        }
        for i in 0..5u8 {
            match next(&mut host).await {
                PeerEvent::Data { remote, payload } => {
                    assert_eq!(remote, "phone");
                    assert_eq!(payload.as_ref(), &[i]);
                }
                other => panic!("expected data, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_close_notifies_both_ends_once() {
        let transport = MemoryTransport::new();
        let mut host = transport.register(Some("host")).await.unwrap();
        let mut phone = transport.register(Some("phone")).await.unwrap();
        let link = phone.peer.connect("host").unwrap();
        let _ = next(&mut host).await;
        let _ = next(&mut host).await;
        let _ = next(&mut phone).await;

        link.close();
        link.close();
        assert!(!link.is_open());
        assert!(matches!(next(&mut host).await, PeerEvent::Close { remote } if remote == "phone"));
        assert!(matches!(next(&mut phone).await, PeerEvent::Close { remote } if remote == "host"));
        assert!(host.events.try_recv().is_err());
        assert_eq!(link.send(Bytes::from_static(b"late")), Err(TransportError::NotOpen));
    }

    #[tokio::test]
    async fn test_unknown_peer_never_opens_by_default() {
        let transport = MemoryTransport::new();
        let mut phone = transport.register(Some("phone")).await.unwrap();
        let link = phone.peer.connect("GH-NOPE00").unwrap();
        assert!(!link.is_open());
        assert!(phone.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_peer_reported_when_configured() {
        let transport = MemoryTransport::with_options(MemoryOptions {
            fail_unknown_peers: true,
            ..Default::default()
        });
        let mut phone = transport.register(Some("phone")).await.unwrap();
        let _link = phone.peer.connect("GH-NOPE00").unwrap();
        match next(&mut phone).await {
            PeerEvent::Error { remote, error } => {
                assert_eq!(remote.as_deref(), Some("GH-NOPE00"));
                assert_eq!(error, TransportError::PeerUnavailable("GH-NOPE00".to_string()));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_destroy_releases_identity_and_closes_links() {
        let transport = MemoryTransport::new();
        let host = transport.register(Some("host")).await.unwrap();
        let mut phone = transport.register(Some("phone")).await.unwrap();
        let link = phone.peer.connect("host").unwrap();
        let _ = next(&mut phone).await;

        host.peer.destroy();
        assert!(host.peer.is_destroyed());
        assert!(!transport.is_registered("host"));
        assert!(!link.is_open());
        assert!(matches!(next(&mut phone).await, PeerEvent::Close { remote } if remote == "host"));
        assert!(matches!(host.peer.connect("phone"), Err(TransportError::Destroyed)));

        // identity can be registered again once released
        assert!(transport.register(Some("host")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_delay() {
        let transport = MemoryTransport::with_options(MemoryOptions {
            registration_delay: Duration::from_millis(300),
            ..Default::default()
        });
        let start = tokio::time::Instant::now();
        let _reg = transport.register(Some("host")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
