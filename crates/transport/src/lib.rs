//! Couchlink Transport Boundary
//!
//! A minimal peer-to-peer capability: register an identity under a name,
//! open a link to a named peer, and exchange payloads over open links.
//! Session logic never talks to a concrete network; it consumes the
//! [`Transport`] trait and the ordered [`PeerEvent`] stream of its own
//! registration.
//!
//! Ordering contract: events for one link are delivered in the order they
//! happened on that link. Nothing is promised across links.

#![deny(unsafe_code)]

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub use couchlink_wire::PeerId;
pub use memory::{MemoryOptions, MemoryTransport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("identity {0} is already registered")]
    IdTaken(PeerId),
    #[error("peer {0} is unavailable")]
    PeerUnavailable(PeerId),
    #[error("link is not open")]
    NotOpen,
    #[error("peer has been destroyed")]
    Destroyed,
    #[error("transport error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Something that happened on a registered identity.
#[derive(Debug)]
pub enum PeerEvent {
    /// A remote peer started opening a link to us. The link becomes usable
    /// once the matching `Open` arrives.
    Connection { link: Arc<dyn Link> },
    Open { remote: PeerId },
    Data { remote: PeerId, payload: Bytes },
    Close { remote: PeerId },
    Error {
        remote: Option<PeerId>,
        error: TransportError,
    },
}

/// One bidirectional data channel between two peers.
pub trait Link: Send + Sync + std::fmt::Debug {
    fn local(&self) -> &str;
    fn remote(&self) -> &str;
    fn is_open(&self) -> bool;
    fn send(&self, payload: Bytes) -> Result<()>;
    /// Close both ends. Idempotent.
    fn close(&self);
}

/// A live identity on the transport.
pub trait Peer: Send + Sync {
    fn id(&self) -> &str;
    /// Start opening a link to `remote`. Completion is reported as
    /// `PeerEvent::Open` (or `PeerEvent::Error`) on this peer's event stream.
    fn connect(&self, remote: &str) -> Result<Arc<dyn Link>>;
    /// Release the identity and close every link it owns. Idempotent.
    fn destroy(&self);
    fn is_destroyed(&self) -> bool;
}

/// A successful identity registration.
pub struct Registration {
    pub peer: Arc<dyn Peer>,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("peer", &self.peer.id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Register an identity. `None` asks the transport for an ephemeral one.
    /// Resolves once the identity is live.
    async fn register(&self, name: Option<&str>) -> Result<Registration>;
}
