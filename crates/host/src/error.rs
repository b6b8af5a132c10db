use couchlink_transport::PeerId;
use thiserror::Error;

/// Errors from host operations. Transport failures while a session starts
/// surface through `SessionStatus::Failed`, not here.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("a session is already active; end it first")]
    SessionActive,
    #[error("no tokio runtime available to drive the session")]
    NoRuntime,
    #[error("no live session")]
    NoSession,
    #[error("unknown controller: {0}")]
    UnknownController(PeerId),
}

pub type Result<T> = std::result::Result<T, HostError>;
