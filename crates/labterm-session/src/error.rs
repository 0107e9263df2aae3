use thiserror::Error;

use crate::session::{SessionId, SurfaceId};

/// Errors surfaced by the registry and the orchestrator.
///
/// Driver failures never appear here; they travel over the bridge as
/// `error`/`exit` events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("surface {surface} does not own session {id}")]
    NotOwner { id: SessionId, surface: SurfaceId },
    #[error("surface {0} is not registered")]
    SurfaceNotFound(SurfaceId),
    #[error("failed to open detached window: {0}")]
    WindowOpen(String),
    #[error("operation cancelled")]
    Cancelled,
}

pub type SessionResult<T> = Result<T, SessionError>;
