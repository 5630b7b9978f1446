use tether_core::SessionId;

use crate::session::SessionState;

/// Session lifecycle and registry failures.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    /// Registry invariant violation: an id was already present at insert.
    /// Fatal for the handshake attempt; the existing session is never
    /// overwritten.
    #[error("duplicate session: {0}")]
    DuplicateSession(SessionId),

    /// A session id was supplied but no matching session exists.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// Request addressed to a session that has not finished its handshake.
    #[error("session not ready: {0}")]
    NotReady(SessionId),

    /// Request addressed to a session that already closed.
    #[error("session closed: {0}")]
    Closed(SessionId),

    /// Programming-level invariant violation; unreachable in correct
    /// operation.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}
