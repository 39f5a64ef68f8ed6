//! Registry error types.

use wsroom_auth::AuthError;
use wsroom_core::ConnectionId;

/// Errors returned by registry, session and room operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The upgrade could not be completed or the registry is not accepting.
    #[error("upgrade failed: {0}")]
    Upgrade(String),

    /// The presented token was missing or invalid.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A session with this identity already exists.
    #[error("session already exists: {0}")]
    SessionConflict(String),

    /// No session with this identity exists.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// No live connection with this ID exists.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The connection must be in a room for this operation.
    #[error("connection {0} is not in a room")]
    NotInRoom(ConnectionId),

    /// A message could not be queued for a connection.
    #[error("failed to send to {connection_id}: {reason}")]
    SendFailure {
        /// Target connection.
        connection_id: ConnectionId,
        /// Why the send failed.
        reason: String,
    },

    /// No handler is registered for the event.
    #[error("no handler for event: {0}")]
    DispatchMiss(String),

    /// A protected event arrived on a connection without a session.
    #[error("event requires a session: {0}")]
    ProtectedAccessDenied(String),
}

impl HubError {
    /// Short machine-readable kind, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upgrade(_) => "upgrade",
            Self::Auth(_) => "auth",
            Self::SessionConflict(_) => "session_conflict",
            Self::SessionNotFound(_) => "session_not_found",
            Self::ConnectionNotFound(_) => "connection_not_found",
            Self::NotInRoom(_) => "not_in_room",
            Self::SendFailure { .. } => "send_failure",
            Self::DispatchMiss(_) => "dispatch_miss",
            Self::ProtectedAccessDenied(_) => "protected_access_denied",
        }
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, HubError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_failure_display() {
        let err = HubError::SendFailure {
            connection_id: ConnectionId::from("c1"),
            reason: "queue full".into(),
        };
        assert_eq!(err.to_string(), "failed to send to c1: queue full");
        assert_eq!(err.kind(), "send_failure");
    }

    #[test]
    fn auth_error_is_transparent() {
        let err: HubError = AuthError::MissingToken.into();
        assert_eq!(err.to_string(), "missing token");
        assert!(matches!(err, HubError::Auth(AuthError::MissingToken)));
    }

    #[test]
    fn not_in_room_display() {
        let err = HubError::NotInRoom(ConnectionId::from("c9"));
        assert_eq!(err.to_string(), "connection c9 is not in a room");
    }
}
