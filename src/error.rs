//! Error types for the relay.

use thiserror::Error;

/// Errors raised while serving signaling connections.
///
/// None of these is fatal to the process. Each one is contained to the
/// connection that produced it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound frame was not a well-formed event.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Outbound event could not be serialised.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Signaling message from a connection that has not joined any room.
    #[error("not joined to any room (message addressed to {room:?})")]
    NotJoined { room: String },

    /// Signaling message addressed to a room the sender is not a member of.
    #[error("not a member of room {room:?} (joined {joined:?})")]
    WrongRoom { room: String, joined: String },

    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer stopped draining its socket.
    #[error("stopped reading, write did not complete within {0:?}")]
    Stalled(std::time::Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The health-check HTTP server could not be started.
    #[error("health server failed to start: {0}")]
    Health(String),
}

impl RelayError {
    /// Protocol violations are expected races and only ever logged.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            RelayError::NotJoined { .. } | RelayError::WrongRoom { .. }
        )
    }
}
