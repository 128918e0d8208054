//! Signaling events as they travel over the wire.
//!
//! Every WebSocket frame carries one JSON object tagged by `"type"`. Session
//! descriptions and candidates are kept as raw [`Value`]s: the relay forwards
//! them untouched and never looks inside.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Event sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEvent {
    Join { room: String },
    Offer { room: String, description: Value },
    Answer { room: String, description: Value },
    Candidate { room: String, candidate: Value },
}

/// Event sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Another peer joined the room this connection is in.
    Ready,
    Offer { description: Value },
    Answer { description: Value },
    Candidate { candidate: Value },
    /// Sent only to the originator of a frame that could not be decoded.
    Error { message: String },
}

/// The finite set of inbound event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Join,
    Offer,
    Answer,
    Candidate,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Offer => "offer",
            EventKind::Answer => "answer",
            EventKind::Candidate => "candidate",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Join { .. } => EventKind::Join,
            ClientEvent::Offer { .. } => EventKind::Offer,
            ClientEvent::Answer { .. } => EventKind::Answer,
            ClientEvent::Candidate { .. } => EventKind::Candidate,
        }
    }

    /// Room key named by the event.
    pub fn room(&self) -> &str {
        match self {
            ClientEvent::Join { room }
            | ClientEvent::Offer { room, .. }
            | ClientEvent::Answer { room, .. }
            | ClientEvent::Candidate { room, .. } => room,
        }
    }

    /// Decode one text frame. Anything that is not a well-formed event is
    /// rejected here, before it reaches the relay.
    pub fn decode(text: &str) -> Result<ClientEvent, RelayError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a binary frame holding UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<ClientEvent, RelayError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(RelayError::Encode)
    }
}

impl ServerEvent {
    /// Name of the event as the receiving client dispatches on it.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Ready => "ready",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::Candidate { .. } => "candidate",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn decode(text: &str) -> Result<ServerEvent, RelayError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(RelayError::Encode)
    }
}
