//! Outcome of handling one inbound event.
//!
//! The relay turns each event into a `Propagated`, which is then fanned out
//! to every member of the room except the originating connection.

use crate::model::{connection::ConnectionId, message::ServerEvent};

/// Events propagated from one connection to the rest of its room.
#[derive(Debug, Clone, PartialEq)]
pub enum Propagated {
    /// When we have nothing to propagate.
    Noop,

    /// A new peer joined the room. Existing members are told so they can
    /// start the handshake toward it.
    Ready(ConnectionId, String),

    /// A signaling message to forward unmodified.
    Signal(ConnectionId, String, ServerEvent),
}

impl Propagated {
    /// Extracts the originating connection, if present.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        match self {
            Propagated::Ready(c, _) | Propagated::Signal(c, _, _) => Some(*c),
            Propagated::Noop => None,
        }
    }

    /// Room the event is scoped to.
    pub fn room(&self) -> Option<&str> {
        match self {
            Propagated::Ready(_, room) | Propagated::Signal(_, room, _) => Some(room),
            Propagated::Noop => None,
        }
    }

    /// The event each recipient receives.
    pub fn event(&self) -> Option<ServerEvent> {
        match self {
            Propagated::Ready(_, _) => Some(ServerEvent::Ready),
            Propagated::Signal(_, _, event) => Some(event.clone()),
            Propagated::Noop => None,
        }
    }
}
