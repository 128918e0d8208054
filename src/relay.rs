//! Room relay
//!
//! Interprets inbound signaling events for one connection at a time and fans
//! the result out to the other members of the sender's room. Handlers for
//! different connections may run concurrently; all shared state lives in the
//! [`Registry`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::RelayError;
use crate::model::connection::{ConnectionId, SessionState};
use crate::model::message::{ClientEvent, ServerEvent};
use crate::model::propagated::Propagated;
use crate::registry::{Outbox, Registry};

/// Per-connection protocol state, owned by the connection's task.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }
}

#[derive(Debug, Clone)]
pub struct Relay {
    registry: Arc<Registry>,
}

impl Relay {
    pub fn new(registry: Arc<Registry>) -> Relay {
        Relay { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register a freshly handshaken connection.
    pub fn connect(&self, outbox: Outbox) -> Session {
        let id = self.registry.register(outbox);
        debug!("{} registered", id);
        Session {
            id,
            state: SessionState::Unjoined,
        }
    }

    /// Handle one decoded event and fan out whatever it produces.
    ///
    /// Returns the number of connections the resulting event was queued for.
    /// Protocol violations come back as errors for the caller to log; they
    /// never produce outbound traffic.
    pub fn handle(&self, session: &mut Session, event: ClientEvent) -> Result<usize, RelayError> {
        if session.state.is_closed() {
            return Ok(0);
        }

        let propagated = self.dispatch(session, event)?;
        Ok(self.propagate(&propagated))
    }

    /// Tell the sender its frame could not be decoded. The connection stays
    /// open and nothing reaches the room.
    pub fn reject(&self, session: &Session, err: &RelayError) -> bool {
        let notice = ServerEvent::Error {
            message: err.to_string(),
        };
        self.registry.send_to(session.id, &notice)
    }

    /// Move the session to `Closed` and remove it from the registry.
    /// Safe to call more than once.
    pub fn disconnect(&self, session: &mut Session) {
        if session.state.is_closed() {
            return;
        }
        session.state = SessionState::Closed;

        if let Some(departed) = self.registry.unregister(session.id) {
            let lifetime = chrono::Utc::now() - departed.connected_at;
            info!(
                "{} disconnected from room {:?} after {}s",
                session.id,
                departed.room,
                lifetime.num_seconds()
            );
        }
    }

    fn dispatch(
        &self,
        session: &mut Session,
        event: ClientEvent,
    ) -> Result<Propagated, RelayError> {
        match event {
            ClientEvent::Join { room } => Ok(self.handle_join(session, room)),
            ClientEvent::Offer { room, description } => {
                self.handle_signal(session, room, ServerEvent::Offer { description })
            }
            ClientEvent::Answer { room, description } => {
                self.handle_signal(session, room, ServerEvent::Answer { description })
            }
            ClientEvent::Candidate { room, candidate } => {
                self.handle_signal(session, room, ServerEvent::Candidate { candidate })
            }
        }
    }

    fn handle_join(&self, session: &mut Session, room: String) -> Propagated {
        if !self.registry.join(session.id, &room) {
            // Lost a race with our own disconnect.
            return Propagated::Noop;
        }

        if let Some(previous) = session.state().room().filter(|p| *p != room) {
            info!("{} left room {:?}", session.id, previous);
        }
        info!("{} joined room {:?}", session.id, room);
        session.state = SessionState::Joined(room.clone());
        Propagated::Ready(session.id, room)
    }

    fn handle_signal(
        &self,
        session: &Session,
        room: String,
        event: ServerEvent,
    ) -> Result<Propagated, RelayError> {
        match self.registry.room_of(session.id) {
            None => Err(RelayError::NotJoined { room }),
            Some(joined) if joined != room => Err(RelayError::WrongRoom { room, joined }),
            Some(_) => {
                debug!("{} sent {} to room {:?}", session.id, event.name(), room);
                Ok(Propagated::Signal(session.id, room, event))
            }
        }
    }

    /// Sends one propagated event to every other member of its room.
    fn propagate(&self, propagated: &Propagated) -> usize {
        let (Some(origin), Some(room), Some(event)) = (
            propagated.connection_id(),
            propagated.room(),
            propagated.event(),
        ) else {
            return 0;
        };

        // Do not propagate to originating connection.
        let delivered = self.registry.fan_out(room, origin, &event);
        debug!(
            "Forwarded {} from {} to {} member(s) of {:?}",
            event.name(),
            origin,
            delivered,
            room
        );
        delivered
    }
}
