//! Connection registry
//!
//! The single authority on which connections are alive and which room each
//! one belongs to. Room existence is derived from membership: a room is an
//! entry in the room map with a nonempty member set, created on first join and
//! removed when its last member leaves.
//!
//! All state sits behind one lock. Outbound delivery also happens under that
//! lock, so once [`Registry::unregister`] returns no further event can reach the
//! departed connection's queue.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::{error::TrySendError, Sender};
use tracing::{debug, warn};

use crate::model::connection::{ConnectionId, IdAllocator, Liveness};
use crate::model::message::ServerEvent;

/// Bounded queue feeding one connection's writer.
pub type Outbox = Sender<ServerEvent>;

#[derive(Debug)]
struct Entry {
    outbox: Outbox,
    room: Option<String>,
    liveness: Liveness,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<ConnectionId, Entry>,
    rooms: HashMap<String, BTreeSet<ConnectionId>>,
}

impl Inner {
    fn leave_room(&mut self, id: ConnectionId, room: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
                debug!("Room {:?} is now empty", room);
            }
        }
    }

    fn send(&self, id: ConnectionId, event: &ServerEvent) -> bool {
        let Some(entry) = self.connections.get(&id) else {
            return false;
        };

        // A full queue means the peer is not draining its socket, and its
        // stalled writes will drop it. A closed one means it is already
        // tearing down. Either way the event is skipped.
        match entry.outbox.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("{} outbox full, dropping {}", id, event.name());
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// State discarded by [`Registry::unregister`], returned for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departed {
    pub room: Option<String>,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Registry {
    ids: IdAllocator,
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Record a connection whose handshake just completed. It starts alive
    /// and outside any room.
    pub fn register(&self, outbox: Outbox) -> ConnectionId {
        let id = self.ids.next_id();
        let entry = Entry {
            outbox,
            room: None,
            liveness: Liveness::Alive,
            connected_at: Utc::now(),
        };
        self.inner.lock().connections.insert(id, entry);
        id
    }

    /// Move `id` into `room`, leaving any room it was in before.
    ///
    /// Returns `false` without touching anything if `id` is not registered.
    pub fn join(&self, id: ConnectionId, room: &str) -> bool {
        let mut inner = self.inner.lock();

        let Some(entry) = inner.connections.get_mut(&id) else {
            return false;
        };
        let previous = entry.room.replace(room.to_string());

        if let Some(previous) = previous.filter(|p| p != room) {
            inner.leave_room(id, &previous);
        }

        inner.rooms.entry(room.to_string()).or_default().insert(id);
        true
    }

    /// Members of `room` other than `excluded`, in ascending id order.
    pub fn members_excluding(&self, room: &str, excluded: ConnectionId) -> Vec<ConnectionId> {
        let inner = self.inner.lock();
        inner
            .rooms
            .get(room)
            .map(|members| members.iter().copied().filter(|m| *m != excluded).collect())
            .unwrap_or_default()
    }

    /// Room `id` currently belongs to.
    pub fn room_of(&self, id: ConnectionId) -> Option<String> {
        self.inner
            .lock()
            .connections
            .get(&id)
            .and_then(|entry| entry.room.clone())
    }

    pub fn liveness(&self, id: ConnectionId) -> Option<Liveness> {
        self.inner
            .lock()
            .connections
            .get(&id)
            .map(|entry| entry.liveness)
    }

    pub fn set_liveness(&self, id: ConnectionId, liveness: Liveness) {
        if let Some(entry) = self.inner.lock().connections.get_mut(&id) {
            entry.liveness = liveness;
        }
    }

    /// Queue `event` for a single connection. Returns whether it was queued.
    pub fn send_to(&self, id: ConnectionId, event: &ServerEvent) -> bool {
        self.inner.lock().send(id, event)
    }

    /// Queue `event` for every member of `room` except `excluded`.
    ///
    /// Membership lookup and delivery happen under one lock. Members whose
    /// queue is closed or full are skipped. Returns the number of recipients.
    pub fn fan_out(&self, room: &str, excluded: ConnectionId, event: &ServerEvent) -> usize {
        let inner = self.inner.lock();
        let Some(members) = inner.rooms.get(room) else {
            return 0;
        };

        members
            .iter()
            .filter(|m| **m != excluded)
            .filter(|m| inner.send(**m, event))
            .count()
    }

    /// Forget `id` and drop it from its room. Unknown ids are a no-op.
    pub fn unregister(&self, id: ConnectionId) -> Option<Departed> {
        let mut inner = self.inner.lock();
        let entry = inner.connections.remove(&id)?;

        if let Some(room) = &entry.room {
            inner.leave_room(id, room);
        }

        Some(Departed {
            room: entry.room,
            connected_at: entry.connected_at,
        })
    }

    /// Drop every connection. Their outbound queues close, which tells each
    /// connection task to shut down. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.rooms.clear();
        let dropped = inner.connections.len();
        inner.connections.clear();
        dropped
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }
}
