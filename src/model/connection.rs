use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier assigned to a connection when its handshake completes.
///
/// Identifiers are never reused within one registry, so a late operation
/// carrying the id of a closed connection can never hit a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> ConnectionId {
        ConnectionId(raw)
    }
}

impl Deref for ConnectionId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection({})", self.0)
    }
}

/// Monotonic source of [`ConnectionId`]s, owned by one registry.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Liveness of a registered connection as seen by the keepalive.
///
/// A closed connection has no liveness: it is simply absent from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Traffic was observed recently, or the last ping was answered.
    Alive,
    /// A ping is outstanding and the timeout window is running.
    PendingTimeout,
}

/// Protocol state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake done, no join received yet.
    Unjoined,
    /// Member of the given room.
    Joined(String),
    /// Terminal. No further transitions.
    Closed,
}

impl SessionState {
    pub fn room(&self) -> Option<&str> {
        match self {
            SessionState::Joined(room) => Some(room),
            SessionState::Unjoined | SessionState::Closed => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}
