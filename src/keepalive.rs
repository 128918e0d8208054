//! Keepalive probing for idle connections.
//!
//! [`Keepalive`] is a small state machine driven purely by [`Instant`]s. The
//! connection task polls it until it returns a deadline, waits for either
//! traffic or that deadline, and polls again.

use std::time::{Duration, Instant};

use crate::model::connection::Liveness;

/// What the connection task should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to do before this instant.
    Wait(Instant),
    /// Send a ping now. The timeout window starts running.
    SendPing,
    /// The outstanding ping went unanswered. Drop the connection.
    Expired,
}

#[derive(Debug, Clone)]
pub struct Keepalive {
    interval: Duration,
    timeout: Duration,
    last_seen: Instant,
    ping_sent: Option<Instant>,
}

impl Keepalive {
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Keepalive {
        Keepalive {
            interval,
            timeout,
            last_seen: now,
            ping_sent: None,
        }
    }

    /// Any inbound frame, pong or otherwise, proves the peer is alive.
    pub fn observe(&mut self, now: Instant) {
        self.last_seen = now;
        self.ping_sent = None;
    }

    pub fn poll(&mut self, now: Instant) -> Step {
        match self.ping_sent {
            Some(sent) => {
                let deadline = sent + self.timeout;
                if now >= deadline {
                    Step::Expired
                } else {
                    Step::Wait(deadline)
                }
            }
            None => {
                let due = self.last_seen + self.interval;
                if now >= due {
                    self.ping_sent = Some(now);
                    Step::SendPing
                } else {
                    Step::Wait(due)
                }
            }
        }
    }

    /// Window a peer has to answer, also the longest a write may block.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn liveness(&self) -> Liveness {
        if self.ping_sent.is_some() {
            Liveness::PendingTimeout
        } else {
            Liveness::Alive
        }
    }
}
