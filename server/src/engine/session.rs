use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a connected session (one per connection).
pub type SessionId = Uuid;

/// Maximum queued outbound frames per session (prevents memory exhaustion
/// from slow clients; a full queue drops the frame rather than blocking).
pub const MAX_OUTBOUND_QUEUE: usize = 1024;

/// What the connection's write loop receives from the engine.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A pre-serialized event frame, shared across all recipients of a broadcast.
    Frame(Arc<str>),
    /// Transport-level liveness probe.
    Ping,
}

/// Per-connection state. The connection task owns its `Session`; rooms hold
/// only the claimed display name, never a reference back to the session.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Room this connection was resolved into. Fixed for the connection's lifetime.
    pub room_key: String,
    /// Best-effort client address; the rate-limit key.
    pub addr_key: String,
    /// Display name, claimed exactly once by the hello handshake.
    nickname: OnceLock<String>,
    /// Heartbeat flag: cleared by each probe, set again by the client's pong.
    alive: AtomicBool,
    /// Cancelled by the liveness monitor to force-terminate the connection.
    pub cancel: CancellationToken,
    outbound: mpsc::Sender<Outbound>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(room_key: String, addr_key: String) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(MAX_OUTBOUND_QUEUE);
        let session = Self {
            id: Uuid::new_v4(),
            room_key,
            addr_key,
            nickname: OnceLock::new(),
            alive: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            outbound: tx,
            connected_at: Utc::now(),
        };
        (session, rx)
    }

    /// The claimed display name, if the handshake has completed.
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.get().map(String::as_str)
    }

    /// A session is joined once its name is claimed.
    pub fn is_joined(&self) -> bool {
        self.nickname.get().is_some()
    }

    /// Record the display name. Returns false if one was already claimed
    /// (identity is settable exactly once).
    pub(crate) fn claim_nickname(&self, name: String) -> bool {
        self.nickname.set(name).is_ok()
    }

    /// Queue a frame for delivery. Returns false if the connection is closed
    /// or the queue is full; the frame is dropped either way.
    pub fn send_frame(&self, frame: Arc<str>) -> bool {
        self.outbound.try_send(Outbound::Frame(frame)).is_ok()
    }

    /// Queue a liveness probe.
    pub fn send_ping(&self) -> bool {
        self.outbound.try_send(Outbound::Ping).is_ok()
    }

    /// Called when the client answers a probe (or on connect).
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clear the liveness flag, returning whether it was set. Used by the
    /// monitor: a false return means the previous probe went unanswered.
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Short hex tag for generated names and collision suffixes.
    pub fn short_tag(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Session, mpsc::Receiver<Outbound>) {
        Session::new("code:test".into(), "1.2.3.4".into())
    }

    #[test]
    fn test_nickname_settable_exactly_once() {
        let (session, _rx) = session();
        assert!(!session.is_joined());
        assert!(session.claim_nickname("alice".into()));
        assert!(!session.claim_nickname("bob".into()));
        assert_eq!(session.nickname(), Some("alice"));
    }

    #[test]
    fn test_liveness_flag_round_trip() {
        let (session, _rx) = session();
        // Starts alive; the first sweep clears it
        assert!(session.take_alive());
        assert!(!session.take_alive());
        session.mark_alive();
        assert!(session.take_alive());
    }

    #[test]
    fn test_send_after_receiver_dropped_is_false() {
        let (session, rx) = session();
        drop(rx);
        assert!(!session.send_frame(Arc::from("{}")));
        assert!(!session.send_ping());
    }

    #[test]
    fn test_short_tag_is_stable() {
        let (session, _rx) = session();
        assert_eq!(session.short_tag().len(), 8);
        assert_eq!(session.short_tag(), session.short_tag());
    }
}
