use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::error::RelayError;
use super::events::{ClientFrame, Event, MAX_CHAT_LENGTH, MAX_NICKNAME_LENGTH};
use super::rate_limiter::RateLimiter;
use super::room::RoomState;
use super::session::{Outbound, Session, SessionId};

/// The central hub that owns all relay state: connected sessions, rooms, and
/// the per-address chat budget. Handlers receive it by `Arc` rather than
/// reaching for ambient globals, so tests construct isolated instances.
///
/// All mutations happen while holding a single map entry guard, so each
/// handler observes a consistent snapshot without further locking.
pub struct RelayEngine {
    /// All currently connected sessions, keyed by session ID.
    sessions: DashMap<SessionId, Arc<Session>>,
    /// All rooms ever referenced, keyed by room key. Created lazily through
    /// `with_room`, the only creation path; never destroyed before shutdown.
    rooms: DashMap<String, RoomState>,
    /// Per-address chat message limiter.
    limiter: RateLimiter,
    /// Bound on each room's retained history.
    history_max: usize,
}

impl RelayEngine {
    pub fn new(history_max: usize, rate_max_events: u32, rate_window: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: DashMap::new(),
            limiter: RateLimiter::new(rate_max_events, rate_window),
            history_max,
        }
    }

    // ── Session lifecycle ───────────────────────────────────────────

    /// Register an authorized connection. The room key was resolved by the
    /// caller and is fixed for the connection's lifetime. The room's current
    /// roster is queued to this connection immediately so the client can
    /// render membership before joining.
    pub fn connect(
        &self,
        room_key: String,
        addr_key: String,
    ) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (session, rx) = Session::new(room_key, addr_key);
        let session = Arc::new(session);

        let roster = self.with_room(&session.room_key, |room| Event::roster(room.roster()));
        session.send_frame(serialize(&roster));

        self.sessions.insert(session.id, session.clone());
        info!(session = %session.id, room = %session.room_key, "session connected");

        (session, rx)
    }

    /// Tear down a connection. Only state the handshake actually committed is
    /// cleaned up: a session that never completed hello leaves no trace.
    pub fn disconnect(&self, session_id: SessionId) {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return;
        };

        let Some(name) = session.nickname() else {
            info!(session = %session.id, "session disconnected before joining");
            return;
        };

        let (left, roster) = self.with_room(&session.room_key, |room| {
            room.names.remove(name);
            let left = Event::system(format!("{name} left"));
            room.push_history(left.clone(), self.history_max);
            (left, Event::roster(room.roster()))
        });

        self.broadcast(&session.room_key, &left);
        self.broadcast(&session.room_key, &roster);

        info!(session = %session.id, nickname = %name, room = %session.room_key, "session disconnected");
    }

    // ── Inbound dispatch ────────────────────────────────────────────

    /// Parse and dispatch one inbound text frame. Every error here means the
    /// frame was dropped; the connection stays open and nothing is sent back.
    pub fn handle_frame(&self, session: &Arc<Session>, text: &str) -> Result<(), RelayError> {
        match serde_json::from_str::<ClientFrame>(text)? {
            ClientFrame::Hello { nickname } => {
                self.handle_hello(session, nickname);
                Ok(())
            }
            ClientFrame::Chat { text } => self.handle_chat(session, &text),
        }
    }

    /// The join handshake. A second hello on an already-joined session is a
    /// no-op, not an error.
    fn handle_hello(&self, session: &Arc<Session>, desired: String) {
        if session.is_joined() {
            debug!(session = %session.id, "ignoring redundant hello");
            return;
        }

        let mut name: String = desired.trim().chars().take(MAX_NICKNAME_LENGTH).collect();
        if name.is_empty() {
            name = format!("user-{}", session.short_tag());
        }

        let tag = session.short_tag();
        let (replay, joined, roster) = self.with_room(&session.room_key, |room| {
            // Appending the session's own tag cannot collide with itself, so
            // this always terminates.
            while room.names.contains(&name) {
                name = format!("{name}-{tag}");
            }
            session.claim_nickname(name.clone());
            room.names.insert(name.clone());

            // Snapshot history before the join notice so the replay matches
            // what earlier members saw, in original order.
            let replay: Vec<Arc<str>> = room.history().map(serialize).collect();

            let joined = Event::system(format!("{name} joined"));
            room.push_history(joined.clone(), self.history_max);

            (replay, joined, Event::roster(room.roster()))
        });

        for frame in replay {
            session.send_frame(frame);
        }
        self.broadcast(&session.room_key, &joined);
        self.broadcast(&session.room_key, &roster);

        info!(session = %session.id, nickname = %name, room = %session.room_key, "joined");
    }

    /// A chat message from a joined session. The rate-limit consult is the
    /// one suspension point in this path; denial drops the message silently.
    fn handle_chat(&self, session: &Arc<Session>, text: &str) -> Result<(), RelayError> {
        let Some(name) = session.nickname() else {
            return Err(RelayError::NotJoined);
        };

        self.limiter.consume(&session.addr_key)?;

        let text: String = text.trim().chars().take(MAX_CHAT_LENGTH).collect();
        if text.is_empty() {
            // Dropped with no acknowledgment, matching the protocol.
            return Ok(());
        }

        let event = Event::chat(name, text);
        self.with_room(&session.room_key, |room| {
            room.push_history(event.clone(), self.history_max);
        });
        self.broadcast(&session.room_key, &event);

        Ok(())
    }

    // ── Broadcast ───────────────────────────────────────────────────

    /// Serialize once and deliver to every joined session in the room.
    /// Fire-and-forget: a slow or half-closed recipient never affects the
    /// others or the triggering handler.
    pub fn broadcast(&self, room_key: &str, event: &Event) {
        let frame = serialize(event);
        for entry in self.sessions.iter() {
            let session = entry.value();
            if session.room_key == room_key
                && session.is_joined()
                && !session.send_frame(frame.clone())
            {
                debug!(session = %session.id, "dropped frame for slow or closed session");
            }
        }
    }

    // ── Liveness ────────────────────────────────────────────────────

    /// One probe cycle: terminate every connection that failed to answer the
    /// previous probe, clear the flag on the rest and probe them again.
    /// Termination goes through the session's cancel token, so cleanup runs
    /// on the ordinary close path.
    pub fn sweep_liveness(&self) {
        for entry in self.sessions.iter() {
            let session = entry.value();
            if !session.take_alive() {
                info!(session = %session.id, "terminating unresponsive connection");
                session.cancel.cancel();
            } else {
                session.send_ping();
            }
        }
    }

    /// Evict rate-limiter entries idle longer than `older_than`.
    pub fn cleanup_rate_budgets(&self, older_than: Duration) {
        self.limiter.cleanup(older_than);
    }

    // ── Introspection ───────────────────────────────────────────────

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    // ── Internal ────────────────────────────────────────────────────

    /// Run `f` against the room for `key`, creating the room on first
    /// reference. This is the only path that creates rooms; the returned
    /// entry guard is held exactly for the duration of `f`.
    fn with_room<T>(&self, key: &str, f: impl FnOnce(&mut RoomState) -> T) -> T {
        let mut room = self.rooms.entry(key.to_string()).or_default();
        f(&mut room)
    }
}

fn serialize(event: &Event) -> Arc<str> {
    Arc::from(serde_json::to_string(event).expect("event is serializable").as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    fn setup_engine() -> RelayEngine {
        RelayEngine::new(200, 10, Duration::from_secs(3))
    }

    /// Connect and complete the hello handshake in one step.
    fn join(
        engine: &RelayEngine,
        room: &str,
        nick: &str,
    ) -> (Arc<Session>, Receiver<Outbound>) {
        let (session, rx) = engine.connect(room.to_string(), "1.2.3.4".to_string());
        engine
            .handle_frame(&session, &format!(r#"{{"type":"hello","nickname":"{nick}"}}"#))
            .unwrap();
        (session, rx)
    }

    fn drain(rx: &mut Receiver<Outbound>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(out) = rx.try_recv() {
            if let Outbound::Frame(frame) = out {
                frames.push(serde_json::from_str(&frame).unwrap());
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_connect_queues_roster_snapshot() {
        let engine = setup_engine();
        let (_a, _rx_a) = join(&engine, "code:abc", "alice");

        let (_session, mut rx) = engine.connect("code:abc".into(), "5.6.7.8".into());
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "roster");
        assert_eq!(frames[0]["members"], serde_json::json!(["alice"]));
    }

    #[tokio::test]
    async fn test_nickname_collision_gets_suffix() {
        let engine = setup_engine();
        let (a, _rx_a) = join(&engine, "code:abc", "alice");
        let (b, _rx_b) = join(&engine, "code:abc", "alice");

        assert_eq!(a.nickname(), Some("alice"));
        let renamed = b.nickname().unwrap();
        assert_ne!(renamed, "alice");
        assert!(renamed.starts_with("alice-"));
    }

    #[tokio::test]
    async fn test_empty_nickname_gets_placeholder() {
        let engine = setup_engine();
        let (session, _rx) = join(&engine, "code:abc", "   ");
        let name = session.nickname().unwrap();
        assert_eq!(name, &format!("user-{}", session.short_tag()));
    }

    #[tokio::test]
    async fn test_redundant_hello_is_noop() {
        let engine = setup_engine();
        let (session, mut rx) = join(&engine, "code:abc", "alice");
        drain(&mut rx);

        engine
            .handle_frame(&session, r#"{"type":"hello","nickname":"eve"}"#)
            .unwrap();
        assert_eq!(session.nickname(), Some("alice"));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_chat_before_hello_rejected() {
        let engine = setup_engine();
        let (session, _rx) = engine.connect("code:abc".into(), "1.2.3.4".into());
        let err = engine
            .handle_frame(&session, r#"{"type":"chat","text":"hi"}"#)
            .unwrap_err();
        assert!(matches!(err, RelayError::NotJoined));
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_rejected() {
        let engine = setup_engine();
        let (session, mut rx) = join(&engine, "code:abc", "alice");
        drain(&mut rx);

        assert!(engine.handle_frame(&session, "not json").is_err());
        assert!(engine
            .handle_frame(&session, r#"{"type":"kick","who":"bob"}"#)
            .is_err());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_chat_trimmed_to_empty_is_dropped() {
        let engine = setup_engine();
        let (a, _rx_a) = join(&engine, "code:abc", "alice");
        let (_b, mut rx_b) = join(&engine, "code:abc", "bob");
        drain(&mut rx_b);

        engine
            .handle_frame(&a, r#"{"type":"chat","text":"   "}"#)
            .unwrap();
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_chat_broadcast_includes_sender() {
        let engine = setup_engine();
        let (a, mut rx_a) = join(&engine, "code:abc", "alice");
        drain(&mut rx_a);

        engine
            .handle_frame(&a, r#"{"type":"chat","text":" hello "}"#)
            .unwrap();
        let frames = drain(&mut rx_a);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "chat");
        assert_eq!(frames[0]["from"], "alice");
        assert_eq!(frames[0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_unjoined_sessions_receive_no_broadcasts() {
        let engine = setup_engine();
        let (a, _rx_a) = join(&engine, "code:abc", "alice");
        let (_idle, mut rx_idle) = engine.connect("code:abc".into(), "5.6.7.8".into());
        drain(&mut rx_idle); // the connect-time roster snapshot

        engine
            .handle_frame(&a, r#"{"type":"chat","text":"hi"}"#)
            .unwrap();
        assert!(drain(&mut rx_idle).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_terminates_silent_connection() {
        let engine = setup_engine();
        let (session, _rx) = join(&engine, "code:abc", "alice");

        // First sweep clears the flag and probes; second finds it unanswered.
        engine.sweep_liveness();
        assert!(!session.cancel.is_cancelled());
        engine.sweep_liveness();
        assert!(session.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_sweep_spares_responsive_connection() {
        let engine = setup_engine();
        let (session, _rx) = join(&engine, "code:abc", "alice");

        engine.sweep_liveness();
        session.mark_alive(); // the pong arrived
        engine.sweep_liveness();
        assert!(!session.cancel.is_cancelled());
    }
}
