use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

use super::events::Event;

/// In-memory state for a single room: the claimed display names and a
/// bounded ring of past events. Rooms are created lazily on first reference
/// and live until process shutdown.
#[derive(Debug)]
pub struct RoomState {
    /// Display names currently claimed in this room (unique within the room).
    pub names: HashSet<String>,
    /// Retained events, oldest first. Never exceeds the configured bound.
    history: VecDeque<Event>,
    pub created_at: DateTime<Utc>,
}

impl RoomState {
    pub fn new() -> Self {
        Self {
            names: HashSet::new(),
            history: VecDeque::new(),
            created_at: Utc::now(),
        }
    }

    /// Append an event, evicting the oldest entries past `max` (strict FIFO).
    pub fn push_history(&mut self, event: Event, max: usize) {
        self.history.push_back(event);
        while self.history.len() > max {
            self.history.pop_front();
        }
    }

    /// Retained events in original order.
    pub fn history(&self) -> impl Iterator<Item = &Event> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Sorted roster of claimed names.
    pub fn roster(&self) -> Vec<String> {
        let mut members: Vec<String> = self.names.iter().cloned().collect();
        members.sort();
        members
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_bound_is_strict_fifo() {
        let mut room = RoomState::new();
        for i in 0..205 {
            room.push_history(Event::system(format!("event {i}")), 200);
        }
        assert_eq!(room.history_len(), 200);

        // Oldest five were evicted; order of the rest is preserved
        let texts: Vec<&str> = room
            .history()
            .map(|e| match e {
                Event::System { text, .. } => text.as_str(),
                _ => panic!("expected system event"),
            })
            .collect();
        assert_eq!(texts[0], "event 5");
        assert_eq!(texts[199], "event 204");
    }

    #[test]
    fn test_history_under_bound_keeps_everything() {
        let mut room = RoomState::new();
        for i in 0..10 {
            room.push_history(Event::system(format!("event {i}")), 200);
        }
        assert_eq!(room.history_len(), 10);
        let texts: Vec<String> = room
            .history()
            .map(|e| match e {
                Event::System { text, .. } => text.clone(),
                _ => panic!("expected system event"),
            })
            .collect();
        assert_eq!(texts[0], "event 0");
        assert_eq!(texts[9], "event 9");
    }

    #[test]
    fn test_roster_sorted() {
        let mut room = RoomState::new();
        room.names.insert("carol".into());
        room.names.insert("alice".into());
        room.names.insert("bob".into());
        assert_eq!(room.roster(), vec!["alice", "bob", "carol"]);
    }
}
