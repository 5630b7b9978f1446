use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One replayable entry in a session's event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: u64,
    pub payload: Value,
}

/// Append-only, bounded event buffer for one session.
///
/// Ids start at 1, increase strictly, and are never reused: eviction drops
/// old entries but never rewinds the counter, so a reconnecting client's
/// last-seen id stays meaningful for the lifetime of the session.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<EventEnvelope>,
    next_id: u64,
    max_events: usize,
}

impl EventLog {
    /// A zero capacity is treated as one; the eviction loop requires at
    /// least one retained slot to make progress.
    pub fn new(max_events: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(32),
            next_id: 1,
            max_events: max_events.max(1),
        }
    }

    /// Append a payload, assign the next id, and return it. Oldest entries
    /// are evicted once the capacity is reached.
    pub fn append(&mut self, payload: Value) -> u64 {
        let event_id = self.next_id;
        self.next_id += 1;

        while self.entries.len() >= self.max_events {
            self.entries.pop_front();
        }
        self.entries.push_back(EventEnvelope { event_id, payload });
        event_id
    }

    /// Every retained entry with id greater than `last_seen`, in ascending
    /// order. Read-only: calling it twice on an unchanged log yields the
    /// same sequence. `last_seen = 0` replays the whole retained log.
    pub fn replay_from(&self, last_seen: u64) -> Vec<EventEnvelope> {
        self.entries
            .iter()
            .filter(|e| e.event_id > last_seen)
            .cloned()
            .collect()
    }

    /// Id of the most recently appended event, 0 when nothing was ever
    /// appended. Survives eviction.
    pub fn last_event_id(&self) -> u64 {
        self.next_id - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
