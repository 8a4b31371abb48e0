// ── Event buffer ──
//
// Bounded, append-only sliding window of one channel's events. Eviction
// happens before the append so the buffer never exceeds its capacity,
// and the oldest entries always go first.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::{BufferedEvent, Channel, Event};

/// Default per-channel capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 5000;

#[derive(Debug)]
pub struct EventBuffer {
    channel: Channel,
    capacity: usize,
    entries: VecDeque<BufferedEvent>,
    next_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl EventBuffer {
    /// A capacity of zero is bumped to one.
    pub fn new(channel: Channel, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channel,
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
            next_seq: 0,
            last_timestamp: None,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict-then-append. A timestamp earlier than the previous entry's
    /// (wall clock stepped back) is clamped to keep the window ordered.
    pub fn append(&mut self, event: Arc<Event>, timestamp: DateTime<Utc>) -> BufferedEvent {
        let timestamp = match self.last_timestamp {
            Some(last) if timestamp < last => last,
            _ => timestamp,
        };

        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }

        let entry = BufferedEvent {
            channel: self.channel,
            seq: self.next_seq,
            timestamp,
            event,
        };
        self.next_seq += 1;
        self.last_timestamp = Some(timestamp);
        self.entries.push_back(entry.clone());
        entry
    }

    /// Entries matching `predicate`, copied out at call time. Later
    /// appends don't affect the returned iterator.
    pub fn query<P>(&self, mut predicate: P) -> std::vec::IntoIter<BufferedEvent>
    where
        P: FnMut(&BufferedEvent) -> bool,
    {
        self.entries
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Every entry, oldest first.
    pub fn snapshot(&self) -> Vec<BufferedEvent> {
        self.entries.iter().cloned().collect()
    }

    /// Drop every entry. Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
