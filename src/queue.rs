//! Holding area for events that arrive while the connection is settling.
//!
//! The queue keeps only the latest pending event per topic. The per-topic
//! index is updated on every enqueue, so a flush is a drain plus a sort.

use crate::types::{Event, Timestamp, TopicId};
use std::collections::HashMap;

/// An event waiting to be applied to the buckets.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEntry {
    pub topic_id: TopicId,
    pub event: Event,
    pub received_at: Timestamp,
    /// Arrival order, breaks ties between equal `received_at`.
    seq: u64,
}

/// Per-topic latest-entry queue.
#[derive(Debug, Default)]
pub struct EventQueue {
    latest: HashMap<TopicId, PendingEntry>,
    next_seq: u64,
    /// Entries that lost consolidation to another entry for the same topic.
    superseded: u64,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of topics with a pending entry.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Total entries dropped by consolidation.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    /// Queue an event. An entry already pending for the same topic is kept
    /// if it was received later than this one, or if it is a priority event
    /// and this one is not.
    pub fn push(&mut self, event: Event, received_at: Timestamp) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = PendingEntry {
            topic_id: event.topic_id.clone(),
            event,
            received_at,
            seq,
        };

        match self.latest.get_mut(&entry.topic_id) {
            Some(existing)
                if existing.received_at > entry.received_at
                    || (existing.event.is_priority() && !entry.event.is_priority()) =>
            {
                self.superseded += 1;
            }
            Some(existing) => {
                *existing = entry;
                self.superseded += 1;
            }
            None => {
                self.latest.insert(entry.topic_id.clone(), entry);
            }
        }
    }

    /// Remove all pending entries in ascending `received_at` order.
    pub fn drain(&mut self) -> Vec<PendingEntry> {
        let mut entries: Vec<PendingEntry> = self.latest.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| (e.received_at, e.seq));
        entries
    }

    pub fn clear(&mut self) {
        self.latest.clear();
    }
}
