//! Two-bucket store routing events by priority.

use super::bucket::{Bucket, EvictionPolicy};
use crate::config::BucketConfig;
use crate::error::{Result, StreamError};
use crate::types::{Event, EventId, Timestamp};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Which bucket an event lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BucketClass {
    Priority,
    Regular,
}

impl BucketClass {
    pub fn of(event: &Event) -> Self {
        if event.is_priority() {
            BucketClass::Priority
        } else {
            BucketClass::Regular
        }
    }
}

/// Outcome of a successful [`BucketStore::add_event`].
#[derive(Clone, Debug, PartialEq)]
pub enum Insertion {
    Inserted { class: BucketClass, evicted: usize },
    /// An event with the same id is already held; nothing changed.
    Duplicate,
}

impl Insertion {
    /// Whether the bucket contents changed.
    pub fn changed(&self) -> bool {
        matches!(self, Insertion::Inserted { .. })
    }
}

/// Events removed by a retention sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub priority_removed: usize,
    pub regular_removed: usize,
}

impl SweepResult {
    pub fn total(&self) -> usize {
        self.priority_removed + self.regular_removed
    }
}

/// Priority and regular buckets plus an id index spanning both.
#[derive(Debug)]
pub struct BucketStore {
    priority: Bucket,
    regular: Bucket,
    ids: HashSet<EventId>,
}

impl BucketStore {
    /// Create both buckets from config.
    pub fn new(config: &BucketConfig) -> Self {
        Self {
            priority: Bucket::new(
                config.priority_capacity,
                config.priority_retention(),
                EvictionPolicy::Fifo,
            ),
            regular: Bucket::new(
                config.regular_capacity,
                config.regular_retention(),
                EvictionPolicy::Batch {
                    target_fill: config.regular_target_fill,
                },
            ),
            ids: HashSet::new(),
        }
    }

    /// Bucket for events with priority above 0.
    pub fn priority(&self) -> &Bucket {
        &self.priority
    }

    /// Bucket for priority 0 events.
    pub fn regular(&self) -> &Bucket {
        &self.regular
    }

    /// Events held across both buckets.
    pub fn len(&self) -> usize {
        self.priority.len() + self.regular.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an event with this id is held in either bucket.
    pub fn contains(&self, id: EventId) -> bool {
        self.ids.contains(&id)
    }

    /// Route an event to its bucket and apply that bucket's eviction policy.
    ///
    /// Events without a topic or with a non-positive timestamp are rejected
    /// and leave the store untouched.
    pub fn add_event(&mut self, event: Event) -> Result<Insertion> {
        if event.topic_id.as_str().is_empty() {
            warn!(event_id = %event.id, "rejecting event without topic");
            return Err(StreamError::InvalidEvent(format!("event {} has no topic", event.id)));
        }
        if event.timestamp.0 <= 0 {
            warn!(event_id = %event.id, "rejecting event without timestamp");
            return Err(StreamError::InvalidEvent(format!(
                "event {} has no timestamp",
                event.id
            )));
        }
        if !self.ids.insert(event.id) {
            debug!(event_id = %event.id, "ignoring duplicate event");
            return Ok(Insertion::Duplicate);
        }

        let class = BucketClass::of(&event);
        let bucket = match class {
            BucketClass::Priority => &mut self.priority,
            BucketClass::Regular => &mut self.regular,
        };
        let removed = bucket.push(event);
        if !removed.is_empty() {
            debug!(?class, count = removed.len(), "evicted events on insert");
        }
        for gone in &removed {
            self.ids.remove(&gone.id);
        }

        Ok(Insertion::Inserted {
            class,
            evicted: removed.len(),
        })
    }

    /// Drop events older than each bucket's retention window.
    pub fn sweep(&mut self, now: Timestamp) -> SweepResult {
        let priority = self.priority.sweep(now);
        let regular = self.regular.sweep(now);
        for gone in priority.iter().chain(regular.iter()) {
            self.ids.remove(&gone.id);
        }

        let result = SweepResult {
            priority_removed: priority.len(),
            regular_removed: regular.len(),
        };
        if result.total() > 0 {
            debug!(
                priority = result.priority_removed,
                regular = result.regular_removed,
                "retention sweep removed events"
            );
        }
        result
    }

    /// Empty both buckets.
    pub fn clear(&mut self) {
        self.priority.clear();
        self.regular.clear();
        self.ids.clear();
    }
}
