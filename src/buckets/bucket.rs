//! A single capacity-bounded, insertion-ordered bucket.

use crate::types::{Event, Timestamp};
use std::collections::VecDeque;
use std::time::Duration;

/// Rule applied when a bucket grows past its capacity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EvictionPolicy {
    /// Remove the single oldest event per overflowing insert.
    Fifo,
    /// Remove oldest events until the bucket holds `target_fill * capacity`.
    Batch { target_fill: f64 },
}

/// Capacity-bounded event collection in insertion order.
#[derive(Debug)]
pub struct Bucket {
    capacity: usize,
    retention: Duration,
    policy: EvictionPolicy,
    items: VecDeque<Event>,
    /// Total events removed by capacity pressure or sweeps.
    evicted: u64,
}

impl Bucket {
    /// Create an empty bucket. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize, retention: Duration, policy: EvictionPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            retention,
            policy,
            items: VecDeque::with_capacity(capacity.min(1024)),
            evicted: 0,
        }
    }

    /// Maximum number of events held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Age past which the sweep removes an event.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Events removed so far by eviction or sweep.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Events in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Event> + DoubleEndedIterator {
        self.items.iter()
    }

    /// Append an event and apply the eviction policy.
    ///
    /// Returns the events removed to make room, oldest first.
    pub(crate) fn push(&mut self, event: Event) -> Vec<Event> {
        self.items.push_back(event);
        if self.items.len() <= self.capacity {
            return Vec::new();
        }

        let keep = match self.policy {
            EvictionPolicy::Fifo => self.capacity,
            EvictionPolicy::Batch { target_fill } => self.batch_target(target_fill),
        };
        let excess = self.items.len() - keep;
        let removed: Vec<Event> = self.items.drain(..excess).collect();
        self.evicted += removed.len() as u64;
        removed
    }

    /// Fill level a batch eviction trims down to. Never zero, never above capacity.
    fn batch_target(&self, target_fill: f64) -> usize {
        let target = (self.capacity as f64 * target_fill).floor() as usize;
        target.clamp(1, self.capacity)
    }

    /// Remove events whose timestamp is older than the retention window.
    pub(crate) fn sweep(&mut self, now: Timestamp) -> Vec<Event> {
        let cutoff = now.saturating_sub(self.retention);
        let mut removed = Vec::new();
        self.items.retain(|event| {
            if event.timestamp < cutoff {
                removed.push(event.clone());
                false
            } else {
                true
            }
        });
        self.evicted += removed.len() as u64;
        removed
    }

    pub(crate) fn clear(&mut self) -> Vec<Event> {
        self.items.drain(..).collect()
    }
}
