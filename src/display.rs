//! Merged, bounded view over both buckets.
//!
//! [`DisplayLimiter::compute_view`] is a pure function of bucket contents
//! and [`DisplayConfig`]: it merges both buckets by timestamp and applies the
//! configured [`OverflowStrategy`].

use crate::buckets::BucketStore;
use crate::config::DisplayConfig;
use crate::types::Event;
use serde::{Deserialize, Serialize};

/// How the merged view is trimmed once it exceeds the display limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    /// Keep every priority event; drop regular events oldest first. The limit
    /// is not enforced against priority events.
    #[default]
    RemoveOldestRegular,
    /// Drop the globally oldest events regardless of class.
    RemoveOldestPriority,
    /// Apply per-class caps first, then the total limit.
    StrictLimits,
}

/// Computes the consumer-facing view.
#[derive(Clone, Debug)]
pub struct DisplayLimiter {
    config: DisplayConfig,
}

impl DisplayLimiter {
    pub fn new(config: DisplayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Merge both buckets into one timestamp-ascending sequence, bounded per
    /// the configured strategy.
    pub fn compute_view(&self, store: &BucketStore) -> Vec<Event> {
        let priority = sorted_by_time(store.priority().iter());
        let regular = sorted_by_time(store.regular().iter());
        let limit = self.config.total_limit;

        match self.config.strategy {
            OverflowStrategy::RemoveOldestRegular => {
                let budget = limit.saturating_sub(priority.len());
                merge(priority, newest(regular, budget))
            }
            OverflowStrategy::RemoveOldestPriority => newest(merge(priority, regular), limit),
            OverflowStrategy::StrictLimits => {
                let priority = newest(priority, self.config.max_priority_events);
                let regular = newest(regular, self.config.max_regular_events);
                newest(merge(priority, regular), limit)
            }
        }
    }
}

fn sorted_by_time<'a>(events: impl Iterator<Item = &'a Event>) -> Vec<Event> {
    let mut out: Vec<Event> = events.cloned().collect();
    // Stable: equal timestamps keep insertion order
    out.sort_by_key(|e| e.timestamp);
    out
}

/// Keep the `n` newest events of a time-sorted vector.
fn newest(mut events: Vec<Event>, n: usize) -> Vec<Event> {
    if events.len() > n {
        events.drain(..events.len() - n);
    }
    events
}

/// Merge two time-sorted vectors. On equal timestamps priority events come first.
fn merge(priority: Vec<Event>, regular: Vec<Event>) -> Vec<Event> {
    let mut out = Vec::with_capacity(priority.len() + regular.len());
    let mut p = priority.into_iter().peekable();
    let mut r = regular.into_iter().peekable();
    loop {
        let take_priority = match (p.peek(), r.peek()) {
            (Some(a), Some(b)) => a.timestamp <= b.timestamp,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_priority { p.next() } else { r.next() };
        out.extend(next);
    }
    out
}
