//! Desired topic set and the control traffic needed to keep the server in sync.

use crate::protocol::OutboundMessage;
use crate::types::TopicId;
use std::collections::BTreeSet;
use tracing::debug;

/// Tracks the topics the consumer wants.
///
/// Mutations made while disconnected are folded into a pending diff; the next
/// successful open sends the full desired set once via [`resync`](Self::resync).
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    desired: BTreeSet<TopicId>,
    /// Topics dropped while disconnected, to unsubscribe on next open.
    pending_removals: BTreeSet<TopicId>,
    /// Whether anything changed while disconnected.
    dirty: bool,
    /// Topics the server has acknowledged.
    confirmed: BTreeSet<TopicId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn desired(&self) -> impl Iterator<Item = &TopicId> {
        self.desired.iter()
    }

    pub fn contains(&self, topic: &TopicId) -> bool {
        self.desired.contains(topic)
    }

    pub fn len(&self) -> usize {
        self.desired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }

    pub fn confirmed_len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn has_pending(&self) -> bool {
        self.dirty
    }

    /// Add topics. Returns the message to send now when connected and at
    /// least one topic is new.
    pub fn subscribe<I>(&mut self, topics: I, connected: bool) -> Option<OutboundMessage>
    where
        I: IntoIterator<Item = TopicId>,
    {
        let mut added = Vec::new();
        for topic in topics {
            if topic.as_str().is_empty() {
                continue;
            }
            self.pending_removals.remove(&topic);
            if self.desired.insert(topic.clone()) {
                added.push(topic);
            }
        }
        if added.is_empty() {
            return None;
        }

        if connected {
            Some(OutboundMessage::Subscribe { session_ids: added })
        } else {
            debug!(count = added.len(), "buffering subscribe until reconnect");
            self.dirty = true;
            None
        }
    }

    /// Remove topics. Returns the message to send now when connected and at
    /// least one topic was subscribed.
    pub fn unsubscribe<I>(&mut self, topics: I, connected: bool) -> Option<OutboundMessage>
    where
        I: IntoIterator<Item = TopicId>,
    {
        let mut removed = Vec::new();
        for topic in topics {
            if self.desired.remove(&topic) {
                self.confirmed.remove(&topic);
                removed.push(topic);
            }
        }
        if removed.is_empty() {
            return None;
        }

        if connected {
            Some(OutboundMessage::Unsubscribe { session_ids: removed })
        } else {
            debug!(count = removed.len(), "buffering unsubscribe until reconnect");
            self.pending_removals.extend(removed);
            self.dirty = true;
            None
        }
    }

    /// Messages to send right after a successful open: one unsubscribe for
    /// topics dropped while disconnected, then the full desired set.
    pub fn resync(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::with_capacity(2);
        if !self.pending_removals.is_empty() {
            let session_ids = std::mem::take(&mut self.pending_removals).into_iter().collect();
            messages.push(OutboundMessage::Unsubscribe { session_ids });
        }
        if !self.desired.is_empty() {
            messages.push(OutboundMessage::Subscribe {
                session_ids: self.desired.iter().cloned().collect(),
            });
        }
        self.dirty = false;
        // Server state is unknown until it acknowledges again
        self.confirmed.clear();
        messages
    }

    pub fn confirm(&mut self, topics: &[TopicId]) {
        for topic in topics {
            if self.desired.contains(topic) {
                self.confirmed.insert(topic.clone());
            }
        }
    }

    pub fn confirm_removal(&mut self, topics: &[TopicId]) {
        for topic in topics {
            self.confirmed.remove(topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(ids: &[&str]) -> Vec<TopicId> {
        ids.iter().map(|s| TopicId::from(*s)).collect()
    }

    #[test]
    fn test_connected_subscribe_sends_only_new() {
        let mut registry = SubscriptionRegistry::new();
        let msg = registry.subscribe(topics(&["a", "b"]), true).unwrap();
        assert_eq!(msg, OutboundMessage::Subscribe { session_ids: topics(&["a", "b"]) });

        let msg = registry.subscribe(topics(&["b", "c"]), true).unwrap();
        assert_eq!(msg, OutboundMessage::Subscribe { session_ids: topics(&["c"]) });

        assert!(registry.subscribe(topics(&["a"]), true).is_none());
        assert_eq!(registry.len(), 3);
        assert!(!registry.has_pending());
    }

    #[test]
    fn test_disconnected_mutations_batch_into_resync() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.subscribe(topics(&["a"]), false).is_none());
        assert!(registry.subscribe(topics(&["b"]), false).is_none());
        assert!(registry.has_pending());

        let messages = registry.resync();
        assert_eq!(messages, vec![OutboundMessage::Subscribe { session_ids: topics(&["a", "b"]) }]);
        assert!(!registry.has_pending());
    }

    #[test]
    fn test_resync_always_sends_full_set() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(topics(&["x", "y"]), true);
        let messages = registry.resync();
        assert_eq!(messages, vec![OutboundMessage::Subscribe { session_ids: topics(&["x", "y"]) }]);
        // And again on the next open
        assert_eq!(registry.resync().len(), 1);
    }

    #[test]
    fn test_removals_while_disconnected() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(topics(&["a", "b", "c"]), true);
        assert!(registry.unsubscribe(topics(&["b", "zzz"]), false).is_none());

        let messages = registry.resync();
        assert_eq!(
            messages,
            vec![
                OutboundMessage::Unsubscribe { session_ids: topics(&["b"]) },
                OutboundMessage::Subscribe { session_ids: topics(&["a", "c"]) },
            ]
        );
    }

    #[test]
    fn test_resubscribe_cancels_pending_removal() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(topics(&["a"]), true);
        registry.unsubscribe(topics(&["a"]), false);
        registry.subscribe(topics(&["a"]), false);

        assert_eq!(
            registry.resync(),
            vec![OutboundMessage::Subscribe { session_ids: topics(&["a"]) }]
        );
    }

    #[test]
    fn test_confirmations_track_desired_only() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(topics(&["a"]), true);
        registry.confirm(&topics(&["a", "stranger"]));
        assert_eq!(registry.confirmed_len(), 1);

        registry.unsubscribe(topics(&["a"]), true);
        assert_eq!(registry.confirmed_len(), 0);
    }
}
