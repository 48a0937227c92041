//! Consumer listeners receiving view and status updates.

use crate::types::{ConnectionStatus, Event};
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Updates pushed to listeners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamUpdate {
    /// Freshly computed view after a bucket mutation.
    View { events: Vec<Event> },

    /// Connection status changed.
    Status { status: ConnectionStatus },

    /// The listener was removed and will receive nothing further.
    Dropped { reason: DropReason },
}

/// Why a listener was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The client was shut down.
    Shutdown,
}

/// Unique identifier for a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receiving side of a listener.
pub struct ListenerHandle {
    pub id: ListenerId,
    pub receiver: Receiver<StreamUpdate>,
}

impl ListenerHandle {
    /// Receive the next update (blocking).
    pub fn recv(&self) -> Result<StreamUpdate, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an update (non-blocking).
    pub fn try_recv(&self) -> Result<StreamUpdate, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<StreamUpdate, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain every update currently buffered.
    pub fn drain(&self) -> Vec<StreamUpdate> {
        self.receiver.try_iter().collect()
    }

    /// The most recent view among buffered updates, if any.
    pub fn latest_view(&self) -> Option<Vec<Event>> {
        self.drain().into_iter().rev().find_map(|update| match update {
            StreamUpdate::View { events } => Some(events),
            _ => None,
        })
    }
}

/// Registered listeners. Safe to share across threads.
pub struct ListenerHub {
    listeners: RwLock<HashMap<ListenerId, Sender<StreamUpdate>>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl ListenerHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Register a listener. `initial` updates are queued before any broadcast
    /// reaches it.
    pub fn subscribe(&self, initial: Vec<StreamUpdate>) -> ListenerHandle {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size.max(initial.len()));
        for update in initial {
            let _ = sender.try_send(update);
        }
        self.listeners.write().insert(id, sender);
        ListenerHandle { id, receiver }
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        match self.listeners.write().remove(&id) {
            Some(sender) => {
                let _ = sender.try_send(StreamUpdate::Dropped {
                    reason: DropReason::Unsubscribed,
                });
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send an update to every listener, dropping those that cannot keep up
    /// or whose receiver is gone.
    pub fn broadcast(&self, update: StreamUpdate) {
        let mut to_remove = Vec::new();
        {
            let listeners = self.listeners.read();
            for (id, sender) in listeners.iter() {
                if sender.try_send(update.clone()).is_err() {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut listeners = self.listeners.write();
            for id in to_remove {
                if let Some(sender) = listeners.remove(&id) {
                    tracing::debug!(listener = id.0, "dropping slow listener");
                    // Buffer is full, so this usually fails; best effort
                    let _ = sender.try_send(StreamUpdate::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }

    /// Remove every listener, telling each why.
    pub fn close_all(&self, reason: DropReason) {
        let drained: Vec<_> = self.listeners.write().drain().collect();
        for (_, sender) in drained {
            let _ = sender.try_send(StreamUpdate::Dropped {
                reason: reason.clone(),
            });
        }
    }
}
