//! Core types for the stream client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier of a single event.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stream topic. On the wire this is a session identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(pub String);

impl TopicId {
    pub fn new(id: impl Into<String>) -> Self {
        TopicId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicId({:?})", self.0)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicId {
    fn from(s: &str) -> Self {
        TopicId(s.to_string())
    }
}

impl From<String> for TopicId {
    fn from(s: String) -> Self {
        TopicId(s)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    /// `self + d`, clamped at the far end of the timeline.
    pub fn saturating_add(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration_millis(d)))
    }

    /// `self - d`, clamped at the near end of the timeline.
    pub fn saturating_sub(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_sub(duration_millis(d)))
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0).max(0) as u64)
    }
}

/// Whole milliseconds in `d`. Durations beyond `i64::MAX` ms saturate.
fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A single inbound event. Never mutated after it is accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,

    /// Session the event belongs to.
    #[serde(rename = "session_id")]
    pub topic_id: TopicId,

    pub timestamp: Timestamp,

    /// 0 = regular, anything above is priority.
    #[serde(default)]
    pub priority: u32,

    /// Application that emitted the event (e.g. an agent name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_app: Option<String>,

    /// Lifecycle hook that produced the event (e.g. "PreToolUse").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_event_type: Option<String>,

    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a regular event with an empty payload.
    pub fn new(id: u64, topic_id: impl Into<TopicId>, timestamp: i64) -> Self {
        Self {
            id: EventId(id),
            topic_id: topic_id.into(),
            timestamp: Timestamp(timestamp),
            priority: 0,
            source_app: None,
            hook_event_type: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_priority(&self) -> bool {
        self.priority > 0
    }
}

/// Transport lifecycle state. Exactly one is active at a time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    ReconnectScheduled,
    ClosedTerminal,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::ClosedTerminal
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::ReconnectScheduled => "reconnect_scheduled",
            ConnectionState::ClosedTerminal => "closed_terminal",
        };
        f.write_str(s)
    }
}

/// Connection status as seen by consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting { attempt: u32 },
    Connected,
    /// Transient: a reconnect is scheduled.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// No listeners left to serve, transport is idle.
    Idle,
    /// Consumer shut the client down.
    Disconnected,
    /// Reconnect attempts exhausted. Not retryable.
    Failed { attempts: u32 },
}

/// Snapshot of client counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub priority_events: usize,
    pub regular_events: usize,
    pub priority_evicted: u64,
    pub regular_evicted: u64,
    pub queued_events: usize,
    /// Queued events dropped in favour of another event for the same topic.
    pub superseded_events: u64,
    pub reconnect_attempts: u32,
    pub connection_state: ConnectionState,
    pub desired_topics: usize,
    pub confirmed_topics: usize,
    pub listeners: usize,
    pub parse_errors: u64,
    pub protocol_errors: u64,
    pub rejected_events: u64,
    pub protocol_version: Option<String>,
}
