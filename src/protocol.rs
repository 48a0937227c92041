//! Wire messages exchanged with the orchestration backend.
//!
//! Inbound frames are JSON envelopes `{"type", "data", "priority_info"?}`.
//! Decoding happens in two steps so that a malformed envelope
//! ([`StreamError::Parse`]) can be told apart from a well-formed envelope
//! carrying a type we do not handle ([`StreamError::Protocol`]).

use crate::error::{Result, StreamError};
use crate::types::{Event, EventId, Timestamp, TopicId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope as it appears on the wire.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    priority_info: Option<PriorityInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityInfo {
    #[serde(default)]
    pub protocol_version: Option<String>,
}

/// Event fields as sent by the server. Validated into an [`Event`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, alias = "sessionId", alias = "topic_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub source_app: Option<String>,
    #[serde(default)]
    pub hook_event_type: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl WireEvent {
    /// Validate into an [`Event`]. `fallback_id` is used when the server sent
    /// no id.
    pub fn into_event(self, fallback_id: impl FnOnce() -> EventId) -> Result<Event> {
        let topic = match self.session_id {
            Some(s) if !s.is_empty() => TopicId(s),
            _ => return Err(StreamError::InvalidEvent("missing session_id".into())),
        };
        let timestamp = self
            .timestamp
            .filter(|ts| *ts > 0)
            .ok_or_else(|| StreamError::InvalidEvent("missing timestamp".into()))?;

        Ok(Event {
            id: self.id.map(EventId).unwrap_or_else(fallback_id),
            topic_id: topic,
            timestamp: Timestamp(timestamp),
            priority: self.priority.unwrap_or(0),
            source_app: self.source_app,
            hook_event_type: self.hook_event_type,
            payload: self.payload,
        })
    }
}

/// Every message kind the client understands.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    /// Seed snapshot.
    Initial(Vec<WireEvent>),
    Event(WireEvent),
    PriorityEvent(WireEvent),
    /// Only applied when the topic is subscribed.
    SessionEvent(WireEvent),
    PrioritySessionEvent(WireEvent),
    SubscriptionConfirmed(Vec<TopicId>),
    UnsubscriptionConfirmed(Vec<TopicId>),
    Pong,
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    pub message: InboundMessage,
    pub protocol_version: Option<String>,
}

/// Decode one inbound text frame.
pub fn decode(frame: &str) -> Result<Inbound> {
    let envelope: Envelope =
        serde_json::from_str(frame).map_err(|e| StreamError::Parse(e.to_string()))?;

    let message = match envelope.kind.as_str() {
        "initial" => InboundMessage::Initial(event_list(envelope.data)?),
        "event" => InboundMessage::Event(single_event(envelope.data)?),
        "priority_event" => InboundMessage::PriorityEvent(single_event(envelope.data)?),
        "session_event" => InboundMessage::SessionEvent(single_event(envelope.data)?),
        "priority_session_event" => {
            InboundMessage::PrioritySessionEvent(single_event(envelope.data)?)
        }
        "subscription_confirmed" => InboundMessage::SubscriptionConfirmed(topic_list(&envelope.data)),
        "unsubscription_confirmed" => {
            InboundMessage::UnsubscriptionConfirmed(topic_list(&envelope.data))
        }
        "pong" => InboundMessage::Pong,
        other => return Err(StreamError::Protocol(other.to_string())),
    };

    Ok(Inbound {
        message,
        protocol_version: envelope.priority_info.and_then(|p| p.protocol_version),
    })
}

fn single_event(data: Value) -> Result<WireEvent> {
    if !data.is_object() {
        return Err(StreamError::Parse("event data must be an object".into()));
    }
    serde_json::from_value(data).map_err(|e| StreamError::Parse(e.to_string()))
}

fn event_list(data: Value) -> Result<Vec<WireEvent>> {
    match data {
        Value::Array(_) => serde_json::from_value(data).map_err(|e| StreamError::Parse(e.to_string())),
        Value::Null => Ok(Vec::new()),
        _ => Err(StreamError::Parse("initial data must be an array".into())),
    }
}

/// Topics named in an ack, either a bare array or `{"sessionIds": [...]}`.
fn topic_list(data: &Value) -> Vec<TopicId> {
    let list = match data {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("sessionIds") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.iter()
        .filter_map(|v| v.as_str())
        .map(TopicId::from)
        .collect()
}

/// Control messages sent to the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundMessage {
    Subscribe {
        #[serde(rename = "sessionIds")]
        session_ids: Vec<TopicId>,
    },
    Unsubscribe {
        #[serde(rename = "sessionIds")]
        session_ids: Vec<TopicId>,
    },
    Ping,
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
