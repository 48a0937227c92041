//! Shared harness for integration tests: a scripted transport and a client
//! driven by a virtual clock.

#![allow(dead_code)]

use agent_stream::{
    ManualTimer, Result, StreamClient, StreamConfig, StreamError, StreamUpdate, Timestamp,
    Transport, TransportEvent,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Wall-clock-like starting point so retention math looks realistic.
pub const T0: i64 = 1_700_000_000_000;

/// Everything the transport was asked to do.
#[derive(Debug, Default)]
pub struct Wire {
    pub opens: usize,
    pub closes: usize,
    pub sent: Vec<String>,
    pub refuse_open: bool,
    pub refuse_send: bool,
}

/// Records calls. Opening never completes by itself; tests deliver
/// `TransportEvent::Opened` explicitly.
pub struct ScriptedTransport(pub Arc<Mutex<Wire>>);

impl Transport for ScriptedTransport {
    fn open(&mut self) -> Result<()> {
        let mut wire = self.0.lock();
        wire.opens += 1;
        if wire.refuse_open {
            return Err(StreamError::Transport("connection refused".into()));
        }
        Ok(())
    }

    fn send(&mut self, frame: &str) -> Result<()> {
        let mut wire = self.0.lock();
        if wire.refuse_send {
            return Err(StreamError::Transport("broken pipe".into()));
        }
        wire.sent.push(frame.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.0.lock().closes += 1;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Deterministic config: no jitter, no background sweep, roomy listener
/// buffers.
pub fn test_config() -> StreamConfig {
    let mut config = StreamConfig::default();
    config.connection.jitter_ratio = 0.0;
    config.buckets.sweep_interval_ms = 0;
    config.listener.buffer_size = 1024;
    config
}

pub struct Harness {
    pub client: StreamClient,
    pub timer: ManualTimer,
    pub wire: Arc<Mutex<Wire>>,
}

impl Harness {
    pub fn new(config: StreamConfig) -> Self {
        init_tracing();
        let timer = ManualTimer::new(Timestamp(T0));
        let wire = Arc::new(Mutex::new(Wire::default()));
        let client = StreamClient::new(
            config,
            Box::new(ScriptedTransport(wire.clone())),
            Arc::new(timer.clone()),
        )
        .unwrap();
        Self {
            client,
            timer,
            wire,
        }
    }

    /// Connect and complete the open handshake.
    pub fn connected(config: StreamConfig) -> Self {
        let mut harness = Self::new(config);
        harness.client.connect().unwrap();
        harness.open();
        harness
    }

    pub fn open(&mut self) {
        self.client.handle_transport_event(TransportEvent::Opened);
    }

    pub fn close(&mut self, reason: &str) {
        self.client.handle_transport_event(TransportEvent::Closed {
            reason: reason.to_string(),
        });
    }

    pub fn deliver(&mut self, frame: &str) {
        self.client
            .handle_transport_event(TransportEvent::Message(frame.to_string()));
    }

    /// Advance the virtual clock, firing due timers into the client.
    pub fn advance(&mut self, by: Duration) {
        let client = &mut self.client;
        self.timer.advance(by, |handle, kind| client.on_timer(handle, kind));
    }

    pub fn sent(&self) -> Vec<String> {
        self.wire.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.wire.lock().sent.clear();
    }

    pub fn opens(&self) -> usize {
        self.wire.lock().opens
    }
}

/// A regular `event` frame.
pub fn event_frame(id: u64, topic: &str, timestamp: i64) -> String {
    format!(
        r#"{{"type":"event","data":{{"id":{},"session_id":"{}","timestamp":{}}}}}"#,
        id, topic, timestamp
    )
}

/// A `priority_event` frame.
pub fn priority_frame(id: u64, topic: &str, timestamp: i64) -> String {
    format!(
        r#"{{"type":"priority_event","data":{{"id":{},"session_id":"{}","timestamp":{},"priority":1}}}}"#,
        id, topic, timestamp
    )
}

pub fn ids(events: &[agent_stream::Event]) -> Vec<u64> {
    events.iter().map(|e| e.id.0).collect()
}

pub fn statuses(updates: &[StreamUpdate]) -> Vec<agent_stream::ConnectionStatus> {
    updates
        .iter()
        .filter_map(|u| match u {
            StreamUpdate::Status { status } => Some(status.clone()),
            _ => None,
        })
        .collect()
}
