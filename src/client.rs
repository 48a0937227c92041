//! The stream client tying all components together.

use crate::buckets::{BucketStore, Insertion};
use crate::config::StreamConfig;
use crate::connection::{
    ConnectionManager, Step, TimerHandle, TimerKind, TimerService, Transport, TransportEvent,
};
use crate::display::DisplayLimiter;
use crate::error::{Result, StreamError};
use crate::protocol::{self, InboundMessage, WireEvent};
use crate::queue::EventQueue;
use crate::subscriptions::{
    DropReason, ListenerHandle, ListenerHub, ListenerId, StreamUpdate, SubscriptionRegistry,
};
use crate::types::{ConnectionState, ConnectionStatus, Event, EventId, StreamStats, TopicId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ids handed to events the server sent without one.
const LOCAL_ID_BASE: u64 = 1 << 63;

/// Supplies the initial bucket contents on first connect (typically a REST
/// fetch of recent events).
pub trait SnapshotSource: Send {
    fn fetch(&mut self) -> Result<Vec<Event>>;
}

#[derive(Clone, Copy, Debug, Default)]
struct Counters {
    parse_errors: u64,
    protocol_errors: u64,
    rejected_events: u64,
}

/// A bounded, prioritized, self-healing view over the event stream.
///
/// Owns the buckets, the subscription registry, the pending queue and the
/// connection. Single-threaded: every input (transport event, timer firing,
/// consumer call) runs to completion before the next. Drive it directly with
/// a [`ManualTimer`](crate::ManualTimer), or hand it to a
/// [`StreamRuntime`](crate::StreamRuntime).
pub struct StreamClient {
    config: StreamConfig,
    timer: Arc<dyn TimerService>,
    connection: ConnectionManager,
    buckets: BucketStore,
    registry: SubscriptionRegistry,
    queue: EventQueue,
    limiter: DisplayLimiter,
    listeners: Arc<ListenerHub>,
    snapshot: Option<Box<dyn SnapshotSource>>,

    /// `connect()` has been called at least once.
    started: bool,
    /// Snapshot source has been consulted.
    seeded: bool,
    settle_timer: Option<TimerHandle>,
    sweep_timer: Option<TimerHandle>,
    next_local_id: u64,
    counters: Counters,
    protocol_version: Option<String>,
    last_status: Option<ConnectionStatus>,
}

impl StreamClient {
    /// Validate `config` and build an unconnected client.
    pub fn new(
        config: StreamConfig,
        transport: Box<dyn Transport>,
        timer: Arc<dyn TimerService>,
    ) -> Result<Self> {
        config.validate()?;

        let connection =
            ConnectionManager::new(&config.connection, &config.heartbeat, transport, timer.clone());

        Ok(Self {
            buckets: BucketStore::new(&config.buckets),
            limiter: DisplayLimiter::new(config.display.clone()),
            listeners: Arc::new(ListenerHub::new(config.listener.buffer_size)),
            registry: SubscriptionRegistry::new(),
            queue: EventQueue::new(),
            connection,
            timer,
            config,
            snapshot: None,
            started: false,
            seeded: false,
            settle_timer: None,
            sweep_timer: None,
            next_local_id: LOCAL_ID_BASE,
            counters: Counters::default(),
            protocol_version: None,
            last_status: None,
        })
    }

    /// Seed the buckets from `source` on the first successful open.
    pub fn with_snapshot_source(mut self, source: impl SnapshotSource + 'static) -> Self {
        self.snapshot = Some(Box::new(source));
        self
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Read access to both buckets.
    pub fn buckets(&self) -> &BucketStore {
        &self.buckets
    }

    /// Shared handle to the registered listeners.
    pub fn listener_hub(&self) -> Arc<ListenerHub> {
        Arc::clone(&self.listeners)
    }

    // --- Consumer API ---

    /// Start the connection and the retention sweep.
    pub fn connect(&mut self) -> Result<()> {
        let step = self.connection.connect()?;
        self.started = true;
        if self.sweep_timer.is_none() {
            self.schedule_sweep();
        }
        self.apply_step(step);
        Ok(())
    }

    /// Register a listener. It first receives the current status (if any) and
    /// view, then every subsequent update.
    ///
    /// A client that went idle for lack of listeners reconnects.
    pub fn subscribe(&mut self) -> ListenerHandle {
        let mut initial = Vec::with_capacity(2);
        if let Some(status) = self.last_status.clone() {
            initial.push(StreamUpdate::Status { status });
        }
        initial.push(StreamUpdate::View {
            events: self.compute_view(),
        });
        let handle = self.listeners.subscribe(initial);

        if self.started && self.connection.state() == ConnectionState::Idle {
            info!("listener registered while idle, reconnecting");
            if let Err(e) = self.connect() {
                warn!(error = %e, "reconnect on subscribe failed");
            }
        }
        handle
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Add topics to the desired subscription set.
    pub fn add_topics<I, T>(&mut self, topics: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<TopicId>,
    {
        let message = self
            .registry
            .subscribe(topics.into_iter().map(Into::into), self.connection.is_open());
        if let Some(message) = message {
            let step = self.connection.send(&message);
            self.apply_step(step);
        }
    }

    /// Remove topics from the desired subscription set.
    pub fn remove_topics<I, T>(&mut self, topics: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<TopicId>,
    {
        let message = self
            .registry
            .unsubscribe(topics.into_iter().map(Into::into), self.connection.is_open());
        if let Some(message) = message {
            let step = self.connection.send(&message);
            self.apply_step(step);
        }
    }

    /// Desired topics in sorted order.
    pub fn topics(&self) -> Vec<TopicId> {
        self.registry.desired().cloned().collect()
    }

    /// The merged, limited view of both buckets.
    pub fn compute_view(&self) -> Vec<Event> {
        self.limiter.compute_view(&self.buckets)
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            priority_events: self.buckets.priority().len(),
            regular_events: self.buckets.regular().len(),
            priority_evicted: self.buckets.priority().evicted(),
            regular_evicted: self.buckets.regular().evicted(),
            queued_events: self.queue.len(),
            superseded_events: self.queue.superseded(),
            reconnect_attempts: self.connection.attempt(),
            connection_state: self.connection.state(),
            desired_topics: self.registry.len(),
            confirmed_topics: self.registry.confirmed_len(),
            listeners: self.listeners.len(),
            parse_errors: self.counters.parse_errors,
            protocol_errors: self.counters.protocol_errors,
            rejected_events: self.counters.rejected_events,
            protocol_version: self.protocol_version.clone(),
        }
    }

    /// Add a single event directly, bypassing the transport.
    pub fn add_event(&mut self, event: Event) -> Result<Insertion> {
        let result = self.insert(event);
        if matches!(result, Ok(Insertion::Inserted { .. })) {
            self.notify_view();
        }
        result
    }

    /// Add a batch of events with one view notification. Returns how many
    /// were inserted.
    pub fn seed(&mut self, events: Vec<Event>) -> usize {
        let inserted = events
            .into_iter()
            .map(|event| self.insert(event))
            .filter(|r| matches!(r, Ok(Insertion::Inserted { .. })))
            .count();
        if inserted > 0 {
            self.notify_view();
        }
        inserted
    }

    /// Empty both buckets and the pending queue. Connection is untouched.
    pub fn reset(&mut self) {
        self.buckets.clear();
        self.queue.clear();
        self.notify_view();
    }

    /// Stop for good: cancel all timers, close the transport and release
    /// every listener.
    pub fn shutdown(&mut self) {
        let step = self.connection.disconnect();
        self.cancel_timer(TimerKind::Settle);
        self.cancel_timer(TimerKind::RetentionSweep);
        self.queue.clear();
        self.apply_step(step);
        self.listeners.close_all(DropReason::Shutdown);
    }

    // --- Inputs from the transport and timers ---

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(frame) => self.on_message(&frame),
            TransportEvent::Closed { reason } => {
                let step = self.connection.on_connection_lost(&reason);
                self.apply_step(step);
            }
            TransportEvent::Error(error) => {
                let step = self.connection.on_connection_lost(&error);
                self.apply_step(step);
            }
        }
    }

    pub fn on_timer(&mut self, handle: TimerHandle, kind: TimerKind) {
        match kind {
            TimerKind::Settle => {
                if self.settle_timer != Some(handle) {
                    return;
                }
                self.settle_timer = None;
                if self.connection.is_open() {
                    self.flush_queue();
                }
            }
            TimerKind::RetentionSweep => {
                if self.sweep_timer != Some(handle) {
                    return;
                }
                self.sweep_timer = None;
                let result = self.buckets.sweep(self.timer.now());
                if result.total() > 0 {
                    self.notify_view();
                }
                self.schedule_sweep();
            }
            TimerKind::ConnectTimeout | TimerKind::Reconnect | TimerKind::Heartbeat => {
                let step = self.connection.on_timer(handle, kind);
                self.apply_step(step);
            }
        }
    }

    /// Open sequence: resync subscriptions, seed, flush queued events, then
    /// start the heartbeat.
    fn on_opened(&mut self) {
        let step = self.connection.on_opened();
        let Step::Status(status) = step else {
            return;
        };
        self.publish_status(status);

        for message in self.registry.resync() {
            let step = self.connection.send(&message);
            if step != Step::Nothing {
                self.apply_step(step);
                return;
            }
        }

        if !self.seeded {
            self.seeded = true;
            let fetched = self.snapshot.as_mut().map(|source| source.fetch());
            match fetched {
                Some(Ok(events)) => {
                    let inserted = self.seed(events);
                    info!(inserted, "seeded buckets from snapshot");
                }
                Some(Err(e)) => warn!(error = %e, "snapshot fetch failed"),
                None => {}
            }
        }

        match self.config.connection.settle_window() {
            Some(window) => {
                self.cancel_timer(TimerKind::Settle);
                self.settle_timer = Some(self.timer.schedule(window, TimerKind::Settle));
            }
            None => self.flush_queue(),
        }

        self.connection.start_heartbeat();
    }

    fn on_message(&mut self, frame: &str) {
        let inbound = match protocol::decode(frame) {
            Ok(inbound) => inbound,
            Err(StreamError::Protocol(kind)) => {
                warn!(%kind, "skipping message of unknown type");
                self.counters.protocol_errors += 1;
                return;
            }
            Err(e) => {
                warn!(error = %e, "skipping malformed message");
                self.counters.parse_errors += 1;
                return;
            }
        };

        if let Some(version) = inbound.protocol_version {
            if self.protocol_version.as_deref() != Some(version.as_str()) {
                debug!(%version, "server protocol version");
                self.protocol_version = Some(version);
            }
        }

        match inbound.message {
            InboundMessage::Initial(events) => {
                let events: Vec<Event> =
                    events.into_iter().filter_map(|w| self.validate(w)).collect();
                let inserted = self.seed(events);
                debug!(inserted, "applied initial snapshot");
            }
            InboundMessage::Event(wire) => self.ingest(wire, false, false),
            InboundMessage::PriorityEvent(wire) => self.ingest(wire, true, false),
            InboundMessage::SessionEvent(wire) => self.ingest(wire, false, true),
            InboundMessage::PrioritySessionEvent(wire) => self.ingest(wire, true, true),
            InboundMessage::SubscriptionConfirmed(topics) => self.registry.confirm(&topics),
            InboundMessage::UnsubscriptionConfirmed(topics) => {
                self.registry.confirm_removal(&topics)
            }
            InboundMessage::Pong => self.connection.record_pong(),
        }
    }

    /// Route one live event: to the queue while settling, else to the buckets.
    fn ingest(&mut self, wire: WireEvent, promote: bool, topic_scoped: bool) {
        let Some(mut event) = self.validate(wire) else {
            return;
        };
        if promote && event.priority == 0 {
            event.priority = 1;
        }
        if topic_scoped && !self.registry.contains(&event.topic_id) {
            debug!(topic = %event.topic_id, "dropping event for unsubscribed topic");
            return;
        }

        if self.settling() {
            self.queue.push(event, self.timer.now());
            return;
        }
        let _ = self.add_event(event);
    }

    fn validate(&mut self, wire: WireEvent) -> Option<Event> {
        let next_id = &mut self.next_local_id;
        match wire.into_event(|| {
            *next_id += 1;
            EventId(*next_id)
        }) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "rejecting event");
                self.counters.rejected_events += 1;
                None
            }
        }
    }

    fn insert(&mut self, event: Event) -> Result<Insertion> {
        let result = self.buckets.add_event(event);
        if result.is_err() {
            self.counters.rejected_events += 1;
        }
        result
    }

    /// Events go to the queue until the open sequence has finished.
    fn settling(&self) -> bool {
        !self.connection.is_open() || self.settle_timer.is_some()
    }

    fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let entries = self.queue.drain();
        debug!(count = entries.len(), "flushing queued events");
        self.seed(entries.into_iter().map(|entry| entry.event).collect());
    }

    fn apply_step(&mut self, step: Step) {
        match step {
            Step::Nothing => {}
            Step::Status(status) => self.publish_status(status),
            Step::Failed(reason) => {
                self.cancel_timer(TimerKind::Settle);
                let reconnect = !self.listeners.is_empty();
                let status = self.connection.fail(&reason, reconnect);
                self.publish_status(status);
            }
        }
    }

    fn publish_status(&mut self, status: ConnectionStatus) {
        self.last_status = Some(status.clone());
        self.listeners.broadcast(StreamUpdate::Status { status });
    }

    fn notify_view(&self) {
        if self.listeners.is_empty() {
            return;
        }
        self.listeners.broadcast(StreamUpdate::View {
            events: self.compute_view(),
        });
    }

    fn schedule_sweep(&mut self) {
        if let Some(interval) = self.config.buckets.sweep_interval() {
            self.sweep_timer = Some(self.timer.schedule(interval, TimerKind::RetentionSweep));
        }
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        let slot = match kind {
            TimerKind::Settle => &mut self.settle_timer,
            TimerKind::RetentionSweep => &mut self.sweep_timer,
            _ => return,
        };
        if let Some(handle) = slot.take() {
            self.timer.cancel(handle);
        }
    }
}
