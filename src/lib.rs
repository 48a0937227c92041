//! # Agent Stream
//!
//! A client-side, bounded, prioritized, real-time view of the event stream
//! produced by a multi-agent orchestration backend, built to survive an
//! unreliable network.
//!
//! ## Core Concepts
//!
//! - **Buckets**: priority and regular events are held separately, each with
//!   its own capacity, eviction policy and retention window
//! - **Connection**: connect timeout, exponential backoff with jitter,
//!   heartbeat-based stall detection, explicit cancellation
//! - **Subscriptions**: the desired topic set survives reconnects and is
//!   resent in full on every open
//! - **Queue**: events arriving while the connection settles are consolidated
//!   per topic before being applied
//! - **View**: both buckets merged by timestamp and trimmed by an overflow
//!   strategy
//!
//! ## Example
//!
//! ```ignore
//! use agent_stream::{StreamConfig, StreamRuntime, StreamUpdate};
//!
//! let runtime = StreamRuntime::spawn(StreamConfig::default(), |sink| {
//!     MyWebSocket::new("wss://example/stream", sink)
//! })?;
//! runtime.add_topics(["session-1", "session-2"])?;
//!
//! let handle = runtime.subscribe()?;
//! while let Ok(update) = handle.recv() {
//!     if let StreamUpdate::View { events } = update {
//!         render(&events);
//!     }
//! }
//! ```

pub mod buckets;
pub mod client;
pub mod config;
pub mod connection;
pub mod display;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod runtime;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use buckets::{Bucket, BucketClass, BucketStore, EvictionPolicy, Insertion, SweepResult};
pub use client::{SnapshotSource, StreamClient};
pub use config::{
    BucketConfig, ConnectionConfig, DisplayConfig, HeartbeatConfig, ListenerConfig, StreamConfig,
};
pub use connection::{
    Backoff, ConnectionManager, ManualTimer, Step, SystemTimer, TimerHandle, TimerKind,
    TimerService, Transport, TransportEvent,
};
pub use display::{DisplayLimiter, OverflowStrategy};
pub use error::{Result, StreamError};
pub use protocol::{Inbound, InboundMessage, OutboundMessage, WireEvent};
pub use queue::{EventQueue, PendingEntry};
pub use runtime::{StreamRuntime, TransportSink};
pub use subscriptions::{
    DropReason, ListenerHandle, ListenerHub, ListenerId, StreamUpdate, SubscriptionRegistry,
};
pub use types::*;
