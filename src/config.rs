//! Client configuration.
//!
//! Every field has a default, so a partial JSON document is a valid config:
//!
//! ```
//! use agent_stream::StreamConfig;
//!
//! let config = StreamConfig::from_json_str(r#"{"buckets": {"priority_capacity": 10}}"#).unwrap();
//! assert_eq!(config.buckets.priority_capacity, 10);
//! assert_eq!(config.connection.base_delay_ms, 1000);
//! ```

use crate::display::OverflowStrategy;
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for a [`StreamClient`](crate::StreamClient).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub buckets: BucketConfig,
    pub connection: ConnectionConfig,
    pub heartbeat: HeartbeatConfig,
    pub display: DisplayConfig,
    pub listener: ListenerConfig,
}

impl StreamConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: StreamConfig = serde_json::from_str(json)
            .map_err(|e| StreamError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.buckets.validate()?;
        self.connection.validate()?;
        self.display.validate()?;
        if self.listener.buffer_size == 0 {
            return Err(invalid("listener.buffer_size must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> StreamError {
    StreamError::InvalidConfig(msg.to_string())
}

/// Sizing and retention of the two event buckets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Max events held in the priority bucket.
    /// Default: 200
    pub priority_capacity: usize,

    /// Max events held in the regular bucket.
    /// Default: 500
    pub regular_capacity: usize,

    /// Fraction of `regular_capacity` the regular bucket is trimmed down to
    /// when it overflows.
    /// Default: 0.8
    pub regular_target_fill: f64,

    /// Default: 24 hours
    pub priority_retention_ms: u64,

    /// Default: 4 hours
    pub regular_retention_ms: u64,

    /// How often the retention sweep runs. 0 disables it.
    /// Default: 60 seconds
    pub sweep_interval_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            priority_capacity: 200,
            regular_capacity: 500,
            regular_target_fill: 0.8,
            priority_retention_ms: 24 * 60 * 60 * 1000,
            regular_retention_ms: 4 * 60 * 60 * 1000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl BucketConfig {
    fn validate(&self) -> Result<()> {
        if self.priority_capacity == 0 || self.regular_capacity == 0 {
            return Err(invalid("bucket capacities must be at least 1"));
        }
        if !(self.regular_target_fill > 0.0 && self.regular_target_fill <= 1.0) {
            return Err(invalid("buckets.regular_target_fill must be in (0, 1]"));
        }
        Ok(())
    }

    pub fn priority_retention(&self) -> Duration {
        Duration::from_millis(self.priority_retention_ms)
    }

    pub fn regular_retention(&self) -> Duration {
        Duration::from_millis(self.regular_retention_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

/// Connect timeout and reconnect backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// First reconnect delay; doubles per failed attempt.
    /// Default: 1000ms
    pub base_delay_ms: u64,

    /// Upper bound for any reconnect delay, jitter included.
    /// Default: 30000ms
    pub max_delay_ms: u64,

    /// Uniform jitter applied to each delay, as a fraction of it.
    /// Default: 0.1 (+/-10%)
    pub jitter_ratio: f64,

    /// Failed cycles tolerated before giving up for good.
    /// Default: 10
    pub max_reconnect_attempts: u32,

    /// A connect attempt that has not opened by then is failed.
    /// Default: 5000ms
    pub connect_timeout_ms: u64,

    /// After open, inbound events are held in the queue for this long before
    /// being flushed to the buckets. 0 flushes as part of the open sequence.
    /// Default: 0
    pub settle_window_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_ratio: 0.1,
            max_reconnect_attempts: 10,
            connect_timeout_ms: 5000,
            settle_window_ms: 0,
        }
    }
}

impl ConnectionConfig {
    fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(invalid("connection.base_delay_ms must be at least 1"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid("connection.max_delay_ms must not be below base_delay_ms"));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(invalid("connection.jitter_ratio must be in [0, 1)"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connection.connect_timeout_ms must be at least 1"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn settle_window(&self) -> Option<Duration> {
        (self.settle_window_ms > 0).then(|| Duration::from_millis(self.settle_window_ms))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Ping interval. A connection with no pong for twice this long is
    /// force-closed. 0 disables heartbeats.
    /// Default: 30000ms
    pub interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: 30_000 }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_ms > 0).then(|| Duration::from_millis(self.interval_ms))
    }
}

/// Limits applied to the merged view handed to consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Default: 100
    pub total_limit: usize,

    /// Default: remove_oldest_regular
    pub strategy: OverflowStrategy,

    /// Only used by `strict_limits`.
    /// Default: 50
    pub max_priority_events: usize,

    /// Only used by `strict_limits`.
    /// Default: 50
    pub max_regular_events: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            total_limit: 100,
            strategy: OverflowStrategy::default(),
            max_priority_events: 50,
            max_regular_events: 50,
        }
    }
}

impl DisplayConfig {
    fn validate(&self) -> Result<()> {
        if self.total_limit == 0 {
            return Err(invalid("display.total_limit must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Max undelivered updates per listener before it is dropped.
    /// Default: 64
    pub buffer_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { buffer_size: 64 }
    }
}
