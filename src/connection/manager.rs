//! Connection state machine.

use super::backoff::Backoff;
use super::timer::{TimerHandle, TimerKind, TimerService};
use super::transport::Transport;
use crate::config::{ConnectionConfig, HeartbeatConfig};
use crate::error::{Result, StreamError};
use crate::protocol::OutboundMessage;
use crate::types::{ConnectionState, ConnectionStatus, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of feeding the state machine an input.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Step {
    /// Stale or redundant input; nothing changed.
    Nothing,
    /// State changed; consumers should see this status.
    Status(ConnectionStatus),
    /// The current attempt or connection failed. The owner decides whether to
    /// reconnect by calling [`ConnectionManager::fail`].
    Failed(String),
}

/// Owns the transport and every connection-related timer.
pub struct ConnectionManager {
    config: ConnectionConfig,
    heartbeat_interval: Option<Duration>,
    backoff: Backoff,
    transport: Box<dyn Transport>,
    timer: Arc<dyn TimerService>,

    state: ConnectionState,
    /// Failed cycles since the last successful open.
    attempt: u32,
    /// Set when reconnects were exhausted (as opposed to a manual disconnect).
    exhausted: bool,
    last_pong_at: Timestamp,

    connect_timeout: Option<TimerHandle>,
    reconnect_timer: Option<TimerHandle>,
    heartbeat_timer: Option<TimerHandle>,
}

impl ConnectionManager {
    /// Create an idle manager. Nothing is opened until [`connect`](Self::connect).
    pub fn new(
        config: &ConnectionConfig,
        heartbeat: &HeartbeatConfig,
        transport: Box<dyn Transport>,
        timer: Arc<dyn TimerService>,
    ) -> Self {
        Self {
            config: config.clone(),
            heartbeat_interval: heartbeat.interval(),
            backoff: Backoff::from_config(config),
            transport,
            timer,
            state: ConnectionState::Idle,
            attempt: 0,
            exhausted: false,
            last_pong_at: Timestamp::default(),
            connect_timeout: None,
            reconnect_timer: None,
            heartbeat_timer: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Failed cycles since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// When the server was last heard from (open or pong).
    pub fn last_pong_at(&self) -> Timestamp {
        self.last_pong_at
    }

    /// Start connecting from `idle` or skip a pending backoff.
    pub fn connect(&mut self) -> Result<Step> {
        match self.state {
            ConnectionState::ClosedTerminal if self.exhausted => Err(StreamError::Fatal {
                attempts: self.attempt,
            }),
            ConnectionState::ClosedTerminal => Err(StreamError::Shutdown),
            ConnectionState::Connecting | ConnectionState::Open => Ok(Step::Nothing),
            ConnectionState::Idle | ConnectionState::ReconnectScheduled => {
                self.cancel(TimerKind::Reconnect);
                Ok(self.start_attempt())
            }
        }
    }

    fn start_attempt(&mut self) -> Step {
        self.state = ConnectionState::Connecting;
        self.cancel(TimerKind::ConnectTimeout);
        self.connect_timeout = Some(
            self.timer
                .schedule(self.config.connect_timeout(), TimerKind::ConnectTimeout),
        );
        debug!(attempt = self.attempt, "opening transport");

        match self.transport.open() {
            Ok(()) => Step::Status(ConnectionStatus::Connecting {
                attempt: self.attempt,
            }),
            Err(e) => Step::Failed(e.to_string()),
        }
    }

    /// Transport reported open.
    pub fn on_opened(&mut self) -> Step {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "ignoring open outside of a connect attempt");
            return Step::Nothing;
        }
        self.cancel(TimerKind::ConnectTimeout);
        self.attempt = 0;
        self.state = ConnectionState::Open;
        self.last_pong_at = self.timer.now();
        info!("connection open");
        Step::Status(ConnectionStatus::Connected)
    }

    /// Transport reported close or error.
    pub fn on_connection_lost(&mut self, reason: &str) -> Step {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => Step::Failed(reason.to_string()),
            _ => {
                debug!(state = %self.state, reason, "ignoring close outside of a live connection");
                Step::Nothing
            }
        }
    }

    /// Tear down the failed connection and decide what comes next.
    ///
    /// With `reconnect` false the manager goes idle. Otherwise a reconnect is
    /// scheduled unless the attempt budget is spent, in which case the
    /// manager becomes terminal.
    pub fn fail(&mut self, reason: &str, reconnect: bool) -> ConnectionStatus {
        self.cancel(TimerKind::ConnectTimeout);
        self.cancel(TimerKind::Heartbeat);
        self.transport.close();

        if !reconnect {
            info!(reason, "connection lost with no listeners, going idle");
            self.state = ConnectionState::Idle;
            return ConnectionStatus::Idle;
        }

        if self.attempt >= self.config.max_reconnect_attempts {
            warn!(
                reason,
                attempts = self.attempt,
                "max reconnection attempts reached, giving up"
            );
            self.state = ConnectionState::ClosedTerminal;
            self.exhausted = true;
            return ConnectionStatus::Failed {
                attempts: self.attempt,
            };
        }

        let delay = self.backoff.delay(self.attempt);
        self.attempt += 1;
        self.cancel(TimerKind::Reconnect);
        self.reconnect_timer = Some(self.timer.schedule(delay, TimerKind::Reconnect));
        self.state = ConnectionState::ReconnectScheduled;
        info!(
            reason,
            delay_ms = delay.as_millis() as u64,
            attempt = self.attempt,
            "scheduling reconnection"
        );
        ConnectionStatus::Reconnecting {
            attempt: self.attempt,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Handle a timer this manager owns. Other kinds are ignored.
    pub fn on_timer(&mut self, handle: TimerHandle, kind: TimerKind) -> Step {
        let slot = match kind {
            TimerKind::ConnectTimeout => &mut self.connect_timeout,
            TimerKind::Reconnect => &mut self.reconnect_timer,
            TimerKind::Heartbeat => &mut self.heartbeat_timer,
            TimerKind::Settle | TimerKind::RetentionSweep => return Step::Nothing,
        };
        if *slot != Some(handle) {
            debug!(?kind, "ignoring stale timer");
            return Step::Nothing;
        }
        *slot = None;

        match (kind, self.state) {
            (TimerKind::ConnectTimeout, ConnectionState::Connecting) => {
                warn!(
                    timeout_ms = self.config.connect_timeout_ms,
                    "connect attempt timed out"
                );
                Step::Failed("connect timeout".to_string())
            }
            (TimerKind::Reconnect, ConnectionState::ReconnectScheduled) => self.start_attempt(),
            (TimerKind::Heartbeat, ConnectionState::Open) => self.heartbeat_tick(),
            _ => Step::Nothing,
        }
    }

    /// Begin pinging. Called once the open sequence has completed.
    pub fn start_heartbeat(&mut self) {
        if !self.is_open() {
            return;
        }
        if let Some(interval) = self.heartbeat_interval {
            self.cancel(TimerKind::Heartbeat);
            self.heartbeat_timer = Some(self.timer.schedule(interval, TimerKind::Heartbeat));
        }
    }

    fn heartbeat_tick(&mut self) -> Step {
        let Some(interval) = self.heartbeat_interval else {
            return Step::Nothing;
        };

        let silent = self.timer.now().since(self.last_pong_at);
        if silent > interval * 2 {
            warn!(
                silent_ms = silent.as_millis() as u64,
                "no pong within two heartbeat intervals, closing"
            );
            return Step::Failed("heartbeat timeout".to_string());
        }

        let step = self.send(&OutboundMessage::Ping);
        if step == Step::Nothing {
            self.heartbeat_timer = Some(self.timer.schedule(interval, TimerKind::Heartbeat));
        }
        step
    }

    /// Mark the server alive as of now.
    pub fn record_pong(&mut self) {
        self.last_pong_at = self.timer.now();
    }

    /// Send a control message on the open transport.
    pub fn send(&mut self, message: &OutboundMessage) -> Step {
        if !self.is_open() {
            debug!(?message, "not open, dropping outbound message");
            return Step::Nothing;
        }
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound message");
                return Step::Nothing;
            }
        };
        match self.transport.send(&frame) {
            Ok(()) => Step::Nothing,
            Err(e) => {
                warn!(error = %e, "send failed");
                Step::Failed(e.to_string())
            }
        }
    }

    /// Cancel every timer, close the transport and stop for good.
    pub fn disconnect(&mut self) -> Step {
        self.cancel(TimerKind::ConnectTimeout);
        self.cancel(TimerKind::Reconnect);
        self.cancel(TimerKind::Heartbeat);

        let previous = self.state;
        if matches!(previous, ConnectionState::Open | ConnectionState::Connecting) {
            self.transport.close();
        }
        self.state = ConnectionState::ClosedTerminal;

        if previous == ConnectionState::ClosedTerminal {
            Step::Nothing
        } else {
            info!(from = %previous, "disconnected");
            Step::Status(ConnectionStatus::Disconnected)
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        let slot = match kind {
            TimerKind::ConnectTimeout => &mut self.connect_timeout,
            TimerKind::Reconnect => &mut self.reconnect_timer,
            TimerKind::Heartbeat => &mut self.heartbeat_timer,
            TimerKind::Settle | TimerKind::RetentionSweep => return,
        };
        if let Some(handle) = slot.take() {
            self.timer.cancel(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ManualTimer;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Log {
        opens: usize,
        closes: usize,
        sent: Vec<String>,
        fail_open: bool,
    }

    struct FakeTransport(Arc<Mutex<Log>>);

    impl Transport for FakeTransport {
        fn open(&mut self) -> Result<()> {
            let mut log = self.0.lock();
            log.opens += 1;
            if log.fail_open {
                return Err(StreamError::Transport("refused".into()));
            }
            Ok(())
        }

        fn send(&mut self, frame: &str) -> Result<()> {
            self.0.lock().sent.push(frame.to_string());
            Ok(())
        }

        fn close(&mut self) {
            self.0.lock().closes += 1;
        }
    }

    fn manager(max_attempts: u32) -> (ConnectionManager, ManualTimer, Arc<Mutex<Log>>) {
        let timer = ManualTimer::new(Timestamp(0));
        let log = Arc::new(Mutex::new(Log::default()));
        let config = ConnectionConfig {
            jitter_ratio: 0.0,
            max_reconnect_attempts: max_attempts,
            ..Default::default()
        };
        let manager = ConnectionManager::new(
            &config,
            &HeartbeatConfig::default(),
            Box::new(FakeTransport(log.clone())),
            Arc::new(timer.clone()),
        );
        (manager, timer, log)
    }

    /// Advance the clock, routing fired timers into the manager. Failures
    /// always reconnect.
    fn advance(manager: &mut ConnectionManager, timer: &ManualTimer, by: Duration) -> Vec<Step> {
        let mut steps = Vec::new();
        timer.advance(by, |handle, kind| {
            let step = manager.on_timer(handle, kind);
            if let Step::Failed(reason) = &step {
                let _ = manager.fail(reason, true);
            }
            steps.push(step);
        });
        steps
    }

    #[test]
    fn test_connect_open_cycle() {
        let (mut m, timer, log) = manager(10);
        assert_eq!(
            m.connect().unwrap(),
            Step::Status(ConnectionStatus::Connecting { attempt: 0 })
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(timer.scheduled(TimerKind::ConnectTimeout).len(), 1);

        assert_eq!(m.on_opened(), Step::Status(ConnectionStatus::Connected));
        assert_eq!(m.state(), ConnectionState::Open);
        assert!(timer.scheduled(TimerKind::ConnectTimeout).is_empty());
        assert_eq!(log.lock().opens, 1);

        // Second connect while open is a no-op
        assert_eq!(m.connect().unwrap(), Step::Nothing);
    }

    #[test]
    fn test_connect_timeout_schedules_reconnect() {
        let (mut m, timer, log) = manager(10);
        let _ = m.connect().unwrap();

        let steps = advance(&mut m, &timer, Duration::from_millis(5000));
        assert_eq!(steps, vec![Step::Failed("connect timeout".into())]);
        assert_eq!(m.state(), ConnectionState::ReconnectScheduled);
        assert_eq!(log.lock().closes, 1);
        assert_eq!(timer.scheduled(TimerKind::Reconnect), vec![Timestamp(6000)]);
    }

    #[test]
    fn test_backoff_delays_double_until_cap() {
        let (mut m, timer, _log) = manager(20);
        let _ = m.connect().unwrap();
        let _ = m.on_opened();

        let mut delays = Vec::new();
        for _ in 0..7 {
            match m.fail("closed", true) {
                ConnectionStatus::Reconnecting { delay_ms, .. } => delays.push(delay_ms),
                other => panic!("Expected Reconnecting, got {:?}", other),
            }
            // Let the reconnect timer fire, then fail the attempt again
            let deadline = timer.scheduled(TimerKind::Reconnect)[0];
            let mut fired = Vec::new();
            timer.advance(deadline.since(timer.now()), |h, k| fired.push(m.on_timer(h, k)));
            assert!(matches!(fired[..], [Step::Status(ConnectionStatus::Connecting { .. })]));
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_attempts_exhausted_is_terminal() {
        let (mut m, timer, log) = manager(3);
        log.lock().fail_open = true;

        let step = m.connect().unwrap();
        assert_eq!(step, Step::Failed("Transport error: refused".into()));
        let mut status = m.fail("refused", true);

        // Each reconnect fails immediately on open
        while m.state() == ConnectionState::ReconnectScheduled {
            timer.advance(Duration::from_secs(60), |h, k| {
                if let Step::Failed(reason) = m.on_timer(h, k) {
                    status = m.fail(&reason, true);
                }
            });
        }

        assert_eq!(status, ConnectionStatus::Failed { attempts: 3 });
        assert_eq!(m.state(), ConnectionState::ClosedTerminal);
        assert_eq!(log.lock().opens, 4);
        assert_eq!(timer.pending(), 0);
        assert!(matches!(m.connect(), Err(StreamError::Fatal { attempts: 3 })));
    }

    #[test]
    fn test_open_resets_attempts() {
        let (mut m, _timer, _log) = manager(10);
        let _ = m.connect().unwrap();
        let _ = m.fail("boom", true);
        let _ = m.fail("boom", true);
        assert_eq!(m.attempt(), 2);

        let _ = m.connect().unwrap();
        let _ = m.on_opened();
        assert_eq!(m.attempt(), 0);
    }

    #[test]
    fn test_heartbeat_pings_then_times_out() {
        let (mut m, timer, log) = manager(10);
        let _ = m.connect().unwrap();
        let _ = m.on_opened();
        m.start_heartbeat();

        // Pings at 30s and 60s, no pong ever arrives
        let steps = advance(&mut m, &timer, Duration::from_secs(60));
        assert_eq!(steps, vec![Step::Nothing, Step::Nothing]);
        assert_eq!(log.lock().sent, vec![r#"{"action":"ping"}"#; 2]);

        let steps = advance(&mut m, &timer, Duration::from_secs(30));
        assert_eq!(steps, vec![Step::Failed("heartbeat timeout".into())]);
        assert_eq!(m.state(), ConnectionState::ReconnectScheduled);
    }

    #[test]
    fn test_pong_keeps_connection_alive() {
        let (mut m, timer, _log) = manager(10);
        let _ = m.connect().unwrap();
        let _ = m.on_opened();
        m.start_heartbeat();

        for _ in 0..10 {
            let _ = advance(&mut m, &timer, Duration::from_secs(30));
            m.record_pong();
        }
        assert_eq!(m.state(), ConnectionState::Open);
        assert_eq!(m.last_pong_at(), timer.now());
    }

    #[test]
    fn test_disconnect_cancels_everything() {
        let (mut m, timer, log) = manager(10);
        let _ = m.connect().unwrap();
        let _ = m.on_opened();
        m.start_heartbeat();

        assert_eq!(m.disconnect(), Step::Status(ConnectionStatus::Disconnected));
        assert_eq!(timer.pending(), 0);
        assert_eq!(log.lock().closes, 1);
        assert_eq!(m.disconnect(), Step::Nothing);
        assert!(matches!(m.connect(), Err(StreamError::Shutdown)));
    }

    #[test]
    fn test_disconnect_during_backoff_stops_reconnects() {
        let (mut m, timer, log) = manager(10);
        let _ = m.connect().unwrap();
        let _ = m.fail("closed", true);
        let _ = m.disconnect();

        let steps = advance(&mut m, &timer, Duration::from_secs(120));
        assert!(steps.is_empty());
        assert_eq!(log.lock().opens, 1);
        assert_eq!(m.state(), ConnectionState::ClosedTerminal);
    }

    #[test]
    fn test_stale_handle_ignored() {
        let (mut m, _timer, _log) = manager(10);
        let _ = m.connect().unwrap();
        let _ = m.on_opened();
        assert_eq!(m.on_timer(TimerHandle(9999), TimerKind::Heartbeat), Step::Nothing);
        assert_eq!(m.on_connection_lost("late"), Step::Failed("late".into()));
        let _ = m.fail("late", true);
        // A second close for the same failure is ignored
        assert_eq!(m.on_connection_lost("late again"), Step::Nothing);
    }

    #[test]
    fn test_no_listeners_goes_idle() {
        let (mut m, timer, _log) = manager(10);
        let _ = m.connect().unwrap();
        let _ = m.on_opened();
        assert_eq!(m.fail("closed", false), ConnectionStatus::Idle);
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(timer.pending(), 0);
    }
}
