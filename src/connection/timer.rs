//! Timer service used for every delayed action in the client.
//!
//! The client never sleeps. It asks a [`TimerService`] to schedule a
//! [`TimerKind`] and is later handed back `(TimerHandle, TimerKind)` by
//! whoever drives it. Two drivers exist:
//! - [`ManualTimer`]: virtual clock advanced explicitly (tests, simulations)
//! - [`SystemTimer`]: wall clock, polled by [`StreamRuntime`](crate::StreamRuntime)

use crate::types::Timestamp;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// What a timer is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    ConnectTimeout,
    Reconnect,
    Heartbeat,
    /// End of the post-open settling window.
    Settle,
    RetentionSweep,
}

/// Identifies one scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// Schedules and cancels timers, and tells the time.
pub trait TimerService: Send + Sync {
    fn now(&self) -> Timestamp;

    fn schedule(&self, delay: Duration, kind: TimerKind) -> TimerHandle;

    /// Cancel a timer. Cancelling a fired or unknown handle is a no-op.
    fn cancel(&self, handle: TimerHandle);
}

/// Pending timers ordered by deadline, then by scheduling order.
#[derive(Debug, Default)]
struct TimerQueue {
    next_id: u64,
    pending: BTreeMap<(Timestamp, u64), TimerKind>,
    deadlines: HashMap<u64, Timestamp>,
}

impl TimerQueue {
    fn schedule(&mut self, deadline: Timestamp, kind: TimerKind) -> TimerHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.pending.insert((deadline, id), kind);
        self.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(deadline) = self.deadlines.remove(&handle.0) {
            self.pending.remove(&(deadline, handle.0));
        }
    }

    fn next_deadline(&self) -> Option<Timestamp> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Pop the earliest timer due at or before `now`.
    fn pop_due(&mut self, now: Timestamp) -> Option<(Timestamp, TimerHandle, TimerKind)> {
        let (&(deadline, id), _) = self.pending.iter().next()?;
        if deadline > now {
            return None;
        }
        let kind = self.pending.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        Some((deadline, TimerHandle(id), kind))
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug)]
struct ManualState {
    now: Timestamp,
    queue: TimerQueue,
}

/// Virtual-clock timer. Clones share the same clock and queue.
#[derive(Clone, Debug)]
pub struct ManualTimer {
    inner: Arc<Mutex<ManualState>>,
}

impl ManualTimer {
    pub fn new(start: Timestamp) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                now: start,
                queue: TimerQueue::default(),
            })),
        }
    }

    /// Move the clock forward by `by`, firing due timers in deadline order.
    ///
    /// The clock is set to each timer's deadline before it fires, so timers
    /// scheduled from inside `fire` are honored within the same advance.
    pub fn advance<F>(&self, by: Duration, mut fire: F)
    where
        F: FnMut(TimerHandle, TimerKind),
    {
        let target = self.now().saturating_add(by);
        loop {
            let due = {
                let mut state = self.inner.lock();
                match state.queue.pop_due(target) {
                    Some((deadline, handle, kind)) => {
                        state.now = state.now.max(deadline);
                        Some((handle, kind))
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match due {
                Some((handle, kind)) => fire(handle, kind),
                None => break,
            }
        }
    }

    /// Number of timers still pending.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Pending timers of one kind, with their deadlines.
    pub fn scheduled(&self, kind: TimerKind) -> Vec<Timestamp> {
        self.inner
            .lock()
            .queue
            .pending
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|((deadline, _), _)| *deadline)
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.inner.lock().queue.next_deadline()
    }
}

impl TimerService for ManualTimer {
    fn now(&self) -> Timestamp {
        self.inner.lock().now
    }

    fn schedule(&self, delay: Duration, kind: TimerKind) -> TimerHandle {
        let mut state = self.inner.lock();
        let deadline = state.now.saturating_add(delay);
        state.queue.schedule(deadline, kind)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.inner.lock().queue.cancel(handle);
    }
}

/// Wall-clock timer. Something must poll [`pop_due`](Self::pop_due);
/// [`StreamRuntime`](crate::StreamRuntime) does.
#[derive(Clone, Debug, Default)]
pub struct SystemTimer {
    queue: Arc<Mutex<TimerQueue>>,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.queue.lock().next_deadline()
    }

    /// Pop the next timer whose deadline has passed.
    pub fn pop_due(&self) -> Option<(TimerHandle, TimerKind)> {
        self.queue
            .lock()
            .pop_due(Timestamp::now())
            .map(|(_, handle, kind)| (handle, kind))
    }

    /// Time left until the earliest deadline, if any timer is pending.
    /// Never below 1ms, the resolution of the clock.
    pub fn until_next(&self) -> Option<Duration> {
        self.next_deadline().map(|deadline| {
            deadline
                .since(Timestamp::now())
                .max(Duration::from_millis(1))
        })
    }
}

impl TimerService for SystemTimer {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn schedule(&self, delay: Duration, kind: TimerKind) -> TimerHandle {
        let deadline = Timestamp::now().saturating_add(delay);
        self.queue.lock().schedule(deadline, kind)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.queue.lock().cancel(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_fires_in_deadline_order() {
        let timer = ManualTimer::new(Timestamp(0));
        timer.schedule(Duration::from_millis(300), TimerKind::Heartbeat);
        timer.schedule(Duration::from_millis(100), TimerKind::Reconnect);
        timer.schedule(Duration::from_millis(200), TimerKind::Settle);

        let mut fired = Vec::new();
        timer.advance(Duration::from_millis(250), |_, kind| fired.push(kind));
        assert_eq!(fired, vec![TimerKind::Reconnect, TimerKind::Settle]);
        assert_eq!(timer.now(), Timestamp(250));
        assert_eq!(timer.pending(), 1);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let timer = ManualTimer::new(Timestamp(0));
        let handle = timer.schedule(Duration::from_millis(10), TimerKind::ConnectTimeout);
        timer.cancel(handle);
        timer.cancel(handle);

        let mut fired = 0;
        timer.advance(Duration::from_secs(1), |_, _| fired += 1);
        assert_eq!(fired, 0);
    }

    #[test]
    fn test_clock_reads_deadline_inside_fire() {
        let timer = ManualTimer::new(Timestamp(1_000));
        let inner = timer.clone();
        timer.schedule(Duration::from_millis(40), TimerKind::Heartbeat);

        let mut seen = Vec::new();
        timer.advance(Duration::from_millis(100), |_, _| seen.push(inner.now()));
        assert_eq!(seen, vec![Timestamp(1_040)]);
        assert_eq!(timer.now(), Timestamp(1_100));
    }

    #[test]
    fn test_timers_scheduled_while_firing_run_in_same_advance() {
        let timer = ManualTimer::new(Timestamp(0));
        let inner = timer.clone();
        timer.schedule(Duration::from_millis(10), TimerKind::Heartbeat);

        let mut count = 0;
        timer.advance(Duration::from_millis(35), |_, kind| {
            count += 1;
            inner.schedule(Duration::from_millis(10), kind);
        });
        // fires at 10, 20, 30; the one for 40 stays pending
        assert_eq!(count, 3);
        assert_eq!(timer.scheduled(TimerKind::Heartbeat), vec![Timestamp(40)]);
    }

    #[test]
    fn test_huge_delay_lands_in_far_future() {
        let timer = ManualTimer::new(Timestamp(1_700_000_000_000));
        timer.schedule(Duration::from_millis(u64::MAX), TimerKind::RetentionSweep);
        assert_eq!(timer.scheduled(TimerKind::RetentionSweep), vec![Timestamp(i64::MAX)]);

        let mut fired = 0;
        timer.advance(Duration::from_secs(3600), |_, _| fired += 1);
        assert_eq!(fired, 0);
    }

    #[test]
    fn test_system_timer_wait_rounds_up() {
        let timer = SystemTimer::new();
        timer.schedule(Duration::ZERO, TimerKind::Settle);
        assert_eq!(timer.until_next(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_system_timer_pops_expired() {
        let timer = SystemTimer::new();
        timer.schedule(Duration::ZERO, TimerKind::RetentionSweep);
        let far = timer.schedule(Duration::from_secs(3600), TimerKind::Reconnect);

        assert_eq!(timer.pop_due().map(|(_, k)| k), Some(TimerKind::RetentionSweep));
        assert!(timer.pop_due().is_none());
        assert!(timer.until_next().unwrap() > Duration::from_secs(3000));
        timer.cancel(far);
        assert!(timer.next_deadline().is_none());
    }
}
