//! Transport lifecycle: connect, heartbeat, backoff-scheduled reconnect.
//!
//! State machine:
//!
//! ```text
//! idle -> connecting -> open
//! open | connecting -> reconnect_scheduled   (close/error/timeout, listeners remain)
//! reconnect_scheduled -> connecting          (backoff timer fires)
//! any -> closed_terminal                     (disconnect, or attempts exhausted)
//! ```
//!
//! All waiting is expressed as timers from a [`TimerService`]. Every timer
//! firing is checked against the handle currently held for its kind and
//! against the current state, so a timer that outlived its purpose is a no-op.

mod backoff;
mod manager;
mod timer;
mod transport;

pub use backoff::Backoff;
pub use manager::{ConnectionManager, Step};
pub use timer::{ManualTimer, SystemTimer, TimerHandle, TimerKind, TimerService};
pub use transport::{Transport, TransportEvent};
