//! Transport seam.
//!
//! A transport carries text frames to and from the backend. Opening is
//! asynchronous: [`Transport::open`] only starts the attempt, and the outcome
//! comes back as a [`TransportEvent`] fed to
//! [`StreamClient::handle_transport_event`](crate::StreamClient::handle_transport_event).

use crate::error::Result;

/// Stream transport (typically a WebSocket).
pub trait Transport: Send {
    /// Begin connecting. An `Err` fails the attempt immediately.
    fn open(&mut self) -> Result<()>;

    fn send(&mut self, frame: &str) -> Result<()>;

    /// Close the transport. Must be safe to call when already closed.
    fn close(&mut self);
}

/// Something the transport observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { reason: String },
    Error(String),
}
