//! Subscriptions in both directions.
//!
//! - [`SubscriptionRegistry`]: topics the client wants from the server,
//!   resynchronized on every successful open
//! - [`ListenerHub`]: consumers of this client, each fed computed views and
//!   connection status over a bounded channel
//!
//! Listeners that fall behind are dropped rather than allowed to block the
//! event loop.
//!
//! # Example
//!
//! ```ignore
//! let handle = client.subscribe();
//! loop {
//!     match handle.recv() {
//!         Ok(StreamUpdate::View { events }) => render(&events),
//!         Ok(StreamUpdate::Status { status }) => show(status),
//!         Ok(StreamUpdate::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod listeners;
mod registry;

pub use listeners::{DropReason, ListenerHandle, ListenerHub, ListenerId, StreamUpdate};
pub use registry::SubscriptionRegistry;
