//! Bounded event buckets.
//!
//! Events are split by priority into two independently bounded buckets:
//! - **Priority**: strict FIFO, one eviction per overflowing insert
//! - **Regular**: batch eviction down to a target fill ratio
//!
//! Pressure on one bucket never evicts from the other. Both buckets are also
//! swept by age, with a longer retention window for priority events.

mod bucket;
mod store;

pub use bucket::{Bucket, EvictionPolicy};
pub use store::{BucketClass, BucketStore, Insertion, SweepResult};
