//! Batch worker: reads bucket notifications and reconciles them into the
//! attribute store.

pub mod adapters;
pub mod input;

pub use adapters::BucketObjects;
pub use input::{read_events, EventBatch};
