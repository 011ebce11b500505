//! tally-agent: samples host and process statistics and pushes them to a
//! tally server.
//!
//! Two independent loops share one [`InMemoryStore`](tally_store::InMemoryStore):
//! the [`Collector`] writes a sample batch every poll interval, and the
//! [`Synchronizer`] pushes a snapshot of everything every report interval.

pub mod client;
pub mod collector;
pub mod error;
pub mod sync;

pub use client::PushClient;
pub use collector::{Collector, POLL_COUNT, RANDOM_VALUE, Sampler, SystemSampler};
pub use error::{SyncError, SyncResult};
pub use sync::Synchronizer;
