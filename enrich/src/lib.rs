//! Asynchronous batch enrichment of documents in a remote store.
//!
//! The crate selects every document matching an equality filter and applies a
//! partial-update payload to each of them through a bounded-concurrency bulk-mutation
//! engine. Operations are queued, batched by size and time, dispatched as bulk calls by
//! a pool of workers, and accounted per operation. Shutdown is an explicit rendezvous
//! with the producer and every worker, so no accepted operation is ever dropped.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod job;
mod macros;
pub mod results;
pub mod selector;
pub mod store;
pub mod types;
pub mod workers;
