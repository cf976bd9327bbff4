//! Concurrency utilities coordinating the enrichment pipeline.
//!
//! The [`shutdown`] module implements a broadcast-based cooperative cancellation pattern
//! where a single signal reaches the producer and every worker simultaneously. The
//! [`stream`] module implements the size- and time-based batching of queued update
//! operations, with the shutdown signal integrated directly into the stream so no
//! accumulated batch is ever dropped.

pub mod shutdown;
pub mod stream;
