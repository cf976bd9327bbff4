//! Document store abstractions for enrichment jobs.
//!
//! This module provides the core [`DocumentStore`] trait together with the in-memory
//! implementation used in tests and the HTTP implementation used against a real store.

mod base;
pub mod http;
pub mod memory;

pub use base::DocumentStore;
