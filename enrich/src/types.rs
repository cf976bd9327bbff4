//! Core data types flowing through the enrichment pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to exactly one document in the store.
///
/// Produced by the selector and carried through the pipeline unchanged. The triple of
/// namespace, kind, and id is the store's addressing scheme for a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Logical grouping of documents in the store, e.g. an index.
    pub namespace: String,
    /// Sub-classification of documents within a namespace, e.g. a type.
    pub kind: String,
    /// Store-assigned identifier of the document.
    pub id: String,
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.id)
    }
}

/// A pending partial update for a single document.
///
/// Created once per matched document, queued once, and consumed exactly once by a
/// worker. The payload is an opaque structured value that is merged into the target
/// document by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOperation {
    /// The document this update applies to.
    pub target: DocumentRef,
    /// Partial document merged into the target.
    pub payload: serde_json::Value,
    /// Whether the store should create the document when it does not exist.
    pub upsert: bool,
}

/// Outcome of dispatching a single [`UpdateOperation`].
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    /// The store accepted the update.
    Success,
    /// The store rejected the update, or the whole batch failed at the transport level.
    Failure(String),
}

impl OperationOutcome {
    /// Returns `true` for [`OperationOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }
}

/// Per-operation result produced after a dispatch call completes.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// The document the operation targeted.
    pub target: DocumentRef,
    /// Whether the update was applied.
    pub outcome: OperationOutcome,
}

/// Final accounting for a completed enrichment job.
///
/// Finalized only after the mutation queue is fully drained and every in-flight
/// dispatch call has returned, so the counters are exact.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    /// Number of documents the selector returned.
    pub total_selected: u64,
    /// Number of operations the store accepted.
    pub total_succeeded: u64,
    /// Number of operations that failed, at the item or transport level.
    pub total_failed: u64,
    /// The failed operations, with the reason for each.
    pub failures: Vec<OperationResult>,
}

impl JobSummary {
    /// Returns `true` when every selected document was enriched.
    pub fn is_full_success(&self) -> bool {
        self.total_failed == 0
    }
}

/// Result of a selection query against the store.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// The matched documents, capped at the configured page size.
    pub refs: Vec<DocumentRef>,
    /// Total number of matches the store reported, which may exceed `refs.len()`.
    pub total_matches: u64,
    /// Store-reported query execution time in milliseconds.
    pub took_ms: u64,
}
