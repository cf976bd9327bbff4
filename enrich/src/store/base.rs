use std::future::Future;

use crate::error::EnrichResult;
use crate::selector::SearchQuery;
use crate::types::{OperationResult, SearchResponse, UpdateOperation};

/// Trait for document stores that can be queried and bulk-updated.
///
/// [`DocumentStore`] is the capability interface between the enrichment engine and the
/// backing store. Implementations should keep partial updates idempotent per document
/// identifier, since the engine gives no ordering guarantees between operations and
/// callers may re-dispatch recorded failures.
pub trait DocumentStore {
    /// Executes a size-bounded selection query.
    ///
    /// Returns the matched document references together with the total match count the
    /// store reported, which may exceed the number of returned references. Failing to
    /// execute the query, including a missing namespace or kind, is an error.
    fn search(&self, query: &SearchQuery) -> impl Future<Output = EnrichResult<SearchResponse>> + Send;

    /// Dispatches a batch of partial updates as one bulk call.
    ///
    /// On success, returns exactly one [`OperationResult`] per input operation, in input
    /// order: a store-side rejection of an individual operation is a `Failure` result,
    /// not an error. A call-level transport failure is returned as `Err`, and the caller
    /// is responsible for accounting every operation of the batch as failed.
    fn bulk_update(
        &self,
        batch: &[UpdateOperation],
    ) -> impl Future<Output = EnrichResult<Vec<OperationResult>>> + Send;
}
