use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{EnrichResult, ErrorKind};
use crate::selector::SearchQuery;
use crate::store::DocumentStore;
use crate::types::{
    DocumentRef, OperationOutcome, OperationResult, SearchResponse, UpdateOperation,
};

#[derive(Debug)]
struct Inner {
    documents: HashMap<DocumentRef, serde_json::Value>,
    rejections: HashMap<DocumentRef, String>,
    transport_failure: Option<String>,
    dispatched_batch_sizes: Vec<usize>,
    search_calls: u64,
}

/// In-memory document store for testing and development purposes.
///
/// [`MemoryStore`] holds documents keyed by their [`DocumentRef`] and applies partial
/// updates as recursive JSON object merges, mirroring the semantics of a real store's
/// partial-document update. Test hooks allow injecting per-document rejections and a
/// call-level transport failure, and the sizes of dispatched batches are recorded so
/// shutdown behavior can be asserted on.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates a new empty memory store.
    pub fn new() -> Self {
        let inner = Inner {
            documents: HashMap::new(),
            rejections: HashMap::new(),
            transport_failure: None,
            dispatched_batch_sizes: Vec::new(),
            search_calls: 0,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Seeds a document into the store.
    pub async fn insert(&self, target: DocumentRef, document: serde_json::Value) {
        let mut inner = self.inner.lock().await;
        inner.documents.insert(target, document);
    }

    /// Seeds `count` documents whose `field` holds `value`, with sequential ids.
    pub async fn insert_matching(
        &self,
        namespace: &str,
        kind: &str,
        count: usize,
        field: &str,
        value: &str,
    ) {
        let mut inner = self.inner.lock().await;
        for i in 0..count {
            let target = DocumentRef {
                namespace: namespace.to_string(),
                kind: kind.to_string(),
                id: format!("doc-{i}"),
            };
            let mut document = serde_json::Map::new();
            document.insert(field.to_string(), serde_json::Value::String(value.to_string()));
            inner
                .documents
                .insert(target, serde_json::Value::Object(document));
        }
    }

    /// Configures the store to reject updates for `target` with `reason`.
    pub async fn reject_with(&self, target: DocumentRef, reason: &str) {
        let mut inner = self.inner.lock().await;
        inner.rejections.insert(target, reason.to_string());
    }

    /// Configures every subsequent bulk call to fail at the transport level.
    pub async fn fail_transport(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        inner.transport_failure = Some(reason.to_string());
    }

    /// Returns a copy of the stored document for `target`, if any.
    pub async fn document(&self, target: &DocumentRef) -> Option<serde_json::Value> {
        let inner = self.inner.lock().await;
        inner.documents.get(target).cloned()
    }

    /// Returns the sizes of all dispatched batches, in dispatch order.
    pub async fn dispatched_batch_sizes(&self) -> Vec<usize> {
        let inner = self.inner.lock().await;
        inner.dispatched_batch_sizes.clone()
    }

    /// Returns the number of selection queries executed against this store.
    pub async fn search_calls(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.search_calls
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    async fn search(&self, query: &SearchQuery) -> EnrichResult<SearchResponse> {
        let mut inner = self.inner.lock().await;
        inner.search_calls += 1;

        let mut refs: Vec<DocumentRef> = inner
            .documents
            .iter()
            .filter(|(target, document)| {
                target.namespace == query.namespace
                    && target.kind == query.kind
                    && document
                        .get(&query.filter.field)
                        .and_then(|value| value.as_str())
                        .is_some_and(|value| value == query.filter.value)
            })
            .map(|(target, _)| target.clone())
            .collect();

        // Deterministic ordering so truncation always keeps the same page.
        refs.sort_by(|a, b| a.id.cmp(&b.id));

        let total_matches = refs.len() as u64;
        refs.truncate(query.page_size);

        info!(total_matches, returned = refs.len(), "memory store search");

        Ok(SearchResponse {
            refs,
            total_matches,
            took_ms: 0,
        })
    }

    async fn bulk_update(&self, batch: &[UpdateOperation]) -> EnrichResult<Vec<OperationResult>> {
        let mut inner = self.inner.lock().await;

        if let Some(reason) = inner.transport_failure.clone() {
            bail!(
                ErrorKind::DispatchFailed,
                "Bulk call failed at the transport level",
                reason
            );
        }

        inner.dispatched_batch_sizes.push(batch.len());

        let mut results = Vec::with_capacity(batch.len());
        for operation in batch {
            let rejection = inner.rejections.get(&operation.target).cloned();

            let outcome = if let Some(reason) = rejection {
                OperationOutcome::Failure(reason)
            } else if let Some(document) = inner.documents.get_mut(&operation.target) {
                merge_partial(document, &operation.payload);
                OperationOutcome::Success
            } else if operation.upsert {
                inner
                    .documents
                    .insert(operation.target.clone(), operation.payload.clone());
                OperationOutcome::Success
            } else {
                OperationOutcome::Failure("document missing".to_string())
            };

            results.push(OperationResult {
                target: operation.target.clone(),
                outcome,
            });
        }

        Ok(results)
    }
}

/// Merges `payload` into `document` the way a partial-document update does.
///
/// Objects merge recursively, every other value replaces the existing one.
fn merge_partial(document: &mut serde_json::Value, payload: &serde_json::Value) {
    match (document, payload) {
        (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(key) {
                    Some(slot) => merge_partial(slot, value),
                    None => {
                        existing.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (document, payload) => *document = payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use serde_json::json;

    fn target(id: &str) -> DocumentRef {
        DocumentRef {
            namespace: "logs".to_string(),
            kind: "audit_log".to_string(),
            id: id.to_string(),
        }
    }

    fn operation(id: &str, payload: serde_json::Value) -> UpdateOperation {
        UpdateOperation {
            target: target(id),
            payload,
            upsert: false,
        }
    }

    #[tokio::test]
    async fn partial_update_merges_into_existing_document() {
        let store = MemoryStore::new();
        store
            .insert(target("a"), json!({"correlation.id": "abc", "level": "info"}))
            .await;

        let results = store
            .bulk_update(&[operation("a", json!({"enriched": true}))])
            .await
            .unwrap();

        assert!(results[0].outcome.is_success());
        assert_eq!(
            store.document(&target("a")).await.unwrap(),
            json!({"correlation.id": "abc", "level": "info", "enriched": true})
        );
    }

    #[tokio::test]
    async fn redispatching_the_same_operation_is_idempotent() {
        let store = MemoryStore::new();
        store.insert(target("a"), json!({"level": "info"})).await;

        let op = operation("a", json!({"enriched": true}));
        store.bulk_update(std::slice::from_ref(&op)).await.unwrap();
        let after_first = store.document(&target("a")).await.unwrap();

        // Simulated retry of the same operation.
        store.bulk_update(std::slice::from_ref(&op)).await.unwrap();
        let after_second = store.document(&target("a")).await.unwrap();

        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn upsert_creates_missing_documents() {
        let store = MemoryStore::new();

        let op = UpdateOperation {
            target: target("new"),
            payload: json!({"enriched": true}),
            upsert: true,
        };
        let results = store.bulk_update(&[op]).await.unwrap();

        assert!(results[0].outcome.is_success());
        assert_eq!(
            store.document(&target("new")).await.unwrap(),
            json!({"enriched": true})
        );
    }

    #[tokio::test]
    async fn missing_document_without_upsert_fails_that_operation_only() {
        let store = MemoryStore::new();
        store.insert(target("a"), json!({"level": "info"})).await;

        let results = store
            .bulk_update(&[
                operation("a", json!({"enriched": true})),
                operation("missing", json!({"enriched": true})),
            ])
            .await
            .unwrap();

        assert!(results[0].outcome.is_success());
        assert!(!results[1].outcome.is_success());
    }

    #[tokio::test]
    async fn search_caps_results_at_page_size() {
        let store = MemoryStore::new();
        store
            .insert_matching("logs", "audit_log", 5, "correlation.id", "abc")
            .await;

        let query = SearchQuery {
            namespace: "logs".to_string(),
            kind: "audit_log".to_string(),
            filter: FilterConfig {
                field: "correlation.id".to_string(),
                value: "abc".to_string(),
            },
            page_size: 3,
        };
        let response = store.search(&query).await.unwrap();

        assert_eq!(response.refs.len(), 3);
        assert_eq!(response.total_matches, 5);
    }
}
