//! Document selection against the store.
//!
//! Runs the single size-bounded term-filter query that decides which documents get
//! enriched. Selection failures are fatal to the job, and a store-reported match count
//! larger than the returned page is surfaced as a truncation warning rather than being
//! silently ignored.

use serde_json::json;
use tracing::{info, warn};

use crate::config::FilterConfig;
use crate::error::EnrichResult;
use crate::store::DocumentStore;
use crate::types::SearchResponse;

/// A size-bounded equality-filter selection query.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Namespace (index) to search in.
    pub namespace: String,
    /// Document kind (type) within the namespace.
    pub kind: String,
    /// Equality filter on a single field.
    pub filter: FilterConfig,
    /// Maximum number of matches returned.
    pub page_size: usize,
}

impl SearchQuery {
    /// Renders the query as the store's query document.
    pub fn to_document(&self) -> serde_json::Value {
        let mut term = serde_json::Map::new();
        term.insert(
            self.filter.field.clone(),
            serde_json::Value::String(self.filter.value.clone()),
        );

        json!({
            "size": self.page_size,
            "query": {
                "filtered": {
                    "filter": {
                        "and": [
                            { "term": term }
                        ]
                    }
                }
            }
        })
    }
}

/// Executes the selection query and reports its outcome.
///
/// Logs the match count and the store-reported execution time. When the store reports
/// more matches than the page size allows, only the first page is enriched and the
/// discrepancy is logged as a warning.
pub async fn select_documents<S: DocumentStore>(
    store: &S,
    query: &SearchQuery,
) -> EnrichResult<SearchResponse> {
    let response = store.search(query).await?;

    info!(
        total_matches = response.total_matches,
        took_ms = response.took_ms,
        "selection query completed"
    );

    if response.total_matches > response.refs.len() as u64 {
        warn!(
            total_matches = response.total_matches,
            page_size = query.page_size,
            "more documents match than the page size allows, only the first page will be enriched"
        );
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn query(page_size: usize) -> SearchQuery {
        SearchQuery {
            namespace: "logs".to_string(),
            kind: "audit_log".to_string(),
            filter: FilterConfig {
                field: "correlation.id".to_string(),
                value: "abc-123".to_string(),
            },
            page_size,
        }
    }

    #[test]
    fn query_document_carries_size_and_term_filter() {
        let document = query(100).to_document();

        assert_eq!(document["size"], 100);
        assert_eq!(
            document["query"]["filtered"]["filter"]["and"][0]["term"]["correlation.id"],
            "abc-123"
        );
    }

    #[tokio::test]
    async fn selection_never_exceeds_page_size() {
        let store = MemoryStore::new();
        store
            .insert_matching("logs", "audit_log", 150, "correlation.id", "abc-123")
            .await;

        let response = select_documents(&store, &query(100)).await.unwrap();

        assert_eq!(response.refs.len(), 100);
        assert_eq!(response.total_matches, 150);
    }
}
