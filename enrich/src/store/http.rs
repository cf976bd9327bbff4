use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::StoreConfig;
use crate::{bail, enrich_error};
use crate::error::{EnrichError, EnrichResult, ErrorKind};
use crate::selector::SearchQuery;
use crate::store::DocumentStore;
use crate::types::{
    DocumentRef, OperationOutcome, OperationResult, SearchResponse, UpdateOperation,
};

/// HTTP document store client.
///
/// [`HttpStore`] talks to an Elasticsearch-compatible HTTP API: selection queries go to
/// the per-namespace `_search` endpoint and bulk updates go to `_bulk` as newline
/// delimited partial-document update actions.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    took: u64,
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    total: u64,
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_type")]
    kind: String,
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct BulkBody {
    items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    update: BulkItemStatus,
}

#[derive(Debug, Deserialize)]
struct BulkItemStatus {
    status: u16,
    error: Option<serde_json::Value>,
}

impl HttpStore {
    /// Creates a new client for the store at the configured host and port.
    pub fn new(config: &StoreConfig) -> EnrichResult<Self> {
        let client = reqwest::Client::builder().build().map_err(|err| {
            enrich_error!(
                ErrorKind::StoreConnectionFailed,
                "Failed to build the HTTP client",
                source: err
            )
        })?;

        Ok(Self {
            client,
            base_url: config.base_url(),
        })
    }
}

/// Maps a non-success selection status to the matching error.
///
/// A 404 means the namespace or kind does not exist; everything else is reported with
/// the status and the raw response body.
fn selection_error(
    status: StatusCode,
    query: &SearchQuery,
    base_url: &str,
    body: String,
) -> EnrichError {
    if status == StatusCode::NOT_FOUND {
        return enrich_error!(
            ErrorKind::SelectionFailed,
            "Namespace or kind not found in the store",
            format!(
                "namespace {} or kind {} not found at {}",
                query.namespace, query.kind, base_url
            )
        );
    }

    enrich_error!(
        ErrorKind::SelectionFailed,
        "Selection query rejected by the store",
        format!("status {status}: {body}")
    )
}

/// Maps a parsed search body to the selection result.
fn search_response(body: SearchBody) -> SearchResponse {
    let refs = body
        .hits
        .hits
        .into_iter()
        .map(|hit| DocumentRef {
            namespace: hit.index,
            kind: hit.kind,
            id: hit.id,
        })
        .collect();

    SearchResponse {
        refs,
        total_matches: body.hits.total,
        took_ms: body.took,
    }
}

/// Renders a batch as newline delimited bulk update actions.
fn bulk_request_body(batch: &[UpdateOperation]) -> EnrichResult<String> {
    let mut body = String::new();
    for operation in batch {
        let action = json!({
            "update": {
                "_index": operation.target.namespace,
                "_type": operation.target.kind,
                "_id": operation.target.id,
            }
        });
        let document = json!({
            "doc": operation.payload,
            "doc_as_upsert": operation.upsert,
        });

        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&document)?);
        body.push('\n');
    }

    Ok(body)
}

/// Pairs every dispatched operation with its per-item outcome from the bulk response.
fn bulk_results(batch: &[UpdateOperation], body: &BulkBody) -> Vec<OperationResult> {
    batch
        .iter()
        .enumerate()
        .map(|(index, operation)| {
            let outcome = match body.items.get(index) {
                Some(item) => match &item.update.error {
                    Some(error) => OperationOutcome::Failure(error.to_string()),
                    None if item.update.status >= 300 => {
                        OperationOutcome::Failure(format!("status {}", item.update.status))
                    }
                    None => OperationOutcome::Success,
                },
                // The store answered with fewer items than operations sent, so the
                // remaining operations cannot be confirmed as applied.
                None => OperationOutcome::Failure("missing bulk response item".to_string()),
            };

            OperationResult {
                target: operation.target.clone(),
                outcome,
            }
        })
        .collect()
}

impl DocumentStore for HttpStore {
    async fn search(&self, query: &SearchQuery) -> EnrichResult<SearchResponse> {
        let url = format!(
            "{}/{}/{}/_search",
            self.base_url, query.namespace, query.kind
        );

        debug!(url = %url, "executing selection query");

        let response = self
            .client
            .post(&url)
            .json(&query.to_document())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(selection_error(status, query, &self.base_url, body));
        }

        let body: SearchBody = response.json().await?;

        Ok(search_response(body))
    }

    async fn bulk_update(&self, batch: &[UpdateOperation]) -> EnrichResult<Vec<OperationResult>> {
        let url = format!("{}/_bulk", self.base_url);

        debug!(url = %url, batch_size = batch.len(), "dispatching bulk update");

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_request_body(batch)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                ErrorKind::DispatchFailed,
                "Bulk call rejected by the store",
                format!("status {status}: {body}")
            );
        }

        let body: BulkBody = response.json().await?;

        Ok(bulk_results(batch, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;

    fn operation(id: &str, upsert: bool) -> UpdateOperation {
        UpdateOperation {
            target: DocumentRef {
                namespace: "logstash-2016.01.01".to_string(),
                kind: "audit_log".to_string(),
                id: id.to_string(),
            },
            payload: json!({"enriched": {"by": "test"}}),
            upsert,
        }
    }

    fn query() -> SearchQuery {
        SearchQuery {
            namespace: "logstash-2016.01.01".to_string(),
            kind: "audit_log".to_string(),
            filter: FilterConfig {
                field: "correlation.id".to_string(),
                value: "abc".to_string(),
            },
            page_size: 100,
        }
    }

    #[test]
    fn search_hits_are_mapped_to_document_refs() {
        let body: SearchBody = serde_json::from_value(json!({
            "took": 12,
            "hits": {
                "total": 3,
                "hits": [
                    {"_index": "logstash-2016.01.01", "_type": "audit_log", "_id": "doc-0"},
                    {"_index": "logstash-2016.01.01", "_type": "audit_log", "_id": "doc-1"},
                ],
            },
        }))
        .unwrap();

        let response = search_response(body);

        assert_eq!(response.total_matches, 3);
        assert_eq!(response.took_ms, 12);
        assert_eq!(response.refs.len(), 2);
        assert_eq!(response.refs[0].id, "doc-0");
        assert_eq!(response.refs[1].kind, "audit_log");
    }

    #[test]
    fn missing_namespace_is_a_selection_failure_with_the_not_found_detail() {
        let err = selection_error(
            StatusCode::NOT_FOUND,
            &query(),
            "http://localhost:9200",
            String::new(),
        );

        assert_eq!(err.kinds(), vec![ErrorKind::SelectionFailed]);
        let detail = err.detail().unwrap_or_default();
        assert!(detail.contains("logstash-2016.01.01"));
        assert!(detail.contains("not found"));
    }

    #[test]
    fn rejected_selection_reports_status_and_body() {
        let err = selection_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &query(),
            "http://localhost:9200",
            "shard failure".to_string(),
        );

        assert_eq!(err.kinds(), vec![ErrorKind::SelectionFailed]);
        let detail = err.detail().unwrap_or_default();
        assert!(detail.contains("500"));
        assert!(detail.contains("shard failure"));
    }

    #[test]
    fn bulk_request_body_is_newline_delimited_update_actions() {
        let batch = vec![operation("doc-0", false), operation("doc-1", true)];

        let body = bulk_request_body(&batch).unwrap();
        let lines: Vec<serde_json::Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["update"]["_id"], "doc-0");
        assert_eq!(lines[1]["doc"]["enriched"]["by"], "test");
        assert_eq!(lines[1]["doc_as_upsert"], false);
        assert_eq!(lines[2]["update"]["_id"], "doc-1");
        assert_eq!(lines[3]["doc_as_upsert"], true);
    }

    #[test]
    fn bulk_item_error_is_reported_as_an_operation_failure() {
        let batch = vec![operation("doc-0", false), operation("doc-1", false)];
        let body: BulkBody = serde_json::from_value(json!({
            "items": [
                {"update": {"status": 200}},
                {"update": {"status": 409, "error": "VersionConflictEngineException"}},
            ],
        }))
        .unwrap();

        let results = bulk_results(&batch, &body);

        assert_eq!(results[0].outcome, OperationOutcome::Success);
        match &results[1].outcome {
            OperationOutcome::Failure(reason) => {
                assert!(reason.contains("VersionConflictEngineException"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn bulk_item_error_status_without_error_body_is_a_failure() {
        let batch = vec![operation("doc-0", false)];
        let body: BulkBody = serde_json::from_value(json!({
            "items": [{"update": {"status": 503}}],
        }))
        .unwrap();

        let results = bulk_results(&batch, &body);

        assert_eq!(
            results[0].outcome,
            OperationOutcome::Failure("status 503".to_string())
        );
    }

    #[test]
    fn short_bulk_response_fails_the_unconfirmed_operations() {
        let batch = vec![operation("doc-0", false), operation("doc-1", false)];
        let body: BulkBody = serde_json::from_value(json!({
            "items": [{"update": {"status": 200}}],
        }))
        .unwrap();

        let results = bulk_results(&batch, &body);

        assert_eq!(results[0].outcome, OperationOutcome::Success);
        assert_eq!(
            results[1].outcome,
            OperationOutcome::Failure("missing bulk response item".to_string())
        );
    }
}
