//! Configuration types for enrichment jobs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Batch size cannot be zero.
    #[error("`batch.max_size` cannot be zero")]
    BatchMaxSizeZero,
    /// Worker count cannot be zero.
    #[error("`max_workers` cannot be zero")]
    MaxWorkersZero,
    /// Selection page size cannot be zero.
    #[error("`page_size` cannot be zero")]
    PageSizeZero,
    /// The filter value must be set, otherwise the query would match unrelated documents.
    #[error("`filter.value` must not be empty")]
    EmptyFilterValue,
    /// The partial-update payload must be a JSON object.
    #[error("`payload` must be a JSON object")]
    PayloadNotAnObject,
}

/// Network location of the document store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Hostname of the store's HTTP API.
    pub host: String,
    /// Port of the store's HTTP API.
    #[serde(default = "default_store_port")]
    pub port: u16,
}

impl StoreConfig {
    /// Default HTTP API port.
    pub const DEFAULT_PORT: u16 = 9200;

    /// Returns the base URL for the store's HTTP API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn default_store_port() -> u16 {
    StoreConfig::DEFAULT_PORT
}

/// Equality filter selecting the documents to enrich.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FilterConfig {
    /// Name of the field holding the correlation identifier.
    pub field: String,
    /// Value of the field. All documents matching it will be updated.
    pub value: String,
}

/// Batch processing configuration for the worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of operations in a single bulk dispatch call.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
    /// Maximum time, in milliseconds, to wait for a batch to fill before dispatching.
    #[serde(default = "default_batch_max_fill_ms")]
    pub max_fill_ms: u64,
}

impl BatchConfig {
    /// Default maximum batch size.
    pub const DEFAULT_MAX_SIZE: usize = 10;

    /// Default maximum fill time in milliseconds.
    pub const DEFAULT_MAX_FILL_MS: u64 = 60_000;

    /// Validates batch configuration settings.
    ///
    /// Ensures max_size is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::BatchMaxSizeZero);
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            max_fill_ms: default_batch_max_fill_ms(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

fn default_batch_max_fill_ms() -> u64 {
    BatchConfig::DEFAULT_MAX_FILL_MS
}

/// Complete configuration for a single enrichment job run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobConfig {
    /// Location of the document store.
    pub store: StoreConfig,
    /// Namespace (index) holding the documents to enrich.
    pub namespace: String,
    /// Document kind (type) within the namespace.
    pub kind: String,
    /// Equality filter selecting the documents.
    pub filter: FilterConfig,
    /// Partial document merged into every matched document.
    pub payload: serde_json::Value,
    /// Whether missing documents are created on update instead of failing it.
    #[serde(default)]
    pub upsert: bool,
    /// Maximum number of documents the selection query returns.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Batch processing settings.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Number of concurrent workers draining the mutation queue.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl JobConfig {
    /// Default maximum number of documents returned by the selection query.
    pub const DEFAULT_PAGE_SIZE: usize = 100;

    /// Default number of concurrent workers.
    pub const DEFAULT_MAX_WORKERS: usize = 10;

    /// Validates the full job configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.batch.validate()?;

        if self.max_workers == 0 {
            return Err(ValidationError::MaxWorkersZero);
        }

        if self.page_size == 0 {
            return Err(ValidationError::PageSizeZero);
        }

        if self.filter.value.is_empty() {
            return Err(ValidationError::EmptyFilterValue);
        }

        if !self.payload.is_object() {
            return Err(ValidationError::PayloadNotAnObject);
        }

        Ok(())
    }
}

fn default_page_size() -> usize {
    JobConfig::DEFAULT_PAGE_SIZE
}

fn default_max_workers() -> usize {
    JobConfig::DEFAULT_MAX_WORKERS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> JobConfig {
        JobConfig {
            store: StoreConfig {
                host: "localhost".to_string(),
                port: 9200,
            },
            namespace: "logstash-2015.01.01".to_string(),
            kind: "audit_log".to_string(),
            filter: FilterConfig {
                field: "correlation.id".to_string(),
                value: "abc-123".to_string(),
            },
            payload: serde_json::json!({"enriched": true}),
            upsert: false,
            page_size: 100,
            batch: BatchConfig::default(),
            max_workers: 10,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = sample_config();
        config.batch.max_size = 0;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::BatchMaxSizeZero)
        ));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let mut config = sample_config();
        config.payload = serde_json::json!("not an object");

        assert!(matches!(
            config.validate(),
            Err(ValidationError::PayloadNotAnObject)
        ));
    }

    #[test]
    fn empty_filter_value_is_rejected() {
        let mut config = sample_config();
        config.filter.value = String::new();

        assert!(matches!(
            config.validate(),
            Err(ValidationError::EmptyFilterValue)
        ));
    }
}
