use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{EnrichResult, ErrorKind};
use crate::types::{JobSummary, OperationResult};

#[derive(Debug, Default)]
struct Inner {
    total_selected: u64,
    succeeded: u64,
    failed: u64,
    failures: Vec<OperationResult>,
    finalized: bool,
}

/// Concurrency-safe aggregation of per-operation outcomes.
///
/// [`ResultCollector`] is cloned into every worker, which report their batch outcomes in
/// parallel. The summary only becomes readable after [`ResultCollector::finalize`] has
/// been called, which the job does once the queue is drained and all in-flight dispatch
/// calls have returned, so a readable summary is always an exact one.
#[derive(Debug, Clone)]
pub struct ResultCollector {
    inner: Arc<Mutex<Inner>>,
}

impl ResultCollector {
    /// Creates a new empty collector.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Records the outcomes of one dispatched batch.
    pub async fn record(&self, results: Vec<OperationResult>) {
        let mut inner = self.inner.lock().await;

        for result in results {
            if result.outcome.is_success() {
                inner.succeeded += 1;
            } else {
                inner.failed += 1;
                inner.failures.push(result);
            }
        }
    }

    /// Marks the counters as final.
    ///
    /// Must only be called after every worker has completed, since results recorded
    /// afterwards would not be what [`ResultCollector::summary`] reported.
    pub(crate) async fn finalize(&self, total_selected: u64) {
        let mut inner = self.inner.lock().await;
        inner.total_selected = total_selected;
        inner.finalized = true;
    }

    /// Returns the final job summary.
    ///
    /// Fails with [`ErrorKind::InvalidState`] while workers may still be reporting,
    /// because the counters are not final until then.
    pub async fn summary(&self) -> EnrichResult<JobSummary> {
        let inner = self.inner.lock().await;

        if !inner.finalized {
            bail!(
                ErrorKind::InvalidState,
                "Job summary is not final yet",
                "the summary can only be read after the job reached its stopped state"
            );
        }

        Ok(JobSummary {
            total_selected: inner.total_selected,
            total_succeeded: inner.succeeded,
            total_failed: inner.failed,
            failures: inner.failures.clone(),
        })
    }
}

impl Default for ResultCollector {
    fn default() -> Self {
        Self::new()
    }
}
