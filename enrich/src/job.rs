use futures::future::select_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::config::{BatchConfig, JobConfig};
use crate::enrich_error;
use crate::error::{EnrichResult, ErrorKind};
use crate::results::ResultCollector;
use crate::selector::{SearchQuery, select_documents};
use crate::store::DocumentStore;
use crate::types::{DocumentRef, JobSummary, UpdateOperation};
use crate::workers::WorkerPool;

#[derive(Debug)]
enum JobState {
    NotStarted,
    Started {
        total_selected: u64,
        producer: JoinHandle<()>,
        pool: WorkerPool,
    },
}

/// A single batch enrichment job run.
///
/// [`EnrichmentJob`] selects the documents matching the configured filter and applies the
/// partial-update payload to every one of them through a bounded-concurrency worker
/// pool. The job moves through running, draining, flushed, and stopped phases: draining
/// begins when the producer closes the queue, flushed is reached when every worker has
/// dispatched its final batch and joined, and only then is the summary finalized. There
/// is no timing involved in that sequence, completion is awaited explicitly from every
/// task.
#[derive(Debug)]
pub struct EnrichmentJob<S> {
    config: Arc<JobConfig>,
    store: S,
    collector: ResultCollector,
    state: JobState,
    shutdown_tx: ShutdownTx,
}

impl<S> EnrichmentJob<S>
where
    S: DocumentStore + Clone + Send + Sync + 'static,
{
    /// Creates a new job from a configuration and a store.
    pub fn new(config: JobConfig, store: S) -> Self {
        // We create a watch channel of unit type since this is just used to notify the
        // producer and all workers that shutdown is needed.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            store,
            collector: ResultCollector::new(),
            state: JobState::NotStarted,
            shutdown_tx,
        }
    }

    /// Returns a handle that can be used to cancel the job from another task.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Runs the selection query and starts the producer and the worker pool.
    ///
    /// Fails fatally on invalid configuration and on selection errors, in which case no
    /// operation has been queued yet.
    pub async fn start(&mut self) -> EnrichResult<()> {
        if let JobState::Started { .. } = self.state {
            bail!(
                ErrorKind::InvalidState,
                "Job was already started",
                "an enrichment job can only be started once"
            );
        }

        self.config.validate().map_err(|err| {
            enrich_error!(
                ErrorKind::ConfigError,
                "Invalid job configuration",
                source: err
            )
        })?;

        info!(
            namespace = %self.config.namespace,
            kind = %self.config.kind,
            filter_field = %self.config.filter.field,
            "starting enrichment job"
        );

        let query = SearchQuery {
            namespace: self.config.namespace.clone(),
            kind: self.config.kind.clone(),
            filter: self.config.filter.clone(),
            page_size: self.config.page_size,
        };
        let response = select_documents(&self.store, &query).await?;
        let total_selected = response.refs.len() as u64;

        // One bounded queue per worker: the producer suspends when every queue is full,
        // so memory stays bounded no matter how large the selection is.
        let capacity = queue_capacity(&self.config.batch);
        let mut senders = Vec::with_capacity(self.config.max_workers);
        let mut receivers = Vec::with_capacity(self.config.max_workers);
        for _ in 0..self.config.max_workers {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            receivers.push(rx);
        }

        let pool = WorkerPool::spawn(
            receivers,
            self.config.batch.clone(),
            &self.shutdown_tx,
            self.store.clone(),
            self.collector.clone(),
        );

        let producer = tokio::spawn(run_producer(
            response.refs,
            self.config.payload.clone(),
            self.config.upsert,
            senders,
            self.shutdown_tx.subscribe(),
        ));

        self.state = JobState::Started {
            total_selected,
            producer,
            pool,
        };

        Ok(())
    }

    /// Waits for the job to complete and returns the final summary.
    ///
    /// The producer is awaited first, which guarantees the queue is closed, then every
    /// worker is joined, which guarantees the queue is drained and every in-flight
    /// dispatch call has returned. Only after that rendezvous is the summary finalized.
    pub async fn wait(self) -> EnrichResult<JobSummary> {
        let JobState::Started {
            total_selected,
            producer,
            pool,
        } = self.state
        else {
            bail!(
                ErrorKind::InvalidState,
                "Job was not started",
                "call start() before waiting for the job"
            );
        };

        if let Err(join_err) = producer.await {
            return Err(enrich_error!(
                ErrorKind::WorkerPanic,
                "Producer task panicked",
                join_err
            ));
        }

        info!("producer finished, waiting for workers to flush");

        pool.wait_all().await?;

        self.collector.finalize(total_selected).await;

        let summary = self.collector.summary().await?;

        info!(
            total_selected = summary.total_selected,
            total_succeeded = summary.total_succeeded,
            total_failed = summary.total_failed,
            "enrichment job completed"
        );

        Ok(summary)
    }

    /// Signals cooperative cancellation.
    ///
    /// The producer stops enqueueing and closes the queue; already-queued operations
    /// still drain through the workers as in a normal shutdown.
    pub fn shutdown(&self) {
        info!("trying to shut down the enrichment job");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the job: {}", err);
            return;
        }

        info!("shutdown signal successfully sent to the producer and all workers");
    }

    /// Signals cancellation and waits for the drained summary.
    pub async fn shutdown_and_wait(self) -> EnrichResult<JobSummary> {
        self.shutdown();
        self.wait().await
    }
}

// Upper bound on the per-worker queue, so an extreme batch size from the CLI cannot
// request more buffering than tokio's semaphore supports.
const MAX_QUEUE_CAPACITY: usize = 8_192;

/// Per-worker queue capacity: one full batch of headroom, clamped to a sane bound.
fn queue_capacity(batch: &BatchConfig) -> usize {
    batch.max_size.clamp(1, MAX_QUEUE_CAPACITY)
}

/// Reserves a send slot on whichever worker queue has room first.
///
/// A worker that is parked inside a dispatch call simply has a full queue; the slot is
/// taken on any other worker with room, so one slow bulk call never stalls the rest of
/// the pool. Returns [`None`] once every worker queue is closed.
async fn acquire_slot(
    senders: &[mpsc::Sender<UpdateOperation>],
) -> Option<mpsc::Permit<'_, UpdateOperation>> {
    let mut open: Vec<&mpsc::Sender<UpdateOperation>> =
        senders.iter().filter(|sender| !sender.is_closed()).collect();

    while !open.is_empty() {
        let reservations = open
            .iter()
            .copied()
            .map(|sender| Box::pin(sender.reserve()))
            .collect::<Vec<_>>();
        let (result, index, rest) = select_all(reservations).await;
        drop(rest);

        match result {
            Ok(permit) => return Some(permit),
            // That worker is gone; keep routing to the remaining ones.
            Err(_) => {
                open.remove(index);
            }
        }
    }

    None
}

/// Producer loop feeding one update operation per selected document into the worker
/// queues.
///
/// Dropping the senders at the end is the queues' "no more input" signal, so workers
/// stop waiting for new operations as soon as their queue is drained.
async fn run_producer(
    refs: Vec<DocumentRef>,
    payload: serde_json::Value,
    upsert: bool,
    senders: Vec<mpsc::Sender<UpdateOperation>>,
    mut shutdown_rx: ShutdownRx,
) {
    for target in refs {
        let operation = UpdateOperation {
            target,
            payload: payload.clone(),
            upsert,
        };

        tokio::select! {
            slot = acquire_slot(&senders) => {
                let Some(permit) = slot else {
                    // All workers are gone, nothing can consume further operations.
                    error!("mutation queues closed unexpectedly, stopping producer");
                    return;
                };
                permit.send(operation);
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown signaled, producer stops enqueueing");
                return;
            }
        }
    }

    info!("all selected documents queued for enrichment");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operation(id: &str) -> UpdateOperation {
        UpdateOperation {
            target: DocumentRef {
                namespace: "ns".to_string(),
                kind: "kind".to_string(),
                id: id.to_string(),
            },
            payload: json!({"enriched": true}),
            upsert: false,
        }
    }

    #[tokio::test]
    async fn slot_is_reserved_on_a_worker_with_room_when_another_is_saturated() {
        let (full_tx, mut full_rx) = mpsc::channel(1);
        let (open_tx, mut open_rx) = mpsc::channel(1);

        full_tx.send(operation("queued")).await.unwrap();

        let senders = vec![full_tx, open_tx];
        let permit = acquire_slot(&senders).await.unwrap();
        permit.send(operation("routed"));

        assert_eq!(open_rx.try_recv().unwrap().target.id, "routed");
        assert_eq!(full_rx.try_recv().unwrap().target.id, "queued");
    }

    #[tokio::test]
    async fn closed_worker_queues_are_skipped_until_none_remain() {
        let (closed_tx, closed_rx) = mpsc::channel::<UpdateOperation>(1);
        let (open_tx, mut open_rx) = mpsc::channel(1);
        drop(closed_rx);

        let senders = vec![closed_tx.clone(), open_tx];
        let permit = acquire_slot(&senders).await.unwrap();
        permit.send(operation("routed"));
        assert_eq!(open_rx.try_recv().unwrap().target.id, "routed");

        drop(open_rx);
        assert!(acquire_slot(&senders).await.is_none());
    }

    #[test]
    fn queue_capacity_is_clamped_for_extreme_batch_sizes() {
        let huge = BatchConfig {
            max_size: usize::MAX,
            max_fill_ms: 1,
        };
        assert_eq!(queue_capacity(&huge), MAX_QUEUE_CAPACITY);

        let small = BatchConfig {
            max_size: 10,
            max_fill_ms: 1,
        };
        assert_eq!(queue_capacity(&small), 10);
    }
}
