//! Worker pool draining the mutation queue.
//!
//! A fixed number of identical workers each own one bounded queue, fed by the producer.
//! Each worker batches operations through a [`BatchStream`] and dispatches every batch
//! as one bulk call, reporting per-operation outcomes to the [`ResultCollector`]. A
//! transport-level bulk failure is accounted as a failure of every operation in that
//! batch; no automatic retry is performed.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx, ShutdownTx};
use crate::concurrency::stream::BatchStream;
use crate::config::BatchConfig;
use crate::enrich_error;
use crate::error::{EnrichResult, ErrorKind};
use crate::results::ResultCollector;
use crate::store::DocumentStore;
use crate::types::{OperationOutcome, OperationResult, UpdateOperation};

/// Turns a worker's queue receiver into a stream of operations.
///
/// The stream ends when the queue is closed and fully drained. The worker owns its
/// receiver outright, so receiving never contends with another task; a worker parked
/// inside a dispatch call cannot hold up the rest of the pool.
fn queue_stream(receiver: mpsc::Receiver<UpdateOperation>) -> impl Stream<Item = UpdateOperation> {
    futures::stream::unfold(receiver, |mut receiver| async move {
        let operation = receiver.recv().await;
        operation.map(|operation| (operation, receiver))
    })
}

/// Pool of workers draining the mutation queue concurrently.
///
/// [`WorkerPool`] owns all worker tasks through a [`JoinSet`], which is what makes the
/// shutdown rendezvous definite: [`WorkerPool::wait_all`] returns only once every worker
/// has dispatched its final batch and exited, never on the basis of a timer.
#[derive(Debug)]
pub struct WorkerPool {
    join_set: JoinSet<EnrichResult<()>>,
}

impl WorkerPool {
    /// Spawns one worker per receiver.
    ///
    /// Each worker subscribes to the shutdown signal independently so that an observed
    /// shutdown flushes its accumulated batch immediately.
    pub fn spawn<S>(
        receivers: Vec<mpsc::Receiver<UpdateOperation>>,
        batch_config: BatchConfig,
        shutdown_tx: &ShutdownTx,
        store: S,
        collector: ResultCollector,
    ) -> Self
    where
        S: DocumentStore + Clone + Send + Sync + 'static,
    {
        let mut join_set = JoinSet::new();

        for (worker_id, receiver) in receivers.into_iter().enumerate() {
            join_set.spawn(run_worker(
                worker_id,
                receiver,
                batch_config.clone(),
                shutdown_tx.subscribe(),
                store.clone(),
                collector.clone(),
            ));
        }

        Self { join_set }
    }

    /// Waits for all workers to complete.
    ///
    /// This method blocks until every worker has drained its share of the queue and
    /// every in-flight dispatch call has returned. Worker panics are collected and
    /// returned as aggregated errors.
    pub async fn wait_all(mut self) -> EnrichResult<()> {
        let mut errors = Vec::new();

        while let Some(result) = self.join_set.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(error = %err, "worker completed with error");
                    errors.push(err);
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("worker task was cancelled");
                    } else {
                        errors.push(enrich_error!(
                            ErrorKind::WorkerPanic,
                            "Worker task panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }
}

/// Single worker loop: batch queued operations and dispatch each batch as one bulk call.
async fn run_worker<S>(
    worker_id: usize,
    receiver: mpsc::Receiver<UpdateOperation>,
    batch_config: BatchConfig,
    shutdown_rx: ShutdownRx,
    store: S,
    collector: ResultCollector,
) -> EnrichResult<()>
where
    S: DocumentStore + Send + Sync,
{
    let queue = queue_stream(receiver);
    let mut batches = Box::pin(BatchStream::wrap(queue, batch_config, shutdown_rx));

    while let Some(batch) = batches.next().await {
        let operations = match batch {
            ShutdownResult::Ok(operations) => operations,
            ShutdownResult::Shutdown(operations) => {
                debug!(worker_id, "flushing batch early due to shutdown");
                operations
            }
        };

        if operations.is_empty() {
            continue;
        }

        dispatch_batch(worker_id, &store, &collector, operations).await;
    }

    debug!(worker_id, "worker drained the queue and is stopping");

    Ok(())
}

/// Dispatches one batch and records every operation's outcome.
async fn dispatch_batch<S>(
    worker_id: usize,
    store: &S,
    collector: &ResultCollector,
    operations: Vec<UpdateOperation>,
) where
    S: DocumentStore + Send + Sync,
{
    debug!(worker_id, batch_size = operations.len(), "dispatching batch");

    match store.bulk_update(&operations).await {
        Ok(results) => collector.record(results).await,
        Err(err) => {
            warn!(
                worker_id,
                batch_size = operations.len(),
                error = %err,
                "bulk call failed, accounting every operation in the batch as failed"
            );

            let reason = err.to_string();
            let results = operations
                .into_iter()
                .map(|operation| OperationResult {
                    target: operation.target,
                    outcome: OperationOutcome::Failure(reason.clone()),
                })
                .collect();

            collector.record(results).await;
        }
    }
}
