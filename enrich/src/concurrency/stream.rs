use core::pin::Pin;
use core::task::{Context, Poll};
use futures::{Future, Stream, ready};
use pin_project_lite::pin_project;
use std::time::Duration;
use tracing::info;

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::config::BatchConfig;

// Implementation adapted from:
//  https://github.com/tokio-rs/tokio/blob/master/tokio-stream/src/stream_ext/chunks_timeout.rs.
pin_project! {
    /// A stream adapter that batches items based on size limits and timeouts.
    ///
    /// This stream collects items from the underlying stream into batches, emitting them
    /// when either:
    /// - The batch reaches its maximum size
    /// - The flush timeout elapses since the batch's first item was buffered
    /// - A shutdown signal arrives
    /// - The underlying stream ends
    ///
    /// A shutdown signal flushes the currently accumulated batch but does NOT terminate
    /// the stream: cancellation and graceful shutdown share one state machine in
    /// which the producer stops feeding the queue and closes it, and every operation that
    /// was already queued still flows through. The stream only ends when the underlying
    /// queue is closed and drained, which makes the final partial batch impossible to lose.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct BatchStream<B, S: Stream<Item = B>> {
        #[pin]
        stream: S,
        #[pin]
        deadline: Option<tokio::time::Sleep>,
        shutdown_rx: ShutdownRx,
        items: Vec<S::Item>,
        batch_config: BatchConfig,
        reset_timer: bool,
        inner_stream_ended: bool,
    }
}

impl<B, S: Stream<Item = B>> BatchStream<B, S> {
    /// Creates a new [`BatchStream`].
    pub fn wrap(stream: S, batch_config: BatchConfig, shutdown_rx: ShutdownRx) -> Self {
        BatchStream {
            stream,
            deadline: None,
            shutdown_rx,
            items: Vec::with_capacity(batch_config.max_size),
            batch_config,
            reset_timer: true,
            inner_stream_ended: false,
        }
    }
}

impl<B, S: Stream<Item = B>> Stream for BatchStream<B, S> {
    type Item = ShutdownResult<Vec<S::Item>, Vec<S::Item>>;

    /// Polls the stream for the next batch of items.
    ///
    /// The polling state machine balances throughput and latency by collecting items into
    /// batches based on both size and time constraints, while keeping shutdown flushes
    /// and the end-of-queue final batch exact.
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.as_mut().project();

        // Fast path: if the inner stream has already ended, we're done.
        if *this.inner_stream_ended {
            return Poll::Ready(None);
        }

        loop {
            // Shutdown is checked before anything else, so the accumulated batch is
            // flushed on the first poll after the signal. The check registers no waker;
            // a stream parked on an empty queue notices the signal on its next wakeup
            // (new item, flush timer, or queue close). The stream itself keeps draining
            // afterwards until the queue is closed and empty.
            if this.shutdown_rx.has_changed().unwrap_or(false) {
                info!("shutdown signal observed, flushing accumulated batch");

                // Acknowledge that we've seen the shutdown signal to maintain watch semantics.
                this.shutdown_rx.mark_unchanged();

                *this.reset_timer = true;

                // Even an empty batch is emitted so the consumer learns that a
                // shutdown flush happened.
                return Poll::Ready(Some(ShutdownResult::Shutdown(std::mem::take(this.items))));
            }

            // Re-arm the flush timer when a new batch starts accumulating.
            if *this.reset_timer {
                this.deadline
                    .set(Some(tokio::time::sleep(Duration::from_millis(
                        this.batch_config.max_fill_ms,
                    ))));
                *this.reset_timer = false;
            }

            // Pre-allocate batch capacity when starting to collect items.
            if this.items.is_empty() {
                this.items.reserve_exact(this.batch_config.max_size);
            }

            match this.stream.as_mut().poll_next(cx) {
                Poll::Pending => {
                    // Nothing buffered right now, fall through to the timer check.
                    break;
                }
                Poll::Ready(Some(item)) => {
                    this.items.push(item);

                    // A full batch is emitted immediately.
                    if this.items.len() >= this.batch_config.max_size {
                        *this.reset_timer = true;
                        return Poll::Ready(Some(ShutdownResult::Ok(std::mem::take(this.items))));
                    }
                }
                Poll::Ready(None) => {
                    // The queue was closed and fully drained. Emit the final partial
                    // batch if there is one, then terminate.
                    let last = if this.items.is_empty() {
                        None
                    } else {
                        *this.reset_timer = true;
                        Some(ShutdownResult::Ok(std::mem::take(this.items)))
                    };

                    *this.inner_stream_ended = true;

                    return Poll::Ready(last);
                }
            }
        }

        // With an accumulating batch and an expired flush timer, emit what we have so
        // low-volume runs still make progress.
        if !this.items.is_empty()
            && let Some(deadline) = this.deadline.as_pin_mut()
        {
            // Registers the waker when the timer has not elapsed yet.
            ready!(deadline.poll(cx));
            *this.reset_timer = true;

            return Poll::Ready(Some(ShutdownResult::Ok(std::mem::take(this.items))));
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use core::task::Poll;
    use futures::StreamExt;
    use futures::future::poll_fn;
    use pin_project_lite::pin_project;
    use tokio::sync::mpsc;

    pin_project! {
        struct TwoThenPending {
            emitted: usize,
        }
    }

    impl TwoThenPending {
        fn new() -> Self {
            Self { emitted: 0 }
        }
    }

    impl Stream for TwoThenPending {
        type Item = i32;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            match self.emitted {
                0 => {
                    self.emitted = 1;
                    Poll::Ready(Some(1))
                }
                1 => {
                    self.emitted = 2;
                    Poll::Ready(Some(2))
                }
                _ => Poll::Pending,
            }
        }
    }

    #[tokio::test]
    async fn emits_full_batches_then_final_partial_batch() {
        let (_, shutdown_rx) = create_shutdown_channel();
        let batch_config = BatchConfig {
            max_size: 2,
            max_fill_ms: 10_000,
        };

        let mut stream = Box::pin(BatchStream::wrap(
            futures::stream::iter(vec![1, 2, 3]),
            batch_config,
            shutdown_rx,
        ));

        assert_eq!(
            stream.next().await,
            Some(ShutdownResult::Ok(vec![1, 2])),
            "expected size-based emission"
        );
        assert_eq!(
            stream.next().await,
            Some(ShutdownResult::Ok(vec![3])),
            "expected final partial batch on stream end"
        );
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_partial_batch_when_flush_timer_expires() {
        let (_, shutdown_rx) = create_shutdown_channel();
        let batch_config = BatchConfig {
            max_size: 10,
            max_fill_ms: 100,
        };

        let mut stream = Box::pin(BatchStream::wrap(
            TwoThenPending::new(),
            batch_config,
            shutdown_rx,
        ));

        // The first poll buffers both items and arms the flush timer.
        poll_fn(|cx| match stream.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Ready(()),
            _ => panic!("expected pending"),
        })
        .await;

        tokio::time::advance(Duration::from_millis(101)).await;

        assert_eq!(stream.next().await, Some(ShutdownResult::Ok(vec![1, 2])));
    }

    #[tokio::test]
    async fn shutdown_flushes_batch_and_keeps_draining_queued_items() {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let batch_config = BatchConfig {
            max_size: 10,
            max_fill_ms: 10_000,
        };

        let (tx, rx) = mpsc::channel(16);
        let queue = futures::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await;
            item.map(|item| (item, rx))
        });
        let mut stream = Box::pin(BatchStream::wrap(queue, batch_config, shutdown_rx));

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();

        // Buffer both items, then stay pending since the batch is below the size limit.
        poll_fn(|cx| match stream.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Ready(()),
            _ => panic!("expected pending"),
        })
        .await;

        shutdown_tx.shutdown().unwrap();

        assert_eq!(
            stream.next().await,
            Some(ShutdownResult::Shutdown(vec![1, 2])),
            "expected shutdown flush of the accumulated batch"
        );

        // Items queued before the channel closes still flow through after shutdown.
        tx.send(3).await.unwrap();
        drop(tx);

        assert_eq!(stream.next().await, Some(ShutdownResult::Ok(vec![3])));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn empty_stream_ends_without_emitting_a_batch() {
        let (_, shutdown_rx) = create_shutdown_channel();
        let batch_config = BatchConfig {
            max_size: 10,
            max_fill_ms: 10_000,
        };

        let mut stream = Box::pin(BatchStream::wrap(
            futures::stream::iter(Vec::<i32>::new()),
            batch_config,
            shutdown_rx,
        ));

        assert_eq!(stream.next().await, None);
    }
}
