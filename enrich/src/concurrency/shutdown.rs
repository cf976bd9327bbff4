//! Shutdown signaling primitives for pipeline coordination.
//!
//! Abstracts tokio's watch channels into a broadcast shutdown signal: one transmitter
//! notifies the producer and all workers at once, and each receiver observes the signal
//! independently without consuming it.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// Cloneable handle used to signal cooperative cancellation to every subscribed task.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Signals shutdown to all subscribed receivers.
    ///
    /// Fails when no receivers are alive anymore, which means every task already
    /// terminated and there is nothing left to notify.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Creates a new receiver subscribed to this transmitter.
    ///
    /// The receiver starts in the unsignaled state. A shutdown sent before the
    /// subscription will not be observed, so tasks must subscribe before the job
    /// can be cancelled.
    pub fn subscribe(&self) -> ShutdownRx {
        let mut rx = self.0.subscribe();
        rx.mark_unchanged();
        rx
    }
}

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown channel.
///
/// The returned receiver starts in the unsignaled state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, mut rx) = watch::channel(());
    rx.mark_unchanged();

    (ShutdownTx(tx), rx)
}

/// Result of an operation that may have been interrupted by shutdown.
///
/// [`ShutdownResult::Ok`] carries the value of a normal completion, while
/// [`ShutdownResult::Shutdown`] carries whatever partial value was accumulated when the
/// shutdown signal was observed, so callers can still flush it.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownResult<T, U> {
    /// The operation completed normally.
    Ok(T),
    /// The operation observed the shutdown signal; the partial value must still be handled.
    Shutdown(U),
}
