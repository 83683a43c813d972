//! Asynchronous error reporting.
//!
//! Errors returned by pool operations always reach their caller directly.
//! The error stream is a mirror for observers: [`Pool::run_async`] publishes
//! every failure it returns, and user operations can report side errors
//! through the [`ErrorSink`] they are given. Publishing never blocks; a
//! subscriber that falls behind loses the oldest reports.
//!
//! [`Pool::run_async`]: crate::Pool::run_async

use tokio::sync::broadcast;

use crate::error::PoolError;

/// Sending half of a pool's error stream.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: broadcast::Sender<PoolError>,
}

impl ErrorSink {
    pub(crate) fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    /// Publish an error to every current subscriber.
    ///
    /// Returns the number of subscribers that received it. Reports made while
    /// nobody is subscribed are dropped.
    pub fn report(&self, error: impl Into<PoolError>) -> usize {
        let error = error.into();
        match self.tx.send(error) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(error)) => {
                tracing::debug!(error = %error, "error reported with no subscribers");
                0
            }
        }
    }

    /// Open a new subscription. Only reports made after this call are seen.
    #[must_use]
    pub fn subscribe(&self) -> ErrorStream {
        ErrorStream {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving half of a pool's error stream.
#[derive(Debug)]
pub struct ErrorStream {
    rx: broadcast::Receiver<PoolError>,
}

impl ErrorStream {
    /// Wait for the next reported error.
    ///
    /// Returns `None` once the pool and every sink clone are gone.
    pub async fn recv(&mut self) -> Option<PoolError> {
        loop {
            match self.rx.recv().await {
                Ok(error) => return Some(error),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "error stream subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next reported error if one is already buffered.
    pub fn try_recv(&mut self) -> Option<PoolError> {
        loop {
            match self.rx.try_recv() {
                Ok(error) => return Some(error),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped = skipped, "error stream subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
