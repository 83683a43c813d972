//! Connection lifecycle management.
//!
//! The pool never talks to a database itself. Everything that touches the
//! network goes through a [`ConnectionLifecycle`] implementation, which keeps
//! the pool testable without a server and lets other drivers reuse it.

use std::time::Instant;

use async_trait::async_trait;

/// Creates, probes and closes the connections a pool manages.
///
/// Implementations must be cheap to share: the pool calls them concurrently
/// from every task that acquires or releases a connection.
#[async_trait]
pub trait ConnectionLifecycle: Send + Sync + 'static {
    /// The handle the pool hands out.
    type Connection: Send + Sync + 'static;

    /// The driver's error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection, ready to be used.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Liveness probe: a lightweight round trip proving the connection is
    /// still usable.
    async fn ping(&self, conn: &Self::Connection) -> Result<(), Self::Error>;

    /// Close a connection the pool no longer wants.
    async fn disconnect(&self, conn: Self::Connection) -> Result<(), Self::Error>;
}

/// Bookkeeping the pool keeps for every connection it created.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique connection ID.
    pub id: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection was last handed to a caller.
    pub last_checkout: Instant,
    /// How many times the connection has been handed out.
    pub checkout_count: u64,
    /// Whether the connection was opened past capacity by the escape valve.
    pub overflow: bool,
}

impl ConnectionMetadata {
    pub(crate) fn new(id: u64, overflow: bool) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_checkout: now,
            checkout_count: 0,
            overflow,
        }
    }

    pub(crate) fn record_checkout(&mut self) {
        self.last_checkout = Instant::now();
        self.checkout_count += 1;
    }

    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_checkout_tracking() {
        let mut metadata = ConnectionMetadata::new(7, false);
        assert_eq!(metadata.checkout_count, 0);
        let opened = metadata.last_checkout;

        metadata.record_checkout();
        metadata.record_checkout();

        assert_eq!(metadata.id, 7);
        assert_eq!(metadata.checkout_count, 2);
        assert!(metadata.last_checkout >= opened);
        assert!(!metadata.overflow);
    }
}
