//! Pool error types.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// A driver or user error shared between the caller and the error stream.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while using the connection pool.
///
/// `PoolError` is cheap to clone so the same failure can be returned to the
/// caller and published on the pool's [error stream](crate::ErrorStream).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The driver failed to create or connect a new session.
    #[error("failed to establish connection: {0}")]
    Connect(#[source] SharedError),

    /// A liveness probe reported the connection as unusable.
    #[error("connection failed health check: {0}")]
    Probe(#[source] SharedError),

    /// A liveness probe did not answer within the configured deadline.
    #[error("health check timed out after {0:?}")]
    HealthCheckTimeout(Duration),

    /// Closing a connection failed.
    #[error("failed to close connection: {0}")]
    Disconnect(#[source] SharedError),

    /// No connection became available before the acquire timeout.
    #[error("timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    /// A released handle no longer carries a connection.
    #[error("released handle does not hold a connection")]
    MissingConnection,

    /// The idle queue is full and cannot take the connection back.
    #[error("pool is full: {capacity} idle connections already queued")]
    PoolFull {
        /// Capacity of the idle queue.
        capacity: usize,
    },

    /// The pool has been shut down.
    #[error("pool is closed")]
    PoolClosed,

    /// One or more idle connections failed to close during shutdown.
    #[error(
        "failed to close {} of {attempted} idle connections during shutdown",
        .failures.len()
    )]
    Shutdown {
        /// Number of idle connections the shutdown tried to close.
        attempted: usize,
        /// Every close failure, in drain order.
        failures: Vec<PoolError>,
    },

    /// A user operation run through the pool returned an error.
    #[error("operation failed: {0}")]
    Operation(#[source] SharedError),

    /// Driver or user code panicked while the pool was waiting on it.
    #[error("internal fault: {0}")]
    InternalFault(String),

    /// Invalid pool configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Wrap a driver error raised while building a connection.
    pub fn connect<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connect(Arc::new(error))
    }

    /// Wrap a driver error raised by a liveness probe.
    pub fn probe<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Probe(Arc::new(error))
    }

    /// Wrap a driver error raised while closing a connection.
    pub fn disconnect<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Disconnect(Arc::new(error))
    }

    /// Wrap an error returned by a user operation.
    pub fn operation<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self::Operation(Arc::from(error.into()))
    }

    /// Build an [`PoolError::InternalFault`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::InternalFault(message)
    }

    /// Check if the error is transient and the call may succeed if repeated.
    ///
    /// The pool never retries on its own; this is a hint for callers.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Probe(_)
                | Self::HealthCheckTimeout(_)
                | Self::Timeout(_)
                | Self::PoolFull { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connection refused")]
    struct Refused;

    #[test]
    fn test_transient_classification() {
        assert!(PoolError::connect(Refused).is_transient());
        assert!(PoolError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(PoolError::PoolFull { capacity: 2 }.is_transient());
        assert!(!PoolError::PoolClosed.is_transient());
        assert!(!PoolError::MissingConnection.is_transient());
        assert!(!PoolError::InternalFault("boom".into()).is_transient());
    }

    #[test]
    fn test_source_is_preserved() {
        use std::error::Error as _;

        let err = PoolError::probe(Refused);
        assert_eq!(err.to_string(), "connection failed health check: connection refused");
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("connection refused")
        );
    }

    #[test]
    fn test_shutdown_message_counts_failures() {
        let err = PoolError::Shutdown {
            attempted: 3,
            failures: vec![PoolError::disconnect(Refused)],
        };
        assert_eq!(
            err.to_string(),
            "failed to close 1 of 3 idle connections during shutdown"
        );
    }

    #[test]
    fn test_operation_accepts_strings() {
        let err = PoolError::operation("document not found");
        assert_eq!(err.to_string(), "operation failed: document not found");
    }

    #[test]
    fn test_panic_payloads() {
        let err = PoolError::from_panic(Box::new("static message"));
        assert!(matches!(err, PoolError::InternalFault(ref m) if m == "static message"));

        let err = PoolError::from_panic(Box::new(String::from("owned message")));
        assert!(matches!(err, PoolError::InternalFault(ref m) if m == "owned message"));

        let err = PoolError::from_panic(Box::new(42_u32));
        assert!(matches!(err, PoolError::InternalFault(_)));
    }
}
