//! Connection pool implementation.
//!
//! The pool is populated lazily: connections are opened on first demand and
//! kept in a bounded FIFO of idle handles. Every handle is health-checked on
//! its way out of the idle queue and again on its way back in.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::task::task_tracker::TaskTrackerToken;

use crate::config::{CapacityPolicy, PoolConfig};
use crate::error::PoolError;
use crate::lifecycle::{ConnectionLifecycle, ConnectionMetadata};
use crate::sink::{ErrorSink, ErrorStream};

/// A lazily-populated, health-checked connection pool.
///
/// The pool is cheap to clone; clones share the same connections.
///
/// # Capacity
///
/// With [`CapacityPolicy::Soft`] (the default) capacity is a target: when
/// every connection is checked out, `acquire` opens an extra one instead of
/// waiting, so concurrent callers are never stalled but the number of open
/// connections may exceed `max_connections`. With [`CapacityPolicy::Strict`]
/// it is a hard cap and `acquire` waits for a release.
///
/// # Example
///
/// ```rust,ignore
/// use mongo_pool::{Pool, PoolConfig, mongo::MongoConnectionManager};
///
/// let config = PoolConfig::from_connection_string("mongodb://localhost:27017/app")?;
/// let pool = Pool::builder()
///     .manager(MongoConnectionManager::new(&config))
///     .pool_config(config)
///     .build()?;
///
/// let conn = pool.acquire().await?;
/// // Use connection...
/// pool.release(conn).await?;
/// ```
pub struct Pool<M: ConnectionLifecycle> {
    inner: Arc<PoolInner<M>>,
}

struct PoolInner<M: ConnectionLifecycle> {
    /// Pool configuration.
    config: PoolConfig,

    /// Capacity after clamping.
    capacity: usize,

    /// Driver collaborator.
    manager: M,

    /// Serializes the decision to open a regular (non-overflow) connection.
    create_lock: tokio::sync::Mutex<()>,

    /// Idle connections, oldest first.
    idle: Mutex<IdleQueue<M::Connection>>,

    /// Accounting shared with checked-out handles.
    tracker: Arc<Tracker>,

    /// Error stream publisher.
    errors: ErrorSink,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,
}

struct IdleQueue<C> {
    entries: VecDeque<IdleConnection<C>>,
    closed: bool,
}

struct IdleConnection<C> {
    conn: C,
    metadata: ConnectionMetadata,
}

/// Live-connection accounting.
///
/// `created` only grows. A connection is retired when the pool stops
/// counting it (discarded, detached, dropped or closed), so the number of
/// live connections is `created - retired`.
#[derive(Default)]
struct Tracker {
    created: AtomicUsize,
    retired: AtomicUsize,
    in_use: AtomicUsize,
    /// Signalled whenever a connection is queued or a slot frees up.
    available: Notify,
    metrics: Mutex<PoolMetricsInner>,
}

impl Tracker {
    fn live(&self) -> usize {
        self.created
            .load(Ordering::Acquire)
            .saturating_sub(self.retired.load(Ordering::Acquire))
    }

    fn retire(&self) {
        self.retired.fetch_add(1, Ordering::AcqRel);
        self.available.notify_one();
    }
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    /// Total connections opened.
    connections_created: u64,
    /// Connections opened past capacity by the escape valve.
    connections_overflow: u64,
    /// Connections closed through the driver.
    connections_closed: u64,
    /// Connections dropped from the pool's accounting.
    connections_discarded: u64,
    /// Total successful checkouts.
    checkouts_successful: u64,
    /// Total failed checkouts.
    checkouts_failed: u64,
    /// Connections returned to the idle queue.
    checkins: u64,
    /// Releases that did not end with the connection queued.
    checkins_rejected: u64,
    /// Total health checks performed.
    health_checks_performed: u64,
    /// Total health check failures.
    health_checks_failed: u64,
}

impl<M: ConnectionLifecycle> Pool<M> {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder<M> {
        PoolBuilder::new()
    }

    /// Create a new pool with the given configuration and driver collaborator.
    ///
    /// No connection is opened until the first [`acquire`](Self::acquire).
    pub fn new(config: PoolConfig, manager: M) -> Result<Self, PoolError> {
        config.validate()?;

        let capacity = config.effective_capacity();
        if capacity != config.max_connections {
            tracing::warn!(
                configured = config.max_connections,
                max = capacity,
                "pool capacity clamped"
            );
        }

        tracing::info!(
            max = capacity,
            policy = ?config.capacity_policy,
            database = %config.database,
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            errors: ErrorSink::new(config.error_buffer),
            config,
            capacity,
            manager,
            create_lock: tokio::sync::Mutex::new(()),
            idle: Mutex::new(IdleQueue {
                entries: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            tracker: Arc::new(Tracker::default()),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
        });

        Ok(Self { inner })
    }

    /// Get a connection from the pool.
    ///
    /// Opens a new connection if none is idle and the pool is under capacity.
    /// Otherwise hands out the oldest idle connection that passes a liveness
    /// probe, closing the ones that fail. If no idle connection is healthy,
    /// the [`CapacityPolicy`] decides between opening an overflow connection
    /// and waiting for a release.
    pub async fn acquire(&self) -> Result<PooledConnection<M::Connection>, PoolError> {
        tracing::trace!("acquiring connection from pool");

        let result = self.inner.acquire().await;

        let mut metrics = self.inner.tracker.metrics.lock();
        match &result {
            Ok(conn) => {
                metrics.checkouts_successful += 1;
                tracing::trace!(connection_id = conn.metadata.id, "connection checked out");
            }
            Err(error) => {
                metrics.checkouts_failed += 1;
                tracing::debug!(error = %error, "connection checkout failed");
            }
        }
        drop(metrics);

        result
    }

    /// Return a connection to the pool.
    ///
    /// The connection is probed first; an unhealthy one is closed and the
    /// probe error returned. A healthy one is queued for reuse unless the pool
    /// is closed or the idle queue is full, in which case it is closed and
    /// [`PoolError::PoolClosed`] or [`PoolError::PoolFull`] returned. Success
    /// means the connection is in the idle queue.
    pub async fn release(&self, mut conn: PooledConnection<M::Connection>) -> Result<(), PoolError> {
        let Some(raw) = conn.conn.take() else {
            self.inner.tracker.metrics.lock().checkins_rejected += 1;
            return Err(PoolError::MissingConnection);
        };
        let metadata = conn.metadata.clone();
        drop(conn);

        self.inner.check_in(raw, metadata).await
    }

    /// Close every idle connection and stop handing out new ones.
    ///
    /// Every drained connection is closed even if an earlier close failed;
    /// failures are reported together in [`PoolError::Shutdown`]. Connections
    /// checked out at this point are closed when they are released. Calling
    /// `shutdown` again is a no-op.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        let drained: Vec<_> = {
            let mut idle = self.inner.idle.lock();
            idle.closed = true;
            idle.entries.drain(..).collect()
        };
        self.inner.tracker.available.notify_waiters();

        let attempted = drained.len();
        let mut failures = Vec::new();
        for entry in drained {
            self.inner.tracker.retire();
            if let Err(error) = self.inner.close(entry.conn).await {
                tracing::warn!(
                    connection_id = entry.metadata.id,
                    error = %error,
                    "failed to close idle connection during shutdown"
                );
                failures.push(error);
            }
        }

        tracing::info!(
            closed = attempted - failures.len(),
            failed = failures.len(),
            in_use = self.inner.tracker.in_use.load(Ordering::Acquire),
            "connection pool shut down"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PoolError::Shutdown {
                attempted,
                failures,
            })
        }
    }

    /// Run an operation on a pooled connection.
    ///
    /// Acquires a connection, runs `op` on it and releases it again, whatever
    /// `op` returned. The operation also receives the pool's [`ErrorSink`] for
    /// reporting errors it does not return. Any failure is published on the
    /// error stream before being returned; a failed release after the
    /// operation is published and logged but does not replace the
    /// operation's result. `done`, if given, is dropped once everything has
    /// finished.
    ///
    /// ```rust,ignore
    /// let tracker = TaskTracker::new();
    /// let count = pool
    ///     .run_async(Some(tracker.token()), |db, _errors| {
    ///         Box::pin(async move {
    ///             db.collection::<Document>("orders")
    ///                 .count_documents(doc! {})
    ///                 .await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn run_async<F, T, E>(
        &self,
        done: Option<TaskTrackerToken>,
        op: F,
    ) -> Result<T, PoolError>
    where
        F: for<'c> FnOnce(&'c M::Connection, ErrorSink) -> BoxFuture<'c, Result<T, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        let result = self.run_scoped(op).await;
        if let Err(error) = &result {
            self.inner.errors.report(error.clone());
        }
        drop(done);
        result
    }

    async fn run_scoped<F, T, E>(&self, op: F) -> Result<T, PoolError>
    where
        F: for<'c> FnOnce(&'c M::Connection, ErrorSink) -> BoxFuture<'c, Result<T, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        let mut conn = self.acquire().await?;

        let outcome = match conn.get() {
            Some(raw) => {
                // `op` may panic before it hands back its future.
                let sink = self.inner.errors.clone();
                match std::panic::catch_unwind(AssertUnwindSafe(|| op(raw, sink))) {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                    Err(panic) => Err(panic),
                }
            }
            None => return Err(PoolError::MissingConnection),
        };

        match outcome {
            Ok(result) => {
                if let Err(error) = self.release(conn).await {
                    tracing::warn!(error = %error, "failed to release connection after operation");
                    self.inner.errors.report(error);
                }
                result.map_err(PoolError::operation)
            }
            Err(panic) => {
                let fault = PoolError::from_panic(panic);
                tracing::warn!(
                    connection_id = conn.metadata.id,
                    error = %fault,
                    "operation panicked, discarding its connection"
                );
                if let Some(raw) = conn.conn.take() {
                    self.inner.discard(raw).await;
                }
                Err(fault)
            }
        }
    }

    /// Subscribe to the pool's error stream.
    #[must_use]
    pub fn errors(&self) -> ErrorStream {
        self.inner.errors.subscribe()
    }

    /// A publisher for the pool's error stream.
    #[must_use]
    pub fn error_sink(&self) -> ErrorSink {
        self.inner.errors.clone()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let available = self.inner.idle.lock().entries.len();
        PoolStatus {
            available,
            in_use: self.inner.tracker.in_use.load(Ordering::Acquire),
            total: self.inner.tracker.live(),
            max: self.inner.capacity,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.tracker.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_overflow: inner.connections_overflow,
            connections_closed: inner.connections_closed,
            connections_discarded: inner.connections_discarded,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            checkins: inner.checkins,
            checkins_rejected: inner.checkins_rejected,
            health_checks_performed: inner.health_checks_performed,
            health_checks_failed: inner.health_checks_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Check if the pool has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.idle.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the driver collaborator.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

impl<M: ConnectionLifecycle> PoolInner<M> {
    async fn acquire(&self) -> Result<PooledConnection<M::Connection>, PoolError> {
        let deadline = tokio::time::Instant::now() + self.config.acquire_timeout;

        loop {
            // Register for wakeups before looking at the queue so a release
            // that lands in between is not missed.
            let notified = self.tracker.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.idle.lock().closed {
                return Err(PoolError::PoolClosed);
            }

            {
                let _guard = self.create_lock.lock().await;
                let idle_empty = self.idle.lock().entries.is_empty();
                let live = self.tracker.live();
                if idle_empty && live < self.capacity {
                    tracing::debug!(live = live, max = self.capacity, "opening pooled connection");
                    let entry = self.open(false).await?;
                    return self.hand_out(entry).await;
                }
            }

            let mut discarded = false;
            while let Some(entry) = self.pop_idle() {
                match self.probe(&entry.conn).await {
                    Ok(()) => return self.hand_out(entry).await,
                    Err(error) => {
                        tracing::warn!(
                            connection_id = entry.metadata.id,
                            error = %error,
                            "discarding unhealthy idle connection"
                        );
                        self.discard(entry.conn).await;
                        discarded = true;
                    }
                }
            }

            // Discarding freed capacity; give the regular path another go.
            if discarded {
                continue;
            }

            match self.config.capacity_policy {
                CapacityPolicy::Soft => {
                    tracing::debug!(
                        live = self.tracker.live(),
                        max = self.capacity,
                        "pool exhausted, opening overflow connection"
                    );
                    let entry = self.open(true).await?;
                    return self.hand_out(entry).await;
                }
                CapacityPolicy::Strict => {
                    tracing::trace!("pool exhausted, waiting for a release");
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(PoolError::Timeout(self.config.acquire_timeout));
                    }
                }
            }
        }
    }

    async fn check_in(
        &self,
        conn: M::Connection,
        metadata: ConnectionMetadata,
    ) -> Result<(), PoolError> {
        if let Err(error) = self.probe(&conn).await {
            tracing::warn!(
                connection_id = metadata.id,
                error = %error,
                "released connection failed health check"
            );
            self.tracker.metrics.lock().checkins_rejected += 1;
            self.discard(conn).await;
            return Err(error);
        }

        let rejected = {
            let mut idle = self.idle.lock();
            if idle.closed {
                Some((conn, PoolError::PoolClosed))
            } else if idle.entries.len() >= self.capacity {
                Some((
                    conn,
                    PoolError::PoolFull {
                        capacity: self.capacity,
                    },
                ))
            } else {
                idle.entries.push_back(IdleConnection { conn, metadata: metadata.clone() });
                None
            }
        };

        match rejected {
            None => {
                self.tracker.metrics.lock().checkins += 1;
                self.tracker.available.notify_one();
                tracing::debug!(connection_id = metadata.id, "connection returned to pool");
                Ok(())
            }
            Some((conn, error)) => {
                tracing::warn!(
                    connection_id = metadata.id,
                    error = %error,
                    "closing released connection"
                );
                self.tracker.metrics.lock().checkins_rejected += 1;
                self.discard(conn).await;
                Err(error)
            }
        }
    }

    fn pop_idle(&self) -> Option<IdleConnection<M::Connection>> {
        let mut idle = self.idle.lock();
        if idle.closed {
            return None;
        }
        idle.entries.pop_front()
    }

    /// Give a connection to the caller, unless the pool shut down while it
    /// was being opened or probed.
    async fn hand_out(
        &self,
        entry: IdleConnection<M::Connection>,
    ) -> Result<PooledConnection<M::Connection>, PoolError> {
        if self.idle.lock().closed {
            tracing::debug!(
                connection_id = entry.metadata.id,
                "pool shut down during acquire, closing connection"
            );
            self.discard(entry.conn).await;
            return Err(PoolError::PoolClosed);
        }
        Ok(self.check_out(entry))
    }

    fn check_out(&self, mut entry: IdleConnection<M::Connection>) -> PooledConnection<M::Connection> {
        entry.metadata.record_checkout();
        self.tracker.in_use.fetch_add(1, Ordering::AcqRel);
        PooledConnection {
            conn: Some(entry.conn),
            metadata: entry.metadata,
            tracker: Arc::clone(&self.tracker),
        }
    }

    /// Open a new connection through the driver.
    async fn open(&self, overflow: bool) -> Result<IdleConnection<M::Connection>, PoolError> {
        let conn = match AssertUnwindSafe(self.manager.connect()).catch_unwind().await {
            Ok(Ok(conn)) => conn,
            Ok(Err(error)) => return Err(PoolError::connect(error)),
            Err(panic) => return Err(PoolError::from_panic(panic)),
        };

        self.tracker.created.fetch_add(1, Ordering::AcqRel);
        {
            let mut metrics = self.tracker.metrics.lock();
            metrics.connections_created += 1;
            if overflow {
                metrics.connections_overflow += 1;
            }
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = id, overflow = overflow, "connection opened");

        Ok(IdleConnection {
            conn,
            metadata: ConnectionMetadata::new(id, overflow),
        })
    }

    /// Run a liveness probe, honouring the configured deadline.
    async fn probe(&self, conn: &M::Connection) -> Result<(), PoolError> {
        let check = AssertUnwindSafe(self.manager.ping(conn)).catch_unwind();
        let outcome = match self.config.health_check_timeout {
            Some(limit) => match tokio::time::timeout(limit, check).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.record_health_check(false);
                    return Err(PoolError::HealthCheckTimeout(limit));
                }
            },
            None => check.await,
        };

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(PoolError::probe(error)),
            Err(panic) => Err(PoolError::from_panic(panic)),
        };
        self.record_health_check(result.is_ok());
        result
    }

    fn record_health_check(&self, healthy: bool) {
        let mut metrics = self.tracker.metrics.lock();
        metrics.health_checks_performed += 1;
        if !healthy {
            metrics.health_checks_failed += 1;
        }
    }

    /// Stop counting a connection and close it, logging any failure.
    async fn discard(&self, conn: M::Connection) {
        self.tracker.retire();
        self.tracker.metrics.lock().connections_discarded += 1;
        if let Err(error) = self.close(conn).await {
            tracing::debug!(error = %error, "failed to close discarded connection");
        }
    }

    async fn close(&self, conn: M::Connection) -> Result<(), PoolError> {
        match AssertUnwindSafe(self.manager.disconnect(conn)).catch_unwind().await {
            Ok(Ok(())) => {
                self.tracker.metrics.lock().connections_closed += 1;
                Ok(())
            }
            Ok(Err(error)) => Err(PoolError::disconnect(error)),
            Err(panic) => Err(PoolError::from_panic(panic)),
        }
    }
}

impl<M: ConnectionLifecycle> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionLifecycle> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("database", &self.inner.config.database)
            .field("capacity", &self.inner.capacity)
            .field("policy", &self.inner.config.capacity_policy)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .manager(manager)
///     .max_connections(8)
///     .capacity_policy(CapacityPolicy::Strict)
///     .build()?;
/// ```
pub struct PoolBuilder<M: ConnectionLifecycle> {
    pool_config: PoolConfig,
    manager: Option<M>,
}

impl<M: ConnectionLifecycle> PoolBuilder<M> {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            pool_config: PoolConfig::default(),
            manager: None,
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the driver collaborator.
    #[must_use]
    pub fn manager(mut self, manager: M) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Set the pool capacity.
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.pool_config.max_connections = count;
        self
    }

    /// Set the capacity policy.
    #[must_use]
    pub fn capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.pool_config.capacity_policy = policy;
        self
    }

    /// Set the acquire timeout used by [`CapacityPolicy::Strict`].
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.pool_config.acquire_timeout = timeout;
        self
    }

    /// Put a deadline on liveness probes.
    #[must_use]
    pub fn health_check_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.pool_config.health_check_timeout = Some(timeout);
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool<M>, PoolError> {
        let manager = self
            .manager
            .ok_or_else(|| PoolError::Config("connection manager not set".into()))?;
        Pool::new(self.pool_config, manager)
    }
}

impl<M: ConnectionLifecycle> Default for PoolBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently checked out.
    pub in_use: usize,
    /// Number of live connections.
    pub total: usize,
    /// Pool capacity.
    pub max: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections opened since pool start.
    pub connections_created: u64,
    /// Connections opened past capacity by the escape valve.
    pub connections_overflow: u64,
    /// Connections closed through the driver.
    pub connections_closed: u64,
    /// Connections dropped because they were unhealthy, rejected or abandoned.
    pub connections_discarded: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts.
    pub checkouts_failed: u64,
    /// Connections returned to the idle queue.
    pub checkins: u64,
    /// Releases that did not end with the connection queued.
    pub checkins_rejected: u64,
    /// Health checks performed.
    pub health_checks_performed: u64,
    /// Health checks that failed.
    pub health_checks_failed: u64,
    /// Time since pool creation.
    pub uptime: std::time::Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate health check success rate (0.0 to 1.0).
    #[must_use]
    pub fn health_check_success_rate(&self) -> f64 {
        if self.health_checks_performed == 0 {
            return 1.0;
        }
        let successful = self.health_checks_performed - self.health_checks_failed;
        successful as f64 / self.health_checks_performed as f64
    }
}

/// A connection checked out of the pool.
///
/// Hand it back with [`Pool::release`]. A handle dropped without being
/// released is not returned to the pool; its connection is closed by the
/// driver when it goes out of scope and the pool stops counting it.
pub struct PooledConnection<C> {
    conn: Option<C>,
    metadata: ConnectionMetadata,
    tracker: Arc<Tracker>,
}

impl<C> PooledConnection<C> {
    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Borrow the connection, if the handle still holds one.
    #[must_use]
    pub fn get(&self) -> Option<&C> {
        self.conn.as_ref()
    }

    /// Mutably borrow the connection, if the handle still holds one.
    pub fn get_mut(&mut self) -> Option<&mut C> {
        self.conn.as_mut()
    }

    /// Check whether the connection has been taken out of the handle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conn.is_none()
    }

    /// Detach the connection from the pool.
    ///
    /// The pool stops counting it and the handle is left empty; releasing an
    /// empty handle fails with [`PoolError::MissingConnection`].
    pub fn take(&mut self) -> Option<C> {
        let conn = self.conn.take()?;
        tracing::debug!(connection_id = self.metadata.id, "connection detached from pool");
        self.tracker.retire();
        Some(conn)
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.tracker.in_use.fetch_sub(1, Ordering::AcqRel);
        if self.conn.is_some() {
            tracing::warn!(
                connection_id = self.metadata.id,
                "pooled connection dropped without release"
            );
            self.tracker.metrics.lock().connections_discarded += 1;
            self.tracker.retire();
        }
    }
}

impl<C> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.metadata)
            .field("empty", &self.conn.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 1,
            in_use: 2,
            total: 3,
            max: 8,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            available: 0,
            in_use: 4,
            total: 4,
            max: 4,
        };
        assert!(status.is_at_capacity());

        let overflowing = PoolStatus {
            available: 0,
            in_use: 5,
            total: 5,
            max: 4,
        };
        assert!(overflowing.is_at_capacity());

        let status2 = PoolStatus {
            available: 1,
            in_use: 1,
            total: 2,
            max: 4,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 4,
            connections_overflow: 1,
            connections_closed: 1,
            connections_discarded: 1,
            checkouts_successful: 45,
            checkouts_failed: 5,
            checkins: 40,
            checkins_rejected: 2,
            health_checks_performed: 80,
            health_checks_failed: 4,
            uptime: std::time::Duration::from_secs(60),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.health_check_success_rate() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_metrics_empty_rates() {
        let metrics = PoolMetrics {
            connections_created: 0,
            connections_overflow: 0,
            connections_closed: 0,
            connections_discarded: 0,
            checkouts_successful: 0,
            checkouts_failed: 0,
            checkins: 0,
            checkins_rejected: 0,
            health_checks_performed: 0,
            health_checks_failed: 0,
            uptime: std::time::Duration::ZERO,
        };

        assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
        assert!((metrics.health_check_success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tracker_live_count() {
        let tracker = Tracker::default();
        tracker.created.fetch_add(3, Ordering::AcqRel);
        tracker.retire();
        assert_eq!(tracker.live(), 2);
    }

    #[test]
    fn test_dropped_handle_is_retired() {
        let tracker = Arc::new(Tracker::default());
        tracker.created.fetch_add(1, Ordering::AcqRel);
        tracker.in_use.fetch_add(1, Ordering::AcqRel);

        let handle = PooledConnection {
            conn: Some(()),
            metadata: ConnectionMetadata::new(1, false),
            tracker: Arc::clone(&tracker),
        };
        drop(handle);

        assert_eq!(tracker.in_use.load(Ordering::Acquire), 0);
        assert_eq!(tracker.live(), 0);
        assert_eq!(tracker.metrics.lock().connections_discarded, 1);
    }

    #[test]
    fn test_taken_handle_is_empty() {
        let tracker = Arc::new(Tracker::default());
        tracker.created.fetch_add(1, Ordering::AcqRel);
        tracker.in_use.fetch_add(1, Ordering::AcqRel);

        let mut handle = PooledConnection {
            conn: Some(5_u8),
            metadata: ConnectionMetadata::new(1, false),
            tracker: Arc::clone(&tracker),
        };
        assert_eq!(handle.take(), Some(5));
        assert!(handle.is_empty());
        assert_eq!(handle.take(), None);
        drop(handle);

        assert_eq!(tracker.live(), 0);
        assert_eq!(tracker.metrics.lock().connections_discarded, 0);
    }
}
