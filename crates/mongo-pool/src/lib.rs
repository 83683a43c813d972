//! # mongo-pool
//!
//! Lazily-populated, health-checked connection pool for MongoDB.
//!
//! Opening a MongoDB session is expensive, so the pool keeps a bounded FIFO of
//! idle database handles and shares them between concurrent tasks. Handles
//! are probed with `ping` before they are handed out and again when they come
//! back, so a session dropped by the network is never reused.
//!
//! ## Features
//!
//! - Connections opened on demand, up to a configurable capacity
//! - Liveness probes on checkout and checkin, with an optional deadline
//! - Explicit capacity policy: soft target with overflow, or hard cap
//! - [`Pool::run_async`] for acquire/operate/release in one call
//! - A non-blocking error stream for observers
//! - Status and metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use mongo_pool::{MongoPool, PoolConfig};
//! use mongodb::bson::{Document, doc};
//!
//! let config = PoolConfig::from_connection_string("mongodb://localhost:27017/shop")?
//!     .max_connections(8);
//! let pool = MongoPool::mongo(config)?;
//!
//! // Watch for errors reported by background operations
//! let mut errors = pool.errors();
//! tokio::spawn(async move {
//!     while let Some(error) = errors.recv().await {
//!         tracing::error!(error = %error, "pool error");
//!     }
//! });
//!
//! let orders = pool
//!     .run_async(None, |db, _errors| {
//!         Box::pin(async move {
//!             db.collection::<Document>("orders").count_documents(doc! {}).await
//!         })
//!     })
//!     .await?;
//!
//! pool.shutdown().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod pool;
pub mod sink;

// Configuration
pub use config::{CapacityPolicy, PoolConfig};

// Error types
pub use error::{PoolError, SharedError};

// Pool types
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};

// Lifecycle management
pub use lifecycle::{ConnectionLifecycle, ConnectionMetadata};

// Error reporting
pub use sink::{ErrorSink, ErrorStream};

// MongoDB driver
#[cfg(feature = "mongodb")]
pub use mongo::{MongoConnectionManager, MongoPool};

// Completion signal accepted by `Pool::run_async`
pub use tokio_util::task::TaskTracker;
pub use tokio_util::task::task_tracker::TaskTrackerToken;
