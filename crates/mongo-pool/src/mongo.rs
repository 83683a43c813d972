//! MongoDB driver collaborator.
//!
//! [`MongoConnectionManager`] opens one `mongodb::Client` per pooled handle
//! and binds it to the configured database.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, ReadPreference, SelectionCriteria};
use mongodb::{Client, Database};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::ConnectionLifecycle;
use crate::pool::Pool;

/// A pool of MongoDB database handles.
pub type MongoPool = Pool<MongoConnectionManager>;

/// Opens, pings and closes MongoDB sessions for a [`Pool`].
#[derive(Debug, Clone)]
pub struct MongoConnectionManager {
    uri: String,
    database: String,
    connect_timeout: Duration,
    max_pool_size: Option<u32>,
    application_name: String,
}

impl MongoConnectionManager {
    /// Create a manager from the pool configuration.
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            database: config.database.clone(),
            connect_timeout: config.connect_timeout,
            max_pool_size: config.driver_max_pool_size,
            application_name: config.application_name.clone(),
        }
    }

    /// Name of the database handles are bound to.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    async fn client_options(&self) -> mongodb::error::Result<ClientOptions> {
        let mut options = ClientOptions::parse(&self.uri).await?;
        options.connect_timeout = Some(self.connect_timeout);
        if self.max_pool_size.is_some() {
            options.max_pool_size = self.max_pool_size;
        }
        if options.app_name.is_none() {
            options.app_name = Some(self.application_name.clone());
        }
        Ok(options)
    }
}

/// Read preference for the ping that accepts a freshly opened client.
///
/// Secondaries are preferred so that the check does not load the primary;
/// a deployment without a reachable secondary falls back to the primary.
fn connect_ping_criteria() -> SelectionCriteria {
    SelectionCriteria::ReadPreference(ReadPreference::SecondaryPreferred {
        options: Default::default(),
    })
}

#[async_trait]
impl ConnectionLifecycle for MongoConnectionManager {
    type Connection = Database;
    type Error = mongodb::error::Error;

    #[tracing::instrument(skip(self), fields(database = %self.database))]
    async fn connect(&self) -> Result<Database, Self::Error> {
        tracing::debug!("connecting to MongoDB");

        let options = self.client_options().await?;
        let hosts = options.hosts.clone();
        let client = Client::with_options(options)?;
        let db = client.database(&self.database);

        // Fail fast on unreachable servers instead of on first use.
        db.run_command(doc! { "ping": 1 })
            .selection_criteria(connect_ping_criteria())
            .await?;

        tracing::info!(
            hosts = ?hosts,
            database = %self.database,
            "connected to MongoDB"
        );
        Ok(db)
    }

    async fn ping(&self, db: &Database) -> Result<(), Self::Error> {
        db.run_command(doc! { "ping": 1 }).await.map(|_| ())
    }

    async fn disconnect(&self, db: Database) -> Result<(), Self::Error> {
        tracing::debug!(database = %db.name(), "closing MongoDB client");
        db.client().clone().shutdown().await;
        Ok(())
    }
}

impl Pool<MongoConnectionManager> {
    /// Create a MongoDB pool from a configuration.
    ///
    /// No connection is opened until the first acquire.
    pub fn mongo(config: PoolConfig) -> Result<Self, PoolError> {
        let manager = MongoConnectionManager::new(&config);
        Pool::new(config, manager)
    }
}
