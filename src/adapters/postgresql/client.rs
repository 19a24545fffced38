//! PostgreSQL client implementation
//!
//! Pooled connections shared by the document store, the concept store and
//! the vocabulary store.

use crate::config::schema::PostgreSQLConfig;
use crate::domain::{EstuaryError, Result, StoreError};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

/// PostgreSQL client for Estuary
///
/// Every statement runs on a pooled connection with the configured
/// `statement_timeout` applied first.
pub struct PostgreSQLClient {
    /// Connection pool
    pool: Pool,

    /// Configuration
    config: PostgreSQLConfig,
}

impl PostgreSQLClient {
    /// Create a new PostgreSQL client
    ///
    /// The pool connects lazily; call [`test_connection`](Self::test_connection)
    /// to fail fast.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is invalid or the pool
    /// cannot be built.
    pub fn new(config: PostgreSQLConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .connection_string
            .expose_secret()
            .parse()
            .map_err(|e| {
                EstuaryError::Configuration(format!("Invalid PostgreSQL connection string: {e}"))
            })?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .map_err(|e| {
                StoreError::ConnectionFailed(format!("Failed to create connection pool: {e}"))
            })?;

        Ok(Self { pool, config })
    }

    /// Test the connection to PostgreSQL
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.get_connection().await?;

        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("Connection test failed: {e}")))?;

        tracing::info!(database = %self.connection_string_safe(), "PostgreSQL connection test successful");
        Ok(())
    }

    /// Get a connection from the pool
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be obtained.
    pub async fn get_connection(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to get connection from pool: {e}")).into()
        })
    }

    async fn prepared_connection(&self) -> Result<deadpool_postgres::Object> {
        let client = self.get_connection().await?;
        let timeout_query = format!(
            "SET statement_timeout = {}",
            self.config.statement_timeout_seconds * 1000
        );
        client.execute(&timeout_query, &[]).await.map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to set statement timeout: {e}"))
        })?;
        Ok(client)
    }

    /// Execute a query and return rows
    ///
    /// Errors are reported as [`StoreError::QueryFailed`] against `collection`.
    pub async fn query(
        &self,
        collection: &str,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>> {
        let client = self.prepared_connection().await?;
        client.query(query, params).await.map_err(|e| {
            StoreError::QueryFailed {
                collection: collection.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Execute a statement and return the number of affected rows
    pub async fn execute(
        &self,
        collection: &str,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64> {
        let client = self.prepared_connection().await?;
        client.execute(statement, params).await.map_err(|e| {
            StoreError::InsertFailed {
                collection: collection.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Run a multi-statement DDL batch
    pub async fn batch_execute(&self, collection: &str, sql: &str) -> Result<()> {
        let client = self.prepared_connection().await?;
        client.batch_execute(sql).await.map_err(|e| {
            StoreError::CollectionCreationFailed {
                collection: collection.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Vocabulary table name
    pub fn concept_table(&self) -> &str {
        &self.config.concept_table
    }

    /// Get the connection string (without password)
    pub fn connection_string_safe(&self) -> String {
        redact_connection_string(self.config.connection_string.expose_secret().as_ref())
    }

    /// Get the pool statistics
    pub fn pool_status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}

/// Replaces everything before the host with `***`
pub fn redact_connection_string(connection_string: &str) -> String {
    match connection_string.rsplit_once('@') {
        Some((_, host)) => format!("postgresql://***@{host}"),
        None => "postgresql://***".to_string(),
    }
}
