//! # Connection Pool
//!
//! The database pool is the single shared resource of the service; its
//! capacity bounds backend concurrency.

use crate::config::DatabaseConfig;
use crate::infrastructure::persistence::postgres::errors::query_error;
use crate::infrastructure::persistence::traits::{RepositoryError, RepositoryResult};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Database connection pool wrapper.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connects using `config`, running migrations when enabled.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Connection` if the database is
    /// unreachable, or `Internal` if a migration fails.
    pub async fn connect(config: &DatabaseConfig) -> RepositoryResult<Self> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| RepositoryError::connection(e.to_string()))?;

        let db = Self { pool };
        if config.run_migrations {
            db.migrate().await?;
        }
        info!("database connection pool established");
        Ok(db)
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Internal` if a migration fails.
    pub async fn migrate(&self) -> RepositoryResult<()> {
        info!("running database migrations");
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::internal(format!("migration failed: {e}")))?;
        info!("migrations completed");
        Ok(())
    }

    /// Returns the inner pool.
    #[must_use]
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trips a trivial query.
    ///
    /// # Errors
    ///
    /// Returns the mapped driver error.
    pub async fn health_check(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    /// Closes every connection.
    pub async fn close(&self) {
        info!("closing database connection pool");
        self.pool.close().await;
    }
}
