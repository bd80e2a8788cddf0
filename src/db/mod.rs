//! Ledger connection pool
//!
//! One pool serves both account reads and the atomic transfer units. A unit
//! holds its connection from `BEGIN` to `COMMIT`, so `max_connections` caps
//! how many transfers can commit at once; callers past the cap wait up to
//! `acquire_timeout_secs` and then fail with a retryable database error.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::PoolConfig;

/// Connection pool for the accounts, transfers and transactions tables
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(postgres_url: &str, config: &PoolConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(postgres_url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            acquire_timeout_secs = config.acquire_timeout_secs,
            "Ledger pool connected"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round trip to the ledger database
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
