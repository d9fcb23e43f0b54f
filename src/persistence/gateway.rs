//! SQL gateway
//!
//! Thin wrapper over the sqlx pool. All stores issue parameterized
//! statements; conditional `UPDATE ... WHERE` clauses are the critical
//! section for cross-agent invariants, with `rows_affected()` as the
//! success signal. A single connection serializes writers, which the
//! approval and submission state machines rely on for SQLite.

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Clone)]
pub struct SqlGateway {
    pool: SqlitePool,
}

impl SqlGateway {
    /// Connect to `url` (`sqlite::memory:` or `sqlite://path`).
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Apply the schema. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        self.run_batch(SCHEMA).await?;
        info!("database schema applied");
        Ok(())
    }

    /// Execute a batch of `;`-separated statements.
    pub async fn run_batch(&self, sql: &str) -> Result<()> {
        for statement in sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        gateway.migrate().await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM order_submissions")
            .fetch_one(gateway.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
