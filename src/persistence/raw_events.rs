//! Raw feed items, deduplicated by `(source, source_id)`.

use crate::error::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct RawEventStore {
    pool: SqlitePool,
}

impl RawEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns true when the item is new; false for a duplicate.
    pub async fn insert_ignore(
        &self,
        source: &str,
        source_id: &str,
        content: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO raw_events (id, source, source_id, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(source)
        .bind(source_id)
        .bind(content)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}
