//! Activity log and decision traces
//!
//! Both tables are append-only observability surfaces. Writes tolerate
//! schema absence: a missing table logs a warning and the caller
//! proceeds, because a lost trace must never fail an order.

use crate::error::Result;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct ActivityLog {
    pool: SqlitePool,
}

impl ActivityLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        agent: &str,
        event_type: &str,
        severity: &str,
        status: &str,
        action: &str,
        description: &str,
        metadata: Option<&serde_json::Value>,
        now_ms: i64,
    ) {
        let searchable = format!("{agent} {action} {description}").to_lowercase();
        let result = sqlx::query(
            r#"
            INSERT INTO agent_activity_logs (
                id, timestamp_ms, event_type, severity, status, agent,
                action, description, metadata_json, searchable_text
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(now_ms)
        .bind(event_type)
        .bind(severity)
        .bind(status)
        .bind(agent)
        .bind(action)
        .bind(description)
        .bind(metadata.map(|m| m.to_string()))
        .bind(searchable)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!("activity log write failed: {e}");
        }
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agent_activity_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

/// Decision traces written at every branch of the execution pipeline.
#[derive(Clone)]
pub struct TraceWriter {
    pool: SqlitePool,
}

impl TraceWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        trace_id: &str,
        submission_id: Option<&str>,
        stage: &str,
        detail: serde_json::Value,
        now_ms: i64,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO order_decision_traces (id, trace_id, submission_id, stage, detail_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(trace_id)
        .bind(submission_id)
        .bind(stage)
        .bind(detail.to_string())
        .bind(now_ms)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!("decision trace write failed (stage {stage}): {e}");
        }
    }

    pub async fn stages_for(&self, trace_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT stage FROM order_decision_traces WHERE trace_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqlGateway;
    use serde_json::json;

    #[tokio::test]
    async fn test_trace_rows_ordered() {
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let traces = TraceWriter::new(gateway.pool().clone());

        traces.record("t-1", None, "reserve", json!({}), 1).await;
        traces.record("t-1", Some("sub"), "submit", json!({}), 2).await;
        assert_eq!(traces.stages_for("t-1").await.unwrap(), vec!["reserve", "submit"]);
    }

    #[tokio::test]
    async fn test_missing_table_is_tolerated() {
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        gateway.run_batch("DROP TABLE order_decision_traces").await.unwrap();
        let traces = TraceWriter::new(gateway.pool().clone());

        // Must not panic or error out of the void return.
        traces.record("t-2", None, "reserve", json!({}), 1).await;
    }

    #[tokio::test]
    async fn test_activity_record() {
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let log = ActivityLog::new(gateway.pool().clone());

        log.record("trader:default", "order", "info", "ok", "buy", "AAPL x5", None, 1)
            .await;
        assert_eq!(log.count().await.unwrap(), 1);
    }
}
