//! Alert rule and event rows.

use crate::alerts::types::{AlertEvent, AlertRule, AlertSeverity};
use crate::error::Result;
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct AlertStore {
    pool: SqlitePool,
}

impl AlertStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_rule(&self, rule: &AlertRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_rules (id, title, description, enabled, default_severity, config_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                enabled = excluded.enabled,
                default_severity = excluded.default_severity,
                config_json = excluded.config_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.title)
        .bind(&rule.description)
        .bind(rule.enabled as i64)
        .bind(rule.default_severity.as_str())
        .bind(rule.config.to_string())
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        let row = sqlx::query("SELECT * FROM alert_rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::rule_from_row(&r)))
    }

    pub async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query("SELECT * FROM alert_rules ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::rule_from_row).collect())
    }

    fn rule_from_row(row: &sqlx::sqlite::SqliteRow) -> AlertRule {
        AlertRule {
            id: row.get("id"),
            title: row.get("title"),
            description: row.get("description"),
            enabled: row.get::<i64, _>("enabled") != 0,
            default_severity: AlertSeverity::parse(&row.get::<String, _>("default_severity"))
                .unwrap_or(AlertSeverity::Warning),
            config: serde_json::from_str(&row.get::<String, _>("config_json"))
                .unwrap_or(serde_json::Value::Null),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// Insert an occurrence. Re-inserting the same id is a no-op.
    pub async fn insert_event(&self, event: &AlertEvent, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO alert_events (
                id, rule_id, severity, title, message, fingerprint,
                details_json, occurred_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.rule_id)
        .bind(event.severity.as_str())
        .bind(&event.title)
        .bind(&event.message)
        .bind(&event.fingerprint)
        .bind(event.details.to_string())
        .bind(event.occurred_at)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn acknowledge(&self, id: &str, by: &str, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alert_events
            SET acknowledged_at = ?, acknowledged_by = ?
            WHERE id = ? AND acknowledged_at IS NULL
            "#,
        )
        .bind(now_ms)
        .bind(by)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_events(&self, limit: i64) -> Result<Vec<AlertEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_events ORDER BY occurred_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| AlertEvent {
                id: row.get("id"),
                rule_id: row.get("rule_id"),
                severity: AlertSeverity::parse(&row.get::<String, _>("severity"))
                    .unwrap_or(AlertSeverity::Info),
                title: row.get("title"),
                message: row.get("message"),
                fingerprint: row.get("fingerprint"),
                occurred_at: row.get("occurred_at"),
                details: row
                    .get::<Option<String>, _>("details_json")
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(serde_json::Value::Null),
                acknowledged_at: row.get("acknowledged_at"),
                acknowledged_by: row.get("acknowledged_by"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqlGateway;
    use serde_json::json;

    #[tokio::test]
    async fn test_event_insert_idempotent_and_ack() {
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let store = AlertStore::new(gateway.pool().clone());

        let event = AlertEvent::new(
            "swarm_dead_letter_queue",
            AlertSeverity::Warning,
            "DLQ depth",
            "7 entries dead-lettered",
            "swarm_dead_letter_queue:warning",
            100,
            json!({"depth": 7}),
        );
        assert!(store.insert_event(&event, 100).await.unwrap());
        assert!(!store.insert_event(&event, 101).await.unwrap());

        assert!(store.acknowledge(&event.id, "ops", 200).await.unwrap());
        assert!(!store.acknowledge(&event.id, "ops", 201).await.unwrap());

        let events = store.list_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].acknowledged_by.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn test_rule_upsert() {
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let store = AlertStore::new(gateway.pool().clone());

        let mut rule = AlertRule {
            id: "portfolio_drawdown".into(),
            title: "Portfolio drawdown".into(),
            description: "Equity below daily baseline".into(),
            enabled: true,
            default_severity: AlertSeverity::Warning,
            config: json!({"warn_ratio": 0.7}),
            created_at: 1,
            updated_at: 1,
        };
        store.upsert_rule(&rule).await.unwrap();

        rule.enabled = false;
        rule.updated_at = 2;
        store.upsert_rule(&rule).await.unwrap();

        let loaded = store.get_rule("portfolio_drawdown").await.unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.updated_at, 2);
        assert_eq!(store.list_rules().await.unwrap().len(), 1);
    }
}
