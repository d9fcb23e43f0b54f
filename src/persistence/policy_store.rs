//! Policy configuration singleton row.

use crate::error::Result;
use crate::policy::PolicyConfig;
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct PolicyStore {
    pool: SqlitePool,
}

impl PolicyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the persisted config, falling back to defaults when unset
    /// or unparseable.
    pub async fn load(&self) -> Result<PolicyConfig> {
        let row = sqlx::query("SELECT config_json FROM policy_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .and_then(|r| serde_json::from_str(&r.get::<String, _>("config_json")).ok())
            .unwrap_or_default())
    }

    pub async fn save(&self, config: &PolicyConfig, now_ms: i64) -> Result<()> {
        let config_json = serde_json::to_string(config)?;
        sqlx::query(
            r#"
            INSERT INTO policy_config (id, config_json, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                config_json = excluded.config_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(config_json)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqlGateway;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_defaults_then_roundtrip() {
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let store = PolicyStore::new(gateway.pool().clone());

        let config = store.load().await.unwrap();
        assert_eq!(config.max_trade_notional, dec!(5000));

        let mut config = config;
        config.max_trade_notional = dec!(1234);
        config.cash_only = true;
        store.save(&config, 10).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.max_trade_notional, dec!(1234));
        assert!(loaded.cash_only);
    }
}
