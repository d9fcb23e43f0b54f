//! Trade rows written by the execution pipeline and the hourly backfill.

use super::{decimal_from_text, decimal_to_text};
use crate::capabilities::{AssetClass, BrokerOrder};
use crate::error::Result;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeRow {
    pub id: String,
    pub submission_id: Option<String>,
    pub approval_id: Option<String>,
    pub broker_provider: String,
    pub broker_order_id: String,
    pub symbol: String,
    pub side: String,
    pub qty: Option<String>,
    pub notional: Option<String>,
    pub asset_class: String,
    pub quote_ccy: Option<String>,
    pub order_type: String,
    pub status: String,
    pub limit_price: Option<String>,
    pub stop_price: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TradeRow {
    pub fn qty_decimal(&self) -> Option<Decimal> {
        decimal_from_text(self.qty.clone())
    }

    pub fn notional_decimal(&self) -> Option<Decimal> {
        decimal_from_text(self.notional.clone())
    }
}

#[derive(Clone)]
pub struct TradeStore {
    pool: SqlitePool,
}

impl TradeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record_fill(
        &self,
        submission_id: Option<&str>,
        approval_id: Option<&str>,
        broker_provider: &str,
        order: &BrokerOrder,
        asset_class: AssetClass,
        quote_ccy: Option<&str>,
        now_ms: i64,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, submission_id, approval_id, broker_provider, broker_order_id,
                symbol, side, qty, notional, asset_class, quote_ccy,
                order_type, status, limit_price, stop_price, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(submission_id)
        .bind(approval_id)
        .bind(broker_provider)
        .bind(&order.id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(decimal_to_text(order.qty))
        .bind(decimal_to_text(order.notional))
        .bind(asset_class.as_str())
        .bind(quote_ccy)
        .bind(order.order_type.as_str())
        .bind(format!("{:?}", order.status).to_lowercase())
        .bind(decimal_to_text(order.limit_price))
        .bind(decimal_to_text(order.stop_price))
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn exists_for_submission(&self, submission_id: &str) -> Result<bool> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trades WHERE submission_id = ?")
                .bind(submission_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 > 0)
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<TradeRow>> {
        let rows = sqlx::query_as::<_, TradeRow>(
            "SELECT * FROM trades ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{OrderSide, OrderStatus, OrderType};
    use crate::persistence::SqlGateway;
    use rust_decimal_macros::dec;

    fn order() -> BrokerOrder {
        BrokerOrder {
            id: "bo-1".into(),
            client_order_id: None,
            symbol: "AAPL".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            status: OrderStatus::Filled,
            qty: Some(dec!(2.5)),
            notional: Some(dec!(500)),
            filled_qty: dec!(2.5),
            filled_avg_price: Some(dec!(200)),
            limit_price: None,
            stop_price: None,
            submitted_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let store = TradeStore::new(gateway.pool().clone());

        store
            .record_fill(Some("sub-1"), None, "paper", &order(), AssetClass::UsEquity, None, 10)
            .await
            .unwrap();

        assert!(store.exists_for_submission("sub-1").await.unwrap());
        assert!(!store.exists_for_submission("sub-2").await.unwrap());

        let rows = store.list_recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "AAPL");
        assert_eq!(rows[0].qty_decimal(), Some(dec!(2.5)));
        assert_eq!(rows[0].notional_decimal(), Some(dec!(500)));
    }
}
