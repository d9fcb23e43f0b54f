//! Risk state singleton row.

use super::{decimal_from_text, decimal_to_text};
use crate::error::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub kill_switch_active: bool,
    pub kill_switch_reason: Option<String>,
    pub kill_switch_at: Option<i64>,
    pub daily_loss_usd: Decimal,
    pub daily_loss_reset_at: Option<i64>,
    pub daily_equity_start: Option<Decimal>,
    pub cooldown_until: Option<i64>,
    pub max_portfolio_drawdown_pct: Decimal,
}

impl Default for RiskState {
    fn default() -> Self {
        Self {
            kill_switch_active: false,
            kill_switch_reason: None,
            kill_switch_at: None,
            daily_loss_usd: Decimal::ZERO,
            daily_loss_reset_at: None,
            daily_equity_start: None,
            cooldown_until: None,
            max_portfolio_drawdown_pct: dec!(0.15),
        }
    }
}

impl RiskState {
    pub fn cooldown_active(&self, now_ms: i64) -> bool {
        self.cooldown_until.map_or(false, |until| now_ms < until)
    }
}

#[derive(Clone)]
pub struct RiskStateStore {
    pool: SqlitePool,
}

impl RiskStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the singleton, inserting the default row on first touch.
    pub async fn load(&self, now_ms: i64) -> Result<RiskState> {
        sqlx::query(
            "INSERT OR IGNORE INTO risk_state (id, updated_at) VALUES (1, ?)",
        )
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM risk_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(RiskState {
            kill_switch_active: row.get::<i64, _>("kill_switch_active") != 0,
            kill_switch_reason: row.get("kill_switch_reason"),
            kill_switch_at: row.get("kill_switch_at"),
            daily_loss_usd: decimal_from_text(row.get("daily_loss_usd"))
                .unwrap_or(Decimal::ZERO),
            daily_loss_reset_at: row.get("daily_loss_reset_at"),
            daily_equity_start: decimal_from_text(row.get("daily_equity_start")),
            cooldown_until: row.get("cooldown_until"),
            max_portfolio_drawdown_pct: decimal_from_text(
                row.get("max_portfolio_drawdown_pct"),
            )
            .unwrap_or(dec!(0.15)),
        })
    }

    pub async fn save(&self, state: &RiskState, now_ms: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE risk_state
            SET kill_switch_active = ?, kill_switch_reason = ?, kill_switch_at = ?,
                daily_loss_usd = ?, daily_loss_reset_at = ?, daily_equity_start = ?,
                cooldown_until = ?, max_portfolio_drawdown_pct = ?, updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(state.kill_switch_active as i64)
        .bind(&state.kill_switch_reason)
        .bind(state.kill_switch_at)
        .bind(state.daily_loss_usd.to_string())
        .bind(state.daily_loss_reset_at)
        .bind(decimal_to_text(state.daily_equity_start))
        .bind(state.cooldown_until)
        .bind(state.max_portfolio_drawdown_pct.to_string())
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_kill_switch(
        &self,
        active: bool,
        reason: Option<&str>,
        now_ms: i64,
    ) -> Result<()> {
        let mut state = self.load(now_ms).await?;
        state.kill_switch_active = active;
        state.kill_switch_reason = reason.map(str::to_string);
        state.kill_switch_at = active.then_some(now_ms);
        self.save(&state, now_ms).await
    }
}
