//! Approval token rows
//!
//! Reservation and consumption are each a single conditional UPDATE;
//! the WHERE clause is the critical section. At most one RESERVED
//! holder exists per approval, and USED is terminal.

use crate::error::{Result, SwarmError};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Active,
    Reserved,
    Used,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Active => "ACTIVE",
            ApprovalState::Reserved => "RESERVED",
            ApprovalState::Used => "USED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(ApprovalState::Active),
            "RESERVED" => Ok(ApprovalState::Reserved),
            "USED" => Ok(ApprovalState::Used),
            other => Err(SwarmError::Internal(format!(
                "unknown approval state {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApprovalRow {
    pub id: String,
    pub preview_hash: String,
    pub order_params_json: String,
    pub policy_result_json: String,
    pub token_hash: String,
    pub expires_at: i64,
    pub state: String,
    pub reserved_at: Option<i64>,
    pub reserved_by: Option<String>,
    pub reserved_until: Option<i64>,
    pub used_at: Option<i64>,
    pub submitted_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub last_error_json: Option<String>,
    pub created_at: i64,
}

impl ApprovalRow {
    pub fn state(&self) -> Result<ApprovalState> {
        ApprovalState::parse(&self.state)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }
}

#[derive(Clone)]
pub struct ApprovalStore {
    pool: SqlitePool,
}

impl ApprovalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        id: &str,
        preview_hash: &str,
        order_params_json: &str,
        policy_result_json: &str,
        token_hash: &str,
        expires_at: i64,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_approvals (
                id, preview_hash, order_params_json, policy_result_json,
                token_hash, expires_at, state, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 'ACTIVE', ?)
            "#,
        )
        .bind(id)
        .bind(preview_hash)
        .bind(order_params_json)
        .bind(policy_result_json)
        .bind(token_hash)
        .bind(expires_at)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ApprovalRow>> {
        let row = sqlx::query_as::<_, ApprovalRow>("SELECT * FROM order_approvals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Lookup by stored token hash. Legacy rows stored the raw token in
    /// the hash column, so callers pass both candidates.
    pub async fn get_by_token_hash(&self, token_hash: &str) -> Result<Option<ApprovalRow>> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            "SELECT * FROM order_approvals WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// `ACTIVE | (RESERVED && reserved_until < now) -> RESERVED`.
    pub async fn reserve(
        &self,
        id: &str,
        reservation_id: &str,
        now_ms: i64,
        ttl_s: u64,
    ) -> Result<bool> {
        let reserved_until = now_ms + (ttl_s as i64) * 1000;
        let result = sqlx::query(
            r#"
            UPDATE order_approvals
            SET state = 'RESERVED', reserved_by = ?, reserved_at = ?, reserved_until = ?
            WHERE id = ?
              AND (state = 'ACTIVE'
                   OR (state = 'RESERVED' AND reserved_until < ?))
            "#,
        )
        .bind(reservation_id)
        .bind(now_ms)
        .bind(reserved_until)
        .bind(id)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `RESERVED && reserved_by = rid -> USED`.
    pub async fn consume(&self, id: &str, reservation_id: &str, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE order_approvals
            SET state = 'USED', used_at = ?
            WHERE id = ? AND state = 'RESERVED' AND reserved_by = ?
            "#,
        )
        .bind(now_ms)
        .bind(id)
        .bind(reservation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revert a reservation back to ACTIVE, recording the error if any.
    pub async fn release(
        &self,
        id: &str,
        reservation_id: &str,
        error_json: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE order_approvals
            SET state = 'ACTIVE', reserved_by = NULL, reserved_at = NULL,
                reserved_until = NULL, last_error_json = ?
            WHERE id = ? AND state = 'RESERVED' AND reserved_by = ?
            "#,
        )
        .bind(error_json)
        .bind(id)
        .bind(reservation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_submitted(&self, id: &str, now_ms: i64) -> Result<()> {
        sqlx::query("UPDATE order_approvals SET submitted_at = ? WHERE id = ?")
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error_json: &str, now_ms: i64) -> Result<()> {
        sqlx::query(
            "UPDATE order_approvals SET failed_at = ?, last_error_json = ? WHERE id = ?",
        )
        .bind(now_ms)
        .bind(error_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop expired, never-used approvals. Returns the purge count.
    pub async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM order_approvals WHERE expires_at < ? AND state != 'USED'")
                .bind(now_ms)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
