//! Order submission rows
//!
//! The UNIQUE `idempotency_key` is the correctness boundary for
//! at-most-once submission: `INSERT OR IGNORE` reserves the row, and
//! every lifecycle transition is a conditional UPDATE.

use crate::error::{Result, SwarmError};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Reserved,
    Submitting,
    Submitted,
    Failed,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Reserved => "RESERVED",
            SubmissionState::Submitting => "SUBMITTING",
            SubmissionState::Submitted => "SUBMITTED",
            SubmissionState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "RESERVED" => Ok(SubmissionState::Reserved),
            "SUBMITTING" => Ok(SubmissionState::Submitting),
            "SUBMITTED" => Ok(SubmissionState::Submitted),
            "FAILED" => Ok(SubmissionState::Failed),
            other => Err(SwarmError::Internal(format!(
                "unknown submission state {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: String,
    pub idempotency_key: String,
    pub source: String,
    pub approval_id: Option<String>,
    pub broker_provider: String,
    pub request_json: String,
    pub state: String,
    pub broker_order_id: Option<String>,
    pub last_error_json: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SubmissionRow {
    pub fn state(&self) -> Result<SubmissionState> {
        SubmissionState::parse(&self.state)
    }
}

#[derive(Clone)]
pub struct SubmissionStore {
    pool: SqlitePool,
}

impl SubmissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Reserve the row for `idempotency_key` and return the canonical
    /// row, whether this call created it or a previous caller did.
    pub async fn reserve(
        &self,
        idempotency_key: &str,
        source: &str,
        approval_id: Option<&str>,
        broker_provider: &str,
        request_json: &str,
        now_ms: i64,
    ) -> Result<SubmissionRow> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO order_submissions (
                id, idempotency_key, source, approval_id, broker_provider,
                request_json, state, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 'RESERVED', ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(idempotency_key)
        .bind(source)
        .bind(approval_id)
        .bind(broker_provider)
        .bind(request_json)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        self.get_by_key(idempotency_key).await?.ok_or_else(|| {
            SwarmError::Internal(format!("submission {idempotency_key} vanished after reserve"))
        })
    }

    pub async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<SubmissionRow>> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            "SELECT * FROM order_submissions WHERE idempotency_key = ?",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get(&self, id: &str) -> Result<Option<SubmissionRow>> {
        let row =
            sqlx::query_as::<_, SubmissionRow>("SELECT * FROM order_submissions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    /// `(RESERVED | FAILED) -> SUBMITTING`. False means another writer won.
    pub async fn try_begin_submit(&self, id: &str, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE order_submissions
            SET state = 'SUBMITTING', updated_at = ?
            WHERE id = ? AND state IN ('RESERVED', 'FAILED')
            "#,
        )
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `SUBMITTING -> SUBMITTED`. `broker_order_id` never changes once set.
    pub async fn mark_submitted(
        &self,
        id: &str,
        broker_order_id: &str,
        broker_provider: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE order_submissions
            SET state = 'SUBMITTED', broker_order_id = ?, broker_provider = ?, updated_at = ?
            WHERE id = ? AND state = 'SUBMITTING'
            "#,
        )
        .bind(broker_order_id)
        .bind(broker_provider)
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal failure for this attempt. SUBMITTED rows are never demoted.
    pub async fn mark_failed(&self, id: &str, error_json: &str, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE order_submissions
            SET state = 'FAILED', last_error_json = ?, updated_at = ?
            WHERE id = ? AND state != 'SUBMITTED'
            "#,
        )
        .bind(error_json)
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record an error on a row without touching its state (used when a
    /// concurrent caller already drove the row to SUBMITTED).
    pub async fn stamp_last_error(&self, id: &str, error_json: &str, now_ms: i64) -> Result<()> {
        sqlx::query(
            "UPDATE order_submissions SET last_error_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error_json)
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// SUBMITTED submissions that never got a trade row (backfill input).
    pub async fn list_submitted_missing_trades(&self, limit: i64) -> Result<Vec<SubmissionRow>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(
            r#"
            SELECT s.*
            FROM order_submissions s
            LEFT JOIN trades t ON t.submission_id = s.id
            WHERE s.state = 'SUBMITTED' AND t.id IS NULL
            ORDER BY s.created_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
