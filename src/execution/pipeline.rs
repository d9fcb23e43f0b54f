//! Idempotent order execution
//!
//! The UNIQUE constraint on `order_submissions.idempotency_key` plus
//! conditional state transitions guarantee at-most-once submission:
//! exactly one caller per key ever reaches `broker.create_order`, and
//! every other caller converges on that caller's row. There is no
//! cross-writer lock anywhere in this path.

use crate::capabilities::{AssetClass, Broker, OrderRequest, TimeInForce};
use crate::error::{Result, SwarmError};
use crate::persistence::{
    PolicyStore, RiskStateStore, SubmissionRow, SubmissionState, SubmissionStore, TradeStore,
    TraceWriter,
};
use crate::policy::{self, PolicyInput, SymbolStats};
use crate::util::{sha256_hex, Clock};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// Everything the pipeline needs, borrowed from the caller.
pub struct ExecutionDeps<'a> {
    pub clock: &'a dyn Clock,
    pub broker: &'a dyn Broker,
    pub submissions: &'a SubmissionStore,
    pub trades: &'a TradeStore,
    pub risk: &'a RiskStateStore,
    pub policy: &'a PolicyStore,
    pub traces: &'a TraceWriter,
    /// Market stats for the ordered symbol, when the caller has them.
    pub symbol_stats: Option<SymbolStats>,
    pub confidence: Option<f64>,
}

/// How long a duplicate caller waits for the in-flight attempt to
/// reach a terminal state before returning the row as-is.
const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);
const CONVERGE_POLL: Duration = Duration::from_millis(25);

/// Client order IDs are capped at 32 chars by broker APIs.
fn derive_client_order_id(idempotency_key: &str) -> String {
    if idempotency_key.len() <= 32 {
        idempotency_key.to_string()
    } else {
        sha256_hex(idempotency_key)[..32].to_string()
    }
}

/// Strip secret-looking runs from provider error text before persisting.
pub fn sanitize_error(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut run = String::new();
    let flush = |out: &mut String, run: &mut String| {
        if run.len() >= 24 {
            out.push_str("[redacted]");
        } else {
            out.push_str(run);
        }
        run.clear();
    };
    for c in message.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            run.push(c);
        } else {
            flush(&mut out, &mut run);
            out.push(c);
        }
    }
    flush(&mut out, &mut run);
    out.chars().take(500).collect()
}

async fn wait_for_terminal(
    deps: &ExecutionDeps<'_>,
    idempotency_key: &str,
) -> Result<SubmissionRow> {
    let deadline = tokio::time::Instant::now() + CONVERGE_TIMEOUT;
    loop {
        let row = deps
            .submissions
            .get_by_key(idempotency_key)
            .await?
            .ok_or_else(|| SwarmError::Internal("submission row vanished".into()))?;
        match row.state()? {
            SubmissionState::Submitted => return Ok(row),
            SubmissionState::Failed => {
                return Err(SwarmError::Conflict(format!(
                    "concurrent attempt for {idempotency_key} failed"
                )))
            }
            _ if tokio::time::Instant::now() >= deadline => return Ok(row),
            _ => tokio::time::sleep(CONVERGE_POLL).await,
        }
    }
}

/// Execute one logical order submission, end to end.
pub async fn execute_order(
    deps: &ExecutionDeps<'_>,
    source: &str,
    idempotency_key: &str,
    order: &OrderRequest,
    approval_id: Option<&str>,
) -> Result<SubmissionRow> {
    if idempotency_key.trim().is_empty() {
        return Err(SwarmError::InvalidInput("idempotency_key is required".into()));
    }
    let trace_id = approval_id.unwrap_or(idempotency_key).to_string();
    let now_ms = deps.clock.now_ms();

    // 1. Reserve the submission row for this key.
    let request_json = serde_json::to_string(order)?;
    let row = deps
        .submissions
        .reserve(
            idempotency_key,
            source,
            approval_id,
            deps.broker.provider(),
            &request_json,
            now_ms,
        )
        .await?;
    deps.traces
        .record(&trace_id, Some(&row.id), "reserve", json!({"state": row.state}), now_ms)
        .await;

    // 2. Idempotent reuse of an accepted or in-flight attempt.
    match row.state()? {
        SubmissionState::Submitted => {
            deps.traces
                .record(
                    &trace_id,
                    Some(&row.id),
                    "reuse_existing_submission",
                    json!({"broker_order_id": row.broker_order_id}),
                    now_ms,
                )
                .await;
            return Ok(row);
        }
        SubmissionState::Submitting => {
            deps.traces
                .record(
                    &trace_id,
                    Some(&row.id),
                    "reuse_existing_submission",
                    json!({"state": "SUBMITTING"}),
                    now_ms,
                )
                .await;
            return wait_for_terminal(deps, idempotency_key).await;
        }
        _ => {}
    }

    // 3. Claim the submit slot.
    if !deps.submissions.try_begin_submit(&row.id, now_ms).await? {
        let current = deps
            .submissions
            .get_by_key(idempotency_key)
            .await?
            .ok_or_else(|| SwarmError::Internal("submission row vanished".into()))?;
        return match current.state()? {
            SubmissionState::Submitted => {
                deps.traces
                    .record(
                        &trace_id,
                        Some(&current.id),
                        "reuse_existing_submission",
                        json!({"broker_order_id": current.broker_order_id}),
                        now_ms,
                    )
                    .await;
                Ok(current)
            }
            SubmissionState::Submitting => wait_for_terminal(deps, idempotency_key).await,
            _ => Err(SwarmError::Conflict(format!(
                "submission {idempotency_key} is in state {}",
                current.state
            ))),
        };
    }

    // 4. Policy gate.
    let risk_state = deps.risk.load(now_ms).await?;
    if risk_state.kill_switch_active {
        let reason = risk_state
            .kill_switch_reason
            .clone()
            .unwrap_or_else(|| "unspecified".to_string());
        deps.submissions
            .mark_failed(&row.id, &json!({"kind": "KILL_SWITCH_ACTIVE", "reason": reason}).to_string(), now_ms)
            .await?;
        deps.traces
            .record(&trace_id, Some(&row.id), "kill_switch_blocked", json!({"reason": reason}), now_ms)
            .await;
        return Err(SwarmError::KillSwitchActive(reason));
    }

    let account = deps.broker.get_account().await?;
    let positions = deps.broker.get_positions().await?;
    let market_clock = deps.broker.get_clock().await?;
    let policy_config = deps.policy.load().await?;

    let verdict = policy::evaluate(&PolicyInput {
        order,
        account: &account,
        positions: &positions,
        market_clock: &market_clock,
        risk_state: &risk_state,
        config: &policy_config,
        symbol_stats: deps.symbol_stats.as_ref(),
        option: None,
        confidence: deps.confidence,
        now_ms,
    });

    // Hours-only rejections surface as MARKET_CLOSED below, not as a
    // policy violation, so callers can distinguish retry-later orders.
    let hard_violations: Vec<_> = verdict
        .violations
        .iter()
        .filter(|v| v.code != "market_hours")
        .collect();
    if !hard_violations.is_empty() {
        let reasons = hard_violations
            .iter()
            .map(|v| v.message.clone())
            .collect::<Vec<_>>()
            .join("; ");
        deps.submissions
            .mark_failed(&row.id, &json!({"kind": "POLICY_VIOLATION", "reasons": reasons}).to_string(), now_ms)
            .await?;
        deps.traces
            .record(&trace_id, Some(&row.id), "policy_blocked", json!({"violations": verdict.violations}), now_ms)
            .await;
        return Err(SwarmError::PolicyViolation(reasons));
    }

    if order.asset_class == AssetClass::UsEquity
        && order.time_in_force == TimeInForce::Day
        && !market_clock.is_open
    {
        deps.submissions
            .mark_failed(&row.id, &json!({"kind": "MARKET_CLOSED"}).to_string(), now_ms)
            .await?;
        deps.traces
            .record(&trace_id, Some(&row.id), "market_closed", json!({}), now_ms)
            .await;
        return Err(SwarmError::MarketClosed(format!(
            "{} day order while market is closed",
            order.symbol
        )));
    }

    // 5. Submit with a deterministic client order id.
    let mut submit_request = order.clone();
    submit_request.client_order_id = Some(derive_client_order_id(idempotency_key));

    match deps.broker.create_order(&submit_request).await {
        Ok(broker_order) => {
            // 6. Accept: the broker_order_id on the row never changes again.
            let now_ms = deps.clock.now_ms();
            deps.submissions
                .mark_submitted(&row.id, &broker_order.id, deps.broker.provider(), now_ms)
                .await?;
            deps.trades
                .record_fill(
                    Some(&row.id),
                    approval_id,
                    deps.broker.provider(),
                    &broker_order,
                    order.asset_class,
                    order.quote_ccy.as_deref(),
                    now_ms,
                )
                .await?;
            deps.traces
                .record(
                    &trace_id,
                    Some(&row.id),
                    "submitted",
                    json!({"broker_order_id": broker_order.id}),
                    now_ms,
                )
                .await;
            info!(
                "order submitted: {} {} ({} / {})",
                submit_request.symbol, broker_order.id, source, idempotency_key
            );
            deps.submissions
                .get_by_key(idempotency_key)
                .await?
                .ok_or_else(|| SwarmError::Internal("submission row vanished".into()))
        }
        Err(e) => {
            // 7. Converge with a concurrent winner, else fail the row.
            let now_ms = deps.clock.now_ms();
            let sanitized = sanitize_error(&e.to_string());
            let current = deps.submissions.get_by_key(idempotency_key).await?;
            if let Some(current) = current {
                if current.state()? == SubmissionState::Submitted {
                    warn!(
                        "submission {idempotency_key} failed locally but a concurrent path succeeded"
                    );
                    deps.submissions
                        .stamp_last_error(
                            &current.id,
                            &json!({"kind": e.kind(), "message": sanitized}).to_string(),
                            now_ms,
                        )
                        .await?;
                    return Ok(current);
                }
                deps.submissions
                    .mark_failed(
                        &current.id,
                        &json!({"kind": e.kind(), "message": sanitized}).to_string(),
                        now_ms,
                    )
                    .await?;
            }
            deps.traces
                .record(&trace_id, Some(&row.id), "failed", json!({"error": sanitized}), now_ms)
                .await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_order_id_derivation() {
        assert_eq!(derive_client_order_id("short-key"), "short-key");

        let long = "approval:0123456789abcdef0123456789abcdef";
        let derived = derive_client_order_id(long);
        assert_eq!(derived.len(), 32);
        assert_eq!(derived, sha256_hex(long)[..32]);
    }

    #[test]
    fn test_sanitize_error_redacts_long_runs() {
        let message = "status 401: token sk-ant-REDACTED rejected";
        let sanitized = sanitize_error(message);
        assert!(sanitized.contains("[redacted]"));
        assert!(!sanitized.contains("0123456789abcdefghijklmnop"));
        assert!(sanitized.contains("status 401"));
    }

    #[test]
    fn test_sanitize_error_caps_length() {
        let long = "x ".repeat(600);
        assert_eq!(sanitize_error(&long).chars().count(), 500);
    }
}
