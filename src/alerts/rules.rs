//! Alert rule evaluation
//!
//! Pure over `{environment, now, account, risk_state, swarm, llm,
//! thresholds}`: same inputs, same alerts. Fingerprints group
//! equivalent occurrences so the notifier can dedupe.

use super::types::{normalize_slug, AlertEvent, AlertSeverity, AlertThresholds};
use crate::agents::LlmHealth;
use crate::capabilities::Account;
use crate::persistence::RiskState;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::json;

/// Registry health inputs the rules care about.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwarmHealth {
    pub dead_lettered: u64,
}

pub struct AlertRuleInput<'a> {
    pub environment: &'a str,
    pub now_ms: i64,
    pub account: Option<&'a Account>,
    pub risk_state: &'a RiskState,
    pub swarm: SwarmHealth,
    pub llm: &'a LlmHealth,
    pub thresholds: &'a AlertThresholds,
}

pub fn evaluate_alert_rules(input: &AlertRuleInput) -> Vec<AlertEvent> {
    let thresholds = input.thresholds.clone().clamped();
    let mut alerts = Vec::new();

    // Portfolio drawdown against the daily equity baseline.
    if let (Some(account), Some(baseline)) = (input.account, input.risk_state.daily_equity_start) {
        if baseline > Decimal::ZERO {
            let drawdown = ((baseline - account.equity) / baseline).max(Decimal::ZERO);
            let limit = input.risk_state.max_portfolio_drawdown_pct;
            let warn_ratio =
                Decimal::from_f64(thresholds.drawdown_warn_ratio).unwrap_or(Decimal::ONE);
            let warn_at = limit * warn_ratio;

            let tier = if limit > Decimal::ZERO && drawdown >= limit {
                Some(AlertSeverity::Critical)
            } else if warn_at > Decimal::ZERO && drawdown >= warn_at {
                Some(AlertSeverity::Warning)
            } else {
                None
            };
            if let Some(severity) = tier {
                alerts.push(AlertEvent::new(
                    "portfolio_drawdown",
                    severity,
                    "Portfolio drawdown",
                    &format!(
                        "equity {} is {drawdown:.4} below the {baseline} baseline (limit {limit})",
                        account.equity
                    ),
                    &format!("portfolio_drawdown:{severity}"),
                    input.now_ms,
                    json!({
                        "environment": input.environment,
                        "drawdown": drawdown.to_string(),
                        "baseline": baseline.to_string(),
                        "equity": account.equity.to_string(),
                        "limit": limit.to_string(),
                    }),
                ));
            }
        }
    }

    // Kill switch is always critical while engaged.
    if input.risk_state.kill_switch_active {
        let reason = input
            .risk_state
            .kill_switch_reason
            .as_deref()
            .unwrap_or("unspecified");
        alerts.push(AlertEvent::new(
            "kill_switch_active",
            AlertSeverity::Critical,
            "Kill switch engaged",
            &format!("trading halted: {reason}"),
            &format!("kill_switch_active:{}", normalize_slug(reason, 96)),
            input.now_ms,
            json!({
                "environment": input.environment,
                "reason": reason,
                "since": input.risk_state.kill_switch_at,
            }),
        ));
    }

    // Dead-letter depth.
    let depth = input.swarm.dead_lettered;
    let dlq_tier = if depth >= thresholds.dlq_critical_threshold {
        Some(AlertSeverity::Critical)
    } else if depth >= thresholds.dlq_warn_threshold {
        Some(AlertSeverity::Warning)
    } else {
        None
    };
    if let Some(severity) = dlq_tier {
        alerts.push(AlertEvent::new(
            "swarm_dead_letter_queue",
            severity,
            "Dead-letter queue depth",
            &format!("{depth} messages dead-lettered"),
            &format!("swarm_dead_letter_queue:{severity}"),
            input.now_ms,
            json!({
                "environment": input.environment,
                "depth": depth,
            }),
        ));
    }

    // Recent LLM auth failure.
    if let (Some(last_failure_ms), Some(last_error)) =
        (input.llm.last_failure_ms, input.llm.last_error.as_deref())
    {
        let recent = input.now_ms - last_failure_ms <= thresholds.llm_auth_window_ms;
        let lowered = last_error.to_lowercase();
        let auth_shaped =
            lowered.contains("unauthorized") || lowered.contains("401") || lowered.contains("auth");
        if recent && auth_shaped {
            alerts.push(AlertEvent::new(
                "llm_auth_failure",
                AlertSeverity::Warning,
                "LLM authentication failure",
                &format!("provider rejected credentials: {last_error}"),
                "llm_auth_failure",
                input.now_ms,
                json!({
                    "environment": input.environment,
                    "last_failure_ms": last_failure_ms,
                }),
            ));
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account(equity: Decimal) -> Account {
        Account {
            equity,
            cash: equity,
            buying_power: equity,
            currency: "USD".into(),
        }
    }

    fn input<'a>(
        account: Option<&'a Account>,
        risk_state: &'a RiskState,
        swarm: SwarmHealth,
        llm: &'a LlmHealth,
        thresholds: &'a AlertThresholds,
    ) -> AlertRuleInput<'a> {
        AlertRuleInput {
            environment: "test",
            now_ms: 1_000_000,
            account,
            risk_state,
            swarm,
            llm,
            thresholds,
        }
    }

    #[test]
    fn test_drawdown_tiers() {
        let thresholds = AlertThresholds::default();
        let llm = LlmHealth::default();
        let risk = RiskState {
            daily_equity_start: Some(dec!(100000)),
            max_portfolio_drawdown_pct: dec!(0.10),
            ..Default::default()
        };

        // 12% drawdown: critical.
        let acct = account(dec!(88000));
        let alerts = evaluate_alert_rules(&input(Some(&acct), &risk, SwarmHealth::default(), &llm, &thresholds));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].fingerprint, "portfolio_drawdown:critical");

        // 8% drawdown with warn ratio 0.7: warning tier starts at 7%.
        let acct = account(dec!(92000));
        let alerts = evaluate_alert_rules(&input(Some(&acct), &risk, SwarmHealth::default(), &llm, &thresholds));
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);

        // 2% drawdown: quiet.
        let acct = account(dec!(98000));
        let alerts = evaluate_alert_rules(&input(Some(&acct), &risk, SwarmHealth::default(), &llm, &thresholds));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_kill_switch_fingerprint_slug() {
        let thresholds = AlertThresholds::default();
        let llm = LlmHealth::default();
        let risk = RiskState {
            kill_switch_active: true,
            kill_switch_reason: Some("Manual HALT: risk breach".into()),
            ..Default::default()
        };
        let alerts =
            evaluate_alert_rules(&input(None, &risk, SwarmHealth::default(), &llm, &thresholds));
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].fingerprint,
            "kill_switch_active:manual-halt-risk-breach"
        );
    }

    #[test]
    fn test_dlq_thresholds() {
        let thresholds = AlertThresholds {
            dlq_warn_threshold: 5,
            dlq_critical_threshold: 25,
            ..Default::default()
        };
        let llm = LlmHealth::default();
        let risk = RiskState::default();

        let quiet = evaluate_alert_rules(&input(None, &risk, SwarmHealth { dead_lettered: 4 }, &llm, &thresholds));
        assert!(quiet.is_empty());

        let warn = evaluate_alert_rules(&input(None, &risk, SwarmHealth { dead_lettered: 5 }, &llm, &thresholds));
        assert_eq!(warn[0].severity, AlertSeverity::Warning);

        let critical = evaluate_alert_rules(&input(None, &risk, SwarmHealth { dead_lettered: 40 }, &llm, &thresholds));
        assert_eq!(critical[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_llm_auth_failure_window() {
        let thresholds = AlertThresholds::default();
        let risk = RiskState::default();
        let mut llm = LlmHealth::default();
        llm.last_failure_ms = Some(900_000);
        llm.last_error = Some("401 Unauthorized".into());

        let alerts =
            evaluate_alert_rules(&input(None, &risk, SwarmHealth::default(), &llm, &thresholds));
        assert_eq!(alerts[0].rule_id, "llm_auth_failure");

        // Outside the window: quiet.
        llm.last_failure_ms = Some(1_000_000 - thresholds.llm_auth_window_ms - 1);
        let alerts =
            evaluate_alert_rules(&input(None, &risk, SwarmHealth::default(), &llm, &thresholds));
        assert!(alerts.is_empty());

        // Non-auth failures never fire this rule.
        llm.last_failure_ms = Some(990_000);
        llm.last_error = Some("502 bad gateway".into());
        let alerts =
            evaluate_alert_rules(&input(None, &risk, SwarmHealth::default(), &llm, &thresholds));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_determinism() {
        let thresholds = AlertThresholds::default();
        let llm = LlmHealth::default();
        let risk = RiskState {
            kill_switch_active: true,
            kill_switch_reason: Some("halt".into()),
            ..Default::default()
        };
        let a = evaluate_alert_rules(&input(None, &risk, SwarmHealth { dead_lettered: 9 }, &llm, &thresholds));
        let b = evaluate_alert_rules(&input(None, &risk, SwarmHealth { dead_lettered: 9 }, &llm, &thresholds));
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
