//! Policy evaluation
//!
//! Checks run in a fixed order and every violation is collected, so a
//! rejected order reports the full reason list, not just the first
//! failure. `allowed` is false iff any violation is present.

use super::types::*;
use crate::capabilities::{AssetClass, OrderSide};
use crate::util::clock::eastern_date;
use rust_decimal::Decimal;
use serde_json::json;

/// Estimated notional of the order: explicit notional, else qty at the
/// last known price.
fn order_notional(input: &PolicyInput) -> Option<Decimal> {
    if let Some(notional) = input.order.notional {
        return Some(notional);
    }
    match (input.order.qty, input.symbol_stats) {
        (Some(qty), Some(stats)) => Some(qty * stats.last_price),
        _ => None,
    }
}

pub fn evaluate(input: &PolicyInput) -> PolicyResult {
    let mut violations = Vec::new();
    let order = input.order;
    let config = input.config;
    let symbol = order.symbol.to_uppercase();
    let notional = order_notional(input);
    let equity = input.account.equity;

    // Kill switch dominates everything else.
    if input.risk_state.kill_switch_active {
        let reason = input
            .risk_state
            .kill_switch_reason
            .as_deref()
            .unwrap_or("unspecified");
        violations.push(Violation::new(
            "kill_switch",
            format!("kill switch active: {reason}"),
        ));
    }

    // Per-symbol exposure cap (buys only).
    if order.side == OrderSide::Buy {
        if let Some(order_notional) = notional {
            let held: Decimal = input
                .positions
                .iter()
                .filter(|p| p.symbol.eq_ignore_ascii_case(&symbol))
                .map(|p| p.market_value)
                .sum();
            let cap = equity * config.max_symbol_exposure_pct;
            if equity > Decimal::ZERO && held + order_notional > cap {
                violations.push(Violation::new(
                    "symbol_exposure",
                    format!(
                        "{symbol} exposure {} exceeds cap {cap}",
                        held + order_notional
                    ),
                ));
            }
        }
    }

    // Open-position count (only when opening a new symbol).
    let holds_symbol = input
        .positions
        .iter()
        .any(|p| p.symbol.eq_ignore_ascii_case(&symbol));
    if order.side == OrderSide::Buy
        && !holds_symbol
        && input.positions.len() >= config.max_open_positions as usize
    {
        violations.push(Violation::new(
            "max_positions",
            format!(
                "{} open positions at cap {}",
                input.positions.len(),
                config.max_open_positions
            ),
        ));
    }

    // Per-trade notional cap.
    if let Some(order_notional) = notional {
        if order_notional > config.max_trade_notional {
            violations.push(Violation::new(
                "trade_notional",
                format!(
                    "notional {order_notional} exceeds cap {}",
                    config.max_trade_notional
                ),
            ));
        }
    }

    // Order-type allow-list.
    if !config.allowed_order_types.contains(&order.order_type) {
        violations.push(Violation::new(
            "order_type",
            format!("{} orders are not allowed", order.order_type.as_str()),
        ));
    }

    // Daily loss ratio against the daily equity baseline.
    let baseline = input.risk_state.daily_equity_start.unwrap_or(equity);
    if baseline > Decimal::ZERO
        && input.risk_state.daily_loss_usd > Decimal::ZERO
        && input.risk_state.daily_loss_usd >= baseline * config.max_daily_loss_ratio
    {
        violations.push(Violation::new(
            "daily_loss",
            format!(
                "daily loss {} at or above limit ratio {}",
                input.risk_state.daily_loss_usd, config.max_daily_loss_ratio
            ),
        ));
    }

    // Cooldown window after a fresh loss.
    if input.risk_state.cooldown_active(input.now_ms) {
        violations.push(Violation::new(
            "cooldown",
            "trading paused during loss cooldown",
        ));
    }

    // Symbol allow/deny lists.
    if config
        .symbol_deny_list
        .iter()
        .any(|s| s.eq_ignore_ascii_case(&symbol))
    {
        violations.push(Violation::new("symbol_denied", format!("{symbol} is denied")));
    }
    if !config.symbol_allow_list.is_empty()
        && !config
            .symbol_allow_list
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&symbol))
    {
        violations.push(Violation::new(
            "symbol_not_allowed",
            format!("{symbol} is not on the allow list"),
        ));
    }

    // Liquidity floors, when stats are available.
    if let Some(stats) = input.symbol_stats {
        if let Some(min_volume) = config.min_avg_volume {
            if stats.avg_volume < min_volume {
                violations.push(Violation::new(
                    "min_volume",
                    format!("avg volume {} below floor {min_volume}", stats.avg_volume),
                ));
            }
        }
        if let Some(min_price) = config.min_price {
            if stats.last_price < min_price {
                violations.push(Violation::new(
                    "min_price",
                    format!("price {} below floor {min_price}", stats.last_price),
                ));
            }
        }
    }

    // Trading-hours window (equities only; crypto trades around the clock).
    if order.asset_class == AssetClass::UsEquity {
        if config.trading_hours_only && !input.market_clock.is_open {
            let extended_ok = config.allow_extended_hours && order.extended_hours;
            if !extended_ok {
                violations.push(Violation::new(
                    "market_hours",
                    "market closed and extended hours not permitted",
                ));
            }
        }
        if order.extended_hours && !config.allow_extended_hours {
            violations.push(Violation::new(
                "extended_hours",
                "extended-hours orders are disabled",
            ));
        }
    }

    // Short selling: a sell must be covered by an existing position.
    if order.side == OrderSide::Sell && !config.allow_short_selling {
        let held_qty: Decimal = input
            .positions
            .iter()
            .filter(|p| p.symbol.eq_ignore_ascii_case(&symbol))
            .map(|p| p.qty)
            .sum();
        let sell_qty = order.qty.unwrap_or(held_qty);
        if sell_qty > held_qty {
            violations.push(Violation::new(
                "short_selling",
                format!("sell {sell_qty} exceeds held {held_qty}"),
            ));
        }
    }

    // Cash-only mode: buys must be fully funded from cash.
    if config.cash_only && order.side == OrderSide::Buy {
        if let Some(order_notional) = notional {
            if order_notional > input.account.cash {
                violations.push(Violation::new(
                    "cash_only",
                    format!(
                        "notional {order_notional} exceeds cash {}",
                        input.account.cash
                    ),
                ));
            }
        }
    }

    // Options sub-rules.
    if let Some(option) = input.option {
        evaluate_option_rules(input, option, notional, &mut violations);
    }

    let diagnostics = json!({
        "symbol": symbol,
        "order_notional": notional.map(|n| n.to_string()),
        "equity": equity.to_string(),
        "cash": input.account.cash.to_string(),
        "open_positions": input.positions.len(),
        "daily_loss_usd": input.risk_state.daily_loss_usd.to_string(),
        "market_open": input.market_clock.is_open,
    });

    PolicyResult {
        allowed: violations.is_empty(),
        violations,
        diagnostics,
    }
}

fn evaluate_option_rules(
    input: &PolicyInput,
    option: &OptionOrderContext,
    notional: Option<Decimal>,
    violations: &mut Vec<Violation>,
) {
    let policy = &input.config.options;

    if !policy.enabled {
        violations.push(Violation::new("options_disabled", "options trading is disabled"));
        return;
    }

    let today = eastern_date(input.now_ms);
    let dte = (option.expiration - today).num_days();
    if dte < policy.min_dte || dte > policy.max_dte {
        violations.push(Violation::new(
            "options_dte",
            format!("{dte} DTE outside [{}, {}]", policy.min_dte, policy.max_dte),
        ));
    }

    if let Some(delta) = option.delta {
        if delta.abs() > policy.max_abs_delta {
            violations.push(Violation::new(
                "options_delta",
                format!("|delta| {} above cap {}", delta.abs(), policy.max_abs_delta),
            ));
        }
    }

    if !policy
        .allowed_strategies
        .iter()
        .any(|s| s.eq_ignore_ascii_case(&option.strategy))
    {
        violations.push(Violation::new(
            "options_strategy",
            format!("strategy {} is not allowed", option.strategy),
        ));
    }

    if let Some(order_notional) = notional {
        if option.current_option_exposure + order_notional > policy.max_exposure {
            violations.push(Violation::new(
                "options_exposure",
                format!(
                    "options exposure {} would exceed cap {}",
                    option.current_option_exposure + order_notional,
                    policy.max_exposure
                ),
            ));
        }
    }

    // Never add to a losing contract.
    if input.order.side == OrderSide::Buy && option.existing_qty > Decimal::ZERO {
        if let (Some(avg), Some(current)) = (option.existing_avg_price, option.current_price) {
            if current < avg {
                violations.push(Violation::new(
                    "options_averaging_down",
                    format!("contract trades at {current}, below avg entry {avg}"),
                ));
            }
        }
    }

    if input.order.side == OrderSide::Buy
        && option.existing_qty.is_zero()
        && option.open_option_positions >= policy.max_option_positions
    {
        violations.push(Violation::new(
            "options_position_count",
            format!(
                "{} option positions at cap {}",
                option.open_option_positions, policy.max_option_positions
            ),
        ));
    }

    if let Some(confidence) = input.confidence {
        if confidence < policy.min_confidence {
            violations.push(Violation::new(
                "options_confidence",
                format!(
                    "confidence {confidence:.2} below floor {:.2}",
                    policy.min_confidence
                ),
            ));
        }
    }
}
