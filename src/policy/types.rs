//! Policy configuration and evaluation types

use crate::capabilities::{
    Account, MarketClock, OptionRight, OrderRequest, OrderType, Position,
};
use crate::persistence::RiskState;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Max share of equity a single symbol may reach after the order.
    pub max_symbol_exposure_pct: Decimal,
    pub max_open_positions: u32,
    pub max_trade_notional: Decimal,
    pub allowed_order_types: Vec<OrderType>,
    /// Max realized daily loss as a fraction of the daily equity baseline.
    pub max_daily_loss_ratio: Decimal,
    /// Empty allow list admits every symbol not denied.
    pub symbol_allow_list: Vec<String>,
    pub symbol_deny_list: Vec<String>,
    pub min_avg_volume: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub trading_hours_only: bool,
    pub allow_extended_hours: bool,
    pub allow_short_selling: bool,
    pub cash_only: bool,
    pub options: OptionsPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_symbol_exposure_pct: dec!(0.20),
            max_open_positions: 10,
            max_trade_notional: dec!(5000),
            allowed_order_types: vec![OrderType::Market, OrderType::Limit],
            max_daily_loss_ratio: dec!(0.03),
            symbol_allow_list: Vec::new(),
            symbol_deny_list: Vec::new(),
            min_avg_volume: None,
            min_price: None,
            trading_hours_only: true,
            allow_extended_hours: false,
            allow_short_selling: false,
            cash_only: false,
            options: OptionsPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsPolicy {
    pub enabled: bool,
    pub min_dte: i64,
    pub max_dte: i64,
    pub max_abs_delta: Decimal,
    pub allowed_strategies: Vec<String>,
    pub max_exposure: Decimal,
    pub max_option_positions: u32,
    pub min_confidence: f64,
}

impl Default for OptionsPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            min_dte: 7,
            max_dte: 45,
            max_abs_delta: dec!(0.7),
            allowed_strategies: vec![
                "covered_call".to_string(),
                "cash_secured_put".to_string(),
                "long_call".to_string(),
                "long_put".to_string(),
            ],
            max_exposure: dec!(2500),
            max_option_positions: 5,
            min_confidence: 0.6,
        }
    }
}

/// Option-specific order context; present only for option orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionOrderContext {
    pub expiration: NaiveDate,
    pub strike: Decimal,
    pub right: OptionRight,
    pub delta: Option<Decimal>,
    pub strategy: String,
    /// Existing contracts held on the same contract symbol.
    pub existing_qty: Decimal,
    pub existing_avg_price: Option<Decimal>,
    pub current_price: Option<Decimal>,
    pub open_option_positions: u32,
    pub current_option_exposure: Decimal,
}

/// Per-symbol market stats, supplied by the caller when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolStats {
    pub last_price: Decimal,
    pub avg_volume: Decimal,
}

pub struct PolicyInput<'a> {
    pub order: &'a OrderRequest,
    pub account: &'a Account,
    pub positions: &'a [Position],
    pub market_clock: &'a MarketClock,
    pub risk_state: &'a RiskState,
    pub config: &'a PolicyConfig,
    pub symbol_stats: Option<&'a SymbolStats>,
    pub option: Option<&'a OptionOrderContext>,
    pub confidence: Option<f64>,
    pub now_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub message: String,
}

impl Violation {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyResult {
    pub allowed: bool,
    pub violations: Vec<Violation>,
    pub diagnostics: serde_json::Value,
}

impl PolicyResult {
    pub fn reasons(&self) -> Vec<String> {
        self.violations
            .iter()
            .map(|v| format!("{}: {}", v.code, v.message))
            .collect()
    }
}
