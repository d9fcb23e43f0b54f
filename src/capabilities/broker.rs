//! Broker capability
//!
//! The execution pipeline and control loops consume brokers only
//! through this trait. Providers cover either US equities or crypto;
//! the asset class is a property of the adapter, not the call.

use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    UsEquity,
    Crypto,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::UsEquity => "us_equity",
            AssetClass::Crypto => "crypto",
        }
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

/// Canonical order parameters handed to a broker adapter.
/// Exactly one of `qty` / `notional` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub asset_class: AssetClass,
    #[serde(default)]
    pub qty: Option<Decimal>,
    #[serde(default)]
    pub notional: Option<Decimal>,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub quote_ccy: Option<String>,
    #[serde(default)]
    pub extended_hours: bool,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market_notional(
        symbol: &str,
        side: OrderSide,
        notional: Decimal,
        asset_class: AssetClass,
    ) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
            asset_class,
            qty: None,
            notional: Some(notional),
            limit_price: None,
            stop_price: None,
            quote_ccy: None,
            extended_hours: false,
            client_order_id: None,
        }
    }

    pub fn market_qty(
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        asset_class: AssetClass,
    ) -> Self {
        Self {
            qty: Some(qty),
            notional: None,
            ..Self::market_notional(symbol, side, Decimal::ZERO, asset_class)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

/// Order record as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub qty: Option<Decimal>,
    pub notional: Option<Decimal>,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub submitted_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pl: Decimal,
    pub asset_class: AssetClass,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketClock {
    pub is_open: bool,
    pub next_open_ms: i64,
    pub next_close_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub open_ms: i64,
    pub close_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub tradable: bool,
    pub shortable: bool,
    pub fractionable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioHistory {
    pub timestamps_ms: Vec<i64>,
    pub equity: Vec<Decimal>,
    pub profit_loss: Vec<Decimal>,
}

impl PortfolioHistory {
    /// Loss over the covered window: first equity minus last, floored at zero.
    pub fn loss(&self) -> Option<Decimal> {
        let first = self.equity.first()?;
        let last = self.equity.last()?;
        Some((*first - *last).max(Decimal::ZERO))
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    fn provider(&self) -> &str;
    fn asset_class(&self) -> AssetClass;

    async fn get_account(&self) -> Result<Account>;
    async fn get_positions(&self) -> Result<Vec<Position>>;
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>>;
    async fn get_clock(&self) -> Result<MarketClock>;
    async fn get_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarDay>>;
    async fn get_asset(&self, symbol: &str) -> Result<Option<Asset>>;
    async fn create_order(&self, request: &OrderRequest) -> Result<BrokerOrder>;
    async fn get_order(&self, order_id: &str) -> Result<Option<BrokerOrder>>;
    async fn list_orders(&self, limit: usize) -> Result<Vec<BrokerOrder>>;
    async fn cancel_order(&self, order_id: &str) -> Result<()>;
    async fn cancel_all_orders(&self) -> Result<usize>;
    async fn close_position(&self, symbol: &str) -> Result<Option<BrokerOrder>>;
    async fn get_portfolio_history(&self, days: u32) -> Result<PortfolioHistory>;
}
