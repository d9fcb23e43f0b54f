//! Paper broker
//!
//! Deterministic in-process broker used by dry-run mode and tests.
//! Market orders fill immediately at the posted quote; cash and
//! positions are tracked so sizing and policy checks see realistic
//! account state. `create_order_calls` counts real submission attempts,
//! which the idempotency tests assert on.

use super::broker::*;
use crate::error::{Result, SwarmError};
use crate::util::Clock;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

struct PaperState {
    cash: Decimal,
    positions: HashMap<String, Position>,
    orders: Vec<BrokerOrder>,
    quotes: HashMap<String, Decimal>,
    market_open: bool,
    fail_next_create: Option<String>,
    equity_history: Vec<(i64, Decimal)>,
}

pub struct PaperBroker {
    clock: Arc<dyn Clock>,
    asset_class: AssetClass,
    state: RwLock<PaperState>,
    create_order_calls: AtomicU64,
}

impl PaperBroker {
    pub fn new(clock: Arc<dyn Clock>, asset_class: AssetClass, starting_cash: Decimal) -> Self {
        Self {
            clock,
            asset_class,
            state: RwLock::new(PaperState {
                cash: starting_cash,
                positions: HashMap::new(),
                orders: Vec::new(),
                quotes: HashMap::new(),
                market_open: true,
                fail_next_create: None,
                equity_history: Vec::new(),
            }),
            create_order_calls: AtomicU64::new(0),
        }
    }

    pub async fn set_quote(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .await
            .quotes
            .insert(symbol.to_uppercase(), price);
    }

    pub async fn set_market_open(&self, open: bool) {
        self.state.write().await.market_open = open;
    }

    /// Inject a one-shot failure for the next `create_order` call.
    pub async fn fail_next_create(&self, error: &str) {
        self.state.write().await.fail_next_create = Some(error.to_string());
    }

    pub fn create_order_call_count(&self) -> u64 {
        self.create_order_calls.load(Ordering::SeqCst)
    }

    async fn equity(&self, state: &PaperState) -> Decimal {
        let positions_value: Decimal = state.positions.values().map(|p| p.market_value).sum();
        state.cash + positions_value
    }

    fn fill_price(state: &PaperState, symbol: &str) -> Result<Decimal> {
        state
            .quotes
            .get(symbol)
            .copied()
            .ok_or_else(|| SwarmError::Provider(format!("no quote for {symbol}")))
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn provider(&self) -> &str {
        "paper"
    }

    fn asset_class(&self) -> AssetClass {
        self.asset_class
    }

    async fn get_account(&self) -> Result<Account> {
        let state = self.state.read().await;
        let equity = self.equity(&state).await;
        Ok(Account {
            equity,
            cash: state.cash,
            buying_power: state.cash,
            currency: "USD".to_string(),
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.read().await.positions.values().cloned().collect())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        Ok(self
            .state
            .read()
            .await
            .positions
            .get(&symbol.to_uppercase())
            .cloned())
    }

    async fn get_clock(&self) -> Result<MarketClock> {
        let now_ms = self.clock.now_ms();
        let state = self.state.read().await;
        Ok(MarketClock {
            is_open: state.market_open,
            next_open_ms: now_ms,
            next_close_ms: now_ms + 6 * 3_600_000,
        })
    }

    async fn get_calendar(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CalendarDay>> {
        let mut days = Vec::new();
        let mut date = start;
        while date <= end {
            days.push(CalendarDay {
                date,
                open_ms: 0,
                close_ms: 0,
            });
            date = date
                .succ_opt()
                .ok_or_else(|| SwarmError::InvalidInput("calendar overflow".into()))?;
        }
        Ok(days)
    }

    async fn get_asset(&self, symbol: &str) -> Result<Option<Asset>> {
        Ok(Some(Asset {
            symbol: symbol.to_uppercase(),
            asset_class: self.asset_class,
            tradable: true,
            shortable: false,
            fractionable: true,
        }))
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<BrokerOrder> {
        self.create_order_calls.fetch_add(1, Ordering::SeqCst);
        let now_ms = self.clock.now_ms();
        let mut state = self.state.write().await;

        if let Some(error) = state.fail_next_create.take() {
            return Err(SwarmError::Provider(error));
        }

        let symbol = request.symbol.to_uppercase();
        let price = Self::fill_price(&state, &symbol)?;

        let qty = match (request.qty, request.notional) {
            (Some(qty), _) => qty,
            (None, Some(notional)) if !price.is_zero() => notional / price,
            _ => {
                return Err(SwarmError::InvalidInput(
                    "order needs qty or notional".to_string(),
                ))
            }
        };
        let notional = qty * price;

        match request.side {
            OrderSide::Buy => {
                if notional > state.cash {
                    return Err(SwarmError::InsufficientBuyingPower(format!(
                        "need {notional}, have {}",
                        state.cash
                    )));
                }
                state.cash -= notional;
                let position =
                    state
                        .positions
                        .entry(symbol.clone())
                        .or_insert_with(|| Position {
                            symbol: symbol.clone(),
                            qty: Decimal::ZERO,
                            avg_entry_price: price,
                            market_value: Decimal::ZERO,
                            unrealized_pl: Decimal::ZERO,
                            asset_class: request.asset_class,
                        });
                let total_cost = position.avg_entry_price * position.qty + notional;
                position.qty += qty;
                if !position.qty.is_zero() {
                    position.avg_entry_price = total_cost / position.qty;
                }
                position.market_value = position.qty * price;
            }
            OrderSide::Sell => {
                let position = state.positions.get_mut(&symbol).ok_or_else(|| {
                    SwarmError::InvalidInput(format!("no position in {symbol}"))
                })?;
                if qty > position.qty {
                    return Err(SwarmError::InvalidInput(format!(
                        "sell {qty} exceeds position {}",
                        position.qty
                    )));
                }
                position.qty -= qty;
                position.market_value = position.qty * price;
                state.cash += notional;
                if state
                    .positions
                    .get(&symbol)
                    .map_or(false, |p| p.qty.is_zero())
                {
                    state.positions.remove(&symbol);
                }
            }
        }

        let order = BrokerOrder {
            id: Uuid::new_v4().to_string(),
            client_order_id: request.client_order_id.clone(),
            symbol,
            side: request.side,
            order_type: request.order_type,
            status: OrderStatus::Filled,
            qty: Some(qty),
            notional: Some(notional),
            filled_qty: qty,
            filled_avg_price: Some(price),
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            submitted_at_ms: now_ms,
        };
        state.orders.push(order.clone());

        let equity = self.equity(&state).await;
        state.equity_history.push((now_ms, equity));

        debug!(
            "paper fill: {} {} {} @ {}",
            order.side.as_str(),
            order.filled_qty,
            order.symbol,
            price
        );
        Ok(order)
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<BrokerOrder>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned())
    }

    async fn list_orders(&self, limit: usize) -> Result<Vec<BrokerOrder>> {
        let state = self.state.read().await;
        Ok(state.orders.iter().rev().take(limit).cloned().collect())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let state = self.state.read().await;
        if state.orders.iter().any(|o| o.id == order_id) {
            // Paper fills are immediate, so cancellation is a no-op.
            Ok(())
        } else {
            Err(SwarmError::NotFound(format!("order {order_id}")))
        }
    }

    async fn cancel_all_orders(&self) -> Result<usize> {
        Ok(0)
    }

    async fn close_position(&self, symbol: &str) -> Result<Option<BrokerOrder>> {
        let qty = match self.get_position(symbol).await? {
            Some(position) => position.qty,
            None => return Ok(None),
        };
        let request = OrderRequest::market_qty(symbol, OrderSide::Sell, qty, self.asset_class);
        self.create_order(&request).await.map(Some)
    }

    async fn get_portfolio_history(&self, days: u32) -> Result<PortfolioHistory> {
        let now_ms = self.clock.now_ms();
        let cutoff = now_ms - (days as i64) * 86_400_000;
        let state = self.state.read().await;
        let mut history = PortfolioHistory::default();
        for (ts, equity) in state.equity_history.iter().filter(|(ts, _)| *ts >= cutoff) {
            history.timestamps_ms.push(*ts);
            history.equity.push(*equity);
            history.profit_loss.push(Decimal::ZERO);
        }
        Ok(history)
    }
}
