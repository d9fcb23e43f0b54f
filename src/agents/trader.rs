//! Trader agent
//!
//! Consumes approved recommendations, sizes positions from available
//! cash and confidence, and hands every order to the idempotent
//! execution pipeline under a `trader:<side>:<symbol>:<now_ms>` key.
//! Closing a position publishes `trade_outcome` for the learning loop.

use super::learning::StrategyParams;
use crate::capabilities::{AssetClass, Broker, OrderRequest, OrderSide};
use crate::error::{Result, SwarmError};
use crate::execution::{execute_order, ExecutionDeps};
use crate::persistence::{
    PolicyStore, RiskStateStore, SubmissionStore, TradeStore, TraceWriter,
};
use crate::swarm::{AgentId, AgentKind, Message, MessageType, SwarmAgent, SwarmRegistry};
use crate::util::Clock;
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TraderConfig {
    /// Fraction of cash committed per full-confidence entry.
    pub position_pct: Decimal,
    pub max_notional: Decimal,
    pub history_cap: usize,
    pub history_trim: usize,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            position_pct: dec!(0.10),
            max_notional: dec!(5000),
            history_cap: 100,
            history_trim: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: String,
    pub notional: Option<Decimal>,
    pub qty: Option<Decimal>,
    pub state: String,
    pub broker_order_id: Option<String>,
    pub timestamp_ms: i64,
    pub note: String,
}

pub struct TraderAgent {
    id: AgentId,
    clock: Arc<dyn Clock>,
    registry: Arc<SwarmRegistry>,
    broker: Arc<dyn Broker>,
    submissions: SubmissionStore,
    trades: TradeStore,
    risk: RiskStateStore,
    policy: PolicyStore,
    traces: TraceWriter,
    config: TraderConfig,
    strategy: StrategyParams,
    history: Vec<TradeRecord>,
}

impl TraderAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        registry: Arc<SwarmRegistry>,
        broker: Arc<dyn Broker>,
        submissions: SubmissionStore,
        trades: TradeStore,
        risk: RiskStateStore,
        policy: PolicyStore,
        traces: TraceWriter,
        config: TraderConfig,
    ) -> Self {
        Self {
            id: AgentId::default_shard(AgentKind::Trader),
            clock,
            registry,
            broker,
            submissions,
            trades,
            risk,
            policy,
            traces,
            config,
            strategy: StrategyParams::default(),
            history: Vec::new(),
        }
    }

    fn deps(&self) -> ExecutionDeps<'_> {
        ExecutionDeps {
            clock: self.clock.as_ref(),
            broker: self.broker.as_ref(),
            submissions: &self.submissions,
            trades: &self.trades,
            risk: &self.risk,
            policy: &self.policy,
            traces: &self.traces,
            symbol_stats: None,
            confidence: None,
        }
    }

    fn push_history(&mut self, record: TradeRecord) {
        self.history.push(record);
        if self.history.len() > self.config.history_cap {
            let keep_from = self.history.len() - self.config.history_trim;
            self.history.drain(..keep_from);
        }
    }

    fn valid_symbol(symbol: &str) -> bool {
        !symbol.is_empty()
            && symbol.len() <= 12
            && symbol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '.')
    }

    /// `min(cash × pct × confidence, notional caps)` floored to cents.
    fn size_position(&self, cash: Decimal, confidence: f64) -> Decimal {
        let confidence = Decimal::from_f64(confidence).unwrap_or_default();
        let cap = self.config.max_notional.min(self.strategy.max_position_notional);
        (cash * self.config.position_pct * confidence)
            .min(cap)
            .round_dp_with_strategy(2, RoundingStrategy::ToZero)
    }

    pub async fn handle_buy(
        &mut self,
        symbol: &str,
        confidence: f64,
        reasoning: &str,
    ) -> Result<serde_json::Value> {
        let symbol = symbol.trim().to_uppercase();
        if !Self::valid_symbol(&symbol) {
            return Err(SwarmError::InvalidInput(format!("bad symbol {symbol:?}")));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(SwarmError::InvalidInput(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }
        if confidence < self.strategy.min_confidence_buy {
            debug!(
                "skipping {symbol}: confidence {confidence:.2} below bar {:.2}",
                self.strategy.min_confidence_buy
            );
            return Ok(json!({"executed": false, "skipped": "confidence below bar"}));
        }

        let account = self.broker.get_account().await?;
        let notional = self.size_position(account.cash, confidence);
        if notional < dec!(1) {
            return Ok(json!({"executed": false, "skipped": "cash too small"}));
        }

        let now_ms = self.clock.now_ms();
        let order = OrderRequest::market_notional(
            &symbol,
            OrderSide::Buy,
            notional,
            self.broker.asset_class(),
        );
        let idempotency_key = format!("trader:buy:{symbol}:{now_ms}");

        match execute_order(&self.deps(), "trader", &idempotency_key, &order, None).await {
            Ok(row) => {
                info!("trader bought {symbol} for {notional} ({})", row.state);
                self.push_history(TradeRecord {
                    symbol: symbol.clone(),
                    side: "buy".into(),
                    notional: Some(notional),
                    qty: None,
                    state: row.state.clone(),
                    broker_order_id: row.broker_order_id.clone(),
                    timestamp_ms: now_ms,
                    note: reasoning.chars().take(160).collect(),
                });
                Ok(json!({"executed": true, "submission": row.idempotency_key, "notional": notional}))
            }
            Err(e) => {
                warn!("buy {symbol} rejected: {e}");
                self.push_history(TradeRecord {
                    symbol,
                    side: "buy".into(),
                    notional: Some(notional),
                    qty: None,
                    state: "rejected".into(),
                    broker_order_id: None,
                    timestamp_ms: now_ms,
                    note: e.to_string().chars().take(160).collect(),
                });
                Ok(json!({"executed": false, "error": e.kind(), "detail": e.to_string()}))
            }
        }
    }

    pub async fn handle_sell(&mut self, symbol: &str, reason: &str) -> Result<serde_json::Value> {
        let symbol = symbol.trim().to_uppercase();
        if !Self::valid_symbol(&symbol) {
            return Err(SwarmError::InvalidInput(format!("bad symbol {symbol:?}")));
        }
        let Some(position) = self.broker.get_position(&symbol).await? else {
            return Ok(json!({"executed": false, "skipped": "no position"}));
        };

        let now_ms = self.clock.now_ms();
        let order = OrderRequest::market_qty(
            &symbol,
            OrderSide::Sell,
            position.qty,
            position.asset_class,
        );
        let idempotency_key = format!("trader:sell:{symbol}:{now_ms}");

        match execute_order(&self.deps(), "trader", &idempotency_key, &order, None).await {
            Ok(row) => {
                let pnl = position.unrealized_pl;
                info!("trader closed {symbol} ({reason}), pnl {pnl}");
                self.push_history(TradeRecord {
                    symbol: symbol.clone(),
                    side: "sell".into(),
                    notional: Some(position.market_value),
                    qty: Some(position.qty),
                    state: row.state.clone(),
                    broker_order_id: row.broker_order_id.clone(),
                    timestamp_ms: now_ms,
                    note: reason.chars().take(160).collect(),
                });
                self.registry
                    .publish(
                        &self.id,
                        "trade_outcome",
                        json!({
                            "symbol": symbol,
                            "success": pnl > Decimal::ZERO,
                            "pnl": pnl,
                            "notional": position.market_value,
                            "timestamp_ms": now_ms,
                        }),
                    )
                    .await?;
                Ok(json!({"executed": true, "pnl": pnl}))
            }
            Err(e) => {
                warn!("sell {symbol} rejected: {e}");
                Ok(json!({"executed": false, "error": e.kind(), "detail": e.to_string()}))
            }
        }
    }

    async fn handle_recommendations(
        &mut self,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let recommendations = payload["recommendations"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let mut executed = 0u32;
        for recommendation in &recommendations {
            let symbol = recommendation["symbol"].as_str().unwrap_or_default();
            let action = recommendation["action"].as_str().unwrap_or_default();
            let confidence = recommendation["confidence"].as_f64().unwrap_or(0.0);
            let reasoning = recommendation["reasoning"].as_str().unwrap_or_default();
            let outcome = match action {
                "BUY" => self.handle_buy(symbol, confidence, reasoning).await,
                "SELL" => self.handle_sell(symbol, reasoning).await,
                _ => continue,
            };
            match outcome {
                Ok(result) if result["executed"] == true => executed += 1,
                Ok(_) => {}
                Err(e) => warn!("recommendation for {symbol} failed: {e}"),
            }
        }
        Ok(json!({"ack": true, "executed": executed}))
    }
}

#[async_trait]
impl SwarmAgent for TraderAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["execution".to_string()]
    }

    async fn on_start(&mut self) -> Result<()> {
        self.registry.subscribe(&self.id, "analysis_ready").await?;
        self.registry.subscribe(&self.id, "strategy_updated").await?;
        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> Result<serde_json::Value> {
        match (message.message_type, message.topic.as_str()) {
            (MessageType::Event, "analysis_ready") => {
                self.handle_recommendations(&message.payload).await
            }
            (MessageType::Event, "strategy_updated") => {
                if let Ok(strategy) =
                    serde_json::from_value::<StrategyParams>(message.payload["strategy"].clone())
                {
                    info!(
                        "trader strategy updated: min_confidence {:.2}, max notional {}",
                        strategy.min_confidence_buy, strategy.max_position_notional
                    );
                    self.strategy = strategy;
                }
                Ok(json!({"ack": true}))
            }
            (MessageType::Command, "buy") => {
                let symbol = message.payload["symbol"].as_str().unwrap_or_default();
                let confidence = message.payload["confidence"].as_f64().unwrap_or(0.0);
                let reasoning = message.payload["reasoning"].as_str().unwrap_or_default();
                self.handle_buy(symbol, confidence, reasoning).await
            }
            (MessageType::Command, "sell") => {
                let symbol = message.payload["symbol"].as_str().unwrap_or_default();
                let reason = message.payload["reason"].as_str().unwrap_or("manual");
                self.handle_sell(symbol, reason).await
            }
            _ => Ok(json!({"ack": true})),
        }
    }

    async fn handle_request(
        &mut self,
        route: &str,
        _body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match route {
            "/history" => {
                let mut trades = self.history.clone();
                trades.reverse();
                Ok(json!({"trades": trades}))
            }
            "/strategy" => Ok(serde_json::to_value(&self.strategy)?),
            _ => Err(SwarmError::NotFound(format!("no route {route}"))),
        }
    }

    fn state_snapshot(&self) -> serde_json::Value {
        json!({
            "history": self.history.len(),
            "strategy": self.strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::PaperBroker;
    use crate::persistence::SqlGateway;
    use crate::util::ManualClock;

    struct Fixture {
        clock: Arc<ManualClock>,
        broker: Arc<PaperBroker>,
        registry: Arc<SwarmRegistry>,
        trades: TradeStore,
        agent: TraderAgent,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let registry = Arc::new(SwarmRegistry::with_defaults(clock.clone()));
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let broker = Arc::new(PaperBroker::new(
            clock.clone(),
            AssetClass::UsEquity,
            dec!(100000),
        ));
        let trades = TradeStore::new(gateway.pool().clone());
        let agent = TraderAgent::new(
            clock.clone(),
            registry.clone(),
            broker.clone(),
            SubmissionStore::new(gateway.pool().clone()),
            trades.clone(),
            RiskStateStore::new(gateway.pool().clone()),
            PolicyStore::new(gateway.pool().clone()),
            TraceWriter::new(gateway.pool().clone()),
            TraderConfig::default(),
        );
        Fixture {
            clock,
            broker,
            registry,
            trades,
            agent,
        }
    }

    #[test]
    fn test_position_sizing() {
        let config = TraderConfig::default();
        let sizing = |cash: Decimal, confidence: f64, strategy_cap: Decimal| {
            let agent_strategy = StrategyParams {
                max_position_notional: strategy_cap,
                ..Default::default()
            };
            let confidence = Decimal::from_f64(confidence).unwrap_or_default();
            let cap = config.max_notional.min(agent_strategy.max_position_notional);
            (cash * config.position_pct * confidence)
                .min(cap)
                .round_dp_with_strategy(2, RoundingStrategy::ToZero)
        };

        // 10% of cash scaled by confidence, floored to cents.
        assert_eq!(sizing(dec!(10000), 0.85, dec!(5000)), dec!(850));
        assert_eq!(sizing(dec!(33333), 0.77, dec!(5000)), dec!(2566.64));
        // Capped by the $5000 ceiling.
        assert_eq!(sizing(dec!(1000000), 0.9, dec!(5000)), dec!(5000));
        // The learning loop can lower the ceiling.
        assert_eq!(sizing(dec!(1000000), 0.9, dec!(2000)), dec!(2000));
    }

    #[tokio::test]
    async fn test_buy_executes_and_records_history() {
        let mut f = fixture().await;
        f.broker.set_quote("AAPL", dec!(200)).await;

        let result = f.agent.handle_buy("aapl", 0.9, "strong signal").await.unwrap();
        assert_eq!(result["executed"], true);
        assert_eq!(f.broker.create_order_call_count(), 1);
        assert_eq!(f.trades.count().await.unwrap(), 1);

        let history = f.agent.handle_request("/history", json!({})).await.unwrap();
        assert_eq!(history["trades"][0]["symbol"], "AAPL");
        assert_eq!(history["trades"][0]["side"], "buy");
    }

    #[tokio::test]
    async fn test_confidence_gate() {
        let mut f = fixture().await;
        f.broker.set_quote("AAPL", dec!(200)).await;

        let result = f.agent.handle_buy("AAPL", 0.5, "meh").await.unwrap();
        assert_eq!(result["executed"], false);
        assert_eq!(f.broker.create_order_call_count(), 0);

        assert!(f.agent.handle_buy("AAPL", 1.5, "bad").await.is_err());
    }

    #[tokio::test]
    async fn test_sell_publishes_trade_outcome() {
        let mut f = fixture().await;
        f.broker.set_quote("MSFT", dec!(100)).await;
        f.agent.handle_buy("MSFT", 0.9, "entry").await.unwrap();

        // Nobody holds a position we don't own.
        let skipped = f.agent.handle_sell("NFLX", "exit").await.unwrap();
        assert_eq!(skipped["executed"], false);

        // Subscribe a listener so the outcome lands in the queue.
        let learner = AgentId::default_shard(AgentKind::Learning);
        f.registry.subscribe(&learner, "trade_outcome").await.unwrap();

        f.clock.advance(1);
        let result = f.agent.handle_sell("MSFT", "take profit").await.unwrap();
        assert_eq!(result["executed"], true);
        assert_eq!(f.registry.queue_state().await.queued, 1);
        assert!(f.broker.get_position("MSFT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_truncation() {
        let mut f = fixture().await;
        for i in 0..105 {
            f.agent.push_history(TradeRecord {
                symbol: format!("S{i}"),
                side: "buy".into(),
                notional: None,
                qty: None,
                state: "SUBMITTED".into(),
                broker_order_id: None,
                timestamp_ms: i,
                note: String::new(),
            });
        }
        assert_eq!(f.agent.history.len(), 54);
        assert_eq!(f.agent.history.last().unwrap().symbol, "S104");
    }

    #[tokio::test]
    async fn test_analysis_ready_executes_buys() {
        let mut f = fixture().await;
        f.broker.set_quote("NVDA", dec!(500)).await;

        let message = Message::event(
            AgentId::default_shard(AgentKind::Analyst),
            crate::swarm::MessageTarget::Agent(f.agent.id()),
            "analysis_ready",
            json!({
                "recommendations": [
                    {"symbol": "NVDA", "action": "BUY", "confidence": 0.85, "reasoning": "flow"},
                    {"symbol": "NVDA", "action": "WAIT", "confidence": 0.4, "reasoning": "wait"},
                ],
            }),
            f.clock.now_ms(),
        );
        let result = f.agent.handle_message(message).await.unwrap();
        assert_eq!(result["executed"], 1);
        assert_eq!(f.broker.create_order_call_count(), 1);
    }
}
