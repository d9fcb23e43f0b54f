//! Risk manager agent
//!
//! Deterministic order validation: the policy engine over live risk
//! state and account data. Exposes `/validate` and answers
//! `validate_order` commands with `{approved, reasons}`.

use crate::capabilities::{Broker, MarketData, OptionsData, OrderRequest};
use crate::error::{Result, SwarmError};
use crate::persistence::{PolicyStore, RiskStateStore};
use crate::policy::{self, OptionOrderContext, PolicyInput, SymbolStats};
use crate::swarm::{AgentId, AgentKind, Message, MessageType, SwarmAgent};
use crate::util::Clock;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub struct RiskManagerAgent {
    id: AgentId,
    clock: Arc<dyn Clock>,
    broker: Arc<dyn Broker>,
    risk_store: RiskStateStore,
    policy_store: PolicyStore,
    market: Option<Arc<dyn MarketData>>,
    options: Arc<dyn OptionsData>,
}

impl RiskManagerAgent {
    pub fn new(
        clock: Arc<dyn Clock>,
        broker: Arc<dyn Broker>,
        risk_store: RiskStateStore,
        policy_store: PolicyStore,
        market: Option<Arc<dyn MarketData>>,
        options: Arc<dyn OptionsData>,
    ) -> Self {
        Self {
            id: AgentId::default_shard(AgentKind::RiskManager),
            clock,
            broker,
            risk_store,
            policy_store,
            market,
            options,
        }
    }

    /// Fill in the option greeks from the options feed when the caller
    /// did not supply them. A feed that is not configured leaves the
    /// context untouched.
    async fn enrich_option_context(
        &self,
        mut option: OptionOrderContext,
        contract_symbol: Option<&str>,
    ) -> OptionOrderContext {
        if option.delta.is_none() && self.options.is_configured() {
            if let Some(contract_symbol) = contract_symbol {
                if let Ok(snapshot) = self.options.get_snapshot(contract_symbol).await {
                    option.delta = snapshot.delta;
                    if option.current_price.is_none() {
                        option.current_price = snapshot.last_price;
                    }
                }
            }
        }
        option
    }

    /// Evaluate one order against policy plus live risk state.
    pub async fn validate_order(
        &self,
        order: &OrderRequest,
        confidence: Option<f64>,
    ) -> Result<serde_json::Value> {
        self.validate_order_with_option(order, confidence, None).await
    }

    pub async fn validate_order_with_option(
        &self,
        order: &OrderRequest,
        confidence: Option<f64>,
        option: Option<OptionOrderContext>,
    ) -> Result<serde_json::Value> {
        let now_ms = self.clock.now_ms();
        let risk_state = self.risk_store.load(now_ms).await?;
        let config = self.policy_store.load().await?;
        let account = self.broker.get_account().await?;
        let positions = self.broker.get_positions().await?;
        let market_clock = self.broker.get_clock().await?;

        let symbol_stats = match &self.market {
            Some(market) => market
                .get_snapshot(&order.symbol)
                .await
                .ok()
                .flatten()
                .map(|s| SymbolStats {
                    last_price: s.last_price,
                    avg_volume: s.avg_volume.unwrap_or_default(),
                }),
            None => None,
        };

        let result = policy::evaluate(&PolicyInput {
            order,
            account: &account,
            positions: &positions,
            market_clock: &market_clock,
            risk_state: &risk_state,
            config: &config,
            symbol_stats: symbol_stats.as_ref(),
            option: option.as_ref(),
            confidence,
            now_ms,
        });

        debug!(
            "validated {} {}: approved={}",
            order.side.as_str(),
            order.symbol,
            result.allowed
        );
        Ok(json!({
            "approved": result.allowed,
            "reasons": result.reasons(),
            "diagnostics": result.diagnostics,
        }))
    }
}

#[async_trait]
impl SwarmAgent for RiskManagerAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["risk_validation".to_string()]
    }

    async fn handle_message(&mut self, message: Message) -> Result<serde_json::Value> {
        match (message.message_type, message.topic.as_str()) {
            (MessageType::Command, "validate_order") => {
                let order: OrderRequest = serde_json::from_value(message.payload["order"].clone())?;
                let confidence = message.payload["confidence"].as_f64();
                self.validate_order(&order, confidence).await
            }
            _ => Ok(json!({"ack": true})),
        }
    }

    async fn handle_request(
        &mut self,
        route: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match route {
            "/validate" => {
                let order: OrderRequest = serde_json::from_value(body["order"].clone())
                    .map_err(|e| SwarmError::InvalidInput(format!("bad order: {e}")))?;
                let confidence = body["confidence"].as_f64();
                let option = match body.get("option") {
                    Some(raw) if !raw.is_null() => {
                        let parsed: OptionOrderContext = serde_json::from_value(raw.clone())
                            .map_err(|e| {
                                SwarmError::InvalidInput(format!("bad option context: {e}"))
                            })?;
                        let contract = body["contract"].as_str();
                        Some(self.enrich_option_context(parsed, contract).await)
                    }
                    _ => None,
                };
                self.validate_order_with_option(&order, confidence, option).await
            }
            _ => Err(SwarmError::NotFound(format!("no route {route}"))),
        }
    }

    fn state_snapshot(&self) -> serde_json::Value {
        json!({"agent": self.id.to_string()})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{AssetClass, OrderSide, PaperBroker};
    use crate::persistence::SqlGateway;
    use crate::util::ManualClock;
    use rust_decimal_macros::dec;

    async fn fixture() -> (Arc<ManualClock>, Arc<PaperBroker>, RiskManagerAgent, RiskStateStore) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let broker = Arc::new(PaperBroker::new(
            clock.clone(),
            AssetClass::UsEquity,
            dec!(100000),
        ));
        let risk_store = RiskStateStore::new(gateway.pool().clone());
        let agent = RiskManagerAgent::new(
            clock.clone(),
            broker.clone(),
            risk_store.clone(),
            PolicyStore::new(gateway.pool().clone()),
            None,
            Arc::new(crate::capabilities::NullOptions),
        );
        (clock, broker, agent, risk_store)
    }

    #[tokio::test]
    async fn test_validate_approves_clean_order() {
        let (_clock, _broker, agent, _risk) = fixture().await;
        let order =
            OrderRequest::market_notional("AAPL", OrderSide::Buy, dec!(1000), AssetClass::UsEquity);
        let verdict = agent.validate_order(&order, Some(0.8)).await.unwrap();
        assert_eq!(verdict["approved"], true);
        assert!(verdict["reasons"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_rejects_on_kill_switch() {
        let (clock, _broker, agent, risk) = fixture().await;
        risk.set_kill_switch(true, Some("halt"), clock.now_ms())
            .await
            .unwrap();

        let order =
            OrderRequest::market_notional("AAPL", OrderSide::Buy, dec!(1000), AssetClass::UsEquity);
        let verdict = agent.validate_order(&order, None).await.unwrap();
        assert_eq!(verdict["approved"], false);
        let reasons = verdict["reasons"].as_array().unwrap();
        assert!(reasons[0].as_str().unwrap().contains("kill switch"));
    }

    #[tokio::test]
    async fn test_validate_route_rejects_garbage() {
        let (_clock, _broker, mut agent, _risk) = fixture().await;
        let err = agent
            .handle_request("/validate", json!({"order": {"nope": true}}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_option_context_checked_against_policy() {
        let (clock, _broker, mut agent, _risk) = fixture().await;
        let order =
            OrderRequest::market_notional("AAPL", OrderSide::Buy, dec!(500), AssetClass::UsEquity);
        // Options are disabled by default policy.
        let expiration = crate::util::clock::eastern_date(clock.now_ms()) + chrono::Days::new(30);
        let verdict = agent
            .handle_request(
                "/validate",
                json!({
                    "order": order,
                    "confidence": 0.9,
                    "option": {
                        "expiration": expiration,
                        "strike": "180",
                        "right": "call",
                        "strategy": "long_call",
                        "existing_qty": "0",
                        "existing_avg_price": null,
                        "current_price": null,
                        "open_option_positions": 0,
                        "current_option_exposure": "0",
                    },
                    "contract": "AAPL240216C00180000",
                }),
            )
            .await
            .unwrap();
        assert_eq!(verdict["approved"], false);
        let reasons = verdict["reasons"].as_array().unwrap();
        assert!(reasons
            .iter()
            .any(|r| r.as_str().unwrap().contains("options_disabled")));
    }

    #[tokio::test]
    async fn test_market_stats_enforce_price_floor() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let broker = Arc::new(PaperBroker::new(
            clock.clone(),
            AssetClass::UsEquity,
            dec!(100000),
        ));
        let policy_store = PolicyStore::new(gateway.pool().clone());
        let mut config = policy_store.load().await.unwrap();
        config.min_price = Some(dec!(5));
        config.min_avg_volume = Some(dec!(100000));
        policy_store.save(&config, clock.now_ms()).await.unwrap();

        let market = Arc::new(crate::capabilities::StaticMarketData::new());
        market.set_price("PENY", dec!(2), dec!(500)).await;
        let market: Arc<dyn MarketData> = market;

        let agent = RiskManagerAgent::new(
            clock.clone(),
            broker,
            RiskStateStore::new(gateway.pool().clone()),
            policy_store,
            Some(market),
            Arc::new(crate::capabilities::NullOptions),
        );
        let order =
            OrderRequest::market_notional("PENY", OrderSide::Buy, dec!(100), AssetClass::UsEquity);
        let verdict = agent.validate_order(&order, None).await.unwrap();
        assert_eq!(verdict["approved"], false);
        let reasons: Vec<String> = verdict["reasons"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_str().unwrap().to_string())
            .collect();
        assert!(reasons.iter().any(|r| r.contains("min_price")));
        assert!(reasons.iter().any(|r| r.contains("min_volume")));
    }

    #[tokio::test]
    async fn test_determinism_of_validation() {
        let (_clock, _broker, agent, _risk) = fixture().await;
        let order =
            OrderRequest::market_notional("MSFT", OrderSide::Buy, dec!(9000), AssetClass::UsEquity);
        let a = agent.validate_order(&order, None).await.unwrap();
        let b = agent.validate_order(&order, None).await.unwrap();
        assert_eq!(a, b);
    }
}
