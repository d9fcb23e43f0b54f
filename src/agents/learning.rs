//! Learning agent
//!
//! Subscribes to `trade_outcome`, keeps a rolling outcome window, and
//! derives strategy adjustments: weak performance tightens the entry
//! bar and position sizing, strong performance loosens them. Per-symbol
//! stats feed the advice endpoint the trader consults before buying.

use crate::error::{Result, SwarmError};
use crate::swarm::{AgentId, AgentKind, Message, MessageType, SwarmAgent, SwarmRegistry};
use crate::util::Clock;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const RETENTION_MS: i64 = 30 * 24 * 3600 * 1000;
const OUTCOME_CAP: usize = 1000;
/// Overflow truncates to 80% of the cap.
const OUTCOME_TRIM_TO: usize = 800;
const OPTIMIZE_INTERVAL_MS: i64 = 15 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub success: bool,
    pub pnl: Decimal,
    pub notional: Decimal,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub samples: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub avg_pnl: Decimal,
}

impl PerformanceStats {
    fn from_outcomes<'a>(outcomes: impl Iterator<Item = &'a TradeOutcome>) -> Self {
        let mut stats = Self::default();
        for outcome in outcomes {
            stats.samples += 1;
            if outcome.success {
                stats.wins += 1;
            } else {
                stats.losses += 1;
            }
            stats.total_pnl += outcome.pnl;
        }
        if stats.samples > 0 {
            stats.win_rate = stats.wins as f64 / stats.samples as f64;
            stats.avg_pnl = stats.total_pnl / Decimal::from(stats.samples);
        }
        stats
    }
}

/// Tunable strategy parameters shared with the trader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub min_confidence_buy: f64,
    pub max_position_notional: Decimal,
    pub risk_multiplier: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            min_confidence_buy: 0.7,
            max_position_notional: dec!(5000),
            risk_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviceResult {
    pub approved: bool,
    pub adjusted_confidence: f64,
    pub reasons: Vec<String>,
}

pub struct LearningAgent {
    id: AgentId,
    clock: Arc<dyn Clock>,
    registry: Arc<SwarmRegistry>,
    outcomes: Vec<TradeOutcome>,
    global: PerformanceStats,
    per_symbol: HashMap<String, PerformanceStats>,
    strategy: StrategyParams,
    last_optimize_ms: i64,
}

impl LearningAgent {
    pub fn new(clock: Arc<dyn Clock>, registry: Arc<SwarmRegistry>) -> Self {
        Self {
            id: AgentId::default_shard(AgentKind::Learning),
            clock,
            registry,
            outcomes: Vec::new(),
            global: PerformanceStats::default(),
            per_symbol: HashMap::new(),
            strategy: StrategyParams::default(),
            last_optimize_ms: 0,
        }
    }

    pub fn strategy(&self) -> &StrategyParams {
        &self.strategy
    }

    pub fn performance(&self) -> &PerformanceStats {
        &self.global
    }

    fn recompute(&mut self) {
        self.global = PerformanceStats::from_outcomes(self.outcomes.iter());
        self.per_symbol.clear();
        let mut grouped: HashMap<String, Vec<&TradeOutcome>> = HashMap::new();
        for outcome in &self.outcomes {
            grouped
                .entry(outcome.symbol.to_uppercase())
                .or_default()
                .push(outcome);
        }
        for (symbol, outcomes) in grouped {
            self.per_symbol.insert(
                symbol,
                PerformanceStats::from_outcomes(outcomes.into_iter()),
            );
        }
    }

    pub fn record_outcome(&mut self, mut outcome: TradeOutcome) {
        outcome.symbol = outcome.symbol.to_uppercase();
        self.outcomes.push(outcome);

        let cutoff = self.clock.now_ms() - RETENTION_MS;
        self.outcomes.retain(|o| o.timestamp_ms >= cutoff);
        if self.outcomes.len() > OUTCOME_CAP {
            let excess = self.outcomes.len() - OUTCOME_TRIM_TO;
            self.outcomes.drain(..excess);
        }
        self.recompute();
    }

    /// Re-derive strategy parameters from global performance. Publishes
    /// `strategy_updated` when anything moved.
    pub async fn optimize_strategy(&mut self, reason: &str) -> Result<bool> {
        let now_ms = self.clock.now_ms();
        self.last_optimize_ms = now_ms;
        let stats = self.global;
        let before = self.strategy.clone();

        if stats.samples >= 10 && (stats.win_rate < 0.45 || stats.avg_pnl < Decimal::ZERO) {
            self.strategy.min_confidence_buy =
                (self.strategy.min_confidence_buy + 0.05).min(0.9);
            self.strategy.max_position_notional =
                (self.strategy.max_position_notional * dec!(0.9)).max(dec!(500));
            self.strategy.risk_multiplier = (self.strategy.risk_multiplier * 0.95).max(0.5);
            info!(
                "strategy tightened ({reason}): win_rate {:.2}, avg_pnl {}",
                stats.win_rate, stats.avg_pnl
            );
        } else if stats.samples >= 10 && stats.win_rate > 0.6 && stats.avg_pnl > Decimal::ZERO {
            self.strategy.min_confidence_buy =
                (self.strategy.min_confidence_buy - 0.03).max(0.6);
            self.strategy.max_position_notional =
                (self.strategy.max_position_notional * dec!(1.05)).min(dec!(5000));
            self.strategy.risk_multiplier = (self.strategy.risk_multiplier * 1.03).min(1.5);
            info!(
                "strategy loosened ({reason}): win_rate {:.2}, avg_pnl {}",
                stats.win_rate, stats.avg_pnl
            );
        }

        let updated = self.strategy != before;
        if updated {
            self.registry
                .publish(
                    &self.id,
                    "strategy_updated",
                    json!({
                        "strategy": self.strategy,
                        "performance": stats,
                    }),
                )
                .await?;
        } else {
            debug!("optimize ({reason}): no change");
        }
        Ok(updated)
    }

    /// Confidence adjustment from symbol and global track record.
    pub fn advice(&self, symbol: &str, confidence: f64) -> AdviceResult {
        let mut adjusted = confidence;
        let mut reasons = Vec::new();

        if let Some(stats) = self.per_symbol.get(&symbol.to_uppercase()) {
            if stats.samples >= 3 {
                if stats.win_rate <= 0.35 {
                    adjusted -= 0.10;
                    reasons.push(format!(
                        "symbol win rate {:.2} over {} trades",
                        stats.win_rate, stats.samples
                    ));
                } else if stats.win_rate >= 0.65 {
                    adjusted += 0.05;
                    reasons.push(format!(
                        "symbol win rate {:.2} over {} trades",
                        stats.win_rate, stats.samples
                    ));
                }
            }
        }

        if self.global.samples >= 10 && self.global.win_rate < 0.45 {
            adjusted -= 0.05;
            reasons.push(format!("global win rate {:.2}", self.global.win_rate));
        }

        let adjusted = adjusted.clamp(0.0, 1.0);
        AdviceResult {
            approved: adjusted >= self.strategy.min_confidence_buy,
            adjusted_confidence: adjusted,
            reasons,
        }
    }
}

#[async_trait]
impl SwarmAgent for LearningAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["learning".to_string(), "advice".to_string()]
    }

    async fn on_start(&mut self) -> Result<()> {
        self.registry.subscribe(&self.id, "trade_outcome").await?;
        Ok(())
    }

    async fn on_alarm(&mut self) -> Result<()> {
        if self.clock.now_ms() - self.last_optimize_ms >= OPTIMIZE_INTERVAL_MS {
            self.optimize_strategy("scheduled").await?;
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> Result<serde_json::Value> {
        match (message.message_type, message.topic.as_str()) {
            (MessageType::Event, "trade_outcome") => {
                let outcome: TradeOutcome = serde_json::from_value(message.payload)?;
                self.record_outcome(outcome);
                Ok(json!({"ack": true, "samples": self.global.samples}))
            }
            (MessageType::Command, "optimize") => {
                let reason = message.payload["reason"].as_str().unwrap_or("on_demand");
                let updated = self.optimize_strategy(reason).await?;
                Ok(json!({
                    "updated": updated,
                    "strategy": self.strategy,
                    "performance": self.global,
                }))
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
            "/advice" => {
                let symbol = body["symbol"].as_str().unwrap_or_default();
                if symbol.is_empty() {
                    return Err(SwarmError::InvalidInput("symbol is required".into()));
                }
                let confidence = body["confidence"].as_f64().unwrap_or(0.0);
                Ok(serde_json::to_value(self.advice(symbol, confidence))?)
            }
            "/performance" => Ok(json!({
                "global": self.global,
                "per_symbol": self.per_symbol,
            })),
            "/strategy" => Ok(serde_json::to_value(&self.strategy)?),
            _ => Err(SwarmError::NotFound(format!("no route {route}"))),
        }
    }

    fn state_snapshot(&self) -> serde_json::Value {
        json!({
            "outcomes": self.outcomes.len(),
            "performance": self.global,
            "strategy": self.strategy,
            "last_optimize_ms": self.last_optimize_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;

    fn agent() -> (Arc<ManualClock>, Arc<SwarmRegistry>, LearningAgent) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let registry = Arc::new(SwarmRegistry::with_defaults(clock.clone()));
        let agent = LearningAgent::new(clock.clone(), registry.clone());
        (clock, registry, agent)
    }

    fn losing(symbol: &str, now_ms: i64) -> TradeOutcome {
        TradeOutcome {
            symbol: symbol.to_string(),
            success: false,
            pnl: dec!(-15),
            notional: dec!(1000),
            timestamp_ms: now_ms,
        }
    }

    fn winning(symbol: &str, now_ms: i64) -> TradeOutcome {
        TradeOutcome {
            symbol: symbol.to_string(),
            success: true,
            pnl: dec!(25),
            notional: dec!(1000),
            timestamp_ms: now_ms,
        }
    }

    #[tokio::test]
    async fn test_losing_streak_tightens_strategy() {
        let (clock, registry, mut agent) = agent();
        let learner_id = agent.id();
        registry.subscribe(&learner_id, "strategy_updated").await.unwrap();

        for _ in 0..12 {
            agent.record_outcome(losing("TSLA", clock.now_ms()));
        }
        assert_eq!(agent.global.samples, 12);
        assert_eq!(agent.global.win_rate, 0.0);

        let updated = agent.optimize_strategy("test").await.unwrap();
        assert!(updated);
        assert!(agent.strategy.min_confidence_buy > 0.7);
        assert!(agent.strategy.max_position_notional < dec!(5000));
        assert!(agent.strategy.risk_multiplier < 1.0);

        // The strategy_updated event reached the registry queue.
        let state = registry.queue_state().await;
        assert_eq!(state.queued, 1);
    }

    #[tokio::test]
    async fn test_winning_streak_loosens_with_caps() {
        let (clock, _registry, mut agent) = agent();
        agent.strategy.min_confidence_buy = 0.8;
        agent.strategy.max_position_notional = dec!(3000);

        for _ in 0..15 {
            agent.record_outcome(winning("NVDA", clock.now_ms()));
        }
        assert!(agent.optimize_strategy("test").await.unwrap());
        assert!((agent.strategy.min_confidence_buy - 0.77).abs() < 1e-9);
        assert_eq!(agent.strategy.max_position_notional, dec!(3150.00));
        assert!(agent.strategy.risk_multiplier > 1.0);

        // Floors and ceilings hold under repeated loosening.
        for _ in 0..50 {
            agent.optimize_strategy("test").await.unwrap();
        }
        assert!(agent.strategy.min_confidence_buy >= 0.6);
        assert!(agent.strategy.max_position_notional <= dec!(5000));
        assert!(agent.strategy.risk_multiplier <= 1.5);
    }

    #[tokio::test]
    async fn test_too_few_samples_is_noop() {
        let (clock, _registry, mut agent) = agent();
        for _ in 0..9 {
            agent.record_outcome(losing("TSLA", clock.now_ms()));
        }
        assert!(!agent.optimize_strategy("test").await.unwrap());
        assert_eq!(agent.strategy, StrategyParams::default());
    }

    #[tokio::test]
    async fn test_retention_and_cap() {
        let (clock, _registry, mut agent) = agent();

        agent.record_outcome(losing("OLD", clock.now_ms()));
        clock.advance(RETENTION_MS + 1);
        agent.record_outcome(winning("NEW", clock.now_ms()));
        assert_eq!(agent.outcomes.len(), 1);
        assert_eq!(agent.outcomes[0].symbol, "NEW");

        // 1 existing + 1100 appends: the overflow at 1001 trims to 800,
        // then 100 more accumulate.
        for _ in 0..1100 {
            agent.record_outcome(winning("NEW", clock.now_ms()));
        }
        assert!(agent.outcomes.len() <= OUTCOME_CAP);
        assert_eq!(agent.outcomes.len(), OUTCOME_TRIM_TO + 100);
    }

    #[tokio::test]
    async fn test_advice_adjustments() {
        let (clock, _registry, mut agent) = agent();

        // TSLA: 1 win, 3 losses -> win rate 0.25 over >= 3 samples.
        agent.record_outcome(winning("TSLA", clock.now_ms()));
        for _ in 0..3 {
            agent.record_outcome(losing("TSLA", clock.now_ms()));
        }
        let advice = agent.advice("TSLA", 0.78);
        assert!(!advice.approved);
        assert!((advice.adjusted_confidence - 0.68).abs() < 1e-9);

        // NVDA: strong symbol history boosts confidence.
        for _ in 0..6 {
            agent.record_outcome(winning("NVDA", clock.now_ms()));
        }
        let advice = agent.advice("NVDA", 0.68);
        assert!((advice.adjusted_confidence - 0.73).abs() < 1e-9);
        assert!(advice.approved);

        let unknown = agent.advice("ZZZZ", 0.9);
        assert!(unknown.approved);
        assert_eq!(unknown.adjusted_confidence, 0.9);
    }

    #[tokio::test]
    async fn test_global_weakness_penalty() {
        let (clock, _registry, mut agent) = agent();
        for _ in 0..12 {
            agent.record_outcome(losing("MIXED", clock.now_ms()));
        }
        // Symbol penalty (-0.10) and global penalty (-0.05) stack.
        let advice = agent.advice("MIXED", 0.9);
        assert!((advice.adjusted_confidence - 0.75).abs() < 1e-9);
    }
}
