//! Cron-style orchestration
//!
//! Entry points keyed by human-readable cadence identifiers. All date
//! arithmetic uses the America/New_York calendar through the Clock
//! capability; nothing here reads the wall clock directly.

use crate::agents::LlmHealth;
use crate::alerts::{
    evaluate_alert_rules, AlertNotifier, AlertRuleInput, AlertThresholds, SwarmHealth,
};
use crate::capabilities::{BlobStore, Broker, OrderRequest};
use crate::error::Result;
use crate::persistence::{
    AlertStore, ApprovalStore, RiskStateStore, SubmissionStore, TradeStore,
};
use crate::swarm::{AgentId, AgentKind, Message, SwarmRegistry};
use crate::util::clock::{eastern_date, eastern_hour, is_eastern_weekday};
use crate::util::Clock;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Human-readable cadence identifiers exposed to the scheduler edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Every 5 minutes on weekday market hours.
    IngestFiveMinute,
    MarketOpenDaily,
    MarketCloseDaily,
    /// Daily at 05:00 America/New_York.
    DailyLossReset,
    Hourly,
}

impl Cadence {
    pub fn id(&self) -> &'static str {
        match self {
            Cadence::IngestFiveMinute => "ingest-5min-weekday",
            Cadence::MarketOpenDaily => "daily-market-open",
            Cadence::MarketCloseDaily => "daily-market-close",
            Cadence::DailyLossReset => "daily-0500-loss-reset",
            Cadence::Hourly => "hourly-risk-refresh",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "ingest-5min-weekday" => Some(Cadence::IngestFiveMinute),
            "daily-market-open" => Some(Cadence::MarketOpenDaily),
            "daily-market-close" => Some(Cadence::MarketCloseDaily),
            "daily-0500-loss-reset" => Some(Cadence::DailyLossReset),
            "hourly-risk-refresh" => Some(Cadence::Hourly),
        _ => None,
        }
    }
}

/// Where the hourly loop reads LLM health from (the analyst, normally).
#[async_trait]
pub trait LlmHealthProbe: Send + Sync {
    async fn llm_health(&self) -> LlmHealth;
}

/// No analyst wired: health reads as never-failed.
pub struct NoLlmProbe;

#[async_trait]
impl LlmHealthProbe for NoLlmProbe {
    async fn llm_health(&self) -> LlmHealth {
        LlmHealth::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HourlyReport {
    pub alerts_raised: usize,
    pub alerts_sent: usize,
    pub trades_backfilled: usize,
    pub cooldown_stamped: bool,
}

pub struct ControlLoops {
    pub environment: String,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<SwarmRegistry>,
    pub broker: Arc<dyn Broker>,
    pub risk: RiskStateStore,
    pub approvals: ApprovalStore,
    pub submissions: SubmissionStore,
    pub trades: TradeStore,
    pub alert_store: AlertStore,
    pub notifier: AlertNotifier,
    pub thresholds: AlertThresholds,
    pub blob: Arc<dyn BlobStore>,
    pub llm_probe: Arc<dyn LlmHealthProbe>,
    pub cooldown_minutes: i64,
}

impl ControlLoops {
    pub async fn run(&self, cadence: Cadence) -> Result<()> {
        match cadence {
            Cadence::IngestFiveMinute => {
                self.run_ingest().await?;
            }
            Cadence::MarketOpenDaily => {
                self.run_market_open().await?;
            }
            Cadence::MarketCloseDaily => {
                self.run_market_close().await?;
            }
            Cadence::DailyLossReset => {
                self.run_daily_loss_reset().await?;
            }
            Cadence::Hourly => {
                self.run_hourly().await?;
            }
        }
        Ok(())
    }

    /// Queue an ingest command for the scout unless the market is closed
    /// or the kill switch is engaged. Returns whether it was queued.
    pub async fn run_ingest(&self) -> Result<bool> {
        let now_ms = self.clock.now_ms();
        if !is_eastern_weekday(now_ms) {
            return Ok(false);
        }
        let market = self.broker.get_clock().await?;
        if !market.is_open {
            return Ok(false);
        }
        let risk = self.risk.load(now_ms).await?;
        if risk.kill_switch_active {
            info!("skipping ingest: kill switch engaged");
            return Ok(false);
        }

        let registry_id = AgentId::default_shard(AgentKind::Registry);
        let scout = AgentId::default_shard(AgentKind::Scout);
        let message = Message::command(registry_id, scout, "ingest", json!({}), now_ms);
        self.registry.enqueue(message, 0, None).await?;
        Ok(true)
    }

    /// Market open: log risk posture, purge expired approvals.
    pub async fn run_market_open(&self) -> Result<u64> {
        let now_ms = self.clock.now_ms();
        let risk = self.risk.load(now_ms).await?;
        info!(
            "market open: kill_switch={}, daily_loss={}, cooldown_until={:?}",
            risk.kill_switch_active, risk.daily_loss_usd, risk.cooldown_until
        );
        let purged = self.approvals.purge_expired(now_ms).await?;
        if purged > 0 {
            info!("purged {purged} expired approvals");
        }
        Ok(purged)
    }

    /// Market close: log EOD positions, purge expired approvals.
    pub async fn run_market_close(&self) -> Result<u64> {
        let now_ms = self.clock.now_ms();
        match self.broker.get_positions().await {
            Ok(positions) => {
                let value: Decimal = positions.iter().map(|p| p.market_value).sum();
                info!("market close: {} positions worth {value}", positions.len());
            }
            Err(e) => warn!("EOD position snapshot failed: {e}"),
        }
        self.approvals.purge_expired(now_ms).await
    }

    /// 05:00 New York: today's equity becomes the new daily baseline.
    pub async fn run_daily_loss_reset(&self) -> Result<()> {
        let now_ms = self.clock.now_ms();
        let account = self.broker.get_account().await?;
        let mut risk = self.risk.load(now_ms).await?;
        risk.daily_loss_usd = Decimal::ZERO;
        risk.daily_equity_start = Some(account.equity);
        risk.daily_loss_reset_at = Some(now_ms);
        self.risk.save(&risk, now_ms).await?;
        info!("daily loss reset; baseline equity {}", account.equity);
        Ok(())
    }

    /// Hourly: refresh risk state, stamp cooldowns on fresh losses,
    /// evaluate alerts, backfill trade rows, snapshot state.
    pub async fn run_hourly(&self) -> Result<HourlyReport> {
        let now_ms = self.clock.now_ms();
        let mut report = HourlyReport::default();
        let account = match self.broker.get_account().await {
            Ok(account) => Some(account),
            Err(e) => {
                warn!("hourly account refresh failed: {e}");
                None
            }
        };
        let mut risk = self.risk.load(now_ms).await?;

        // Local date rollover resets the loss window even if the 05:00
        // job was missed.
        let today = eastern_date(now_ms);
        let stale_baseline = risk
            .daily_loss_reset_at
            .map_or(true, |reset| eastern_date(reset) != today);
        if stale_baseline {
            risk.daily_loss_usd = Decimal::ZERO;
            risk.daily_equity_start = account.as_ref().map(|a| a.equity);
            risk.daily_loss_reset_at = Some(now_ms);
        }

        // Today's loss: broker portfolio history when available, else
        // the baseline-equity difference.
        let loss = match self.broker.get_portfolio_history(1).await {
            Ok(history) => history.loss(),
            Err(_) => None,
        }
        .or_else(|| {
            match (&account, risk.daily_equity_start) {
                (Some(account), Some(baseline)) => {
                    Some((baseline - account.equity).max(Decimal::ZERO))
                }
                _ => None,
            }
        })
        .unwrap_or(Decimal::ZERO);

        if loss > risk.daily_loss_usd {
            risk.cooldown_until = Some(now_ms + self.cooldown_minutes * 60_000);
            report.cooldown_stamped = true;
            warn!(
                "fresh daily loss {loss}; cooling down for {} minutes",
                self.cooldown_minutes
            );
        }
        risk.daily_loss_usd = loss;
        self.risk.save(&risk, now_ms).await?;

        // Alerts.
        let queue_state = self.registry.queue_state().await;
        let llm = self.llm_probe.llm_health().await;
        let alerts = evaluate_alert_rules(&AlertRuleInput {
            environment: &self.environment,
            now_ms,
            account: account.as_ref(),
            risk_state: &risk,
            swarm: SwarmHealth {
                dead_lettered: queue_state.dead_lettered as u64,
            },
            llm: &llm,
            thresholds: &self.thresholds,
        });
        report.alerts_raised = alerts.len();
        for alert in &alerts {
            if let Err(e) = self.alert_store.insert_event(alert, now_ms).await {
                warn!("failed to persist alert {}: {e}", alert.id);
            }
        }
        let summary = self.notifier.notify(&alerts).await;
        report.alerts_sent = summary.sent;

        // Backfill trade rows for accepted submissions that never got one.
        for submission in self.submissions.list_submitted_missing_trades(50).await? {
            let Some(broker_order_id) = submission.broker_order_id.as_deref() else {
                continue;
            };
            let Ok(Some(order)) = self.broker.get_order(broker_order_id).await else {
                continue;
            };
            let request: Option<OrderRequest> =
                serde_json::from_str(&submission.request_json).ok();
            let asset_class = request
                .as_ref()
                .map(|r| r.asset_class)
                .unwrap_or_else(|| self.broker.asset_class());
            let quote_ccy = request.as_ref().and_then(|r| r.quote_ccy.clone());
            self.trades
                .record_fill(
                    Some(&submission.id),
                    submission.approval_id.as_deref(),
                    &submission.broker_provider,
                    &order,
                    asset_class,
                    quote_ccy.as_deref(),
                    now_ms,
                )
                .await?;
            report.trades_backfilled += 1;
        }
        if report.trades_backfilled > 0 {
            info!("backfilled {} trade rows", report.trades_backfilled);
        }

        // Live hourly snapshot artifact.
        let snapshot = json!({
            "taken_at": now_ms,
            "account": account,
            "risk_state": risk,
            "queue": queue_state,
            "alerts_raised": report.alerts_raised,
        });
        let path = format!(
            "snapshots/hourly/{}/{:02}.json",
            today, eastern_hour(now_ms)
        );
        if let Err(e) = self.blob.put(&path, snapshot.to_string().into_bytes()).await {
            warn!("hourly snapshot write failed: {e}");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::NotifierConfig;
    use crate::capabilities::{
        AssetClass, MemoryBlobStore, MemoryKv, OrderSide, PaperBroker,
    };
    use crate::persistence::SqlGateway;
    use crate::util::ManualClock;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    struct Fixture {
        clock: Arc<ManualClock>,
        broker: Arc<PaperBroker>,
        registry: Arc<SwarmRegistry>,
        blob: Arc<MemoryBlobStore>,
        loops: ControlLoops,
    }

    // Monday 2024-01-15 14:30 UTC = 09:30 New York.
    fn monday_open_ms() -> i64 {
        chrono::Utc
            .with_ymd_and_hms(2024, 1, 15, 14, 30, 0)
            .unwrap()
            .timestamp_millis()
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(monday_open_ms()));
        let registry = Arc::new(SwarmRegistry::with_defaults(clock.clone()));
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let broker = Arc::new(PaperBroker::new(
            clock.clone(),
            AssetClass::UsEquity,
            dec!(100000),
        ));
        let blob = Arc::new(MemoryBlobStore::new());
        let kv = Arc::new(MemoryKv::new(clock.clone()));
        let notifier = AlertNotifier::with_default_channels(
            clock.clone(),
            kv,
            NotifierConfig::default(),
            None,
            None,
        );
        let loops = ControlLoops {
            environment: "test".into(),
            clock: clock.clone(),
            registry: registry.clone(),
            broker: broker.clone(),
            risk: RiskStateStore::new(gateway.pool().clone()),
            approvals: ApprovalStore::new(gateway.pool().clone()),
            submissions: SubmissionStore::new(gateway.pool().clone()),
            trades: TradeStore::new(gateway.pool().clone()),
            alert_store: AlertStore::new(gateway.pool().clone()),
            notifier,
            thresholds: AlertThresholds::default(),
            blob: blob.clone(),
            llm_probe: Arc::new(NoLlmProbe),
            cooldown_minutes: 30,
        };
        Fixture {
            clock,
            broker,
            registry,
            blob,
            loops,
        }
    }

    #[tokio::test]
    async fn test_ingest_gates() {
        let f = fixture().await;
        assert!(f.loops.run_ingest().await.unwrap());
        assert_eq!(f.registry.queue_state().await.queued, 1);

        // Market closed: skipped.
        f.broker.set_market_open(false).await;
        assert!(!f.loops.run_ingest().await.unwrap());

        // Kill switch: skipped.
        f.broker.set_market_open(true).await;
        f.loops
            .risk
            .set_kill_switch(true, Some("halt"), f.clock.now_ms())
            .await
            .unwrap();
        assert!(!f.loops.run_ingest().await.unwrap());

        // Weekend: skipped.
        f.loops
            .risk
            .set_kill_switch(false, None, f.clock.now_ms())
            .await
            .unwrap();
        f.clock.advance(5 * 24 * 3600 * 1000); // Saturday
        assert!(!f.loops.run_ingest().await.unwrap());
    }

    #[tokio::test]
    async fn test_daily_loss_reset_sets_baseline() {
        let f = fixture().await;
        f.loops.run_daily_loss_reset().await.unwrap();
        let risk = f.loops.risk.load(f.clock.now_ms()).await.unwrap();
        assert_eq!(risk.daily_loss_usd, Decimal::ZERO);
        assert_eq!(risk.daily_equity_start, Some(dec!(100000)));
        assert!(risk.daily_loss_reset_at.is_some());
    }

    #[tokio::test]
    async fn test_hourly_stamps_cooldown_on_fresh_loss() {
        let f = fixture().await;
        f.loops.run_daily_loss_reset().await.unwrap();

        // Lose money: buy at 200, price drops to 100.
        f.broker.set_quote("AAPL", dec!(200)).await;
        f.broker
            .create_order(&OrderRequest::market_notional(
                "AAPL",
                OrderSide::Buy,
                dec!(20000),
                AssetClass::UsEquity,
            ))
            .await
            .unwrap();
        f.broker.set_quote("AAPL", dec!(100)).await;
        f.broker.close_position("AAPL").await.unwrap();

        let report = f.loops.run_hourly().await.unwrap();
        assert!(report.cooldown_stamped);
        let risk = f.loops.risk.load(f.clock.now_ms()).await.unwrap();
        assert_eq!(risk.daily_loss_usd, dec!(10000));
        assert!(risk.cooldown_until.unwrap() > f.clock.now_ms());

        // Snapshot artifact landed.
        assert_eq!(f.blob.len().await, 1);
        assert!(f.blob.paths().await[0].starts_with("snapshots/hourly/2024-01-15/"));

        // Same loss next hour: no new cooldown.
        f.clock.advance(3600 * 1000);
        let report = f.loops.run_hourly().await.unwrap();
        assert!(!report.cooldown_stamped);
    }

    #[tokio::test]
    async fn test_hourly_raises_drawdown_alert() {
        let f = fixture().await;
        f.loops.run_daily_loss_reset().await.unwrap();

        // Burn 20% of equity against a 15% default limit.
        f.broker.set_quote("TSLA", dec!(100)).await;
        f.broker
            .create_order(&OrderRequest::market_notional(
                "TSLA",
                OrderSide::Buy,
                dec!(50000),
                AssetClass::UsEquity,
            ))
            .await
            .unwrap();
        f.broker.set_quote("TSLA", dec!(60)).await;
        f.broker.close_position("TSLA").await.unwrap();

        let report = f.loops.run_hourly().await.unwrap();
        assert!(report.alerts_raised >= 1);
        let events = f.loops.alert_store.list_events(10).await.unwrap();
        assert!(events.iter().any(|e| e.rule_id == "portfolio_drawdown"));
    }

    #[tokio::test]
    async fn test_cadence_ids_roundtrip() {
        for cadence in [
            Cadence::IngestFiveMinute,
            Cadence::MarketOpenDaily,
            Cadence::MarketCloseDaily,
            Cadence::DailyLossReset,
            Cadence::Hourly,
        ] {
            assert_eq!(Cadence::from_id(cadence.id()), Some(cadence));
        }
        assert_eq!(Cadence::from_id("nope"), None);
    }
}
