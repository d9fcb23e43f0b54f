//! End-to-end execution pipeline scenarios: at-most-once submission
//! under concurrency, kill-switch blocking, market-hours blocking, and
//! retry convergence.

use rust_decimal_macros::dec;
use std::sync::Arc;
use swarmtrade::agents::LlmHealth;
use swarmtrade::alerts::{evaluate_alert_rules, AlertRuleInput, AlertThresholds, SwarmHealth};
use swarmtrade::capabilities::{AssetClass, OrderRequest, OrderSide, PaperBroker};
use swarmtrade::execution::{execute_order, ExecutionDeps};
use swarmtrade::persistence::{
    PolicyStore, RiskStateStore, SqlGateway, SubmissionStore, TradeStore, TraceWriter,
};
use swarmtrade::util::{Clock, ManualClock};

struct Env {
    clock: Arc<ManualClock>,
    broker: Arc<PaperBroker>,
    submissions: SubmissionStore,
    trades: TradeStore,
    risk: RiskStateStore,
    policy: PolicyStore,
    traces: TraceWriter,
}

impl Env {
    async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        let broker = Arc::new(PaperBroker::new(
            clock.clone(),
            AssetClass::UsEquity,
            dec!(100000),
        ));
        broker.set_quote("AAPL", dec!(200)).await;
        Self {
            clock,
            broker,
            submissions: SubmissionStore::new(gateway.pool().clone()),
            trades: TradeStore::new(gateway.pool().clone()),
            risk: RiskStateStore::new(gateway.pool().clone()),
            policy: PolicyStore::new(gateway.pool().clone()),
            traces: TraceWriter::new(gateway.pool().clone()),
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
}

fn buy_100() -> OrderRequest {
    OrderRequest::market_notional("AAPL", OrderSide::Buy, dec!(100), AssetClass::UsEquity)
}

#[tokio::test]
async fn concurrent_callers_submit_exactly_once() {
    let env = Arc::new(Env::new().await);
    let order = buy_100();

    let a = {
        let env = env.clone();
        let order = order.clone();
        tokio::spawn(async move {
            execute_order(&env.deps(), "edge", "approval:abc", &order, None).await
        })
    };
    let b = {
        let env = env.clone();
        let order = order.clone();
        tokio::spawn(async move {
            execute_order(&env.deps(), "edge", "approval:abc", &order, None).await
        })
    };

    let row_a = a.await.unwrap().unwrap();
    let row_b = b.await.unwrap().unwrap();

    assert_eq!(env.broker.create_order_call_count(), 1);
    assert_eq!(row_a.state, "SUBMITTED");
    assert_eq!(row_b.state, "SUBMITTED");
    assert!(row_a.broker_order_id.is_some());
    assert_eq!(row_a.broker_order_id, row_b.broker_order_id);
    assert_eq!(env.trades.count().await.unwrap(), 1);
}

#[tokio::test]
async fn kill_switch_blocks_submission_and_raises_alert() {
    let env = Env::new().await;
    env.risk
        .set_kill_switch(true, Some("halt"), env.clock.now_ms())
        .await
        .unwrap();

    let err = execute_order(&env.deps(), "edge", "approval:ks", &buy_100(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "KILL_SWITCH_ACTIVE");
    assert_eq!(env.broker.create_order_call_count(), 0);

    let row = env.submissions.get_by_key("approval:ks").await.unwrap().unwrap();
    assert_eq!(row.state, "FAILED");

    // The next alert evaluation carries the reason-scoped fingerprint.
    let risk_state = env.risk.load(env.clock.now_ms()).await.unwrap();
    let thresholds = AlertThresholds::default();
    let llm = LlmHealth::default();
    let alerts = evaluate_alert_rules(&AlertRuleInput {
        environment: "test",
        now_ms: env.clock.now_ms(),
        account: None,
        risk_state: &risk_state,
        swarm: SwarmHealth::default(),
        llm: &llm,
        thresholds: &thresholds,
    });
    assert!(alerts
        .iter()
        .any(|a| a.fingerprint == "kill_switch_active:halt"));
}

#[tokio::test]
async fn closed_market_blocks_equity_day_orders() {
    let env = Env::new().await;
    env.broker.set_market_open(false).await;

    let err = execute_order(&env.deps(), "edge", "approval:mc", &buy_100(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "MARKET_CLOSED");
    assert_eq!(env.broker.create_order_call_count(), 0);
    let row = env.submissions.get_by_key("approval:mc").await.unwrap().unwrap();
    assert_eq!(row.state, "FAILED");
}

#[tokio::test]
async fn broker_failure_marks_failed_then_retry_succeeds() {
    let env = Env::new().await;
    env.broker.fail_next_create("simulated outage").await;

    let err = execute_order(&env.deps(), "edge", "approval:rt", &buy_100(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PROVIDER_ERROR");
    let row = env.submissions.get_by_key("approval:rt").await.unwrap().unwrap();
    assert_eq!(row.state, "FAILED");
    assert!(row.last_error_json.is_some());

    // The same key retries from FAILED and converges on one success.
    let row = execute_order(&env.deps(), "edge", "approval:rt", &buy_100(), None)
        .await
        .unwrap();
    assert_eq!(row.state, "SUBMITTED");
    assert_eq!(env.trades.count().await.unwrap(), 1);

    // A third call is pure reuse: no further broker interaction.
    let reused = execute_order(&env.deps(), "edge", "approval:rt", &buy_100(), None)
        .await
        .unwrap();
    assert_eq!(reused.broker_order_id, row.broker_order_id);
    assert_eq!(env.broker.create_order_call_count(), 2);
}

#[tokio::test]
async fn decision_traces_cover_the_lifecycle() {
    let env = Env::new().await;
    execute_order(&env.deps(), "edge", "approval:tr", &buy_100(), None)
        .await
        .unwrap();
    let stages = env.traces.stages_for("approval:tr").await.unwrap();
    assert_eq!(stages, vec!["reserve", "submitted"]);

    execute_order(&env.deps(), "edge", "approval:tr", &buy_100(), None)
        .await
        .unwrap();
    let stages = env.traces.stages_for("approval:tr").await.unwrap();
    assert!(stages.contains(&"reuse_existing_submission".to_string()));
}
