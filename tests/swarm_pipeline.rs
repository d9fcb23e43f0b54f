//! Swarm-level scenarios: dead-letter recovery through a re-registered
//! agent, and the full scout → analyst → trader → learning pipeline
//! over the registry bus.

use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use swarmtrade::agents::{
    AnalystAgent, LearningAgent, ScoutAgent, ScoutConfig, ScoutSignalProvider, TraderAgent,
    TraderConfig,
};
use swarmtrade::capabilities::{
    AssetClass, Broker, NewsItem, PaperBroker, ScriptedLlm, StaticNewsFeed,
};
use swarmtrade::persistence::{
    PolicyStore, RawEventStore, RiskStateStore, SqlGateway, SubmissionStore, TradeStore,
    TraceWriter,
};
use swarmtrade::swarm::{
    AgentId, AgentKind, AgentRuntime, Message, RuntimeConfig, SwarmRegistry,
};
use swarmtrade::util::{Clock, ManualClock};

struct Swarm {
    clock: Arc<ManualClock>,
    registry: Arc<SwarmRegistry>,
    runtime: AgentRuntime,
    broker: Arc<PaperBroker>,
    trades: TradeStore,
    gateway: SqlGateway,
}

async fn swarm() -> Swarm {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let registry = Arc::new(SwarmRegistry::with_defaults(clock.clone()));
    let runtime = AgentRuntime::new(
        registry.clone(),
        clock.clone(),
        RuntimeConfig {
            // Alarms are driven manually in tests.
            alarm_interval: Duration::from_secs(3600),
            ..Default::default()
        },
    );
    runtime.wire_delivery().await;

    let gateway = SqlGateway::in_memory().await.unwrap();
    gateway.migrate().await.unwrap();
    let broker = Arc::new(PaperBroker::new(
        clock.clone(),
        AssetClass::UsEquity,
        dec!(100000),
    ));
    let trades = TradeStore::new(gateway.pool().clone());
    Swarm {
        clock,
        registry,
        runtime,
        broker,
        trades,
        gateway,
    }
}

fn trader_agent(s: &Swarm) -> TraderAgent {
    TraderAgent::new(
        s.clock.clone(),
        s.registry.clone(),
        s.broker.clone(),
        SubmissionStore::new(s.gateway.pool().clone()),
        s.trades.clone(),
        RiskStateStore::new(s.gateway.pool().clone()),
        PolicyStore::new(s.gateway.pool().clone()),
        TraceWriter::new(s.gateway.pool().clone()),
        TraderConfig::default(),
    )
}

#[tokio::test]
async fn dead_letter_requeue_recovers_an_order() {
    let s = swarm().await;
    s.broker.set_quote("MSFT", dec!(400)).await;

    // Target the trader before it exists, with a single attempt.
    let trader_id = AgentId::default_shard(AgentKind::Trader);
    let message = Message::command(
        AgentId::default_shard(AgentKind::Registry),
        trader_id,
        "buy",
        json!({"symbol": "MSFT", "confidence": 0.9, "reasoning": "recovery test"}),
        s.clock.now_ms(),
    );
    s.registry.enqueue(message, 0, Some(1)).await.unwrap();

    let report = s.registry.dispatch(200).await.unwrap();
    assert_eq!(report.delivered, 0);
    let state = s.registry.queue_state().await;
    assert_eq!((state.queued, state.dead_lettered), (0, 1));

    // Bring the trader online, restore the message, redeliver.
    let handle = s.runtime.spawn(Box::new(trader_agent(&s))).await;
    handle.health().await.unwrap();

    assert_eq!(s.registry.requeue_dead_letter(10).await.unwrap(), 1);
    let report = s.registry.dispatch(200).await.unwrap();
    assert_eq!(report.delivered, 1);

    assert_eq!(s.broker.create_order_call_count(), 1);
    let position = s.broker.get_position("MSFT").await.unwrap().unwrap();
    assert!(position.qty > dec!(0));
    assert_eq!(s.trades.count().await.unwrap(), 1);
}

#[tokio::test]
async fn signals_flow_from_scout_to_learning() {
    let s = swarm().await;
    s.broker.set_quote("NVDA", dec!(500)).await;

    let feed = Arc::new(StaticNewsFeed::new());
    feed.push(NewsItem::new(
        "reddit",
        "r-1",
        "$NVDA soars after earnings beats estimates, bullish breakout",
    ))
    .await;
    feed.push(NewsItem::new(
        "stocktwits",
        "s-1",
        "$NVDA rally continues to a record high",
    ))
    .await;

    let llm = Arc::new(ScriptedLlm::new());
    // First call: analysis triggered by the signals_updated event.
    llm.push_reply(
        r#"[{"symbol": "NVDA", "action": "BUY", "confidence": 0.85, "reasoning": "flow"}]"#,
    )
    .await;
    // Second call: the batched research pass of the full cycle; the
    // cycle's analysis is then served from cache.
    llm.push_reply(
        r#"[{"symbol": "NVDA", "verdict": "BUY", "confidence": 0.8, "reasoning": "ok"}]"#,
    )
    .await;

    let scout_handle = s
        .runtime
        .spawn(Box::new(ScoutAgent::new(
            s.clock.clone(),
            s.registry.clone(),
            feed,
            RawEventStore::new(s.gateway.pool().clone()),
            ScoutConfig::default(),
        )))
        .await;
    let analyst_handle = s
        .runtime
        .spawn(Box::new(AnalystAgent::new(
            s.clock.clone(),
            s.registry.clone(),
            llm.clone(),
            Arc::new(ScoutSignalProvider::new(scout_handle.clone())),
        )))
        .await;
    let trader_handle = s.runtime.spawn(Box::new(trader_agent(&s))).await;
    let learning_handle = s
        .runtime
        .spawn(Box::new(LearningAgent::new(
            s.clock.clone(),
            s.registry.clone(),
        )))
        .await;
    for handle in [&scout_handle, &analyst_handle, &trader_handle, &learning_handle] {
        handle.health().await.unwrap();
    }

    // Kick ingestion; the scout publishes signals_updated.
    let ingest = Message::command(
        AgentId::default_shard(AgentKind::Registry),
        scout_handle.id().clone(),
        "ingest",
        json!({}),
        s.clock.now_ms(),
    );
    s.registry.enqueue(ingest, 0, None).await.unwrap();
    s.registry.dispatch(200).await.unwrap();

    // Deliver signals_updated to the analyst.
    let report = s.registry.dispatch(200).await.unwrap();
    assert_eq!(report.delivered, 1);

    // Full analysis cycle publishes analysis_ready.
    let analyze = Message::command(
        AgentId::default_shard(AgentKind::Registry),
        analyst_handle.id().clone(),
        "analyze",
        json!({}),
        s.clock.now_ms(),
    );
    s.registry.enqueue(analyze, 0, None).await.unwrap();
    s.registry.dispatch(200).await.unwrap();

    // Deliver analysis_ready to the trader, which buys NVDA.
    s.registry.dispatch(200).await.unwrap();
    assert_eq!(s.broker.create_order_call_count(), 1);
    assert!(s.broker.get_position("NVDA").await.unwrap().is_some());
    assert_eq!(s.trades.count().await.unwrap(), 1);
    assert_eq!(llm.remaining().await, 0);

    // Cache served the cycle's analysis pass.
    let metrics = analyst_handle.request("/metrics", json!({})).await.unwrap();
    assert_eq!(metrics["metrics"]["analysis_cache_hits"], 1);

    // Close the position; trade_outcome reaches the learning agent.
    s.clock.advance(1);
    let sell = Message::command(
        AgentId::default_shard(AgentKind::Registry),
        trader_handle.id().clone(),
        "sell",
        json!({"symbol": "NVDA", "reason": "pipeline test"}),
        s.clock.now_ms(),
    );
    s.registry.enqueue(sell, 0, None).await.unwrap();
    s.registry.dispatch(200).await.unwrap();
    s.registry.dispatch(200).await.unwrap();

    let performance = learning_handle
        .request("/performance", json!({}))
        .await
        .unwrap();
    assert_eq!(performance["global"]["samples"], 1);
}
