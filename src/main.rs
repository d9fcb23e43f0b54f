//! swarmtrade runner
//!
//! Wires the registry, runtime, agents and control loops with the
//! in-process capability implementations (paper broker, memory KV and
//! blob store, static feed, unconfigured LLM) and runs until ctrl-c.
//! Real provider adapters replace those capabilities at the edge.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Timelike;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarmtrade::agents::{
    AnalystAgent, LearningAgent, LlmHealth, RiskManagerAgent, ScoutAgent, ScoutSignalProvider,
    TraderAgent,
};
use swarmtrade::alerts::AlertNotifier;
use swarmtrade::capabilities::{
    AssetClass, MarketData, MemoryBlobStore, MemoryKv, NullLlm, NullOptions, PaperBroker,
    StaticMarketData, StaticNewsFeed,
};
use swarmtrade::config::AppConfig;
use swarmtrade::control::{Cadence, ControlLoops, LlmHealthProbe};
use swarmtrade::persistence::{
    ActivityLog, AlertStore, ApprovalStore, PolicyStore, RawEventStore, RiskStateStore,
    SqlGateway, SubmissionStore, TradeStore, TraceWriter,
};
use swarmtrade::swarm::{AgentHandle, AgentRuntime, RuntimeConfig, SwarmRegistry};
use swarmtrade::util::clock::eastern_datetime;
use swarmtrade::util::{Clock, SystemClock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "swarmtrade", version, about = "Autonomous multi-agent trading swarm")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the swarm with in-process dry-run capabilities
    Run,
    /// Load and validate configuration, then exit
    CheckConfig,
}

/// Reads the circuit-breaker record off the analyst's metrics route.
struct AnalystLlmProbe {
    handle: AgentHandle,
}

#[async_trait]
impl LlmHealthProbe for AnalystLlmProbe {
    async fn llm_health(&self) -> LlmHealth {
        match self.handle.request("/metrics", json!({})).await {
            Ok(metrics) => {
                serde_json::from_value(metrics["llm_health"].clone()).unwrap_or_default()
            }
            Err(_) => LlmHealth::default(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    match cli.command {
        Commands::CheckConfig => {
            let errors = config.validate();
            if errors.is_empty() {
                info!("configuration is valid");
                Ok(())
            } else {
                for problem in &errors {
                    error!("config: {problem}");
                }
                anyhow::bail!("{} configuration problems", errors.len())
            }
        }
        Commands::Run => run(config).await,
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    for problem in config.validate() {
        warn!("config: {problem}");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = SqlGateway::connect(&config.database.url)
        .await
        .context("connecting database")?;
    gateway.migrate().await.context("applying schema")?;
    let pool = gateway.pool().clone();

    let registry = Arc::new(SwarmRegistry::with_defaults(clock.clone()));
    let runtime = AgentRuntime::new(
        registry.clone(),
        clock.clone(),
        RuntimeConfig {
            alarm_interval: Duration::from_secs(config.swarm.heartbeat_secs),
            ..Default::default()
        },
    );
    runtime.wire_delivery().await;

    let asset_class = match config.broker.asset_class.as_str() {
        "crypto" => AssetClass::Crypto,
        _ => AssetClass::UsEquity,
    };
    let broker = Arc::new(PaperBroker::new(
        clock.clone(),
        asset_class,
        config.broker.starting_cash,
    ));
    let kv = Arc::new(MemoryKv::new(clock.clone()));
    let blob = Arc::new(MemoryBlobStore::new());
    let feed = Arc::new(StaticNewsFeed::new());
    let llm = Arc::new(NullLlm);
    let market: Arc<dyn MarketData> = Arc::new(StaticMarketData::new());

    let scout_handle = runtime
        .spawn(Box::new(ScoutAgent::new(
            clock.clone(),
            registry.clone(),
            feed,
            RawEventStore::new(pool.clone()),
            config.scout.to_agent_config(),
        )))
        .await;

    let analyst_handle = runtime
        .spawn(Box::new(AnalystAgent::new(
            clock.clone(),
            registry.clone(),
            llm,
            Arc::new(ScoutSignalProvider::new(scout_handle.clone())),
        )))
        .await;

    runtime
        .spawn(Box::new(RiskManagerAgent::new(
            clock.clone(),
            broker.clone(),
            RiskStateStore::new(pool.clone()),
            PolicyStore::new(pool.clone()),
            Some(market),
            Arc::new(NullOptions),
        )))
        .await;

    runtime
        .spawn(Box::new(TraderAgent::new(
            clock.clone(),
            registry.clone(),
            broker.clone(),
            SubmissionStore::new(pool.clone()),
            TradeStore::new(pool.clone()),
            RiskStateStore::new(pool.clone()),
            PolicyStore::new(pool.clone()),
            TraceWriter::new(pool.clone()),
            config.trader.to_agent_config(),
        )))
        .await;

    runtime
        .spawn(Box::new(LearningAgent::new(clock.clone(), registry.clone())))
        .await;

    let activity = ActivityLog::new(pool.clone());
    activity
        .record(
            "runner",
            "lifecycle",
            "info",
            "ok",
            "start",
            &format!("swarm online in {}", config.environment),
            None,
            clock.now_ms(),
        )
        .await;

    let notifier = AlertNotifier::with_default_channels(
        clock.clone(),
        kv,
        config.alerts.notifier_config(),
        config.alerts.discord_webhook_url.as_deref(),
        config.alerts.webhook_url.as_deref(),
    );
    let loops = Arc::new(ControlLoops {
        environment: config.environment.clone(),
        clock: clock.clone(),
        registry: registry.clone(),
        broker,
        risk: RiskStateStore::new(pool.clone()),
        approvals: ApprovalStore::new(pool.clone()),
        submissions: SubmissionStore::new(pool.clone()),
        trades: TradeStore::new(pool.clone()),
        alert_store: AlertStore::new(pool.clone()),
        notifier,
        thresholds: config.alerts.thresholds(),
        blob,
        llm_probe: Arc::new(AnalystLlmProbe {
            handle: analyst_handle,
        }),
        cooldown_minutes: config.risk.cooldown_minutes,
    });

    let dispatcher = runtime.start_dispatcher(
        Duration::from_secs(config.swarm.dispatch_interval_secs),
        config.swarm.dispatch_limit,
    );
    let scheduler = spawn_scheduler(clock.clone(), loops);

    info!("swarmtrade running; ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    scheduler.abort();
    dispatcher.abort();
    Ok(())
}

/// Fires control-loop cadences on New York minute boundaries.
fn spawn_scheduler(
    clock: Arc<dyn Clock>,
    loops: Arc<ControlLoops>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(20));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_minute = -1i64;
        loop {
            ticker.tick().await;
            let now_ms = clock.now_ms();
            let minute_index = now_ms / 60_000;
            if minute_index == last_minute {
                continue;
            }
            last_minute = minute_index;

            let local = eastern_datetime(now_ms);
            let (hour, minute) = (local.hour(), local.minute());
            let mut due = Vec::new();
            if minute % 5 == 0 {
                due.push(Cadence::IngestFiveMinute);
            }
            if minute == 0 {
                due.push(Cadence::Hourly);
            }
            if hour == 5 && minute == 0 {
                due.push(Cadence::DailyLossReset);
            }
            if hour == 9 && minute == 30 {
                due.push(Cadence::MarketOpenDaily);
            }
            if hour == 16 && minute == 0 {
                due.push(Cadence::MarketCloseDaily);
            }

            for cadence in due {
                if let Err(e) = loops.run(cadence).await {
                    warn!("cadence {} failed: {e}", cadence.id());
                }
            }
        }
    })
}
