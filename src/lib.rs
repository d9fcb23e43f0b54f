pub mod agents;
pub mod alerts;
pub mod approval;
pub mod capabilities;
pub mod config;
pub mod control;
pub mod error;
pub mod execution;
pub mod persistence;
pub mod policy;
pub mod swarm;
pub mod util;

pub use agents::{
    AnalystAgent, LearningAgent, RiskManagerAgent, ScoutAgent, StrategyParams, TraderAgent,
};
pub use alerts::{
    evaluate_alert_rules, AlertDispatchSummary, AlertEvent, AlertNotifier, AlertSeverity,
    AlertThresholds,
};
pub use approval::{ApprovalService, IssuedApproval};
pub use capabilities::{
    Broker, KvStore, LlmClient, MarketData, NewsFeed, OptionsData, PaperBroker,
};
pub use config::AppConfig;
pub use control::{Cadence, ControlLoops};
pub use error::{Result, SwarmError};
pub use execution::{execute_order, ExecutionDeps};
pub use persistence::SqlGateway;
pub use policy::{PolicyConfig, PolicyResult};
pub use swarm::{
    AgentHandle, AgentId, AgentKind, AgentRuntime, Message, RuntimeConfig, SwarmAgent,
    SwarmRegistry,
};
pub use util::{Clock, ManualClock, SystemClock};
