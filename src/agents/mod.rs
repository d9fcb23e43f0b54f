//! Swarm agents
//!
//! Each agent is a value hosted by the runtime. Agents talk to each
//! other only through the registry; capabilities (broker, LLM, feeds,
//! stores) are injected at construction.

pub mod analyst;
pub mod learning;
pub mod risk_manager;
pub mod scout;
pub mod sentiment;
pub mod trader;

pub use analyst::{
    AnalystAgent, AnalystMetrics, LlmHealth, RecAction, Recommendation, ResearchResult,
    ResearchVerdict, SignalProvider, StaticSignalProvider,
};
pub use learning::{
    AdviceResult, LearningAgent, PerformanceStats, StrategyParams, TradeOutcome,
};
pub use risk_manager::RiskManagerAgent;
pub use scout::{ScoutAgent, ScoutConfig, ScoutSignalProvider, Signal};
pub use sentiment::SentimentAnalyzer;
pub use trader::{TraderAgent, TraderConfig};
