//! Analyst agent
//!
//! Turns scout signals into trade recommendations through the LLM
//! capability, guarded by a circuit breaker and a hard completion
//! deadline. Results are cached by a canonical fingerprint of the
//! selected signal set; batched per-symbol research has its own cache.
//! Fallbacks are first-class values: an unavailable LLM yields empty
//! recommendations, never an error.

use super::scout::Signal;
use crate::capabilities::{LlmClient, LlmMessage, LlmRequest};
use crate::error::{Result, SwarmError};
use crate::swarm::{AgentId, AgentKind, Message, MessageType, SwarmAgent, SwarmRegistry};
use crate::util::{stable_hash, Clock};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ANALYSIS_CACHE_TTL_MS: i64 = 90_000;
pub const RESEARCH_CACHE_TTL_MS: i64 = 180_000;
pub const ANALYSIS_INTERVAL_MS: i64 = 120_000;
pub const LLM_DEADLINE: Duration = Duration::from_secs(18);
const CIRCUIT_THRESHOLD: u32 = 3;
const CIRCUIT_BASE_COOLDOWN_MS: i64 = 10_000;
const CIRCUIT_MAX_COOLDOWN_MS: i64 = 5 * 60 * 1000;
const MIN_ABS_SENTIMENT: f64 = 0.3;
const TOP_SIGNALS: usize = 5;
const MAX_RESEARCH_CANDIDATES: usize = 16;
const RESEARCH_CHUNK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecAction {
    Buy,
    Skip,
    Wait,
    Hold,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub action: RecAction,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub urgency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResearchVerdict {
    Buy,
    Skip,
    Wait,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    pub symbol: String,
    pub verdict: ResearchVerdict,
    pub confidence: f64,
    pub reasoning: String,
    pub timestamp_ms: i64,
}

/// Circuit breaker record persisted with agent state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmHealth {
    pub failures: u32,
    pub circuit_open_until_ms: i64,
    pub last_success_ms: Option<i64>,
    pub last_failure_ms: Option<i64>,
    pub last_error: Option<String>,
}

impl LlmHealth {
    pub fn is_open(&self, now_ms: i64) -> bool {
        now_ms < self.circuit_open_until_ms
    }

    pub fn mark_success(&mut self, now_ms: i64) {
        self.failures = 0;
        self.circuit_open_until_ms = 0;
        self.last_success_ms = Some(now_ms);
        self.last_error = None;
    }

    /// Cooldown doubles per failure beyond the threshold, capped at 5 min.
    pub fn mark_failure(&mut self, now_ms: i64, error: &str) {
        self.failures += 1;
        self.last_failure_ms = Some(now_ms);
        self.last_error = Some(error.to_string());
        if self.failures >= CIRCUIT_THRESHOLD {
            let exponent = (self.failures - CIRCUIT_THRESHOLD).min(31);
            let cooldown = CIRCUIT_MAX_COOLDOWN_MS
                .min(CIRCUIT_BASE_COOLDOWN_MS.saturating_mul(1i64 << exponent));
            self.circuit_open_until_ms = now_ms + cooldown;
            warn!(
                "LLM circuit open for {}ms after {} failures",
                cooldown, self.failures
            );
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnalystMetrics {
    pub analysis_cache_hits: u64,
    pub research_cache_hits: u64,
    pub llm_calls: u64,
    pub llm_failures: u64,
    pub analyses_run: u64,
}

#[derive(Debug, Clone)]
struct AnalysisCacheEntry {
    recommendations: Vec<Recommendation>,
    timestamp_ms: i64,
}

/// Where the analyst reads signals from; the scout's `/signals` route
/// in production, fixtures in tests.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    async fn signals(&self) -> Result<Vec<Signal>>;
}

pub struct StaticSignalProvider {
    signals: Vec<Signal>,
}

impl StaticSignalProvider {
    pub fn new(signals: Vec<Signal>) -> Self {
        Self { signals }
    }
}

#[async_trait]
impl SignalProvider for StaticSignalProvider {
    async fn signals(&self) -> Result<Vec<Signal>> {
        Ok(self.signals.clone())
    }
}

pub struct AnalystAgent {
    id: AgentId,
    clock: Arc<dyn Clock>,
    registry: Arc<SwarmRegistry>,
    llm: Arc<dyn LlmClient>,
    signal_provider: Arc<dyn SignalProvider>,
    analysis_cache: HashMap<String, AnalysisCacheEntry>,
    research_cache: HashMap<String, ResearchResult>,
    llm_health: LlmHealth,
    metrics: AnalystMetrics,
    last_analysis_ms: i64,
    /// Last strategy snapshot from the learning agent, for observability.
    strategy: Option<serde_json::Value>,
}

impl AnalystAgent {
    pub fn new(
        clock: Arc<dyn Clock>,
        registry: Arc<SwarmRegistry>,
        llm: Arc<dyn LlmClient>,
        signal_provider: Arc<dyn SignalProvider>,
    ) -> Self {
        Self {
            id: AgentId::default_shard(AgentKind::Analyst),
            clock,
            registry,
            llm,
            signal_provider,
            analysis_cache: HashMap::new(),
            research_cache: HashMap::new(),
            llm_health: LlmHealth::default(),
            metrics: AnalystMetrics::default(),
            last_analysis_ms: 0,
            strategy: None,
        }
    }

    pub fn metrics(&self) -> AnalystMetrics {
        self.metrics
    }

    pub fn llm_health(&self) -> LlmHealth {
        self.llm_health.clone()
    }

    /// Normalize, keep |sentiment| >= 0.3, strongest first, top 5.
    pub fn select_signals(signals: &[Signal]) -> Vec<Signal> {
        let mut selected: Vec<Signal> = signals
            .iter()
            .filter(|s| s.sentiment.is_finite() && s.sentiment.abs() >= MIN_ABS_SENTIMENT)
            .map(|s| {
                let mut s = s.clone();
                s.symbol = s.symbol.to_uppercase();
                s
            })
            .collect();
        selected.sort_by(|a, b| {
            let wa = a.sentiment.abs() * a.volume as f64;
            let wb = b.sentiment.abs() * b.volume as f64;
            wb.total_cmp(&wa)
        });
        selected.truncate(TOP_SIGNALS);
        selected
    }

    /// Canonical fingerprint: symbol, sentiment to 3 decimals, volume,
    /// sorted sources, over the already-sorted selection.
    pub fn fingerprint(selected: &[Signal]) -> String {
        let canonical: Vec<serde_json::Value> = selected
            .iter()
            .map(|s| {
                let mut sources = s.sources.clone();
                sources.sort();
                json!([
                    s.symbol,
                    format!("{:.3}", s.sentiment),
                    s.volume,
                    sources,
                ])
            })
            .collect();
        stable_hash(&json!(canonical))
    }

    /// One guarded LLM round trip. `None` is the fallback signal: LLM
    /// unconfigured, circuit open, provider failure, or deadline hit.
    async fn complete_with_resilience(&mut self, request: LlmRequest) -> Option<String> {
        let now_ms = self.clock.now_ms();
        if !self.llm.is_configured() {
            debug!("LLM not configured; using fallback");
            return None;
        }
        if self.llm_health.is_open(now_ms) {
            debug!(
                "LLM circuit open until {}; using fallback",
                self.llm_health.circuit_open_until_ms
            );
            return None;
        }

        self.metrics.llm_calls += 1;
        match tokio::time::timeout(LLM_DEADLINE, self.llm.complete(request)).await {
            Ok(Ok(response)) => {
                self.llm_health.mark_success(self.clock.now_ms());
                Some(response.content)
            }
            Ok(Err(e)) => {
                self.metrics.llm_failures += 1;
                self.llm_health.mark_failure(self.clock.now_ms(), &e.to_string());
                None
            }
            Err(_) => {
                self.metrics.llm_failures += 1;
                self.llm_health
                    .mark_failure(self.clock.now_ms(), "deadline exceeded");
                None
            }
        }
    }

    fn prune_caches(&mut self) {
        let now_ms = self.clock.now_ms();
        self.analysis_cache
            .retain(|_, entry| now_ms - entry.timestamp_ms < ANALYSIS_CACHE_TTL_MS);
        self.research_cache
            .retain(|_, entry| now_ms - entry.timestamp_ms < RESEARCH_CACHE_TTL_MS);
    }

    /// Produce recommendations for a signal set, serving the cache when
    /// an identical selection was analyzed inside the TTL.
    pub async fn analyze(&mut self, signals: &[Signal]) -> Vec<Recommendation> {
        let selected = Self::select_signals(signals);
        if selected.is_empty() {
            return Vec::new();
        }
        let now_ms = self.clock.now_ms();
        let fingerprint = Self::fingerprint(&selected);

        if let Some(entry) = self.analysis_cache.get(&fingerprint) {
            if now_ms - entry.timestamp_ms < ANALYSIS_CACHE_TTL_MS {
                self.metrics.analysis_cache_hits += 1;
                return entry.recommendations.clone();
            }
        }

        let request = build_analysis_request(&selected);
        let Some(content) = self.complete_with_resilience(request).await else {
            return Vec::new();
        };
        let recommendations = match parse_recommendations(&content) {
            Ok(recommendations) => recommendations,
            Err(e) => {
                warn!("discarding unparseable analysis response: {e}");
                return Vec::new();
            }
        };
        self.metrics.analyses_run += 1;
        self.analysis_cache.insert(
            fingerprint,
            AnalysisCacheEntry {
                recommendations: recommendations.clone(),
                timestamp_ms: now_ms,
            },
        );
        recommendations
    }

    /// Batched per-symbol research with a 180 s cache: dedupe to at most
    /// 16 uppercase symbols, research uncached directional ones in
    /// chunks of 8, one LLM call per chunk.
    pub async fn research_signals_batch(
        &mut self,
        inputs: &[Signal],
    ) -> HashMap<String, ResearchResult> {
        let now_ms = self.clock.now_ms();

        let mut candidates: Vec<Signal> = Vec::new();
        for signal in inputs {
            let symbol = signal.symbol.trim().to_uppercase();
            if symbol.is_empty() || candidates.iter().any(|s| s.symbol == symbol) {
                continue;
            }
            let mut signal = signal.clone();
            signal.symbol = symbol;
            candidates.push(signal);
            if candidates.len() >= MAX_RESEARCH_CANDIDATES {
                break;
            }
        }

        let mut results: HashMap<String, ResearchResult> = HashMap::new();
        let mut to_research: Vec<Signal> = Vec::new();
        for signal in &candidates {
            match self.research_cache.get(&signal.symbol) {
                Some(cached) if now_ms - cached.timestamp_ms < RESEARCH_CACHE_TTL_MS => {
                    self.metrics.research_cache_hits += 1;
                    results.insert(signal.symbol.clone(), cached.clone());
                }
                _ if signal.sentiment.abs() >= MIN_ABS_SENTIMENT => {
                    to_research.push(signal.clone())
                }
                _ => {}
            }
        }

        for chunk in to_research.chunks(RESEARCH_CHUNK) {
            let request = build_research_request(chunk);
            let Some(content) = self.complete_with_resilience(request).await else {
                continue;
            };
            match parse_research(&content, now_ms) {
                Ok(parsed) => {
                    for result in parsed {
                        let symbol = result.symbol.to_uppercase();
                        let mut result = result;
                        result.symbol = symbol.clone();
                        self.research_cache.insert(symbol.clone(), result.clone());
                        results.insert(symbol, result);
                    }
                }
                Err(e) => warn!("discarding unparseable research chunk: {e}"),
            }
        }
        results
    }

    /// The 120 s scheduled cycle: pull signals, research, analyze,
    /// publish `analysis_ready`.
    pub async fn run_cycle(&mut self) -> Result<usize> {
        let signals = self.signal_provider.signals().await?;
        let research = self.research_signals_batch(&signals).await;
        let recommendations = self.analyze(&signals).await;
        let now_ms = self.clock.now_ms();
        self.last_analysis_ms = now_ms;

        let count = recommendations.len();
        self.registry
            .publish(
                &self.id,
                "analysis_ready",
                json!({
                    "recommendations": recommendations,
                    "batched_research": research,
                    "generated_at": now_ms,
                }),
            )
            .await?;
        info!("analysis cycle published {count} recommendations");
        Ok(count)
    }
}

fn build_analysis_request(selected: &[Signal]) -> LlmRequest {
    let signal_lines = serde_json::to_string(selected).unwrap_or_else(|_| "[]".to_string());
    LlmRequest {
        messages: vec![
            LlmMessage::system(
                "You are an equity analyst. Respond with a strict JSON array; no prose. \
                 Each element: {\"symbol\", \"action\" (BUY|SKIP|WAIT|HOLD|SELL), \
                 \"confidence\" (0..1), \"reasoning\", \"urgency\" (optional)}.",
            ),
            LlmMessage::user(format!(
                "Social sentiment signals, strongest first:\n{signal_lines}\n\
                 Recommend actions for the symbols worth acting on."
            )),
        ],
        temperature: 0.2,
        max_tokens: 1024,
        response_format: Some("json".to_string()),
    }
}

fn build_research_request(chunk: &[Signal]) -> LlmRequest {
    let signal_lines = serde_json::to_string(chunk).unwrap_or_else(|_| "[]".to_string());
    LlmRequest {
        messages: vec![
            LlmMessage::system(
                "You are a research assistant. Respond with a strict JSON array; no prose. \
                 Each element: {\"symbol\", \"verdict\" (BUY|SKIP|WAIT), \
                 \"confidence\" (0..1), \"reasoning\"}.",
            ),
            LlmMessage::user(format!(
                "Research each symbol given its social signal:\n{signal_lines}"
            )),
        ],
        temperature: 0.1,
        max_tokens: 1024,
        response_format: Some("json".to_string()),
    }
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_recommendations(content: &str) -> Result<Vec<Recommendation>> {
    let parsed: Vec<Recommendation> = serde_json::from_str(strip_code_fences(content))?;
    Ok(parsed
        .into_iter()
        .filter(|r| !r.symbol.trim().is_empty())
        .map(|mut r| {
            r.symbol = r.symbol.to_uppercase();
            r.confidence = r.confidence.clamp(0.0, 1.0);
            r
        })
        .collect())
}

fn parse_research(content: &str, now_ms: i64) -> Result<Vec<ResearchResult>> {
    #[derive(Deserialize)]
    struct Wire {
        symbol: String,
        verdict: ResearchVerdict,
        confidence: f64,
        reasoning: String,
    }
    let parsed: Vec<Wire> = serde_json::from_str(strip_code_fences(content))?;
    Ok(parsed
        .into_iter()
        .filter(|w| !w.symbol.trim().is_empty())
        .map(|w| ResearchResult {
            symbol: w.symbol,
            verdict: w.verdict,
            confidence: w.confidence.clamp(0.0, 1.0),
            reasoning: w.reasoning,
            timestamp_ms: now_ms,
        })
        .collect())
}

#[async_trait]
impl SwarmAgent for AnalystAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["analysis".to_string(), "research".to_string()]
    }

    async fn on_start(&mut self) -> Result<()> {
        self.registry.subscribe(&self.id, "signals_updated").await?;
        self.registry.subscribe(&self.id, "strategy_updated").await?;
        Ok(())
    }

    async fn on_alarm(&mut self) -> Result<()> {
        self.prune_caches();
        if self.clock.now_ms() - self.last_analysis_ms >= ANALYSIS_INTERVAL_MS {
            if let Err(e) = self.run_cycle().await {
                warn!("analysis cycle failed: {e}");
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> Result<serde_json::Value> {
        match (message.message_type, message.topic.as_str()) {
            (MessageType::Event, "signals_updated") => {
                let signals: Vec<Signal> =
                    serde_json::from_value(message.payload["signals"].clone()).unwrap_or_default();
                let recommendations = self.analyze(&signals).await;
                Ok(json!({"ack": true, "recommendations": recommendations.len()}))
            }
            (MessageType::Event, "strategy_updated") => {
                self.strategy = Some(message.payload);
                Ok(json!({"ack": true}))
            }
            (MessageType::Command, "analyze") => {
                let count = self.run_cycle().await?;
                Ok(json!({"ack": true, "recommendations": count}))
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
            "/metrics" => Ok(json!({
                "metrics": self.metrics,
                "llm_health": self.llm_health,
            })),
            "/research" => {
                let signals: Vec<Signal> =
                    serde_json::from_value(body["signals"].clone()).unwrap_or_default();
                let results = self.research_signals_batch(&signals).await;
                Ok(serde_json::to_value(results)?)
            }
            _ => Err(SwarmError::NotFound(format!("no route {route}"))),
        }
    }

    fn state_snapshot(&self) -> serde_json::Value {
        json!({
            "analysis_cache": self.analysis_cache.len(),
            "research_cache": self.research_cache.len(),
            "llm_health": self.llm_health,
            "metrics": self.metrics,
            "last_analysis_ms": self.last_analysis_ms,
            "strategy": self.strategy,
        })
    }
}
