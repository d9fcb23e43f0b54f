//! Data scout agent
//!
//! Pulls raw items from the news/social feed, deduplicates them by
//! `(source, source_id)` through the raw-events table, scores sentiment,
//! and keeps a per-symbol aggregate that downstream agents read via
//! `/signals`. A successful refresh with new items publishes
//! `signals_updated`.

use super::sentiment::{extract_symbols, SentimentAnalyzer};
use crate::capabilities::NewsFeed;
use crate::error::Result;
use crate::persistence::RawEventStore;
use crate::swarm::{AgentHandle, AgentId, AgentKind, Message, MessageType, SwarmAgent, SwarmRegistry};
use crate::util::Clock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ScoutConfig {
    pub refresh_interval_ms: i64,
    /// Empty admits every source the feed produces.
    pub enabled_sources: Vec<String>,
    /// Symbols matched by bare mention, in addition to cashtags.
    pub watchlist: Vec<String>,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5 * 60 * 1000,
            enabled_sources: Vec::new(),
            watchlist: Vec::new(),
        }
    }
}

/// Per-symbol aggregate exposed to the analyst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    /// Volume-weighted mean in [-1, 1].
    pub sentiment: f64,
    pub volume: u32,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct ScoutMetrics {
    polls: u64,
    new_items: u64,
    duplicates: u64,
}

pub struct ScoutAgent {
    id: AgentId,
    clock: Arc<dyn Clock>,
    registry: Arc<SwarmRegistry>,
    feed: Arc<dyn NewsFeed>,
    raw_events: RawEventStore,
    analyzer: SentimentAnalyzer,
    config: ScoutConfig,
    signals: HashMap<String, Signal>,
    last_refresh_ms: i64,
    metrics: ScoutMetrics,
}

impl ScoutAgent {
    pub fn new(
        clock: Arc<dyn Clock>,
        registry: Arc<SwarmRegistry>,
        feed: Arc<dyn NewsFeed>,
        raw_events: RawEventStore,
        config: ScoutConfig,
    ) -> Self {
        Self {
            id: AgentId::default_shard(AgentKind::Scout),
            clock,
            registry,
            feed,
            raw_events,
            analyzer: SentimentAnalyzer::new(),
            config,
            signals: HashMap::new(),
            last_refresh_ms: 0,
            metrics: ScoutMetrics::default(),
        }
    }

    fn source_enabled(&self, source: &str) -> bool {
        self.config.enabled_sources.is_empty()
            || self
                .config
                .enabled_sources
                .iter()
                .any(|s| s.eq_ignore_ascii_case(source))
    }

    fn fold_item(&mut self, symbols: &[String], sentiment: f64, source: &str) {
        for symbol in symbols {
            let symbol = symbol.to_uppercase();
            let entry = self.signals.entry(symbol.clone()).or_insert_with(|| Signal {
                symbol,
                sentiment: 0.0,
                volume: 0,
                sources: Vec::new(),
            });
            let total = entry.sentiment * entry.volume as f64 + sentiment;
            entry.volume += 1;
            entry.sentiment = total / entry.volume as f64;
            if !entry.sources.iter().any(|s| s == source) {
                entry.sources.push(source.to_string());
            }
        }
    }

    /// Poll the feed, fold in new items, and publish `signals_updated`
    /// when anything changed. Returns the count of new items.
    pub async fn refresh(&mut self) -> Result<u64> {
        let now_ms = self.clock.now_ms();
        let items = self.feed.poll().await?;
        self.metrics.polls += 1;

        let mut new_items = 0u64;
        for item in items {
            if !self.source_enabled(&item.source) {
                continue;
            }
            let inserted = self
                .raw_events
                .insert_ignore(&item.source, &item.source_id, &item.content, now_ms)
                .await?;
            if !inserted {
                self.metrics.duplicates += 1;
                continue;
            }
            new_items += 1;

            let symbols = extract_symbols(&item.content, &self.config.watchlist);
            if symbols.is_empty() {
                continue;
            }
            let sentiment = self.analyzer.analyze(&item.content);
            self.fold_item(&symbols, sentiment, &item.source);
        }

        self.metrics.new_items += new_items;
        self.last_refresh_ms = now_ms;

        if new_items > 0 {
            info!("scout folded {new_items} new items into {} signals", self.signals.len());
            self.registry
                .publish(
                    &self.id,
                    "signals_updated",
                    json!({
                        "signals": self.sorted_signals(),
                        "refreshed_at": now_ms,
                    }),
                )
                .await?;
        } else {
            debug!("scout refresh found nothing new");
        }
        Ok(new_items)
    }

    fn sorted_signals(&self) -> Vec<Signal> {
        let mut signals: Vec<Signal> = self.signals.values().cloned().collect();
        signals.sort_by(|a, b| {
            let wa = a.sentiment.abs() * a.volume as f64;
            let wb = b.sentiment.abs() * b.volume as f64;
            wb.total_cmp(&wa)
        });
        signals
    }
}

#[async_trait]
impl SwarmAgent for ScoutAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["signals".to_string(), "ingest".to_string()]
    }

    async fn on_alarm(&mut self) -> Result<()> {
        if self.clock.now_ms() - self.last_refresh_ms >= self.config.refresh_interval_ms {
            if let Err(e) = self.refresh().await {
                warn!("scout refresh failed: {e}");
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> Result<serde_json::Value> {
        match (message.message_type, message.topic.as_str()) {
            (MessageType::Command, "ingest") | (MessageType::Command, "refresh") => {
                let new_items = self.refresh().await?;
                Ok(json!({"ack": true, "new_items": new_items}))
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
            "/signals" => Ok(json!({"signals": self.sorted_signals()})),
            "/metrics" => Ok(serde_json::to_value(self.metrics)?),
            _ => Err(crate::error::SwarmError::NotFound(format!("no route {route}"))),
        }
    }

    fn state_snapshot(&self) -> serde_json::Value {
        json!({
            "signals": self.signals.len(),
            "last_refresh_ms": self.last_refresh_ms,
            "metrics": self.metrics,
        })
    }
}

/// `/signals` exposed to the analyst as a capability, so the analyst
/// never touches scout state directly.
pub struct ScoutSignalProvider {
    handle: AgentHandle,
}

impl ScoutSignalProvider {
    pub fn new(handle: AgentHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl super::analyst::SignalProvider for ScoutSignalProvider {
    async fn signals(&self) -> Result<Vec<Signal>> {
        let response = self.handle.request("/signals", json!({})).await?;
        Ok(serde_json::from_value(response["signals"].clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{NewsItem, StaticNewsFeed};
    use crate::persistence::SqlGateway;
    use crate::util::ManualClock;

    async fn scout_with(feed: Arc<StaticNewsFeed>) -> ScoutAgent {
        let clock = Arc::new(ManualClock::new(1_000));
        let registry = Arc::new(SwarmRegistry::with_defaults(clock.clone()));
        let gateway = SqlGateway::in_memory().await.unwrap();
        gateway.migrate().await.unwrap();
        ScoutAgent::new(
            clock,
            registry,
            feed,
            RawEventStore::new(gateway.pool().clone()),
            ScoutConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_refresh_dedupes_and_aggregates() {
        let feed = Arc::new(StaticNewsFeed::new());
        feed.push(NewsItem::new("reddit", "1", "$NVDA soars, bullish breakout")).await;
        feed.push(NewsItem::new("stocktwits", "1", "$NVDA rally continues, record high")).await;
        let mut scout = scout_with(feed.clone()).await;

        assert_eq!(scout.refresh().await.unwrap(), 2);
        let signals = scout.sorted_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].symbol, "NVDA");
        assert_eq!(signals[0].volume, 2);
        assert!(signals[0].sentiment > 0.3);
        assert_eq!(signals[0].sources.len(), 2);

        // Same items again are duplicates.
        assert_eq!(scout.refresh().await.unwrap(), 0);
        assert_eq!(scout.sorted_signals()[0].volume, 2);
    }

    #[tokio::test]
    async fn test_disabled_source_is_skipped() {
        let feed = Arc::new(StaticNewsFeed::new());
        feed.push(NewsItem::new("spamsource", "9", "$GME surge")).await;
        let mut scout = scout_with(feed).await;
        scout.config.enabled_sources = vec!["reddit".to_string()];

        assert_eq!(scout.refresh().await.unwrap(), 0);
        assert!(scout.sorted_signals().is_empty());
    }

    #[tokio::test]
    async fn test_signals_route() {
        let feed = Arc::new(StaticNewsFeed::new());
        feed.push(NewsItem::new("reddit", "1", "$AAPL beats estimates, soars")).await;
        let mut scout = scout_with(feed).await;
        scout.refresh().await.unwrap();

        let response = scout.handle_request("/signals", json!({})).await.unwrap();
        assert_eq!(response["signals"][0]["symbol"], "AAPL");
    }
}
