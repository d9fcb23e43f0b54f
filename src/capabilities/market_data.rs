//! Market data capability

use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub ts_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    pub last_price: Decimal,
    pub daily_bar: Option<Bar>,
    pub prev_daily_bar: Option<Bar>,
    pub avg_volume: Option<Decimal>,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_bars(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Bar>>;
    async fn get_latest_bar(&self, symbol: &str) -> Result<Option<Bar>>;
    async fn get_latest_bars(&self, symbols: &[String]) -> Result<HashMap<String, Bar>>;
    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>>;
    async fn get_quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>>;
    async fn get_snapshot(&self, symbol: &str) -> Result<Option<Snapshot>>;
    async fn get_snapshots(&self, symbols: &[String]) -> Result<HashMap<String, Snapshot>>;
    async fn get_crypto_snapshot(&self, symbol: &str) -> Result<Option<Snapshot>>;
}

/// Fixture-backed market data for dry runs and tests.
#[derive(Default)]
pub struct StaticMarketData {
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_snapshot(&self, snapshot: Snapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.symbol.to_uppercase(), snapshot);
    }

    pub async fn set_price(&self, symbol: &str, last_price: Decimal, avg_volume: Decimal) {
        self.set_snapshot(Snapshot {
            symbol: symbol.to_uppercase(),
            last_price,
            daily_bar: None,
            prev_daily_bar: None,
            avg_volume: Some(avg_volume),
        })
        .await;
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn get_bars(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> Result<Vec<Bar>> {
        Ok(Vec::new())
    }

    async fn get_latest_bar(&self, symbol: &str) -> Result<Option<Bar>> {
        Ok(self
            .get_snapshot(symbol)
            .await?
            .and_then(|s| s.daily_bar))
    }

    async fn get_latest_bars(&self, symbols: &[String]) -> Result<HashMap<String, Bar>> {
        let mut bars = HashMap::new();
        for symbol in symbols {
            if let Some(bar) = self.get_latest_bar(symbol).await? {
                bars.insert(symbol.to_uppercase(), bar);
            }
        }
        Ok(bars)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        Ok(self.get_snapshot(symbol).await?.map(|s| Quote {
            symbol: s.symbol,
            bid: s.last_price,
            ask: s.last_price,
            ts_ms: 0,
        }))
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>> {
        let mut quotes = HashMap::new();
        for symbol in symbols {
            if let Some(quote) = self.get_quote(symbol).await? {
                quotes.insert(symbol.to_uppercase(), quote);
            }
        }
        Ok(quotes)
    }

    async fn get_snapshot(&self, symbol: &str) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .get(&symbol.to_uppercase())
            .cloned())
    }

    async fn get_snapshots(&self, symbols: &[String]) -> Result<HashMap<String, Snapshot>> {
        let mut snapshots = HashMap::new();
        for symbol in symbols {
            if let Some(snapshot) = self.get_snapshot(symbol).await? {
                snapshots.insert(symbol.to_uppercase(), snapshot);
            }
        }
        Ok(snapshots)
    }

    async fn get_crypto_snapshot(&self, symbol: &str) -> Result<Option<Snapshot>> {
        self.get_snapshot(symbol).await
    }
}
