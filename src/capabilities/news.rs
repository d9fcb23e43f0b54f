//! News/social feed capability
//!
//! Adapters normalize provider payloads down to `(source, source_id,
//! content)`; the scout owns dedupe and sentiment scoring. Adapters
//! with authenticated APIs fall back to the public feed when
//! credentials are absent, and never attempt OAuth without them.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub source: String,
    pub source_id: String,
    pub content: String,
}

impl NewsItem {
    pub fn new(source: &str, source_id: &str, content: &str) -> Self {
        Self {
            source: source.to_string(),
            source_id: source_id.to_string(),
            content: content.to_string(),
        }
    }
}

#[async_trait]
pub trait NewsFeed: Send + Sync {
    async fn poll(&self) -> Result<Vec<NewsItem>>;
}

/// Fixture-backed feed for dry runs and tests.
#[derive(Default)]
pub struct StaticNewsFeed {
    items: RwLock<Vec<NewsItem>>,
}

impl StaticNewsFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, item: NewsItem) {
        self.items.write().await.push(item);
    }

    pub async fn push_all(&self, items: Vec<NewsItem>) {
        self.items.write().await.extend(items);
    }
}

#[async_trait]
impl NewsFeed for StaticNewsFeed {
    async fn poll(&self) -> Result<Vec<NewsItem>> {
        Ok(self.items.read().await.clone())
    }
}
