//! TTL'd key/value capability
//!
//! Backs alert dedupe markers and rate-limit counters. Failures are
//! swallowed by contract: a lost dedupe marker means at worst one
//! duplicate notification, which the caller tolerates.

use crate::util::Clock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the live value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, expiring after `ttl_s` when given.
    async fn put(&self, key: &str, value: &str, ttl_s: Option<u64>);

    async fn delete(&self, key: &str);
}

/// In-memory KV with lazy TTL expiry.
pub struct MemoryKv {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, KvEntry>>,
}

struct KvEntry {
    value: String,
    expires_at_ms: Option<i64>,
}

impl MemoryKv {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn is_live(entry: &KvEntry, now_ms: i64) -> bool {
        entry.expires_at_ms.map_or(true, |exp| now_ms < exp)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Option<String> {
        let now_ms = self.clock.now_ms();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| Self::is_live(e, now_ms))
            .map(|e| e.value.clone())
    }

    async fn put(&self, key: &str, value: &str, ttl_s: Option<u64>) {
        let now_ms = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        // Opportunistic sweep keeps the map from accumulating dead keys.
        entries.retain(|_, e| Self::is_live(e, now_ms));
        entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at_ms: ttl_s.map(|s| now_ms + (s as i64) * 1000),
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}
