//! Append-only blob store capability for artifacts (hourly snapshots).

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()>;
}

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(path.to_string(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryBlobStore::new();
        store.put("snapshots/a.json", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.get("snapshots/a.json").await, Some(b"{}".to_vec()));
        assert_eq!(store.len().await, 1);
    }
}
