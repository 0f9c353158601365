//! In-memory key-value store for testing and development.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::KeyValueStore;

/// In-memory hash and list storage.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
    lists: RwLock<HashMap<String, VecDeque<String>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hash keys stored.
    pub fn hash_count(&self) -> usize {
        self.hashes.read().map(|h| h.len()).unwrap_or(0)
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        if let Ok(mut hashes) = self.hashes.write() {
            hashes.clear();
        }
        if let Ok(mut lists) = self.lists.write() {
            lists.clear();
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let hashes = self.hashes.read().map_err(poisoned)?;
        Ok(hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hashes
            .write()
            .map_err(poisoned)?
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_if(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
        value: &str,
    ) -> StoreResult<bool> {
        // Single write lock makes the compare and the set one atomic step
        let mut hashes = self.hashes.write().map_err(poisoned)?;
        let hash = hashes.entry(key.to_string()).or_default();
        if hash.get(field).map(String::as_str) != expected {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let hashes = self.hashes.read().map_err(poisoned)?;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut lists = self.lists.write().map_err(poisoned)?;
        let list = lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len())
    }

    async fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()> {
        let mut lists = self.lists.write().map_err(poisoned)?;
        if let Some(list) = lists.get_mut(key) {
            list.truncate(keep);
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        let lists = self.lists.read().map_err(poisoned)?;
        Ok(lists
            .get(key)
            .map(|l| l.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_roundtrip() {
        let store = MemoryStore::new();
        store.hset("plan:a:1", "plan", "{}").await.unwrap();
        store.hset("plan:a:1", "status", "draft").await.unwrap();

        assert_eq!(
            store.hget("plan:a:1", "status").await.unwrap().as_deref(),
            Some("draft")
        );
        assert_eq!(store.hgetall("plan:a:1").await.unwrap().len(), 2);
        assert!(store.hget("plan:a:2", "plan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hset_if_compares_before_writing() {
        let store = MemoryStore::new();

        assert!(store.hset_if("k", "f", None, "v1").await.unwrap());
        assert!(!store.hset_if("k", "f", None, "v2").await.unwrap());
        assert!(!store.hset_if("k", "f", Some("stale"), "v2").await.unwrap());
        assert!(store.hset_if("k", "f", Some("v1"), "v2").await.unwrap());
        assert_eq!(store.hget("k", "f").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_list_push_trim() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.lpush("events", &i.to_string()).await.unwrap();
        }
        store.ltrim("events", 3).await.unwrap();

        let items = store.lrange("events", 10).await.unwrap();
        assert_eq!(items, vec!["4", "3", "2"]);
    }
}
