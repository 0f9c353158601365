//! Time source and TTL cache.
//!
//! Everything that reads the time takes a `Clock` so expiry, retention and
//! schedule computations are testable without sleeping.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default maximum number of entries before the oldest is evicted.
const DEFAULT_MAX_ENTRIES: usize = 256;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct CacheEntry<V> {
    value: V,
    cached_at: DateTime<Utc>,
}

/// Thread-safe map whose entries expire after a fixed TTL.
///
/// When full, the least recently inserted entry is evicted.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    ttl: ChronoDuration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX),
            max_entries: DEFAULT_MAX_ENTRIES,
            clock,
        }
    }

    /// Set the capacity (at least 1).
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.cached_at) >= self.ttl
    }

    /// Fresh value for `key`; expired entries are dropped on read.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(entry) if !self.is_expired(entry, now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            entries.retain(|_, e| now.signed_duration_since(e.cached_at) < self.ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.cached_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                cached_at: now,
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| now.signed_duration_since(e.cached_at) < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    #[test]
    fn test_entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60), clock.clone());

        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_full_cache_evicts_oldest() {
        let clock = Arc::new(ManualClock::default());
        let cache = TtlCache::new(Duration::from_secs(600), clock.clone()).with_max_entries(2);

        cache.insert("a", 1);
        clock.advance(Duration::from_secs(1));
        cache.insert("b", 2);
        clock.advance(Duration::from_secs(1));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn test_purge_expired() {
        let clock = Arc::new(ManualClock::default());
        let cache = TtlCache::new(Duration::from_secs(10), clock.clone());
        cache.insert(1, "x");
        clock.advance(Duration::from_secs(5));
        cache.insert(2, "y");
        clock.advance(Duration::from_secs(6));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get(&2), Some("y"));
    }
}
