//! In-memory cache backend with bounded eviction and per-entry TTL

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::backend::CacheBackend;
use crate::error::Result;

/// Rule for choosing the eviction victim when a budget is exceeded
///
/// Use sequences are monotonically increasing, so ties cannot occur within a
/// policy's primary key; LFU falls back to insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// Least frequently used
    Lfu,
    /// First in, first out
    Fifo,
}

struct Stored {
    value: Vec<u8>,
    stored_at: Instant,
    ttl: Option<Duration>,
    /// Use sequence, refreshed on every hit; bulk inserts evict in
    /// insertion order under LRU
    last_used: u64,
    /// Insertion sequence; overwrites count as fresh inserts
    inserted: u64,
    hits: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Stored>,
    total_bytes: u64,
    seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn remove_entry(&mut self, key: &str) -> Option<Stored> {
        let stored = self.entries.remove(key)?;
        self.total_bytes -= stored.value.len() as u64;
        Some(stored)
    }

    /// Evict per policy until both budgets hold
    fn enforce_budgets(
        &mut self,
        policy: EvictionPolicy,
        max_entries: usize,
        max_bytes: Option<u64>,
    ) {
        loop {
            let over_count = self.entries.len() > max_entries;
            let over_bytes = max_bytes.is_some_and(|max| self.total_bytes > max);
            if !over_count && !over_bytes {
                break;
            }

            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, stored)| match policy {
                    EvictionPolicy::Lru => (stored.last_used, 0),
                    EvictionPolicy::Lfu => (stored.hits, stored.inserted),
                    EvictionPolicy::Fifo => (stored.inserted, 0),
                })
                .map(|(key, _)| key.clone())
            else {
                break;
            };

            tracing::debug!(key = %victim, policy = ?policy, "Evicting cache entry");
            self.remove_entry(&victim);
        }
    }
}

/// In-memory cache backend, LRU by default
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    policy: EvictionPolicy,
    max_entries: usize,
    max_bytes: Option<u64>,
}

impl MemoryBackend {
    pub fn new(max_entries: usize, max_bytes: Option<u64>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            policy: EvictionPolicy::Lru,
            max_entries,
            max_bytes,
        }
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a panic mid-update; the map itself is
        // still structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            Some(stored) => stored
                .ttl
                .is_some_and(|ttl| stored.stored_at.elapsed() >= ttl),
            None => return Ok(None),
        };

        if expired {
            inner.remove_entry(key);
            return Ok(None);
        }

        let seq = inner.next_seq();
        if let Some(stored) = inner.entries.get_mut(key) {
            stored.last_used = seq;
            stored.hits += 1;
            return Ok(Some(stored.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.lock();

        inner.remove_entry(key);
        let seq = inner.next_seq();
        inner.total_bytes += value.len() as u64;
        inner.entries.insert(
            key.to_string(),
            Stored {
                value,
                stored_at: Instant::now(),
                ttl,
                last_used: seq,
                inserted: seq,
                hits: 0,
            },
        );

        inner.enforce_budgets(self.policy, self.max_entries, self.max_bytes);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove_entry(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.lock().entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let backend = MemoryBackend::new(16, None);
        backend.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let backend = MemoryBackend::new(16, None);
        backend.set("k", b"old".to_vec(), None).await.unwrap();
        backend.set("k", b"new".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(backend.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let backend = MemoryBackend::new(2, None);
        backend.set("a", vec![1], None).await.unwrap();
        backend.set("b", vec![2], None).await.unwrap();
        backend.set("c", vec![3], None).await.unwrap();

        // "a" was least recently used
        assert_eq!(backend.get("a").await.unwrap(), None);
        assert_eq!(backend.get("b").await.unwrap(), Some(vec![2]));
        assert_eq!(backend.get("c").await.unwrap(), Some(vec![3]));
        assert_eq!(backend.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_refreshes_recency() {
        let backend = MemoryBackend::new(2, None);
        backend.set("a", vec![1], None).await.unwrap();
        backend.set("b", vec![2], None).await.unwrap();

        // Touch "a" so "b" becomes the eviction victim
        backend.get("a").await.unwrap();
        backend.set("c", vec![3], None).await.unwrap();

        assert_eq!(backend.get("a").await.unwrap(), Some(vec![1]));
        assert_eq!(backend.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_byte_budget_evicts() {
        let backend = MemoryBackend::new(100, Some(10));
        backend.set("a", vec![0; 6], None).await.unwrap();
        backend.set("b", vec![0; 6], None).await.unwrap();

        // 12 bytes > 10: "a" evicted
        assert_eq!(backend.get("a").await.unwrap(), None);
        assert_eq!(backend.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_oversized_single_entry_is_dropped() {
        let backend = MemoryBackend::new(100, Some(4));
        backend.set("big", vec![0; 8], None).await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let backend = MemoryBackend::new(16, None);
        backend
            .set("k", vec![1], Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(vec![1]));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        // Expired entry was purged, not just hidden
        assert_eq!(backend.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let backend = MemoryBackend::new(16, None);
        backend.set("a", vec![1], None).await.unwrap();
        backend.set("b", vec![2], None).await.unwrap();
        backend.clear().await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 0);
        assert_eq!(backend.get("a").await.unwrap(), None);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let backend = MemoryBackend::new(16, None);
        tokio_test::block_on(backend.remove("missing")).unwrap();
    }

    #[tokio::test]
    async fn test_lfu_evicts_least_hit() {
        let backend = MemoryBackend::new(2, None).with_policy(EvictionPolicy::Lfu);
        backend.set("popular", vec![1], None).await.unwrap();
        backend.set("unpopular", vec![2], None).await.unwrap();

        backend.get("popular").await.unwrap();
        backend.get("popular").await.unwrap();
        // "unpopular" was never hit, so it goes first
        backend.set("new", vec![3], None).await.unwrap();

        assert!(backend.get("popular").await.unwrap().is_some());
        assert!(backend.get("unpopular").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fifo_ignores_recency() {
        let backend = MemoryBackend::new(2, None).with_policy(EvictionPolicy::Fifo);
        backend.set("first", vec![1], None).await.unwrap();
        backend.set("second", vec![2], None).await.unwrap();

        // Touching "first" does not save it under FIFO
        backend.get("first").await.unwrap();
        backend.set("third", vec![3], None).await.unwrap();

        assert!(backend.get("first").await.unwrap().is_none());
        assert!(backend.get("second").await.unwrap().is_some());
    }
}
