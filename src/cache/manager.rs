//! Response cache manager
//!
//! Derives deterministic keys, consults the configured backend and keeps
//! hit/miss statistics. Caching is strictly best-effort: a backend failure
//! on read is a miss, a backend failure on write is logged and dropped, so
//! a cache outage is invisible to inference callers.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::backend::CacheBackend;
use super::key;
use crate::config::{CacheBackendKind, CacheConfig};
use crate::error::Result;
use crate::metrics;

/// Cache hit/miss statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups served from cache, None before the first lookup
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            Some(self.hits as f64 / total as f64)
        }
    }
}

/// Memoizes inference responses behind a pluggable backend
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Option<Duration>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Build the cache described by the configuration
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Memory => Arc::new(
                super::memory::MemoryBackend::new(config.max_entries, config.max_bytes)
                    .with_policy(config.policy),
            ),
            CacheBackendKind::Disk => Arc::new(
                super::disk::DiskBackend::open(
                    config.dir.clone(),
                    config.max_entries,
                    config.max_bytes,
                )
                .await?,
            ),
        };

        Ok(Self::with_backend(
            backend,
            config.ttl_secs.map(Duration::from_secs),
            config.enabled,
        ))
    }

    /// Build a cache over an explicit backend (tests inject doubles here)
    pub fn with_backend(
        backend: Arc<dyn CacheBackend>,
        ttl: Option<Duration>,
        enabled: bool,
    ) -> Self {
        Self {
            backend,
            ttl,
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a memoized response. Backend failures are reported as misses.
    pub async fn get(
        &self,
        model_id: &str,
        operation: &str,
        input: &str,
        params: &Value,
    ) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }

        let key = key::derive_key(model_id, operation, input, params);
        match self.backend.get(&key).await {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit(self.backend.name());
                Some(value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss(self.backend.name());
                None
            }
            Err(e) => {
                // Fail open: a broken cache must never block inference
                tracing::warn!(
                    model_id = %model_id,
                    backend = %self.backend.name(),
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss(self.backend.name());
                None
            }
        }
    }

    /// Store a response. Failures are logged and swallowed.
    pub async fn set(
        &self,
        model_id: &str,
        operation: &str,
        input: &str,
        params: &Value,
        response: Vec<u8>,
    ) {
        if !self.enabled {
            return;
        }

        let key = key::derive_key(model_id, operation, input, params);
        if let Err(e) = self.backend.set(&key, response, self.ttl).await {
            tracing::warn!(
                model_id = %model_id,
                backend = %self.backend.name(),
                error = %e,
                "Cache write failed, response not memoized"
            );
        }
    }

    /// Current hit/miss counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop all memoized responses
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    /// Number of live entries in the backend
    pub async fn len(&self) -> Result<usize> {
        self.backend.len().await
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use serde_json::json;

    /// Backend double whose reads and writes always fail
    struct FailingBackend;

    #[async_trait]
    impl CacheBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(Error::Cache("backend down".to_string()))
        }
        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
            Err(Error::Cache("backend down".to_string()))
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
        async fn len(&self) -> Result<usize> {
            Ok(0)
        }
    }

    fn memory_cache() -> ResponseCache {
        ResponseCache::with_backend(
            Arc::new(super::super::memory::MemoryBackend::new(16, None)),
            None,
            true,
        )
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let cache = memory_cache();
        let params = json!({"temperature": 0.7});

        assert!(cache.get("m1", "generate", "hi", &params).await.is_none());
        cache
            .set("m1", "generate", "hi", &params, b"out".to_vec())
            .await;
        assert_eq!(
            cache.get("m1", "generate", "hi", &params).await,
            Some(b"out".to_vec())
        );

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), Some(0.5));
    }

    #[tokio::test]
    async fn test_failing_backend_fails_open() {
        let cache = ResponseCache::with_backend(Arc::new(FailingBackend), None, true);
        let params = json!({});

        // Read error surfaces as a miss, not an Err
        assert!(cache.get("m1", "generate", "x", &params).await.is_none());
        assert_eq!(cache.stats().misses, 1);

        // Write error is swallowed
        cache.set("m1", "generate", "x", &params, vec![1]).await;
    }

    #[tokio::test]
    async fn test_disabled_cache_is_inert() {
        let cache = ResponseCache::with_backend(
            Arc::new(super::super::memory::MemoryBackend::new(16, None)),
            None,
            false,
        );
        let params = json!({});

        cache.set("m1", "generate", "x", &params, vec![1]).await;
        assert!(cache.get("m1", "generate", "x", &params).await.is_none());
        // Disabled lookups don't count as traffic
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 0 });
    }

    #[tokio::test]
    async fn test_distinct_params_are_distinct_entries() {
        let cache = memory_cache();
        cache
            .set("m1", "generate", "x", &json!({"n": 1}), vec![1])
            .await;
        assert!(
            cache
                .get("m1", "generate", "x", &json!({"n": 2}))
                .await
                .is_none()
        );
    }
}
