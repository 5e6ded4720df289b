//! Pluggable storage behind the response cache
//!
//! Backends are interchangeable: key derivation happens above this trait, so
//! switching the storage never changes cache-key semantics.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Trait for response cache storage backends
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logs and metrics
    fn name(&self) -> &str;

    /// Fetch a live entry. Expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store an entry, overwriting any previous value for the key.
    /// `ttl` is the per-entry lifetime; None means the entry never expires.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove an entry if present
    async fn remove(&self, key: &str) -> Result<()>;

    /// Drop all entries
    async fn clear(&self) -> Result<()>;

    /// Number of live entries
    async fn len(&self) -> Result<usize>;
}
