//! On-disk cache backend
//!
//! Each entry is a pair of files under the cache directory: `<key>.bin`
//! holding the raw value and `<key>.meta` holding a small JSON envelope
//! (stored-at, TTL, use sequence). Writes go through a temp file and rename
//! so a crash never leaves a torn entry. The in-memory index is rebuilt by
//! scanning the directory at open, which makes the directory itself the
//! source of truth across restarts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::backend::CacheBackend;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    stored_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl_secs: Option<u64>,
    size_bytes: u64,
    last_used: u64,
}

#[derive(Default)]
struct Index {
    entries: HashMap<String, Envelope>,
    total_bytes: u64,
    seq: u64,
}

/// Disk-backed cache
pub struct DiskBackend {
    root: PathBuf,
    index: Mutex<Index>,
    max_entries: usize,
    max_bytes: Option<u64>,
}

impl DiskBackend {
    /// Open (or create) a disk cache rooted at `root`
    pub async fn open(root: PathBuf, max_entries: usize, max_bytes: Option<u64>) -> Result<Self> {
        tokio::fs::create_dir_all(&root).await?;

        let mut index = Index::default();
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match read_envelope(&path).await {
                Ok(envelope) => {
                    index.seq = index.seq.max(envelope.last_used);
                    index.total_bytes += envelope.size_bytes;
                    index.entries.insert(key.to_string(), envelope);
                }
                Err(e) => {
                    // A torn or foreign file; drop it rather than carrying a
                    // broken index entry
                    tracing::warn!(path = ?path, error = %e, "Discarding unreadable cache envelope");
                    let _ = tokio::fs::remove_file(&path).await;
                    let _ = tokio::fs::remove_file(path.with_extension("bin")).await;
                }
            }
        }

        tracing::debug!(
            root = ?root,
            entries = index.entries.len(),
            "Disk cache opened"
        );

        Ok(Self {
            root,
            index: Mutex::new(index),
            max_entries,
            max_bytes,
        })
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.bin"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.meta"))
    }

    async fn delete_files(&self, key: &str) {
        let _ = tokio::fs::remove_file(self.value_path(key)).await;
        let _ = tokio::fs::remove_file(self.meta_path(key)).await;
    }

    async fn evict_over_budget(&self, index: &mut Index) {
        loop {
            let over_count = index.entries.len() > self.max_entries;
            let over_bytes = self.max_bytes.is_some_and(|max| index.total_bytes > max);
            if !over_count && !over_bytes {
                break;
            }

            // Minimum use sequence; keys tie-break lexicographically for
            // envelopes recovered from an older on-disk format
            let Some(victim) = index
                .entries
                .iter()
                .min_by(|(ka, a), (kb, b)| a.last_used.cmp(&b.last_used).then(ka.cmp(kb)))
                .map(|(key, _)| key.clone())
            else {
                break;
            };

            if let Some(envelope) = index.entries.remove(&victim) {
                index.total_bytes -= envelope.size_bytes;
            }
            tracing::debug!(key = %victim, "Evicting disk cache entry");
            self.delete_files(&victim).await;
        }
    }

    async fn write_envelope(&self, key: &str, envelope: &Envelope) -> Result<()> {
        let content = serde_json::to_vec(envelope)?;
        atomic_write(&self.meta_path(key), &content).await
    }
}

async fn read_envelope(path: &Path) -> Result<Envelope> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Write to a temp file, then rename into place
async fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&temp).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

fn expired(envelope: &Envelope) -> bool {
    match envelope.ttl_secs {
        Some(ttl) => {
            let age = chrono::Utc::now() - envelope.stored_at;
            age >= chrono::Duration::seconds(ttl as i64)
        }
        None => false,
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    fn name(&self) -> &str {
        "disk"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut index = self.index.lock().await;

        let Some(envelope) = index.entries.get(key) else {
            return Ok(None);
        };

        if expired(envelope) {
            if let Some(envelope) = index.entries.remove(key) {
                index.total_bytes -= envelope.size_bytes;
            }
            self.delete_files(key).await;
            return Ok(None);
        }

        let value = tokio::fs::read(self.value_path(key))
            .await
            .map_err(|e| Error::Cache(format!("failed to read cached value: {e}")))?;

        index.seq += 1;
        let seq = index.seq;
        if let Some(envelope) = index.entries.get_mut(key) {
            envelope.last_used = seq;
            // Recency persistence is best-effort; losing it only weakens LRU
            // ordering after a restart
            let envelope = envelope.clone();
            if let Err(e) = self.write_envelope(key, &envelope).await {
                tracing::debug!(key = %key, error = %e, "Failed to persist cache recency");
            }
        }

        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut index = self.index.lock().await;

        if let Some(previous) = index.entries.remove(key) {
            index.total_bytes -= previous.size_bytes;
        }

        index.seq += 1;
        let envelope = Envelope {
            stored_at: chrono::Utc::now(),
            ttl_secs: ttl.map(|t| t.as_secs()),
            size_bytes: value.len() as u64,
            last_used: index.seq,
        };

        atomic_write(&self.value_path(key), &value)
            .await
            .map_err(|e| Error::Cache(format!("failed to write cached value: {e}")))?;
        self.write_envelope(key, &envelope).await?;

        index.total_bytes += envelope.size_bytes;
        index.entries.insert(key.to_string(), envelope);

        self.evict_over_budget(&mut index).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut index = self.index.lock().await;
        if let Some(envelope) = index.entries.remove(key) {
            index.total_bytes -= envelope.size_bytes;
            self.delete_files(key).await;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut index = self.index.lock().await;
        let keys: Vec<String> = index.entries.keys().cloned().collect();
        for key in keys {
            self.delete_files(&key).await;
        }
        index.entries.clear();
        index.total_bytes = 0;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.index.lock().await.entries.len())
    }
}
