//! State persistence for registered models

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::models::{ModelInfo, ModelRegistry};

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save content to a file path atomically
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path
    /// Returns None if file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;
}

/// Production storage backend using tokio::fs
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSystemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        // Write to a sibling temp file and rename, so a crash mid-write
        // cannot truncate the previous state
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .with_context(|| format!("Cannot create temp file next to {:?}", path))?;
        file.write_all(content.as_bytes())
            .await
            .context("Short write to state file")?;
        file.sync_all().await.context("Cannot sync state file")?;

        fs::rename(&temp_file, path)
            .await
            .context("Cannot move state file into place")?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Cannot read state file: {:?}", path))?;

        Ok(Some(content))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    last_updated: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Persists the model registry across restarts
pub struct StateManager {
    state_file: PathBuf,
    registry: Arc<ModelRegistry>,
    storage: Arc<dyn StorageBackend>,
}

impl StateManager {
    /// Create a new state manager with custom storage backend
    pub fn new_with_storage(
        state_file: PathBuf,
        registry: Arc<ModelRegistry>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            state_file,
            registry,
            storage,
        }
    }

    /// Create a new state manager with default filesystem storage
    pub fn new(state_file: PathBuf, registry: Arc<ModelRegistry>) -> Self {
        Self::new_with_storage(state_file, registry, Arc::new(FileSystemStorage::new()))
    }

    /// Save the current registry to disk atomically
    pub async fn save(&self) -> Result<()> {
        let state = SavedState {
            last_updated: chrono::Utc::now(),
            models: self.registry.list().await,
        };

        let toml_content =
            toml::to_string_pretty(&state).context("Failed to serialize state to TOML")?;
        self.storage.save(&self.state_file, &toml_content).await?;

        tracing::debug!(
            path = ?self.state_file,
            models = state.models.len(),
            "State saved"
        );
        Ok(())
    }

    /// Restore registered models from disk; returns how many were restored
    ///
    /// A missing state file is a fresh start, not an error. Models whose
    /// artifacts disappeared since the save are restored anyway: the
    /// registry tracks what exists, the loader decides what still loads.
    pub async fn restore(&self) -> Result<usize> {
        let Some(content) = self.storage.load(&self.state_file).await? else {
            tracing::debug!(path = ?self.state_file, "No state file, starting fresh");
            return Ok(0);
        };

        let state: SavedState = toml::from_str(&content).context("Failed to parse state file")?;
        let count = state.models.len();

        for info in state.models {
            self.registry.register(info).await;
        }

        tracing::info!(models = count, "State restored");
        Ok(count)
    }
}
