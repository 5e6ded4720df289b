//! Thread-safe model registry
//!
//! The single source of truth for which models exist. Loading state lives in
//! the [`ModelManager`](super::manager::ModelManager), not here.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::info::ModelInfo;

/// Registry of known models, keyed by id
pub struct ModelRegistry {
    models: Arc<RwLock<HashMap<String, ModelInfo>>>,
}

impl ModelRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            models: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a model, replacing any existing record for the same id
    pub async fn register(&self, info: ModelInfo) {
        let mut models = self.models.write().await;
        if models.insert(info.id.clone(), info.clone()).is_some() {
            tracing::info!(model_id = %info.id, "Model re-registered, record replaced");
        } else {
            tracing::info!(model_id = %info.id, format = %info.format, "Model registered");
        }
    }

    /// Get a model record by id
    pub async fn get(&self, model_id: &str) -> Option<ModelInfo> {
        let models = self.models.read().await;
        models.get(model_id).cloned()
    }

    /// List all registered models, sorted by id
    pub async fn list(&self) -> Vec<ModelInfo> {
        let models = self.models.read().await;
        let mut entries: Vec<_> = models.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Check if a model id is registered
    pub async fn contains(&self, model_id: &str) -> bool {
        let models = self.models.read().await;
        models.contains_key(model_id)
    }

    /// Remove a model record; returns it if present
    pub async fn remove(&self, model_id: &str) -> Option<ModelInfo> {
        let mut models = self.models.write().await;
        let removed = models.remove(model_id);
        if removed.is_some() {
            tracing::info!(model_id = %model_id, "Model removed from registry");
        }
        removed
    }

    /// Number of registered models
    pub async fn count(&self) -> usize {
        let models = self.models.read().await;
        models.len()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
