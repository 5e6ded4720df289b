//! Model lifecycle management
//!
//! The manager owns the registry and the loaded-handle table and is the
//! single source of truth for which models exist and whether they are
//! loaded. Load and unload of the same id are serialized through a per-id
//! async mutex, so concurrent loads perform exactly one load and receive
//! the same handle.

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::discovery;
use super::info::{Device, ModelFormat, ModelInfo};
use super::loader::{self, LoadedModel};
use super::registry::ModelRegistry;
use crate::adapters::{self, ModelAdapter};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::metrics;

/// Manages model discovery, registration, loading and unloading
pub struct ModelManager {
    registry: Arc<ModelRegistry>,
    loaded: RwLock<HashMap<String, Arc<LoadedModel>>>,
    /// Per-id lifecycle locks; entries are tiny and never removed, keyed by
    /// the set of ids ever loaded
    lifecycle_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    runtimes: HashMap<ModelFormat, Arc<dyn ModelAdapter>>,
    device: Device,
    models_dir: PathBuf,
    hub_cache_dir: Option<PathBuf>,
}

impl ModelManager {
    /// Build a manager with runtimes constructed from the configuration
    pub fn from_config(config: &ManagerConfig, registry: Arc<ModelRegistry>) -> Result<Self> {
        let runtime = adapters::build(config.adapters.default, &config.adapters)?;
        let runtimes = [
            ModelFormat::Gguf,
            ModelFormat::SafeTensors,
            ModelFormat::Onnx,
        ]
        .into_iter()
        .map(|format| (format, runtime.clone()))
        .collect();

        Ok(Self::with_runtimes(config, registry, runtimes))
    }

    /// Build a manager with explicit per-format runtimes (tests inject
    /// doubles here)
    pub fn with_runtimes(
        config: &ManagerConfig,
        registry: Arc<ModelRegistry>,
        runtimes: HashMap<ModelFormat, Arc<dyn ModelAdapter>>,
    ) -> Self {
        Self {
            registry,
            loaded: RwLock::new(HashMap::new()),
            lifecycle_locks: DashMap::new(),
            runtimes,
            device: config.device,
            models_dir: config.models_dir.clone(),
            hub_cache_dir: config.download.hub_cache_dir.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Scan the models directory and the hub cache for loadable artifacts
    ///
    /// Produces descriptors without loading or registering anything.
    pub fn discover_models(&self) -> Vec<ModelInfo> {
        let mut models = discovery::scan_models_dir(&self.models_dir);
        let local_ids: std::collections::HashSet<String> =
            models.iter().map(|m| m.id.clone()).collect();

        for hub_model in discovery::scan_hub_cache(self.hub_cache_dir.as_deref()) {
            if !local_ids.contains(&hub_model.id) {
                models.push(hub_model);
            }
        }

        models.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::info!(count = models.len(), "Model discovery complete");
        models
    }

    /// Register a model, replacing any previous record for its id
    pub async fn register_model(&self, info: ModelInfo) {
        self.registry.register(info).await;
        metrics::update_registered_count(self.registry.count().await);
    }

    /// Get a registered model's descriptor
    pub async fn get_model(&self, model_id: &str) -> Result<ModelInfo> {
        self.registry
            .get(model_id)
            .await
            .ok_or_else(|| Error::NotFound(model_id.to_string()))
    }

    /// List all registered models, sorted by id
    pub async fn get_all_models(&self) -> Vec<ModelInfo> {
        self.registry.list().await
    }

    /// Remove a model from the registry
    ///
    /// Refused while the model is loaded; unload first.
    pub async fn remove_model(&self, model_id: &str) -> Result<ModelInfo> {
        let lock = self.lifecycle_lock(model_id);
        let _guard = lock.lock().await;

        if self.loaded.read().await.contains_key(model_id) {
            return Err(Error::load(model_id, "model is currently loaded"));
        }
        self.registry
            .remove(model_id)
            .await
            .ok_or_else(|| Error::NotFound(model_id.to_string()))
    }

    /// Load a model, returning the existing handle if already loaded
    ///
    /// Concurrent calls for the same id serialize on a per-id lock; the
    /// first performs the load and the rest receive the same handle. A
    /// failed load leaves the registry entry untouched.
    pub async fn load_model(&self, model_id: &str) -> Result<Arc<LoadedModel>> {
        if let Some(handle) = self.loaded.read().await.get(model_id) {
            tracing::debug!(model_id = %model_id, "Model already loaded");
            return Ok(handle.clone());
        }

        let lock = self.lifecycle_lock(model_id);
        let _guard = lock.lock().await;

        // Another caller may have finished the load while we waited
        if let Some(handle) = self.loaded.read().await.get(model_id) {
            return Ok(handle.clone());
        }

        let info = self
            .registry
            .get(model_id)
            .await
            .ok_or_else(|| Error::NotFound(model_id.to_string()))?;

        loader::validate_artifact(&info)?;

        let runtime = self
            .runtimes
            .get(&info.format)
            .ok_or_else(|| Error::load(model_id, format!("no runtime for format {}", info.format)))?
            .clone();

        tracing::info!(
            model_id = %model_id,
            format = %info.format,
            device = %self.device,
            runtime = %runtime.name(),
            "Model loaded"
        );

        let handle = Arc::new(LoadedModel::new(info, self.device, runtime));
        let mut loaded = self.loaded.write().await;
        loaded.insert(model_id.to_string(), handle.clone());
        metrics::record_model_loaded(model_id);
        metrics::update_loaded_count(loaded.len());

        Ok(handle)
    }

    /// Unload a model, releasing its handle
    ///
    /// Unloading a model that is not loaded is a no-op, not an error.
    pub async fn unload_model(&self, model_id: &str) -> Result<()> {
        let lock = self.lifecycle_lock(model_id);
        let _guard = lock.lock().await;

        let mut loaded = self.loaded.write().await;
        if loaded.remove(model_id).is_some() {
            tracing::info!(model_id = %model_id, "Model unloaded");
            metrics::record_model_unloaded(model_id);
            metrics::update_loaded_count(loaded.len());
        } else {
            tracing::debug!(model_id = %model_id, "Model not loaded, unload is a no-op");
        }
        Ok(())
    }

    /// Check whether a model is currently loaded
    pub async fn is_loaded(&self, model_id: &str) -> bool {
        self.loaded.read().await.contains_key(model_id)
    }

    /// Ids of all currently loaded models, sorted
    pub async fn loaded_models(&self) -> Vec<String> {
        let loaded = self.loaded.read().await;
        let mut ids: Vec<String> = loaded.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Unload everything; used at shutdown
    pub async fn unload_all(&self) {
        let ids = self.loaded_models().await;
        for id in ids {
            let _ = self.unload_model(&id).await;
        }
    }

    fn lifecycle_lock(&self, model_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lifecycle_locks
            .entry(model_id.to_string())
            .or_default()
            .clone()
    }
}
