//! Asynchronous model downloads
//!
//! Tasks run on spawned tokio workers and report progress through a watch
//! channel: `progress()` is a non-blocking snapshot, `wait()` blocks until a
//! terminal state. Sources are the Hugging Face Hub (file-by-file via
//! hf-hub) or a URL; `file://` URLs are copied locally, which covers
//! air-gapped installs. A failed or cancelled download never registers a
//! model: `auto_register` applies only after `Completed`.

use dashmap::DashMap;
use futures::StreamExt;
use hf_hub::api::tokio::{Api, ApiBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, watch};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::metrics;
use crate::models::{ModelFormat, ModelInfo, ModelRegistry, discovery, parse_model_config};

/// Where a download comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DownloadSource {
    /// Hugging Face Hub repository (e.g. "org/name")
    Hub { repo: String },
    /// Direct URL; `file://` paths are copied locally
    Url { url: String },
}

impl std::fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hub { repo } => write!(f, "hub:{repo}"),
            Self::Url { url } => write!(f, "{url}"),
        }
    }
}

/// Task state machine; terminal states are sticky
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Snapshot of a task's progress
#[derive(Debug, Clone, Serialize)]
pub struct DownloadProgress {
    pub status: DownloadStatus,
    /// 0–100; hub downloads advance per file, URL downloads per byte
    pub percent: f64,
    pub bytes_downloaded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    pub bytes_per_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadProgress {
    fn pending() -> Self {
        Self {
            status: DownloadStatus::Pending,
            percent: 0.0,
            bytes_downloaded: 0,
            total_bytes: None,
            bytes_per_sec: 0.0,
            error: None,
        }
    }
}

/// Handle to an asynchronous download
pub struct DownloadTask {
    pub id: Uuid,
    pub model_id: String,
    pub source: DownloadSource,
    progress_rx: watch::Receiver<DownloadProgress>,
    cancel: Arc<AtomicBool>,
}

impl DownloadTask {
    /// Non-blocking progress snapshot
    pub fn progress(&self) -> DownloadProgress {
        self.progress_rx.borrow().clone()
    }

    pub fn status(&self) -> DownloadStatus {
        self.progress_rx.borrow().status
    }

    /// Request cancellation; observed between transfer units. Cancelling a
    /// finished task does nothing.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Block until the task reaches a terminal state
    pub async fn wait(&self) -> DownloadProgress {
        let mut rx = self.progress_rx.clone();
        loop {
            {
                let current = rx.borrow_and_update();
                if current.status.is_terminal() {
                    return current.clone();
                }
            }
            if rx.changed().await.is_err() {
                // Worker gone; whatever it last published is final
                return rx.borrow().clone();
            }
        }
    }
}

/// Issues and tracks download tasks
pub struct DownloadManager {
    registry: Arc<ModelRegistry>,
    models_dir: PathBuf,
    hub_cache_dir: Option<PathBuf>,
    permits: Arc<Semaphore>,
    tasks: DashMap<Uuid, Arc<DownloadTask>>,
}

impl DownloadManager {
    pub fn new(config: &ManagerConfig, registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            models_dir: config.models_dir.clone(),
            hub_cache_dir: config.download.hub_cache_dir.clone(),
            permits: Arc::new(Semaphore::new(config.download.max_concurrent)),
            tasks: DashMap::new(),
        }
    }

    /// Start an asynchronous download
    ///
    /// With `auto_register`, the model is registered only once the task
    /// reaches `Completed`; failures and cancellations leave the registry
    /// untouched. No automatic retry: issuing a new task is the caller's
    /// decision.
    pub fn download_from_source(
        &self,
        source: DownloadSource,
        model_id: &str,
        auto_register: bool,
    ) -> Arc<DownloadTask> {
        let (tx, rx) = watch::channel(DownloadProgress::pending());
        let cancel = Arc::new(AtomicBool::new(false));

        let task = Arc::new(DownloadTask {
            id: Uuid::new_v4(),
            model_id: model_id.to_string(),
            source: source.clone(),
            progress_rx: rx,
            cancel: cancel.clone(),
        });
        self.tasks.insert(task.id, task.clone());

        tracing::info!(
            task_id = %task.id,
            model_id = %model_id,
            source = %source,
            "Download task created"
        );
        metrics::record_download_started();

        let worker = DownloadWorker {
            source,
            model_id: model_id.to_string(),
            auto_register,
            registry: self.registry.clone(),
            models_dir: self.models_dir.clone(),
            hub_cache_dir: self.hub_cache_dir.clone(),
            permits: self.permits.clone(),
            cancel,
            tx,
        };
        tokio::spawn(worker.run());

        task
    }

    /// Look up a task by id
    pub fn get(&self, id: Uuid) -> Option<Arc<DownloadTask>> {
        self.tasks.get(&id).map(|t| Arc::clone(t.value()))
    }

    /// All known tasks
    pub fn list(&self) -> Vec<Arc<DownloadTask>> {
        self.tasks.iter().map(|t| Arc::clone(t.value())).collect()
    }

    /// Garbage-collect tasks in terminal states; returns how many were removed
    pub fn purge_finished(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| !task.status().is_terminal());
        before - self.tasks.len()
    }
}

struct DownloadWorker {
    source: DownloadSource,
    model_id: String,
    auto_register: bool,
    registry: Arc<ModelRegistry>,
    models_dir: PathBuf,
    hub_cache_dir: Option<PathBuf>,
    permits: Arc<Semaphore>,
    cancel: Arc<AtomicBool>,
    tx: watch::Sender<DownloadProgress>,
}

impl DownloadWorker {
    async fn run(self) {
        // The semaphore is never closed; permits live as long as the manager
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        if self.cancelled() {
            self.publish_terminal(DownloadStatus::Cancelled, None);
            return;
        }
        self.publish(DownloadStatus::Running, 0.0, 0, None, 0.0);

        let result = match &self.source {
            DownloadSource::Hub { repo } => self.run_hub(repo.clone()).await,
            DownloadSource::Url { url } => self.run_url(url.clone()).await,
        };

        match result {
            Ok(info) => {
                if self.auto_register {
                    self.registry.register(info).await;
                }
                metrics::record_download_finished("completed");
                tracing::info!(model_id = %self.model_id, "Download completed");
                self.publish_terminal(DownloadStatus::Completed, None);
            }
            Err(WorkerError::Cancelled) => {
                metrics::record_download_finished("cancelled");
                tracing::info!(model_id = %self.model_id, "Download cancelled");
                self.publish_terminal(DownloadStatus::Cancelled, None);
            }
            Err(WorkerError::Failed(message)) => {
                metrics::record_download_finished("failed");
                tracing::error!(model_id = %self.model_id, error = %message, "Download failed");
                self.publish_terminal(DownloadStatus::Failed, Some(message));
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn publish(
        &self,
        status: DownloadStatus,
        percent: f64,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
        bytes_per_sec: f64,
    ) {
        let _ = self.tx.send(DownloadProgress {
            status,
            percent,
            bytes_downloaded,
            total_bytes,
            bytes_per_sec,
            error: None,
        });
    }

    fn publish_terminal(&self, status: DownloadStatus, error: Option<String>) {
        self.tx.send_modify(|progress| {
            progress.status = status;
            if status == DownloadStatus::Completed {
                progress.percent = 100.0;
            }
            progress.error = error;
        });
    }

    /// Download a hub repository file-by-file; progress advances per file
    async fn run_hub(&self, repo: String) -> Result<ModelInfo, WorkerError> {
        let api = match &self.hub_cache_dir {
            Some(dir) => ApiBuilder::new()
                .with_cache_dir(dir.clone())
                .build()
                .map_err(|e| WorkerError::Failed(format!("hub client: {e}")))?,
            None => Api::new().map_err(|e| WorkerError::Failed(format!("hub client: {e}")))?,
        };
        let api_repo = api.model(repo.clone());

        // config.json is mandatory and pins the snapshot directory
        let essential = ["config.json", "tokenizer.json"];
        let weights = [
            "model.safetensors",
            "pytorch_model.bin",
            "model.onnx",
            "model.safetensors.index.json",
        ];
        let optional = ["tokenizer_config.json", "special_tokens_map.json", "vocab.txt"];

        let units_total = essential.len() + 1;
        let mut units_done = 0usize;
        let started = Instant::now();
        let mut config_path: Option<PathBuf> = None;

        for file in essential {
            if self.cancelled() {
                return Err(WorkerError::Cancelled);
            }
            match api_repo.get(file).await {
                Ok(path) => {
                    if file == "config.json" {
                        config_path = Some(path);
                    }
                }
                Err(e) if file == "config.json" => {
                    return Err(WorkerError::Failed(format!("failed to fetch {file}: {e}")));
                }
                // Not every model ships every tokenizer file
                Err(e) => {
                    tracing::debug!(repo = %repo, file = %file, error = %e, "Optional file skipped")
                }
            }
            units_done += 1;
            self.publish_file_progress(units_done, units_total, started, config_path.as_deref());
        }

        let mut fetched_weights = false;
        for file in weights {
            if self.cancelled() {
                return Err(WorkerError::Cancelled);
            }
            if let Ok(path) = api_repo.get(file).await {
                fetched_weights = true;
                if file.ends_with(".index.json") {
                    self.fetch_shards(&api_repo, &path).await?;
                }
                break;
            }
        }
        if !fetched_weights {
            return Err(WorkerError::Failed(format!(
                "no weight file found in {repo} (tried safetensors, pytorch, onnx)"
            )));
        }
        units_done += 1;
        self.publish_file_progress(units_done, units_total, started, config_path.as_deref());

        for file in optional {
            if self.cancelled() {
                return Err(WorkerError::Cancelled);
            }
            let _ = api_repo.get(file).await;
        }

        let snapshot = config_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .ok_or_else(|| WorkerError::Failed("snapshot directory not resolved".to_string()))?;

        let mut info = ModelInfo::new(&self.model_id, ModelFormat::SafeTensors, &snapshot)
            .with_size(discovery::artifact_size(&snapshot))
            .with_description(format!("Downloaded from hub:{repo}"));
        if let Some(meta) = parse_model_config(&snapshot) {
            info = info.with_metadata(meta);
        }
        Ok(info)
    }

    /// Fetch every shard referenced by a safetensors index file
    async fn fetch_shards(
        &self,
        api_repo: &hf_hub::api::tokio::ApiRepo,
        index_path: &Path,
    ) -> Result<(), WorkerError> {
        let content = tokio::fs::read_to_string(index_path)
            .await
            .map_err(|e| WorkerError::Failed(format!("failed to read shard index: {e}")))?;
        let index: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| WorkerError::Failed(format!("failed to parse shard index: {e}")))?;

        let Some(weight_map) = index.get("weight_map").and_then(|v| v.as_object()) else {
            return Ok(());
        };
        let shards: std::collections::HashSet<&str> =
            weight_map.values().filter_map(|v| v.as_str()).collect();

        tracing::info!(shard_count = shards.len(), "Fetching sharded weights");
        for shard in shards {
            if self.cancelled() {
                return Err(WorkerError::Cancelled);
            }
            api_repo
                .get(shard)
                .await
                .map_err(|e| WorkerError::Failed(format!("failed to fetch shard {shard}: {e}")))?;
        }
        Ok(())
    }

    fn publish_file_progress(
        &self,
        units_done: usize,
        units_total: usize,
        started: Instant,
        snapshot_hint: Option<&Path>,
    ) {
        let bytes = snapshot_hint
            .and_then(Path::parent)
            .map(discovery::artifact_size)
            .unwrap_or(0);
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { bytes as f64 / elapsed } else { 0.0 };
        self.publish(
            DownloadStatus::Running,
            units_done as f64 / units_total as f64 * 100.0,
            bytes,
            None,
            rate,
        );
    }

    /// Download from a URL; `file://` sources are copied locally
    async fn run_url(&self, url: String) -> Result<ModelInfo, WorkerError> {
        tokio::fs::create_dir_all(&self.models_dir)
            .await
            .map_err(|e| WorkerError::Failed(format!("cannot create models dir: {e}")))?;

        if let Some(path) = url.strip_prefix("file://") {
            return self.copy_local(Path::new(path)).await;
        }

        let file_name = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("model.bin")
            .to_string();
        let dest = self.models_dir.join(&file_name);
        let format = ModelFormat::from_path(&dest).ok_or_else(|| {
            WorkerError::Failed(format!("unrecognized artifact format for '{file_name}'"))
        })?;

        let response = reqwest::get(&url)
            .await
            .map_err(|e| WorkerError::Failed(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(WorkerError::Failed(format!(
                "server returned {}",
                response.status()
            )));
        }

        let total_bytes = response.content_length();
        let part = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| WorkerError::Failed(format!("cannot create {part:?}: {e}")))?;

        let started = Instant::now();
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            if self.cancelled() {
                drop(file);
                let _ = tokio::fs::remove_file(&part).await;
                return Err(WorkerError::Cancelled);
            }
            let chunk = chunk.map_err(|e| WorkerError::Failed(format!("transfer failed: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| WorkerError::Failed(format!("write failed: {e}")))?;

            downloaded += chunk.len() as u64;
            let elapsed = started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                downloaded as f64 / elapsed
            } else {
                0.0
            };
            let percent = total_bytes
                .map(|total| downloaded as f64 / total as f64 * 100.0)
                .unwrap_or(0.0);
            self.publish(DownloadStatus::Running, percent, downloaded, total_bytes, rate);
        }

        file.sync_all()
            .await
            .map_err(|e| WorkerError::Failed(format!("sync failed: {e}")))?;
        drop(file);
        tokio::fs::rename(&part, &dest)
            .await
            .map_err(|e| WorkerError::Failed(format!("rename failed: {e}")))?;

        Ok(ModelInfo::new(&self.model_id, format, &dest)
            .with_size(downloaded)
            .with_description(format!("Downloaded from {url}")))
    }

    async fn copy_local(&self, source: &Path) -> Result<ModelInfo, WorkerError> {
        let total = tokio::fs::metadata(source)
            .await
            .map_err(|e| WorkerError::Failed(format!("source not readable: {e}")))?
            .len();

        let file_name = source
            .file_name()
            .ok_or_else(|| WorkerError::Failed("source has no file name".to_string()))?;
        let dest = self.models_dir.join(file_name);
        let format = ModelFormat::from_path(&dest).ok_or_else(|| {
            WorkerError::Failed(format!("unrecognized artifact format for {file_name:?}"))
        })?;

        if self.cancelled() {
            return Err(WorkerError::Cancelled);
        }

        let part = dest.with_extension("part");
        tokio::fs::copy(source, &part)
            .await
            .map_err(|e| WorkerError::Failed(format!("copy failed: {e}")))?;
        tokio::fs::rename(&part, &dest)
            .await
            .map_err(|e| WorkerError::Failed(format!("rename failed: {e}")))?;

        self.publish(DownloadStatus::Running, 100.0, total, Some(total), 0.0);

        Ok(ModelInfo::new(&self.model_id, format, &dest)
            .with_size(total)
            .with_description(format!("Copied from {}", source.display())))
    }
}

enum WorkerError {
    Failed(String),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &Path) -> (DownloadManager, Arc<ModelRegistry>) {
        let registry = Arc::new(ModelRegistry::new());
        let config = ManagerConfig {
            models_dir: dir.to_path_buf(),
            ..Default::default()
        };
        (DownloadManager::new(&config, registry.clone()), registry)
    }

    #[test]
    fn test_status_terminality() {
        assert!(!DownloadStatus::Pending.is_terminal());
        assert!(!DownloadStatus::Running.is_terminal());
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Failed.is_terminal());
        assert!(DownloadStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_source_display() {
        let hub = DownloadSource::Hub {
            repo: "org/name".to_string(),
        };
        assert_eq!(hub.to_string(), "hub:org/name");
    }

    #[tokio::test]
    async fn test_file_source_completes_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let source_file = dir.path().join("src").join("tiny.gguf");
        std::fs::create_dir_all(source_file.parent().unwrap()).unwrap();
        std::fs::write(&source_file, b"GGUF\x03\x00\x00\x00weights").unwrap();

        let models_dir = dir.path().join("models");
        let (manager, registry) = manager_in(&models_dir);

        let task = manager.download_from_source(
            DownloadSource::Url {
                url: format!("file://{}", source_file.display()),
            },
            "tiny",
            true,
        );

        let progress = task.wait().await;
        assert_eq!(progress.status, DownloadStatus::Completed);
        assert!((progress.percent - 100.0).abs() < f64::EPSILON);
        assert!(progress.error.is_none());

        let info = registry.get("tiny").await.expect("registered on completion");
        assert_eq!(info.format, ModelFormat::Gguf);
        assert!(info.path.exists());
        // No stray partial file
        assert!(!info.path.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_missing_file_source_fails_without_registering() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, registry) = manager_in(&dir.path().join("models"));

        let task = manager.download_from_source(
            DownloadSource::Url {
                url: "file:///nonexistent/path/model.gguf".to_string(),
            },
            "ghost",
            true,
        );

        let progress = task.wait().await;
        assert_eq!(progress.status, DownloadStatus::Failed);
        assert!(progress.error.as_ref().unwrap().contains("not readable"));
        // auto_register must not fire on failure
        assert!(!registry.contains("ghost").await);
    }

    #[tokio::test]
    async fn test_unrecognized_format_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source_file = dir.path().join("weights.xyz");
        std::fs::write(&source_file, b"data").unwrap();

        let (manager, registry) = manager_in(&dir.path().join("models"));
        let task = manager.download_from_source(
            DownloadSource::Url {
                url: format!("file://{}", source_file.display()),
            },
            "odd",
            true,
        );

        let progress = task.wait().await;
        assert_eq!(progress.status, DownloadStatus::Failed);
        assert!(progress.error.as_ref().unwrap().contains("format"));
        assert!(!registry.contains("odd").await);
    }

    #[tokio::test]
    async fn test_no_register_when_auto_register_off() {
        let dir = tempfile::tempdir().unwrap();
        let source_file = dir.path().join("tiny.gguf");
        std::fs::write(&source_file, b"GGUF....").unwrap();

        let (manager, registry) = manager_in(&dir.path().join("models"));
        let task = manager.download_from_source(
            DownloadSource::Url {
                url: format!("file://{}", source_file.display()),
            },
            "tiny",
            false,
        );

        assert_eq!(task.wait().await.status, DownloadStatus::Completed);
        assert!(!registry.contains("tiny").await);
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let source_file = dir.path().join("tiny.gguf");
        std::fs::write(&source_file, b"GGUF....").unwrap();

        let (manager, _registry) = manager_in(&dir.path().join("models"));
        let task = manager.download_from_source(
            DownloadSource::Url {
                url: format!("file://{}", source_file.display()),
            },
            "tiny",
            false,
        );

        let first = task.wait().await.status;
        task.cancel();
        // Cancel after completion does not rewrite history
        assert_eq!(task.status(), first);
    }

    #[tokio::test]
    async fn test_purge_finished() {
        let dir = tempfile::tempdir().unwrap();
        let source_file = dir.path().join("tiny.gguf");
        std::fs::write(&source_file, b"GGUF....").unwrap();

        let (manager, _registry) = manager_in(&dir.path().join("models"));
        let task = manager.download_from_source(
            DownloadSource::Url {
                url: format!("file://{}", source_file.display()),
            },
            "tiny",
            false,
        );
        task.wait().await;

        assert_eq!(manager.list().len(), 1);
        assert_eq!(manager.purge_finished(), 1);
        assert!(manager.get(task.id).is_none());
    }

    #[tokio::test]
    async fn test_task_lookup_while_known() {
        let dir = tempfile::tempdir().unwrap();
        let source_file = dir.path().join("tiny.gguf");
        std::fs::write(&source_file, b"GGUF....").unwrap();

        let (manager, _registry) = manager_in(&dir.path().join("models"));
        let task = manager.download_from_source(
            DownloadSource::Url {
                url: format!("file://{}", source_file.display()),
            },
            "tiny",
            false,
        );

        let found = manager.get(task.id).expect("task is tracked");
        assert_eq!(found.model_id, "tiny");
        found.wait().await;
    }
}
