//! Integration tests for the model lifecycle: registry, loading, state
//! persistence and downloads working together.

use model_manager::adapters::testing::MockAdapter;
use model_manager::{
    DownloadManager, DownloadSource, DownloadStatus, GenerateParams, InferenceEngine,
    ManagerConfig, ModelAdapter, ModelFormat, ModelInfo, ModelManager, ModelRegistry,
    PerformanceTracker, ResponseCache, StateManager,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(dir: &Path) -> ManagerConfig {
    ManagerConfig {
        models_dir: dir.join("models"),
        state_file: dir.join("state.toml"),
        download: model_manager::config::DownloadConfig {
            // Keep discovery away from the real hub cache
            hub_cache_dir: Some(dir.join("hub-cache")),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn mock_runtimes(adapter: Arc<MockAdapter>) -> HashMap<ModelFormat, Arc<dyn ModelAdapter>> {
    [
        ModelFormat::Gguf,
        ModelFormat::SafeTensors,
        ModelFormat::Onnx,
    ]
    .into_iter()
    .map(|f| (f, adapter.clone() as Arc<dyn ModelAdapter>))
    .collect()
}

fn build_manager(config: &ManagerConfig) -> (Arc<ModelManager>, Arc<ModelRegistry>) {
    let registry = Arc::new(ModelRegistry::new());
    let manager = Arc::new(ModelManager::with_runtimes(
        config,
        registry.clone(),
        mock_runtimes(Arc::new(MockAdapter::new("response"))),
    ));
    (manager, registry)
}

fn write_gguf(models_dir: &Path, id: &str) -> ModelInfo {
    std::fs::create_dir_all(models_dir).unwrap();
    let path = models_dir.join(format!("{id}.gguf"));
    std::fs::write(&path, b"GGUF\x03\x00\x00\x00weights").unwrap();
    ModelInfo::new(id, ModelFormat::Gguf, path)
}

#[tokio::test]
async fn register_load_returns_same_handle() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let (manager, _) = build_manager(&config);

    manager
        .register_model(write_gguf(&config.models_dir, "gpt2-local"))
        .await;

    let first = manager.load_model("gpt2-local").await.unwrap();
    let second = manager.load_model("gpt2-local").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn load_unknown_model_is_not_found() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let (manager, _) = build_manager(&config);

    let err = manager.load_model("nonexistent-id").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn concurrent_loads_converge_on_one_handle() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let (manager, _) = build_manager(&config);
    manager
        .register_model(write_gguf(&config.models_dir, "m1"))
        .await;

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.load_model("m1").await.unwrap() })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    for handle in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], handle));
    }
    assert_eq!(manager.loaded_models().await, vec!["m1"]);
}

#[tokio::test]
async fn unload_then_reload_cycles_cleanly() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let (manager, _) = build_manager(&config);
    manager
        .register_model(write_gguf(&config.models_dir, "m1"))
        .await;

    // Unloading before any load is a no-op
    manager.unload_model("m1").await.unwrap();

    manager.load_model("m1").await.unwrap();
    assert!(manager.is_loaded("m1").await);

    manager.unload_model("m1").await.unwrap();
    assert!(!manager.is_loaded("m1").await);
    // Registry entry untouched by unload
    assert!(manager.get_model("m1").await.is_ok());
}

#[tokio::test]
async fn discovery_and_registration_are_separate_steps() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let (manager, registry) = build_manager(&config);

    write_gguf(&config.models_dir, "alpha");
    write_gguf(&config.models_dir, "beta");

    let discovered = manager.discover_models();
    assert_eq!(discovered.len(), 2);
    assert_eq!(registry.count().await, 0);

    for info in discovered {
        manager.register_model(info).await;
    }
    assert_eq!(registry.count().await, 2);
}

#[tokio::test]
async fn state_survives_process_restart() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());

    {
        let (manager, registry) = build_manager(&config);
        manager
            .register_model(write_gguf(&config.models_dir, "persisted"))
            .await;
        StateManager::new(config.state_file.clone(), registry)
            .save()
            .await
            .unwrap();
    }

    // A fresh registry restores the saved model and can load it
    let (manager, registry) = build_manager(&config);
    StateManager::new(config.state_file.clone(), registry)
        .restore()
        .await
        .unwrap();

    let info = manager.get_model("persisted").await.unwrap();
    assert_eq!(info.format, ModelFormat::Gguf);
    manager.load_model("persisted").await.unwrap();
}

#[tokio::test]
async fn failed_download_leaves_model_unregistered() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let registry = Arc::new(ModelRegistry::new());
    let downloads = DownloadManager::new(&config, registry.clone());

    // A source that cannot be read fails the task
    let task = downloads.download_from_source(
        DownloadSource::Url {
            url: "file:///nonexistent/source/model.gguf".to_string(),
        },
        "broken",
        true,
    );

    let progress = task.wait().await;
    assert_eq!(progress.status, DownloadStatus::Failed);
    assert!(progress.error.is_some());
    assert!(!registry.contains("broken").await);
}

#[tokio::test]
async fn downloaded_model_is_loadable_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let registry = Arc::new(ModelRegistry::new());
    let downloads = DownloadManager::new(&config, registry.clone());

    let source = dir.path().join("upstream.gguf");
    std::fs::write(&source, b"GGUF\x03\x00\x00\x00weights").unwrap();

    let task = downloads.download_from_source(
        DownloadSource::Url {
            url: format!("file://{}", source.display()),
        },
        "upstream",
        true,
    );
    assert_eq!(task.wait().await.status, DownloadStatus::Completed);

    let manager = Arc::new(ModelManager::with_runtimes(
        &config,
        registry,
        mock_runtimes(Arc::new(MockAdapter::new("ok"))),
    ));
    let handle = manager.load_model("upstream").await.unwrap();
    assert_eq!(handle.info.id, "upstream");
}

#[tokio::test]
async fn generate_pipeline_caches_and_tracks() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let registry = Arc::new(ModelRegistry::new());
    let adapter = Arc::new(MockAdapter::new("the answer"));
    let manager = Arc::new(ModelManager::with_runtimes(
        &config,
        registry,
        mock_runtimes(adapter.clone()),
    ));
    manager
        .register_model(write_gguf(&config.models_dir, "m1"))
        .await;

    let cache = Arc::new(ResponseCache::from_config(&config.cache).await.unwrap());
    let tracker = PerformanceTracker::new(true);
    let engine = InferenceEngine::new(manager, cache.clone(), tracker.clone());

    let params = GenerateParams {
        max_tokens: Some(32),
        ..Default::default()
    };
    let first = engine.generate("m1", "question", &params).await.unwrap();
    let second = engine.generate("m1", "question", &params).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.output.text, "the answer");
    assert_eq!(adapter.calls(), 1);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    // Only the real call produced a record
    assert_eq!(tracker.report("m1").unwrap().count, 1);
}
