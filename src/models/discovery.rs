//! Model discovery
//!
//! Scans the configured models directory and the Hugging Face hub cache for
//! loadable artifacts, producing [`ModelInfo`] records without loading
//! anything into memory. Registration is a separate, explicit step.

use std::path::{Path, PathBuf};

use super::info::{ModelFormat, ModelInfo};
use super::metadata;

/// Scan a models directory for local artifacts
///
/// Recognized layouts:
/// - `<id>.gguf` single-file checkpoints
/// - `<id>.onnx` graph files
/// - `<id>/` directories containing config.json (+ safetensors shards)
pub fn scan_models_dir(dir: &Path) -> Vec<ModelInfo> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        tracing::debug!(dir = ?dir, "Models directory not readable, skipping scan");
        return Vec::new();
    };

    let mut models = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(format) = ModelFormat::from_path(&path) else {
            continue;
        };
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let mut info = ModelInfo::new(stem, format, &path).with_size(artifact_size(&path));
        if path.is_dir()
            && let Some(meta) = metadata::parse_model_config(&path)
        {
            info = info.with_metadata(meta);
        }
        models.push(info);
    }

    models.sort_by(|a, b| a.id.cmp(&b.id));
    models
}

/// Scan the Hugging Face hub cache for downloaded models
///
/// Snapshot directories are registered as safetensors models under their
/// hub id (e.g. "org/name").
pub fn scan_hub_cache(cache_dir: Option<&Path>) -> Vec<ModelInfo> {
    let cache_dir = cache_dir.map(PathBuf::from).unwrap_or_else(hub_cache_dir);

    let Ok(entries) = std::fs::read_dir(&cache_dir) else {
        return Vec::new();
    };

    let mut models = Vec::new();

    for entry in entries.flatten() {
        let dir_name = entry.file_name().to_string_lossy().to_string();
        let Some(repo_id) = cache_dir_to_repo_id(&dir_name) else {
            continue;
        };
        let Some(snapshot) = resolve_snapshot(&entry.path()) else {
            continue;
        };

        let mut info = ModelInfo::new(&repo_id, ModelFormat::SafeTensors, &snapshot)
            .with_size(dir_size(&entry.path()));
        if let Some(meta) = metadata::parse_model_config(&snapshot) {
            info = info.with_metadata(meta);
        }
        models.push(info);
    }

    models.sort_by(|a, b| a.id.cmp(&b.id));
    models
}

/// Hub cache location
///
/// Checks in order: `$HF_HOME/hub`, `$XDG_CACHE_HOME/huggingface/hub`,
/// `~/.cache/huggingface/hub`.
pub fn hub_cache_dir() -> PathBuf {
    if let Ok(hf_home) = std::env::var("HF_HOME") {
        return PathBuf::from(hf_home).join("hub");
    }
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("huggingface/hub");
    }
    dirs::home_dir()
        .map(|h| h.join(".cache/huggingface/hub"))
        .unwrap_or_else(|| PathBuf::from("/tmp/huggingface/hub"))
}

/// "models--org--name" -> "org/name"
fn cache_dir_to_repo_id(dir_name: &str) -> Option<String> {
    dir_name
        .strip_prefix("models--")
        .map(|s| s.replacen("--", "/", 1))
}

/// Resolve a hub model directory to its current snapshot
///
/// Prefers the revision recorded in refs/main, falls back to the first
/// snapshot carrying a config.json.
fn resolve_snapshot(model_dir: &Path) -> Option<PathBuf> {
    let refs_main = model_dir.join("refs/main");
    if let Ok(revision) = std::fs::read_to_string(&refs_main) {
        let snapshot = model_dir.join("snapshots").join(revision.trim());
        if snapshot.join("config.json").exists() {
            return Some(snapshot);
        }
    }

    let snapshots = model_dir.join("snapshots");
    for entry in std::fs::read_dir(&snapshots).ok()?.flatten() {
        let path = entry.path();
        if path.join("config.json").exists() {
            return Some(path);
        }
    }

    None
}

/// Size of an artifact: file length, or recursive total for directories
pub fn artifact_size(path: &Path) -> u64 {
    if path.is_dir() {
        dir_size(path)
    } else {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}

fn dir_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path);
            } else if let Ok(meta) = std::fs::metadata(&path) {
                size += meta.len();
            }
        }
    }

    size
}
