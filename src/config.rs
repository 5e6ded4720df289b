//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::Device;

/// Main manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory scanned for local model artifacts
    pub models_dir: PathBuf,
    /// Registered-model state file (TOML)
    pub state_file: PathBuf,
    /// Default compute device for loaded models
    pub device: Device,

    pub cache: CacheConfig,
    pub performance: PerformanceConfig,
    pub adapters: AdaptersConfig,
    pub download: DownloadConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            state_file: default_state_file(),
            device: Device::Auto,
            cache: CacheConfig::default(),
            performance: PerformanceConfig::default(),
            adapters: AdaptersConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(dir) = std::env::var("MODEL_MANAGER_MODELS_DIR") {
            config.models_dir = PathBuf::from(dir);
        }
        if let Ok(state_file) = std::env::var("MODEL_MANAGER_STATE_FILE") {
            config.state_file = PathBuf::from(state_file);
        }
        if let Ok(dir) = std::env::var("MODEL_MANAGER_CACHE_DIR") {
            config.cache.dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("MODEL_MANAGER_OLLAMA_URL") {
            config.adapters.ollama_url = url;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.models_dir.as_os_str().is_empty() {
            anyhow::bail!("models_dir cannot be empty");
        }

        if self.cache.enabled {
            if self.cache.max_entries == 0 {
                anyhow::bail!("cache.max_entries must be >= 1 when the cache is enabled");
            }
            if self.cache.max_bytes == Some(0) {
                anyhow::bail!("cache.max_bytes must be >= 1 when set");
            }
            if self.cache.backend == CacheBackendKind::Disk
                && self.cache.policy != crate::cache::EvictionPolicy::Lru
            {
                anyhow::bail!("the disk cache backend supports only the lru policy");
            }
        }

        if self.adapters.timeout_secs == 0 {
            anyhow::bail!("adapters.timeout_secs must be >= 1");
        }
        for (name, url) in [
            ("ollama_url", &self.adapters.ollama_url),
            ("lmstudio_url", &self.adapters.lmstudio_url),
            ("openai_url", &self.adapters.openai_url),
            ("tensorrt_url", &self.adapters.tensorrt_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("adapters.{} must be an http(s) URL (got '{}')", name, url);
            }
        }

        if self.download.max_concurrent == 0 {
            anyhow::bail!("download.max_concurrent must be >= 1");
        }

        // Ensure state file directory exists or can be created
        if let Some(parent) = self.state_file.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create state file directory: {:?}", parent))?;
        }

        Ok(())
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Which backend stores memoized responses
    pub backend: CacheBackendKind,
    /// Eviction policy; the disk backend supports lru only
    pub policy: crate::cache::EvictionPolicy,
    /// Directory used by the disk backend
    pub dir: PathBuf,
    /// Maximum number of live entries before LRU eviction
    pub max_entries: usize,
    /// Optional byte budget across all entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
    /// Entries older than this are treated as misses; None disables expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            policy: crate::cache::EvictionPolicy::default(),
            dir: default_cache_dir(),
            max_entries: default_cache_max_entries(),
            max_bytes: None,
            ttl_secs: None,
        }
    }
}

/// Selectable cache backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Disk,
}

/// Performance tracking configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub enabled: bool,
    /// Interval for the independent CPU/memory sampler
    pub system_sample_interval_secs: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            system_sample_interval_secs: default_system_sample_interval(),
        }
    }
}

/// Endpoints for the protocol adapters that execute inference
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdaptersConfig {
    /// Adapter used for formats without an explicit mapping
    pub default: crate::adapters::AdapterKind,
    pub ollama_url: String,
    pub lmstudio_url: String,
    pub openai_url: String,
    /// TensorRT-LLM OpenAI-compatible frontend
    pub tensorrt_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            default: crate::adapters::AdapterKind::Ollama,
            ollama_url: default_ollama_url(),
            lmstudio_url: default_lmstudio_url(),
            openai_url: default_openai_url(),
            tensorrt_url: default_tensorrt_url(),
            openai_api_key: None,
            timeout_secs: default_adapter_timeout(),
        }
    }
}

/// Download manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Upper bound on concurrently running download tasks
    pub max_concurrent: usize,
    /// Optional hub cache override; None uses the standard HF cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_cache_dir: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent_downloads(),
            hub_cache_dir: None,
        }
    }
}

// Default functions
fn default_models_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("model-manager/models"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/model-manager/models"))
}
fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("model-manager/state.toml"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/model-manager/state.toml"))
}
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("model-manager/responses"))
        .unwrap_or_else(|| PathBuf::from("/tmp/model-manager/responses"))
}
fn default_cache_max_entries() -> usize {
    1024
}
fn default_system_sample_interval() -> u64 {
    15
}
fn default_ollama_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_lmstudio_url() -> String {
    "http://localhost:1234/v1".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_tensorrt_url() -> String {
    "http://localhost:8000/v1".to_string()
}
fn default_adapter_timeout() -> u64 {
    120
}
fn default_max_concurrent_downloads() -> usize {
    2
}
