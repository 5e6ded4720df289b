//! Model Manager - Local AI model lifecycle manager
//!
//! Tracks model artifacts on disk, serializes load/unload per model id,
//! memoizes inference responses behind pluggable cache backends, records
//! per-model latency, and runs asynchronous downloads from the Hugging Face
//! Hub or plain URLs. Inference itself is delegated to protocol adapters
//! (Ollama, LM Studio, OpenAI-compatible, TensorRT-LLM).

pub mod adapters;
pub mod cache;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod perf;
pub mod state;

pub use adapters::{AdapterKind, GenerateOutput, GenerateParams, ModelAdapter};
pub use cache::{CacheBackend, CacheStats, ResponseCache};
pub use config::ManagerConfig;
pub use download::{DownloadManager, DownloadSource, DownloadStatus, DownloadTask};
pub use engine::{InferenceEngine, InferenceOutcome};
pub use error::{Error, Result};
pub use models::{Device, LoadedModel, ModelFormat, ModelInfo, ModelManager, ModelRegistry};
pub use perf::{PerformanceReport, PerformanceTracker, SystemSampler};
pub use state::StateManager;
