//! Model descriptor records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::metadata::ModelMetadata;

/// On-disk format of a local model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Single-file llama.cpp checkpoint
    Gguf,
    /// Directory with config.json + *.safetensors shards
    SafeTensors,
    /// ONNX graph file
    Onnx,
}

impl ModelFormat {
    /// Infer the format from an artifact path, if recognizable
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gguf") => Some(Self::Gguf),
            Some("onnx") => Some(Self::Onnx),
            Some("safetensors") => Some(Self::SafeTensors),
            _ if path.is_dir() && path.join("config.json").exists() => Some(Self::SafeTensors),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gguf => write!(f, "gguf"),
            Self::SafeTensors => write!(f, "safetensors"),
            Self::Onnx => write!(f, "onnx"),
        }
    }
}

/// Compute device a model is loaded onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Pick the best available device at load time
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

/// Descriptor for a registered model
///
/// Immutable once registered; re-registering an id replaces the record
/// wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Unique model identifier
    pub id: String,
    /// Human-readable display name
    pub name: String,
    pub format: ModelFormat,
    /// Artifact path (file or directory depending on format)
    pub path: PathBuf,
    /// Artifact size on disk
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Architecture details parsed from config.json, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelMetadata>,
    pub registered_at: DateTime<Utc>,
}

impl ModelInfo {
    /// Create a descriptor with the display name defaulting to the id
    pub fn new(id: impl Into<String>, format: ModelFormat, path: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            format,
            path: path.into(),
            size_bytes: 0,
            description: None,
            metadata: None,
            registered_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
