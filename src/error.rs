//! Error types for model lifecycle and caching operations

use thiserror::Error;

/// Result type for manager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for manager operations
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced model id is not in the registry
    #[error("model not found: {0}")]
    NotFound(String),

    /// Model exists but could not be instantiated
    #[error("failed to load model '{model_id}': {reason}")]
    Load { model_id: String, reason: String },

    /// Cache backend failure. Never fatal: reads fail open, writes are
    /// logged and dropped.
    #[error("cache backend error: {0}")]
    Cache(String),

    /// Download failure, surfaced through the task's terminal state
    #[error("download failed: {0}")]
    Download(String),

    /// Remote runtime (Ollama, LM Studio, ...) rejected or failed a call
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Invalid configuration at construction time
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a load failure on a given model id
    pub fn load(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Load {
            model_id: model_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true if the error is a load error
    pub fn is_load(&self) -> bool {
        matches!(self, Error::Load { .. })
    }

    /// Returns true if the error is a cache backend error
    pub fn is_cache(&self) -> bool {
        matches!(self, Error::Cache(_))
    }
}
