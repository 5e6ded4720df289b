//! Ollama adapter (thin wrapper over the OpenAI-compatible client)
//!
//! Ollama serves an OpenAI-compatible API under `/v1`, so this adapter only
//! pins the default endpoint and the adapter name.

use async_trait::async_trait;

use super::openai::OpenAiCompatAdapter;
use super::{GenerateOutput, GenerateParams, ModelAdapter};
use crate::error::Result;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/v1";

/// Adapter for a local Ollama server
pub struct OllamaAdapter {
    inner: OpenAiCompatAdapter,
}

impl OllamaAdapter {
    /// Create an adapter; Ollama needs no API key
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            inner: OpenAiCompatAdapter::new("ollama", base_url, None, timeout_secs)?,
        })
    }

    /// Adapter against the default localhost endpoint
    pub fn localhost(timeout_secs: u64) -> Result<Self> {
        Self::new(DEFAULT_OLLAMA_URL.to_string(), timeout_secs)
    }
}

#[async_trait]
impl ModelAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.inner.list_models().await
    }

    async fn generate(
        &self,
        model_id: &str,
        input: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput> {
        self.inner.generate(model_id, input, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint() {
        let adapter = OllamaAdapter::localhost(5).unwrap();
        assert_eq!(adapter.name(), "ollama");
        assert_eq!(adapter.inner.base_url(), "http://localhost:11434/v1");
    }
}
