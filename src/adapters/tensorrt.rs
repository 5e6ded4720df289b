//! TensorRT-LLM adapter
//!
//! Targets the OpenAI-compatible frontend that TensorRT-LLM's serving stack
//! (trtllm-serve / Triton's OpenAI frontend) exposes, conventionally on
//! port 8000.

use async_trait::async_trait;

use super::openai::OpenAiCompatAdapter;
use super::{GenerateOutput, GenerateParams, ModelAdapter};
use crate::error::Result;

pub const DEFAULT_TENSORRT_URL: &str = "http://localhost:8000/v1";

/// Adapter for a TensorRT-LLM serving endpoint
pub struct TensorRtAdapter {
    inner: OpenAiCompatAdapter,
}

impl TensorRtAdapter {
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            inner: OpenAiCompatAdapter::new("tensorrt", base_url, None, timeout_secs)?,
        })
    }

    /// Adapter against the default localhost endpoint
    pub fn localhost(timeout_secs: u64) -> Result<Self> {
        Self::new(DEFAULT_TENSORRT_URL.to_string(), timeout_secs)
    }
}

#[async_trait]
impl ModelAdapter for TensorRtAdapter {
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
        let adapter = TensorRtAdapter::localhost(5).unwrap();
        assert_eq!(adapter.name(), "tensorrt");
        assert_eq!(adapter.inner.base_url(), "http://localhost:8000/v1");
    }
}
