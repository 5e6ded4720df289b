//! LM Studio adapter (thin wrapper over the OpenAI-compatible client)

use async_trait::async_trait;

use super::openai::OpenAiCompatAdapter;
use super::{GenerateOutput, GenerateParams, ModelAdapter};
use crate::error::Result;

pub const DEFAULT_LMSTUDIO_URL: &str = "http://localhost:1234/v1";

/// Adapter for a local LM Studio server
pub struct LmStudioAdapter {
    inner: OpenAiCompatAdapter,
}

impl LmStudioAdapter {
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            inner: OpenAiCompatAdapter::new("lmstudio", base_url, None, timeout_secs)?,
        })
    }

    /// Adapter against the default localhost endpoint
    pub fn localhost(timeout_secs: u64) -> Result<Self> {
        Self::new(DEFAULT_LMSTUDIO_URL.to_string(), timeout_secs)
    }
}

#[async_trait]
impl ModelAdapter for LmStudioAdapter {
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
        let adapter = LmStudioAdapter::localhost(5).unwrap();
        assert_eq!(adapter.name(), "lmstudio");
        assert_eq!(adapter.inner.base_url(), "http://localhost:1234/v1");
    }
}
