//! Protocol adapters for external inference runtimes
//!
//! Each adapter translates the uniform list/generate contract into one
//! runtime's API. Everything bundled here speaks the OpenAI-compatible REST
//! dialect; Ollama, LM Studio and TensorRT-LLM differ only in their default
//! endpoints and naming.

pub mod lmstudio;
pub mod ollama;
pub mod openai;
pub mod tensorrt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AdaptersConfig;
use crate::error::Result;

pub use lmstudio::LmStudioAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiCompatAdapter;
pub use tensorrt::TensorRtAdapter;

/// Which adapter executes inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Ollama,
    Lmstudio,
    Openai,
    Tensorrt,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Lmstudio => write!(f, "lmstudio"),
            Self::Openai => write!(f, "openai"),
            Self::Tensorrt => write!(f, "tensorrt"),
        }
    }
}

/// Sampling parameters for a generate call
///
/// `extra` carries runtime-specific options verbatim; a `BTreeMap` keeps
/// serialization order stable for cache keys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerateParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Result of a generate call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOutput {
    pub model_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

/// Uniform interface over inference runtimes
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Adapter name for logs and routing
    fn name(&self) -> &str;

    /// Model ids the runtime currently serves
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Run one generation call
    async fn generate(
        &self,
        model_id: &str,
        input: &str,
        params: &GenerateParams,
    ) -> Result<GenerateOutput>;
}

/// Construct the adapter for a kind from the endpoints configuration
pub fn build(kind: AdapterKind, config: &AdaptersConfig) -> Result<Arc<dyn ModelAdapter>> {
    let adapter: Arc<dyn ModelAdapter> = match kind {
        AdapterKind::Ollama => Arc::new(OllamaAdapter::new(
            config.ollama_url.clone(),
            config.timeout_secs,
        )?),
        AdapterKind::Lmstudio => Arc::new(LmStudioAdapter::new(
            config.lmstudio_url.clone(),
            config.timeout_secs,
        )?),
        AdapterKind::Openai => Arc::new(OpenAiCompatAdapter::new(
            "openai",
            config.openai_url.clone(),
            config.openai_api_key.clone(),
            config.timeout_secs,
        )?),
        AdapterKind::Tensorrt => Arc::new(TensorRtAdapter::new(
            config.tensorrt_url.clone(),
            config.timeout_secs,
        )?),
    };
    Ok(adapter)
}

/// Test doubles shared by unit and integration tests
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Adapter double returning a fixed response and counting calls
    pub struct MockAdapter {
        response: String,
        calls: AtomicU64,
    }

    impl MockAdapter {
        pub fn new(response: impl Into<String>) -> Self {
            Self {
                response: response.into(),
                calls: AtomicU64::new(0),
            }
        }

        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelAdapter for MockAdapter {
        fn name(&self) -> &str {
            "mock"
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec!["mock-model".to_string()])
        }

        async fn generate(
            &self,
            model_id: &str,
            input: &str,
            _params: &GenerateParams,
        ) -> Result<GenerateOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerateOutput {
                model_id: model_id.to_string(),
                text: self.response.clone(),
                input_tokens: Some(input.split_whitespace().count() as u32),
                output_tokens: Some(self.response.split_whitespace().count() as u32),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_kind_serde() {
        assert_eq!(
            serde_json::to_string(&AdapterKind::Lmstudio).unwrap(),
            "\"lmstudio\""
        );
        let parsed: AdapterKind = serde_json::from_str("\"tensorrt\"").unwrap();
        assert_eq!(parsed, AdapterKind::Tensorrt);
    }

    #[test]
    fn test_generate_params_default_serializes_empty() {
        let params = GenerateParams::default();
        assert_eq!(serde_json::to_string(&params).unwrap(), "{}");
    }

    #[test]
    fn test_generate_params_roundtrip() {
        let params = GenerateParams {
            temperature: Some(0.7),
            max_tokens: Some(128),
            stop: vec!["\n".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let parsed: GenerateParams = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn test_build_all_kinds() {
        let config = AdaptersConfig::default();
        for kind in [
            AdapterKind::Ollama,
            AdapterKind::Lmstudio,
            AdapterKind::Openai,
            AdapterKind::Tensorrt,
        ] {
            let adapter = build(kind, &config).unwrap();
            assert_eq!(adapter.name(), kind.to_string());
        }
    }

    #[tokio::test]
    async fn test_mock_adapter_counts_calls() {
        let mock = testing::MockAdapter::new("hi there");
        let out = mock
            .generate("m1", "one two three", &GenerateParams::default())
            .await
            .unwrap();
        assert_eq!(out.text, "hi there");
        assert_eq!(out.input_tokens, Some(3));
        assert_eq!(mock.calls(), 1);
    }
}
