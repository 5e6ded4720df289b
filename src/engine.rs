//! Inference engine
//!
//! Composes the subsystems into the one call path callers use:
//! cache lookup → ensure the model is loaded → adapter generate → record
//! performance → memoize the response. Caching is best-effort throughout;
//! only load and adapter failures surface to the caller.

use serde_json::Value;
use std::sync::Arc;

use crate::adapters::{GenerateOutput, GenerateParams, ModelAdapter as _};
use crate::cache::ResponseCache;
use crate::error::{Error, Result};
use crate::models::ModelManager;
use crate::perf::PerformanceTracker;

const OPERATION_GENERATE: &str = "generate";

/// A generate result plus whether it was served from cache
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutcome {
    pub output: GenerateOutput,
    pub cached: bool,
}

/// Orchestrates cache, model lifecycle, adapters and performance tracking
pub struct InferenceEngine {
    manager: Arc<ModelManager>,
    cache: Arc<ResponseCache>,
    tracker: PerformanceTracker,
}

impl InferenceEngine {
    pub fn new(
        manager: Arc<ModelManager>,
        cache: Arc<ResponseCache>,
        tracker: PerformanceTracker,
    ) -> Self {
        Self {
            manager,
            cache,
            tracker,
        }
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    /// Run one generation call through the full pipeline
    pub async fn generate(
        &self,
        model_id: &str,
        input: &str,
        params: &GenerateParams,
    ) -> Result<InferenceOutcome> {
        let params_value = serde_json::to_value(params).map_err(Error::Serialization)?;

        if let Some(bytes) = self
            .cache
            .get(model_id, OPERATION_GENERATE, input, &params_value)
            .await
        {
            match serde_json::from_slice::<GenerateOutput>(&bytes) {
                Ok(output) => {
                    tracing::debug!(model_id = %model_id, "Serving response from cache");
                    return Ok(InferenceOutcome {
                        output,
                        cached: true,
                    });
                }
                // A corrupt entry is just a miss
                Err(e) => {
                    tracing::warn!(model_id = %model_id, error = %e, "Discarding undecodable cache entry")
                }
            }
        }

        let handle = self.manager.load_model(model_id).await?;

        let mut span = self.tracker.start(model_id);
        let output = handle.runtime().generate(model_id, input, params).await?;
        span.set_token_counts(
            output.input_tokens.unwrap_or(0) as u64,
            output.output_tokens.unwrap_or(0) as u64,
        );
        span.finish();

        match serde_json::to_vec(&output) {
            Ok(bytes) => {
                self.cache
                    .set(model_id, OPERATION_GENERATE, input, &params_value, bytes)
                    .await;
            }
            Err(e) => {
                tracing::warn!(model_id = %model_id, error = %e, "Response not cacheable")
            }
        }

        Ok(InferenceOutcome {
            output,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ModelAdapter;
    use crate::adapters::testing::MockAdapter;
    use crate::cache::MemoryBackend;
    use crate::config::ManagerConfig;
    use crate::models::{ModelFormat, ModelInfo, ModelRegistry};
    use std::collections::HashMap;

    struct Fixture {
        engine: InferenceEngine,
        adapter: Arc<MockAdapter>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            models_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let adapter = Arc::new(MockAdapter::new("generated text"));
        let runtimes: HashMap<_, _> = [
            ModelFormat::Gguf,
            ModelFormat::SafeTensors,
            ModelFormat::Onnx,
        ]
        .into_iter()
        .map(|f| (f, adapter.clone() as Arc<dyn ModelAdapter>))
        .collect();

        let manager = Arc::new(ModelManager::with_runtimes(
            &config,
            Arc::new(ModelRegistry::new()),
            runtimes,
        ));

        let cache = Arc::new(ResponseCache::with_backend(
            Arc::new(MemoryBackend::new(16, None)),
            None,
            true,
        ));

        let engine = InferenceEngine::new(manager, cache, PerformanceTracker::new(true));
        Fixture {
            engine,
            adapter,
            _dir: dir,
        }
    }

    async fn register_gguf(engine: &InferenceEngine, dir: &std::path::Path, id: &str) {
        let path = dir.join(format!("{id}.gguf"));
        std::fs::write(&path, b"GGUF\x03\x00\x00\x00payload").unwrap();
        engine
            .manager()
            .register_model(ModelInfo::new(id, ModelFormat::Gguf, path))
            .await;
    }

    #[tokio::test]
    async fn test_second_call_is_cached() {
        let fx = fixture();
        register_gguf(&fx.engine, fx._dir.path(), "m1").await;
        let params = GenerateParams::default();

        let first = fx.engine.generate("m1", "hello", &params).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.output.text, "generated text");

        let second = fx.engine.generate("m1", "hello", &params).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.output, first.output);

        // The adapter only ran once
        assert_eq!(fx.adapter.calls(), 1);
    }

    #[tokio::test]
    async fn test_distinct_inputs_bypass_cache() {
        let fx = fixture();
        register_gguf(&fx.engine, fx._dir.path(), "m1").await;
        let params = GenerateParams::default();

        fx.engine.generate("m1", "one", &params).await.unwrap();
        fx.engine.generate("m1", "two", &params).await.unwrap();
        assert_eq!(fx.adapter.calls(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_model_is_not_found() {
        let fx = fixture();
        let err = fx
            .engine
            .generate("missing", "hi", &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cached_call_skips_perf_recording() {
        let fx = fixture();
        register_gguf(&fx.engine, fx._dir.path(), "m1").await;
        let params = GenerateParams::default();

        fx.engine.generate("m1", "hello", &params).await.unwrap();
        fx.engine.generate("m1", "hello", &params).await.unwrap();

        // One record: the cache hit never reached an adapter
        assert_eq!(fx.engine.tracker().report("m1").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_generate_loads_model_on_demand() {
        let fx = fixture();
        register_gguf(&fx.engine, fx._dir.path(), "m1").await;

        assert!(!fx.engine.manager().is_loaded("m1").await);
        fx.engine
            .generate("m1", "hi", &GenerateParams::default())
            .await
            .unwrap();
        assert!(fx.engine.manager().is_loaded("m1").await);
    }
}
