//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to render metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a cache hit
pub fn record_cache_hit(backend: &str) {
    metrics::counter!("model_manager_cache_hits_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a cache miss
pub fn record_cache_miss(backend: &str) {
    metrics::counter!("model_manager_cache_misses_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a model load
pub fn record_model_loaded(model_id: &str) {
    metrics::counter!("model_manager_models_loaded_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a model unload
pub fn record_model_unloaded(model_id: &str) {
    metrics::counter!("model_manager_models_unloaded_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record one inference call and its latency
pub fn record_inference(model_id: &str, duration: Duration) {
    metrics::counter!("model_manager_inference_calls_total",
        "model" => model_id.to_string()
    )
    .increment(1);
    metrics::histogram!("model_manager_inference_duration_seconds",
        "model" => model_id.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a download task being issued
pub fn record_download_started() {
    metrics::counter!("model_manager_downloads_started_total").increment(1);
}

/// Record a download task reaching a terminal state
pub fn record_download_finished(outcome: &str) {
    metrics::counter!("model_manager_downloads_finished_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Update loaded model count gauge
pub fn update_loaded_count(count: usize) {
    metrics::gauge!("model_manager_models_loaded").set(count as f64);
}

/// Update registered model count gauge
pub fn update_registered_count(count: usize) {
    metrics::gauge!("model_manager_models_registered").set(count as f64);
}

/// Update system resource gauges
pub fn update_system_gauges(cpu_percent: f32, memory_used_bytes: u64) {
    metrics::gauge!("model_manager_system_cpu_percent").set(cpu_percent as f64);
    metrics::gauge!("model_manager_system_memory_used_bytes").set(memory_used_bytes as f64);
}
