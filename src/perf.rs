//! Inference performance tracking
//!
//! A scoped span wraps each inference call; the caller marks first-token
//! time and token counts, and the record is appended when the span finishes
//! (or is dropped, so records are never lost silently). Aggregation produces
//! per-model mean/percentile latency and throughput. System-level CPU and
//! memory are sampled independently of any inference call.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::metrics;

/// Timing of one inference call
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRecord {
    pub total: Duration,
    /// Only present for callers that observe streaming output
    pub time_to_first_token: Option<Duration>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-model aggregate over all records since the last reset
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub model_id: String,
    pub count: usize,
    pub mean_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    /// Mean over the records that carry a first-token time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_time_to_first_token_ms: Option<f64>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Output tokens per wall-clock second of inference
    pub tokens_per_second: f64,
}

#[derive(Default)]
struct Inner {
    records: Mutex<HashMap<String, Vec<PerformanceRecord>>>,
}

/// Records and aggregates inference timings
///
/// Cloning is cheap and shares the record store. A disabled tracker exposes
/// the same interface and records nothing.
#[derive(Clone, Default)]
pub struct PerformanceTracker {
    inner: Option<Arc<Inner>>,
}

impl PerformanceTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: enabled.then(|| Arc::new(Inner::default())),
        }
    }

    /// No-op tracker with the same interface
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Open a span around one inference call
    pub fn start(&self, model_id: impl Into<String>) -> InferenceSpan {
        InferenceSpan {
            inner: self.inner.clone(),
            model_id: model_id.into(),
            started: Instant::now(),
            first_token: None,
            input_tokens: 0,
            output_tokens: 0,
            finished: false,
        }
    }

    /// Append an externally timed record
    pub fn record(&self, model_id: &str, record: PerformanceRecord) {
        let Some(inner) = &self.inner else {
            return;
        };
        metrics::record_inference(model_id, record.total);
        let mut records = inner.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .entry(model_id.to_string())
            .or_default()
            .push(record);
    }

    /// Aggregate all records for a model since the last reset
    ///
    /// Returns None when nothing has been recorded (or tracking is off).
    pub fn report(&self, model_id: &str) -> Option<PerformanceReport> {
        let inner = self.inner.as_ref()?;
        let records = inner.records.lock().unwrap_or_else(|e| e.into_inner());
        let records = records.get(model_id)?;
        if records.is_empty() {
            return None;
        }

        let total_secs: f64 = records.iter().map(|r| r.total.as_secs_f64()).sum();
        let mean_latency_ms = total_secs * 1000.0 / records.len() as f64;

        // Microsecond resolution up to an hour covers any sane inference call
        let mut histogram = Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3)
            .expect("static bounds are valid");
        for record in records {
            let micros = (record.total.as_micros() as u64).max(1);
            histogram.saturating_record(micros);
        }

        let ttft: Vec<f64> = records
            .iter()
            .filter_map(|r| r.time_to_first_token)
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        let mean_time_to_first_token_ms = if ttft.is_empty() {
            None
        } else {
            Some(ttft.iter().sum::<f64>() / ttft.len() as f64)
        };

        let total_input_tokens: u64 = records.iter().map(|r| r.input_tokens).sum();
        let total_output_tokens: u64 = records.iter().map(|r| r.output_tokens).sum();
        let tokens_per_second = if total_secs > 0.0 {
            total_output_tokens as f64 / total_secs
        } else {
            0.0
        };

        Some(PerformanceReport {
            model_id: model_id.to_string(),
            count: records.len(),
            mean_latency_ms,
            p50_latency_ms: histogram.value_at_quantile(0.50) as f64 / 1000.0,
            p95_latency_ms: histogram.value_at_quantile(0.95) as f64 / 1000.0,
            mean_time_to_first_token_ms,
            total_input_tokens,
            total_output_tokens,
            tokens_per_second,
        })
    }

    /// Drop all records for a model
    pub fn reset(&self, model_id: &str) {
        if let Some(inner) = &self.inner {
            let mut records = inner.records.lock().unwrap_or_else(|e| e.into_inner());
            records.remove(model_id);
        }
    }

    /// Model ids with at least one record, sorted
    pub fn tracked_models(&self) -> Vec<String> {
        let Some(inner) = &self.inner else {
            return Vec::new();
        };
        let records = inner.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = records
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// Scoped recorder around one inference call
///
/// The record is appended on `finish()`; dropping an unfinished span records
/// it too, so early returns cannot lose a measurement.
pub struct InferenceSpan {
    inner: Option<Arc<Inner>>,
    model_id: String,
    started: Instant,
    first_token: Option<Duration>,
    input_tokens: u64,
    output_tokens: u64,
    finished: bool,
}

impl InferenceSpan {
    /// Mark the moment the first token arrived; later calls are ignored
    pub fn mark_first_token(&mut self) {
        if self.first_token.is_none() {
            self.first_token = Some(self.started.elapsed());
        }
    }

    pub fn set_token_counts(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
    }

    /// Close the span and append its record
    pub fn finish(mut self) {
        self.record_now();
    }

    fn record_now(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let Some(inner) = &self.inner else {
            return;
        };

        let record = PerformanceRecord {
            total: self.started.elapsed(),
            time_to_first_token: self.first_token,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        };
        metrics::record_inference(&self.model_id, record.total);

        let mut records = inner.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .entry(self.model_id.clone())
            .or_default()
            .push(record);
    }
}

impl Drop for InferenceSpan {
    fn drop(&mut self) {
        self.record_now();
    }
}

/// Point-in-time system resource usage
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

/// Samples host CPU and memory independently of inference calls
pub struct SystemSampler {
    sys: Mutex<sysinfo::System>,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(sysinfo::System::new()),
        }
    }

    /// Take one sample. CPU usage needs two samples to be meaningful; the
    /// first reading after construction reports 0.
    pub fn sample(&self) -> SystemMetrics {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        sys.refresh_cpu_usage();

        let sample = SystemMetrics {
            cpu_percent: sys.global_cpu_usage(),
            memory_used_bytes: sys.used_memory(),
            memory_total_bytes: sys.total_memory(),
        };
        metrics::update_system_gauges(sample.cpu_percent, sample.memory_used_bytes);
        sample
    }

    /// Sample on an interval until the returned handle is aborted
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let sample = self.sample();
                tracing::trace!(
                    cpu_percent = sample.cpu_percent,
                    memory_used = sample.memory_used_bytes,
                    "System sample"
                );
            }
        })
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}
