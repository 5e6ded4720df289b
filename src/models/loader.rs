//! Format-specific model loading
//!
//! Loading here means validating the artifact and binding it to the runtime
//! adapter that serves its format; actual inference stays delegated to the
//! external runtime. Validation happens before a handle exists, so a corrupt
//! artifact fails the load without touching the registry.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::info::{Device, ModelFormat, ModelInfo};
use crate::adapters::ModelAdapter;
use crate::error::{Error, Result};

/// An in-memory handle to a loaded model
///
/// At most one handle exists per model id; concurrent loads of the same id
/// all receive clones of the same `Arc`.
pub struct LoadedModel {
    pub info: ModelInfo,
    pub device: Device,
    pub loaded_at: Instant,
    runtime: Arc<dyn ModelAdapter>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("info", &self.info)
            .field("device", &self.device)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    pub(crate) fn new(info: ModelInfo, device: Device, runtime: Arc<dyn ModelAdapter>) -> Self {
        Self {
            info,
            device,
            loaded_at: Instant::now(),
            runtime,
        }
    }

    /// The adapter executing inference for this model
    pub fn runtime(&self) -> &Arc<dyn ModelAdapter> {
        &self.runtime
    }
}

/// Validate a model artifact for its declared format
///
/// Error causes distinguish a missing artifact from a format mismatch so
/// callers can report which is which.
pub fn validate_artifact(info: &ModelInfo) -> Result<()> {
    if !info.path.exists() {
        return Err(Error::load(&info.id, "artifact missing on disk"));
    }

    match info.format {
        ModelFormat::Gguf => validate_gguf(&info.id, &info.path),
        ModelFormat::SafeTensors => validate_safetensors(&info.id, &info.path),
        ModelFormat::Onnx => validate_onnx(&info.id, &info.path),
    }
}

/// GGUF files start with the ASCII magic "GGUF"
fn validate_gguf(model_id: &str, path: &Path) -> Result<()> {
    let bytes = read_prefix(model_id, path, 4)?;
    if bytes.len() < 4 || &bytes[..4] != b"GGUF" {
        return Err(Error::load(model_id, "not a GGUF file (bad magic)"));
    }
    Ok(())
}

/// Safetensors files open with a little-endian u64 header length that must
/// fit inside the file
fn validate_safetensors(model_id: &str, path: &Path) -> Result<()> {
    // Directory layout: config.json plus at least one shard
    let shard = if path.is_dir() {
        if !path.join("config.json").exists() {
            return Err(Error::load(model_id, "model directory has no config.json"));
        }
        find_safetensors_shard(path)
            .ok_or_else(|| Error::load(model_id, "model directory has no safetensors shard"))?
    } else {
        path.to_path_buf()
    };

    let file_len = std::fs::metadata(&shard)
        .map_err(|e| Error::load(model_id, format!("cannot stat weights: {e}")))?
        .len();
    let bytes = read_prefix(model_id, &shard, 8)?;
    if bytes.len() < 8 {
        return Err(Error::load(model_id, "safetensors file truncated"));
    }

    let mut header = [0u8; 8];
    header.copy_from_slice(&bytes[..8]);
    let header_len = u64::from_le_bytes(header);
    if header_len == 0 || header_len.saturating_add(8) > file_len {
        return Err(Error::load(
            model_id,
            "safetensors header length inconsistent with file size",
        ));
    }
    Ok(())
}

fn validate_onnx(model_id: &str, path: &Path) -> Result<()> {
    let len = std::fs::metadata(path)
        .map_err(|e| Error::load(model_id, format!("cannot stat artifact: {e}")))?
        .len();
    if len == 0 {
        return Err(Error::load(model_id, "ONNX file is empty"));
    }
    Ok(())
}

fn find_safetensors_shard(dir: &Path) -> Option<std::path::PathBuf> {
    let mut shards: Vec<_> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("safetensors"))
        .collect();
    shards.sort();
    shards.into_iter().next()
}

fn read_prefix(model_id: &str, path: &Path, n: usize) -> Result<Vec<u8>> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)
        .map_err(|e| Error::load(model_id, format!("cannot open artifact: {e}")))?;
    let mut buf = vec![0u8; n];
    let mut read = 0;
    while read < n {
        match file.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(count) => read += count,
            Err(e) => return Err(Error::load(model_id, format!("cannot read artifact: {e}"))),
        }
    }
    buf.truncate(read);
    Ok(buf)
}
