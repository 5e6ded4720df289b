//! Model metadata parsing
//!
//! Extracts architecture details from a model directory's config.json, the
//! way transformer checkpoints describe themselves.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Architecture metadata extracted from config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelMetadata {
    /// Architecture family (e.g. "llama", "gpt2", "mistral")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u32>,

    /// Maximum context length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_embeddings: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocab_size: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_hidden_layers: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_attention_heads: Option<u32>,
}

/// Raw config.json structure (partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    model_type: Option<String>,
    hidden_size: Option<u32>,
    max_position_embeddings: Option<u32>,
    vocab_size: Option<u32>,
    num_hidden_layers: Option<u32>,
    num_attention_heads: Option<u32>,
    // GPT-2 style checkpoints use different names
    n_embd: Option<u32>,
    n_positions: Option<u32>,
    n_layer: Option<u32>,
    n_head: Option<u32>,
}

/// Parse metadata from a model directory's config.json
///
/// Returns None if config.json is absent or unparseable; a model without
/// self-description is still loadable.
pub fn parse_model_config(model_dir: &Path) -> Option<ModelMetadata> {
    let config_path = model_dir.join("config.json");

    if !config_path.exists() {
        return None;
    }

    let content = std::fs::read_to_string(&config_path).ok()?;
    let raw: RawConfig = serde_json::from_str(&content).ok()?;

    Some(ModelMetadata {
        architecture: raw.model_type,
        hidden_size: raw.hidden_size.or(raw.n_embd),
        max_position_embeddings: raw.max_position_embeddings.or(raw.n_positions),
        vocab_size: raw.vocab_size,
        num_hidden_layers: raw.num_hidden_layers.or(raw.n_layer),
        num_attention_heads: raw.num_attention_heads.or(raw.n_head),
    })
}

/// Rough parameter-count estimate from architecture metadata
///
/// Embedding table plus 12·hidden² per transformer layer; close enough for
/// sizing decisions, not for model cards.
pub fn estimate_parameters(metadata: &ModelMetadata) -> Option<u64> {
    let hidden = metadata.hidden_size? as u64;
    let layers = metadata.num_hidden_layers? as u64;
    let vocab = metadata.vocab_size? as u64;

    let embedding_params = vocab * hidden;
    let layer_params = layers * 12 * hidden * hidden;

    Some(embedding_params + layer_params)
}
