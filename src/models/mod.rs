//! Model management
//!
//! Provides functionality for:
//! - Describing models (format, path, architecture metadata)
//! - Discovering artifacts in the models directory and hub cache
//! - Registering models and tracking loaded handles
//! - Validating artifacts per format before load

pub mod discovery;
pub mod info;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod registry;

pub use discovery::{hub_cache_dir, scan_hub_cache, scan_models_dir};
pub use info::{Device, ModelFormat, ModelInfo};
pub use loader::LoadedModel;
pub use manager::ModelManager;
pub use metadata::{ModelMetadata, estimate_parameters, parse_model_config};
pub use registry::ModelRegistry;
