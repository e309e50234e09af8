//! Configuration management
//!
//! YAML/TOML loading, defaults and validation for a fusion run.

pub mod config;
pub mod params;

pub use config::{ConfigError, ConfigLoader, FusionConfig};
pub use params::{ExportParams, PostProcessingParams, ReconstructionParams};
