//! Main configuration structures

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::params::*;
use crate::core::CameraRig;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Failed to serialize TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Complete fusion configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Volumetric integration
    pub reconstruction: ReconstructionParams,
    /// Head-relative camera placement and default intrinsics
    pub rig: CameraRig,
    /// Mesh clean-up
    pub post_processing: PostProcessingParams,
    /// Output files
    pub export: ExportParams,
}

impl FusionConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.reconstruction;
        if !(r.voxel_size.is_finite() && r.voxel_size > 0.0) {
            return Err(ConfigError::invalid(
                "reconstruction.voxel_size",
                format!("must be positive, got {}", r.voxel_size),
            ));
        }
        if !(r.trunc_voxel_multiplier.is_finite() && r.trunc_voxel_multiplier > 0.0) {
            return Err(ConfigError::invalid(
                "reconstruction.trunc_voxel_multiplier",
                "must be positive",
            ));
        }
        if !(r.depth_max > 0.0) {
            return Err(ConfigError::invalid("reconstruction.depth_max", "must be positive"));
        }
        if r.block_resolution == 0 {
            return Err(ConfigError::invalid("reconstruction.block_resolution", "must be at least 1"));
        }
        if r.block_count == 0 {
            return Err(ConfigError::invalid("reconstruction.block_count", "must be at least 1"));
        }
        if r.frame_interval == 0 {
            return Err(ConfigError::invalid("reconstruction.frame_interval", "must be at least 1"));
        }
        if r.activation_stride == 0 {
            return Err(ConfigError::invalid("reconstruction.activation_stride", "must be at least 1"));
        }
        if !(r.observation_weight > 0.0) || r.max_weight < r.observation_weight {
            return Err(ConfigError::invalid(
                "reconstruction.max_weight",
                "observation_weight must be positive and not exceed max_weight",
            ));
        }
        if !(0.0..=1.0).contains(&r.confidence_threshold) {
            return Err(ConfigError::invalid(
                "reconstruction.confidence_threshold",
                "must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Configuration loader supporting YAML and TOML
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file, choosing the format by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<FusionConfig, ConfigError> {
        let path = path.as_ref();
        let extension = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match extension.to_lowercase().as_str() {
            "yaml" | "yml" => Self::load_yaml(path),
            "toml" => Self::load_toml(path),
            _ => Err(ConfigError::UnsupportedFormat(extension.to_string())),
        }
    }

    /// Load configuration from YAML file
    pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<FusionConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FusionConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<FusionConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FusionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn save_yaml<P: AsRef<Path>>(config: &FusionConfig, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(config)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_toml<P: AsRef<Path>>(config: &FusionConfig, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string(config)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Set one value by dotted key, e.g. `post_processing.smoothing_iterations=0`.
    ///
    /// The value is parsed as YAML, so numbers, booleans and enum names work
    /// unquoted.
    pub fn apply_override(config: &mut FusionConfig, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut root = serde_yaml::to_value(&*config)?;
        let parsed: serde_yaml::Value = serde_yaml::from_str(value)?;

        let mut node = &mut root;
        for part in key.split('.') {
            node = match node {
                serde_yaml::Value::Mapping(map) => map
                    .get_mut(part)
                    .ok_or_else(|| ConfigError::invalid(key, "unknown key"))?,
                _ => return Err(ConfigError::invalid(key, "unknown key")),
            };
        }
        *node = parsed;

        *config = serde_yaml::from_value(root)?;
        Ok(())
    }
}
