//! Forkpipe configuration loading and validation.
//!
//! This crate provides:
//! - Typed engine limits (`SimConfig`) with the classic defaults
//! - Named presets for common experiments
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation
//! - Config snapshots for status and demo reports

pub mod preset;
pub mod resolve;
pub mod sim;
pub mod snapshot;
pub mod validate;

pub use preset::{get_preset, list_presets, PresetError, PresetInfo, PresetName};
pub use resolve::{
    load_config, resolve_config_path, ConfigError, ConfigOptions, ConfigSource, LoadedConfig,
};
pub use sim::{ForkMode, SimConfig};
pub use snapshot::ConfigSnapshot;
pub use validate::{validate_config, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
