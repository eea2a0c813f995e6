//! Configuration resolution and loading.
//!
//! Resolution order: preset → CLI path → environment → XDG → defaults.

use crate::preset::{get_preset, PresetName};
use crate::sim::SimConfig;
use crate::validate::{validate_config, ValidationError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming a config file directly.
pub const ENV_CONFIG_PATH: &str = "FORKPIPE_CONFIG";

/// Environment variable naming a directory holding `forkpipe.json`.
pub const ENV_CONFIG_DIR: &str = "FORKPIPE_CONFIG_DIR";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "forkpipe.json";

/// Application name for XDG directories.
const APP_NAME: &str = "forkpipe";

/// Where the effective configuration came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// A named preset selected on the command line.
    Preset(PresetName),

    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Preset(name) => write!(f, "preset {}", name),
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

/// Configuration resolution options.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config file path (must exist when given).
    pub path: Option<PathBuf>,
    /// Named preset; bypasses file discovery.
    pub preset: Option<PresetName>,
}

/// Validated configuration with provenance information.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SimConfig,
    pub source: ConfigSource,
    /// Path to the file (None for presets and defaults).
    pub path: Option<PathBuf>,
    /// SHA-256 hash of the file content (None for presets and defaults).
    pub hash: Option<String>,
}

/// Resolve the config file path without reading it.
///
/// Resolution order:
/// 1. Explicit CLI path (returned even if missing, so loading can report it)
/// 2. `FORKPIPE_CONFIG` (direct path)
/// 3. `FORKPIPE_CONFIG_DIR` + `forkpipe.json`
/// 4. XDG config directory (`~/.config/forkpipe/forkpipe.json`)
/// 5. Built-in defaults (None)
pub fn resolve_config_path(cli_path: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = cli_path {
        return (Some(path.to_path_buf()), ConfigSource::CliArgument);
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Some(xdg_config) = dirs::config_dir() {
        let path = xdg_config.join(APP_NAME).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::XdgConfig);
        }
    }

    (None, ConfigSource::BuiltinDefault)
}

/// Load and validate configuration with the standard resolution order.
pub fn load_config(options: &ConfigOptions) -> Result<LoadedConfig, ConfigError> {
    if let Some(preset) = options.preset {
        let config = get_preset(preset);
        validate_config(&config)?;
        return Ok(LoadedConfig {
            config,
            source: ConfigSource::Preset(preset),
            path: None,
            hash: None,
        });
    }

    let (path, source) = resolve_config_path(options.path.as_deref());
    let Some(path) = path else {
        return Ok(LoadedConfig {
            config: SimConfig::default(),
            source,
            path: None,
            hash: None,
        });
    };

    let (config, hash) = load_config_file(&path)?;
    validate_config(&config)?;

    Ok(LoadedConfig {
        config,
        source,
        path: Some(path),
        hash: Some(hash),
    })
}

/// Read and parse a config file, returning it with its content hash.
pub fn load_config_file(path: &Path) -> Result<(SimConfig, String), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let hash = compute_hash(&content);

    let config: SimConfig =
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok((config, hash))
}

/// Compute SHA-256 hash of content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Get the XDG config directory for forkpipe.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::CliArgument), "CLI argument");
        assert_eq!(
            format!("{}", ConfigSource::Environment),
            "environment variable"
        );
        assert_eq!(
            format!("{}", ConfigSource::Preset(PresetName::Tiny)),
            "preset tiny"
        );
        assert_eq!(
            format!("{}", ConfigSource::BuiltinDefault),
            "builtin default"
        );
    }

    #[test]
    fn test_compute_hash_is_stable() {
        let a = compute_hash("{}");
        assert_eq!(a.len(), 64);
        assert_eq!(a, compute_hash("{}"));
        assert_ne!(a, compute_hash("{ }"));
    }

    #[test]
    fn test_preset_bypasses_files() {
        let options = ConfigOptions {
            path: Some(PathBuf::from("/nonexistent/forkpipe.json")),
            preset: Some(PresetName::Tiny),
        };
        let loaded = load_config(&options).unwrap();
        assert_eq!(loaded.source, ConfigSource::Preset(PresetName::Tiny));
        assert_eq!(loaded.config.max_pipes, 2);
        assert!(loaded.hash.is_none());
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let options = ConfigOptions {
            path: Some(PathBuf::from("/nonexistent/forkpipe.json")),
            preset: None,
        };
        assert!(matches!(
            load_config(&options),
            Err(ConfigError::NotFound { .. })
        ));
    }
}
