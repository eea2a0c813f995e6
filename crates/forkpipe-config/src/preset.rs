//! Configuration presets for common experiments.
//!
//! - Classic: 20 pipes of 1024 bytes, 64 processes
//! - Tiny: tight limits that make exhaustion and short writes easy to hit
//! - Roomy: generous limits for long scripted runs

use crate::sim::{ForkMode, SimConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Available configuration presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetName {
    /// 20 pipes of 1024 bytes, 64 processes
    Classic,
    /// 2 pipes of 16 bytes, 4 processes
    Tiny,
    /// 256 pipes of 64 KiB, 1024 processes
    Roomy,
}

impl PresetName {
    /// All available preset names.
    pub const ALL: &'static [PresetName] =
        &[PresetName::Classic, PresetName::Tiny, PresetName::Roomy];

    /// Get preset name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetName::Classic => "classic",
            PresetName::Tiny => "tiny",
            PresetName::Roomy => "roomy",
        }
    }

    /// Parse preset name from string.
    pub fn parse(s: &str) -> Option<PresetName> {
        match s.to_lowercase().as_str() {
            "classic" | "default" => Some(PresetName::Classic),
            "tiny" | "small" | "tight" => Some(PresetName::Tiny),
            "roomy" | "large" => Some(PresetName::Roomy),
            _ => None,
        }
    }

    /// Get a description of the preset.
    pub fn description(&self) -> &'static str {
        match self {
            PresetName::Classic => "Classic limits: 20 pipes x 1024 bytes, 64 processes",
            PresetName::Tiny => "Tight limits for exercising exhaustion and partial writes",
            PresetName::Roomy => "Generous limits for long scripted runs",
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PresetName {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetName::parse(s).ok_or_else(|| PresetError::UnknownPreset(s.to_string()))
    }
}

/// Errors related to preset operations.
#[derive(Debug, Clone, Error)]
pub enum PresetError {
    #[error("unknown preset '{0}' (expected one of: classic, tiny, roomy)")]
    UnknownPreset(String),
}

/// Summary of a preset for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetInfo {
    pub name: PresetName,
    pub description: String,
}

/// Build the config for a preset.
pub fn get_preset(name: PresetName) -> SimConfig {
    match name {
        PresetName::Classic => SimConfig::default(),
        PresetName::Tiny => SimConfig::default()
            .with_max_processes(4)
            .with_max_pipes(2)
            .with_pipe_buffer_size(16)
            .with_fork_mode(ForkMode::Parent),
        PresetName::Roomy => SimConfig::default()
            .with_max_processes(1024)
            .with_max_pipes(256)
            .with_pipe_buffer_size(64 * 1024),
    }
}

/// List all presets with descriptions.
pub fn list_presets() -> Vec<PresetInfo> {
    PresetName::ALL
        .iter()
        .map(|name| PresetInfo {
            name: *name,
            description: name.description().to_string(),
        })
        .collect()
}
