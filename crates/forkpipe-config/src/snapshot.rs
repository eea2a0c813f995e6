//! Configuration snapshots for status and demo reports.
//!
//! A snapshot records which limits an engine ran with and where they came
//! from, so a printed report can be tied back to its configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resolve::LoadedConfig;
use crate::sim::ForkMode;

/// A frozen snapshot of configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// Schema version of the configuration.
    pub schema_version: String,

    /// Human-readable source ("builtin default", "preset tiny", ...).
    pub source: String,

    /// Path the config was loaded from.
    #[serde(default)]
    pub path: Option<String>,

    /// SHA-256 hash of the config file content.
    #[serde(default)]
    pub hash: Option<String>,

    /// Key limits for quick reference.
    pub summary: ConfigSummary,
}

/// Summary of the limits that shape engine behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub max_processes: usize,
    pub max_pipes: usize,
    pub pipe_buffer_size: usize,
    pub max_descriptors: usize,
    pub fork_mode: ForkMode,
}

impl ConfigSnapshot {
    /// Capture a snapshot of a loaded configuration.
    pub fn capture(loaded: &LoadedConfig) -> Self {
        let config = &loaded.config;
        ConfigSnapshot {
            timestamp: Utc::now(),
            schema_version: config.schema_version.clone(),
            source: loaded.source.to_string(),
            path: loaded.path.as_ref().map(|p| p.display().to_string()),
            hash: loaded.hash.clone(),
            summary: ConfigSummary {
                max_processes: config.max_processes,
                max_pipes: config.max_pipes,
                pipe_buffer_size: config.pipe_buffer_size,
                max_descriptors: config.max_descriptors,
                fork_mode: config.fork_mode,
            },
        }
    }
}
