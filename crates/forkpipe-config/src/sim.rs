//! Engine limits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of simultaneously live pipe channels.
pub const DEFAULT_MAX_PIPES: usize = 20;

/// Bytes each channel can buffer.
pub const DEFAULT_PIPE_BUFFER_SIZE: usize = 1024;

/// Process table rows, root included.
pub const DEFAULT_MAX_PROCESSES: usize = 64;

/// Lowest descriptor handle handed out; 0-2 stay reserved for stdio.
pub const DEFAULT_FIRST_DESCRIPTOR: u32 = 3;

/// Pid allocation wraps back to 2 once it reaches this value.
pub const DEFAULT_PID_MAX: u32 = 32768;

/// Which branch a `fork()` call reports to its caller.
///
/// The engine runs on one thread of control, so a fork returns exactly once.
/// This picks which of the two branches that single return represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkMode {
    /// Return the child's pid; the current context stays on the parent.
    #[default]
    Parent,
    /// Return 0 and move the current context onto the new child.
    Child,
}

impl ForkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForkMode::Parent => "parent",
            ForkMode::Child => "child",
        }
    }

    pub fn parse(s: &str) -> Option<ForkMode> {
        match s.to_lowercase().as_str() {
            "parent" => Some(ForkMode::Parent),
            "child" => Some(ForkMode::Child),
            _ => None,
        }
    }
}

impl fmt::Display for ForkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capacities and policies for one simulation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Schema version of the file this config was loaded from.
    pub schema_version: String,

    /// Maximum live process rows (RUNNING or ZOMBIE), root included.
    pub max_processes: usize,

    /// Maximum simultaneously live pipe channels.
    pub max_pipes: usize,

    /// Capacity in bytes of each channel's ring buffer.
    pub pipe_buffer_size: usize,

    /// Maximum simultaneously open descriptors.
    pub max_descriptors: usize,

    /// Lowest handle the descriptor table allocates.
    pub first_descriptor: u32,

    /// Upper bound (exclusive) of the pid space.
    pub pid_max: u32,

    /// Branch reported by `fork()` unless overridden per call.
    pub fork_mode: ForkMode,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            max_processes: DEFAULT_MAX_PROCESSES,
            max_pipes: DEFAULT_MAX_PIPES,
            pipe_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
            max_descriptors: DEFAULT_MAX_PIPES * 2,
            first_descriptor: DEFAULT_FIRST_DESCRIPTOR,
            pid_max: DEFAULT_PID_MAX,
            fork_mode: ForkMode::Parent,
        }
    }
}

impl SimConfig {
    /// Load a config file without validating it.
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::validate::ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::validate::ValidationError::IoError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::parse_json(&content)
    }

    /// Parse a config from a JSON string.
    pub fn parse_json(json: &str) -> Result<Self, crate::validate::ValidationError> {
        serde_json::from_str(json).map_err(|e| {
            crate::validate::ValidationError::ParseError(format!("Invalid JSON: {}", e))
        })
    }

    pub fn with_max_processes(mut self, n: usize) -> Self {
        self.max_processes = n;
        self
    }

    /// Set the channel cap; descriptors follow at two per channel.
    pub fn with_max_pipes(mut self, n: usize) -> Self {
        self.max_pipes = n;
        self.max_descriptors = n.saturating_mul(2);
        self
    }

    pub fn with_pipe_buffer_size(mut self, n: usize) -> Self {
        self.pipe_buffer_size = n;
        self
    }

    pub fn with_max_descriptors(mut self, n: usize) -> Self {
        self.max_descriptors = n;
        self
    }

    pub fn with_fork_mode(mut self, mode: ForkMode) -> Self {
        self.fork_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_classic_limits() {
        let config = SimConfig::default();
        assert_eq!(config.max_pipes, 20);
        assert_eq!(config.pipe_buffer_size, 1024);
        assert_eq!(config.max_descriptors, 40);
        assert_eq!(config.first_descriptor, 3);
        assert_eq!(config.fork_mode, ForkMode::Parent);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = SimConfig::parse_json(r#"{"max_pipes": 2, "fork_mode": "child"}"#).unwrap();
        assert_eq!(config.max_pipes, 2);
        assert_eq!(config.fork_mode, ForkMode::Child);
        assert_eq!(config.pipe_buffer_size, DEFAULT_PIPE_BUFFER_SIZE);
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        assert!(SimConfig::parse_json("{not json").is_err());
        assert!(SimConfig::parse_json(r#"{"fork_mode": "sideways"}"#).is_err());
    }

    #[test]
    fn test_builder_keeps_descriptors_paired() {
        let config = SimConfig::default().with_max_pipes(3);
        assert_eq!(config.max_descriptors, 6);
    }

    #[test]
    fn test_fork_mode_parse() {
        assert_eq!(ForkMode::parse("CHILD"), Some(ForkMode::Child));
        assert_eq!(ForkMode::parse("parent"), Some(ForkMode::Parent));
        assert_eq!(ForkMode::parse("both"), None);
        assert_eq!(ForkMode::Child.to_string(), "child");
    }
}
