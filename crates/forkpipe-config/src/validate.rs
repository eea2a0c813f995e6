//! Configuration validation errors and semantic validation.

use crate::sim::SimConfig;
use thiserror::Error;

/// Largest accepted per-channel buffer.
pub const MAX_PIPE_BUFFER_SIZE: usize = 1 << 20;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

fn invalid(field: &str, message: String) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message,
    }
}

/// Validate engine limits semantically.
pub fn validate_config(config: &SimConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    // The root process occupies a row from construction on.
    if config.max_processes == 0 {
        return Err(invalid(
            "max_processes",
            "Must be at least 1 (the root process)".to_string(),
        ));
    }

    if config.max_pipes == 0 {
        return Err(invalid("max_pipes", "Must be at least 1".to_string()));
    }

    if config.pipe_buffer_size == 0 || config.pipe_buffer_size > MAX_PIPE_BUFFER_SIZE {
        return Err(invalid(
            "pipe_buffer_size",
            format!(
                "Must be in [1, {}], got {}",
                MAX_PIPE_BUFFER_SIZE, config.pipe_buffer_size
            ),
        ));
    }

    if config.max_descriptors < 2 {
        return Err(invalid(
            "max_descriptors",
            format!("Must be at least 2 (one pipe), got {}", config.max_descriptors),
        ));
    }

    let last_handle = u64::from(config.first_descriptor) + config.max_descriptors as u64;
    if last_handle > i32::MAX as u64 {
        return Err(invalid(
            "max_descriptors",
            "Handles must stay representable as positive i32".to_string(),
        ));
    }

    if config.pid_max > i32::MAX as u32 {
        return Err(invalid(
            "pid_max",
            "Pids must stay representable as positive i32".to_string(),
        ));
    }

    // Pids 0 and 1 are reserved; the rest must cover every row.
    if (config.pid_max as u64) < config.max_processes as u64 + 2 {
        return Err(invalid(
            "pid_max",
            format!(
                "Must be at least max_processes + 2 ({}), got {}",
                config.max_processes + 2,
                config.pid_max
            ),
        ));
    }

    Ok(())
}
