//! Forkpipe common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the forkpipe crates:
//! - Identifier newtypes for simulated processes, descriptors, and channels
//! - The engine error taxonomy with stable negative codes
//! - Output format specifications

pub mod error;
pub mod id;
pub mod output;

pub use error::{format_error_human, ErrorKind, Resource, Result, SimError, StructuredError};
pub use id::{ChannelId, Fd, Pid};
pub use output::OutputFormat;
