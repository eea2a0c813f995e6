//! Error types for the simulation engine.
//!
//! Every engine failure is synchronous and non-fatal: the engine stays usable
//! after any error. Each variant carries a stable negative code so callers
//! that follow the integer convention of the simulated system calls can
//! branch on `< 0` exactly as they would on real OS calls.
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Bad Descriptor
//!   Reason: bad descriptor 7
//!   Fix: Only pass handles returned by pipe() that have not been closed.
//! ```
//!
//! # Agent-Facing Output
//!
//! ```json
//! {
//!   "code": -9,
//!   "kind": "bad_descriptor",
//!   "message": "bad descriptor 7",
//!   "recoverable": true,
//!   "context": { "fd": 7 }
//! }
//! ```

use crate::id::{Fd, Pid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Fixed-capacity table that ran out of room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Process table rows.
    Processes,
    /// Pipe registry channels.
    Pipes,
    /// Descriptor handles.
    Descriptors,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Processes => write!(f, "process table"),
            Resource::Pipes => write!(f, "pipe registry"),
            Resource::Descriptors => write!(f, "descriptor table"),
        }
    }
}

/// Error taxonomy, independent of the per-error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceExhausted,
    BadDescriptor,
    ClosedPipe,
    NoChild,
    NoSuchProcess,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ResourceExhausted => write!(f, "resource_exhausted"),
            ErrorKind::BadDescriptor => write!(f, "bad_descriptor"),
            ErrorKind::ClosedPipe => write!(f, "closed_pipe"),
            ErrorKind::NoChild => write!(f, "no_child"),
            ErrorKind::NoSuchProcess => write!(f, "no_such_process"),
        }
    }
}

/// Engine error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("{resource} exhausted (capacity {capacity})")]
    ResourceExhausted { resource: Resource, capacity: usize },

    #[error("bad descriptor {fd}")]
    BadDescriptor { fd: Fd },

    /// A negative handle, which can never name a descriptor.
    #[error("bad descriptor {raw}")]
    InvalidHandle { raw: i32 },

    #[error("write to descriptor {fd} with no reader left")]
    ClosedPipe { fd: Fd },

    #[error("process {pid} has no exited child to reap")]
    NoChild { pid: Pid },

    #[error("no running process {pid}")]
    NoSuchProcess { pid: Pid },

    /// A negative pid, which can never name a process.
    #[error("no running process {raw}")]
    InvalidPid { raw: i32 },
}

impl SimError {
    /// `RESOURCE_EXHAUSTED`, as `-EAGAIN`.
    pub const CODE_RESOURCE_EXHAUSTED: i32 = -11;
    /// `BAD_DESCRIPTOR`, as `-EBADF`.
    pub const CODE_BAD_DESCRIPTOR: i32 = -9;
    /// `CLOSED_PIPE`, as `-EPIPE`.
    pub const CODE_CLOSED_PIPE: i32 = -32;
    /// `NO_CHILD`, as `-ECHILD`.
    pub const CODE_NO_CHILD: i32 = -10;
    /// `NO_SUCH_PROCESS`, as `-ESRCH`.
    pub const CODE_NO_SUCH_PROCESS: i32 = -3;

    /// Returns the taxonomy entry for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            SimError::BadDescriptor { .. } | SimError::InvalidHandle { .. } => {
                ErrorKind::BadDescriptor
            }
            SimError::ClosedPipe { .. } => ErrorKind::ClosedPipe,
            SimError::NoChild { .. } => ErrorKind::NoChild,
            SimError::NoSuchProcess { .. } | SimError::InvalidPid { .. } => {
                ErrorKind::NoSuchProcess
            }
        }
    }

    /// Returns the stable negative code reported by the integer convention.
    pub fn code(&self) -> i32 {
        match self.kind() {
            ErrorKind::ResourceExhausted => Self::CODE_RESOURCE_EXHAUSTED,
            ErrorKind::BadDescriptor => Self::CODE_BAD_DESCRIPTOR,
            ErrorKind::ClosedPipe => Self::CODE_CLOSED_PIPE,
            ErrorKind::NoChild => Self::CODE_NO_CHILD,
            ErrorKind::NoSuchProcess => Self::CODE_NO_SUCH_PROCESS,
        }
    }

    /// Returns whether the same call can succeed later without caller bugs
    /// being fixed first.
    ///
    /// Exhaustion clears once something is closed or reaped, and a missing
    /// zombie child appears once a child exits. A stale descriptor, a pipe
    /// without readers, or a dead context never comes back.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SimError::ResourceExhausted { .. } => true,
            SimError::NoChild { .. } => true,
            SimError::BadDescriptor { .. } | SimError::InvalidHandle { .. } => false,
            SimError::ClosedPipe { .. } => false,
            SimError::NoSuchProcess { .. } | SimError::InvalidPid { .. } => false,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            SimError::ResourceExhausted { .. } => "Resource Exhausted",
            SimError::BadDescriptor { .. } | SimError::InvalidHandle { .. } => "Bad Descriptor",
            SimError::ClosedPipe { .. } => "Closed Pipe",
            SimError::NoChild { .. } => "No Child",
            SimError::NoSuchProcess { .. } | SimError::InvalidPid { .. } => "No Such Process",
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            SimError::ResourceExhausted { resource: Resource::Processes, .. } => {
                "Reap exited children with wait() or raise max_processes in the config."
            }
            SimError::ResourceExhausted { .. } => {
                "Close unused pipe endpoints or raise max_pipes/max_descriptors in the config."
            }
            SimError::BadDescriptor { .. } | SimError::InvalidHandle { .. } => {
                "Only pass handles returned by pipe() that have not been closed."
            }
            SimError::ClosedPipe { .. } => {
                "The read end is closed; nothing can consume these bytes. Close the write end."
            }
            SimError::NoChild { .. } => {
                "Call exit() in the child's context before waiting for it."
            }
            SimError::NoSuchProcess { .. } | SimError::InvalidPid { .. } => {
                "Switch to a running process; exited processes cannot act again."
            }
        }
    }
}

/// Structured error for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable negative code.
    pub code: i32,

    /// Taxonomy entry.
    pub kind: ErrorKind,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Additional structured context (fd, pid, resource).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&SimError> for StructuredError {
    fn from(err: &SimError) -> Self {
        let mut context = HashMap::new();

        match err {
            SimError::ResourceExhausted { resource, capacity } => {
                context.insert("resource".to_string(), serde_json::json!(resource));
                context.insert("capacity".to_string(), serde_json::json!(capacity));
            }
            SimError::BadDescriptor { fd } | SimError::ClosedPipe { fd } => {
                context.insert("fd".to_string(), serde_json::json!(fd));
            }
            SimError::InvalidHandle { raw } => {
                context.insert("fd".to_string(), serde_json::json!(raw));
            }
            SimError::NoChild { pid } | SimError::NoSuchProcess { pid } => {
                context.insert("pid".to_string(), serde_json::json!(pid));
            }
            SimError::InvalidPid { raw } => {
                context.insert("pid".to_string(), serde_json::json!(raw));
            }
        }

        StructuredError {
            code: err.code(),
            kind: err.kind(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
///
/// Output format:
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &SimError, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}
