//! forkpipe core library.
//!
//! A deterministic, single-threaded simulation of `fork`/`exit`/`wait` and
//! `pipe`/`read`/`write`/`close`, built entirely from in-memory tables.

pub mod demo;
pub mod descriptor;
pub mod engine;
pub mod exit_codes;
pub mod logging;
pub mod pipe;
pub mod process;
pub mod ring;
pub mod script;
pub mod status;
pub mod sys;

pub use descriptor::{Descriptor, EndpointKind};
pub use engine::{Engine, Forked, PipeEnds, Reaped};
pub use exit_codes::ExitCode;
pub use pipe::{PipeChannel, ReadOutcome};
pub use process::{ProcessState, SimulatedProcess};
pub use status::SimulationStatus;

pub use forkpipe_common::{ChannelId, Fd, Pid, SimError};
pub use forkpipe_config::{ForkMode, SimConfig};
