//! Read-only status snapshot of an engine.

use crate::descriptor::Descriptor;
use crate::engine::Engine;
use crate::process::SimulatedProcess;
use forkpipe_common::{ChannelId, Pid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One live channel as seen by the status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRow {
    pub id: ChannelId,
    pub buffered: usize,
    pub capacity: usize,
    pub read_open: bool,
    pub write_open: bool,
}

/// Configured capacities, repeated so the snapshot stands alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLimits {
    pub max_processes: usize,
    pub max_pipes: usize,
    pub pipe_buffer_size: usize,
    pub max_descriptors: usize,
}

/// Every table of an engine at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStatus {
    pub current: Pid,
    pub processes: Vec<SimulatedProcess>,
    pub channels: Vec<ChannelRow>,
    pub descriptors: Vec<Descriptor>,
    pub limits: StatusLimits,
}

impl SimulationStatus {
    pub fn capture(engine: &Engine) -> Self {
        let config = engine.config();
        SimulationStatus {
            current: engine.current_pid(),
            processes: engine.processes().cloned().collect(),
            channels: engine
                .channels()
                .map(|c| ChannelRow {
                    id: c.id(),
                    buffered: c.buffered(),
                    capacity: c.capacity(),
                    read_open: c.is_read_open(),
                    write_open: c.is_write_open(),
                })
                .collect(),
            descriptors: engine.descriptors().copied().collect(),
            limits: StatusLimits {
                max_processes: config.max_processes,
                max_pipes: config.max_pipes,
                pipe_buffer_size: config.pipe_buffer_size,
                max_descriptors: config.max_descriptors,
            },
        }
    }
}

fn open_flag(open: bool) -> &'static str {
    if open {
        "open"
    } else {
        "closed"
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== SIMULATION STATUS ===")?;
        writeln!(f, "Current context: pid {}", self.current)?;

        writeln!(
            f,
            "Processes ({}/{}):",
            self.processes.len(),
            self.limits.max_processes
        )?;
        writeln!(f, "  {:<7} {:<7} {:<8} EXIT", "PID", "PPID", "STATE")?;
        for p in &self.processes {
            let exit = p
                .exit_status
                .map_or_else(|| "-".to_string(), |s| s.to_string());
            writeln!(
                f,
                "  {:<7} {:<7} {:<8} {}",
                p.pid.0,
                p.parent.0,
                p.state.as_str(),
                exit
            )?;
        }

        writeln!(
            f,
            "Pipes ({}/{}):",
            self.channels.len(),
            self.limits.max_pipes
        )?;
        if self.channels.is_empty() {
            writeln!(f, "  (none)")?;
        } else {
            writeln!(f, "  {:<7} {:<12} {:<7} WRITE", "ID", "BUFFERED", "READ")?;
            for c in &self.channels {
                writeln!(
                    f,
                    "  {:<7} {:<12} {:<7} {}",
                    c.id.to_string(),
                    format!("{}/{}", c.buffered, c.capacity),
                    open_flag(c.read_open),
                    open_flag(c.write_open)
                )?;
            }
        }

        writeln!(
            f,
            "Descriptors ({}/{}):",
            self.descriptors.len(),
            self.limits.max_descriptors
        )?;
        if self.descriptors.is_empty() {
            writeln!(f, "  (none)")?;
        } else {
            writeln!(f, "  {:<7} {:<7} CHANNEL", "FD", "END")?;
            for d in &self.descriptors {
                writeln!(f, "  {:<7} {:<7} {}", d.fd.0, d.kind.as_str(), d.channel)?;
            }
        }
        Ok(())
    }
}
