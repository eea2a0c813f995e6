//! The simulation engine: one value owning every table.
//!
//! # Single-thread model
//!
//! Exactly one real thread of control drives the engine. Processes and pipes
//! are bookkeeping records, not running code. A `fork` call records a new
//! child row and returns once; which branch that return represents is chosen
//! by [`ForkMode`]. The caller then plays both branches itself, using
//! [`Engine::switch_context`] to act as the child, so the parent/child
//! distinction exists only in what the caller does with the return value.
//!
//! Nothing ever blocks. A read on an empty pipe reports [`ReadOutcome::Empty`]
//! instead of waiting, a write into a full pipe accepts what fits, and `wait`
//! with no exited child fails immediately.

use crate::descriptor::{Descriptor, DescriptorTable, EndpointKind};
use crate::logging::event_names;
use crate::pipe::{ChannelError, CloseEffect, PipeChannel, PipeRegistry, ReadOutcome};
use crate::process::{ProcessTable, SimulatedProcess};
use crate::status::SimulationStatus;
use forkpipe_common::{ChannelId, Fd, Pid, Resource, Result, SimError};
use forkpipe_config::{ForkMode, SimConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// What a single `fork` return represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "branch", rename_all = "lowercase")]
pub enum Forked {
    /// Parent branch; the context stayed on the caller.
    Parent { child: Pid },
    /// Child branch; the context moved onto the new child.
    Child,
}

impl Forked {
    /// Value the integer convention returns: the child pid, or 0.
    pub fn as_raw(&self) -> i32 {
        match self {
            Forked::Parent { child } => child.as_i32(),
            Forked::Child => 0,
        }
    }

    pub fn is_child(&self) -> bool {
        matches!(self, Forked::Child)
    }
}

/// A reaped child and the status it exited with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaped {
    pub pid: Pid,
    pub status: i32,
}

/// The two handles produced by `pipe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeEnds {
    pub read: Fd,
    pub write: Fd,
}

impl PipeEnds {
    /// `[read, write]`, the order the integer convention fills them in.
    pub fn as_array(&self) -> [Fd; 2] {
        [self.read, self.write]
    }
}

/// Deterministic fork/exit/wait and pipe/read/write/close simulator.
#[derive(Debug, Clone)]
pub struct Engine {
    config: SimConfig,
    processes: ProcessTable,
    pipes: PipeRegistry,
    descriptors: DescriptorTable,
    current: Pid,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(SimConfig::default())
    }
}

impl Engine {
    /// Build an engine with only the root process (pid 1) and no pipes.
    pub fn new(config: SimConfig) -> Self {
        let processes = ProcessTable::new(config.max_processes, config.pid_max);
        let pipes = PipeRegistry::new(config.max_pipes, config.pipe_buffer_size);
        let descriptors = DescriptorTable::new(config.first_descriptor, config.max_descriptors);
        Engine {
            config,
            processes,
            pipes,
            descriptors,
            current: Pid::ROOT,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Process that owns the next call.
    pub fn current_pid(&self) -> Pid {
        self.current
    }

    fn running_context(&self) -> Result<Pid> {
        if self.processes.is_running(self.current) {
            Ok(self.current)
        } else {
            Err(SimError::NoSuchProcess { pid: self.current })
        }
    }

    /// Make a RUNNING process the current context; returns the previous one.
    pub fn switch_context(&mut self, pid: Pid) -> Result<Pid> {
        if !self.processes.is_running(pid) {
            debug!(event = event_names::REJECTED, pid = %pid, "switch to non-running process");
            return Err(SimError::NoSuchProcess { pid });
        }
        let previous = std::mem::replace(&mut self.current, pid);
        debug!(event = event_names::SWITCH, from = %previous, to = %pid, "context switched");
        Ok(previous)
    }

    // ------------------------------------------------------------------
    // Process table
    // ------------------------------------------------------------------

    /// Fork using the configured [`ForkMode`].
    pub fn fork(&mut self) -> Result<Forked> {
        self.fork_with(self.config.fork_mode)
    }

    /// Record a new RUNNING child of the current context.
    ///
    /// Fails with `ResourceExhausted` when the process table is full.
    pub fn fork_with(&mut self, mode: ForkMode) -> Result<Forked> {
        let parent = self.running_context()?;
        let Some(child) = self.processes.spawn(parent) else {
            warn!(
                event = event_names::EXHAUSTED,
                resource = %Resource::Processes,
                capacity = self.processes.capacity(),
                "fork refused: process table full"
            );
            return Err(SimError::ResourceExhausted {
                resource: Resource::Processes,
                capacity: self.processes.capacity(),
            });
        };

        debug!(event = event_names::FORK, parent = %parent, child = %child, mode = %mode, "forked");
        match mode {
            ForkMode::Parent => Ok(Forked::Parent { child }),
            ForkMode::Child => {
                self.current = child;
                Ok(Forked::Child)
            }
        }
    }

    /// Mark the current context a ZOMBIE holding `status`.
    ///
    /// The context returns to the parent if it is still running, otherwise to
    /// the root. Children of the exiting process are re-parented to the root.
    pub fn exit(&mut self, status: i32) -> Result<()> {
        let pid = self.running_context()?;
        let parent = self.processes.get(pid).map_or(Pid::NONE, |p| p.parent);
        let orphans = self
            .processes
            .mark_exited(pid, status)
            .ok_or(SimError::NoSuchProcess { pid })?;

        for orphan in &orphans {
            debug!(event = event_names::REPARENT, pid = %orphan, from = %pid, "orphan adopted by root");
        }

        self.current = if self.processes.is_running(parent) {
            parent
        } else {
            Pid::ROOT
        };
        debug!(
            event = event_names::EXIT,
            pid = %pid,
            status,
            context = %self.current,
            "exited"
        );
        Ok(())
    }

    /// Reap the zombie child of the current context that exited first.
    ///
    /// Never blocks: fails with `NoChild` when no child has exited yet.
    pub fn wait(&mut self) -> Result<Reaped> {
        let parent = self.running_context()?;
        let reaped = self
            .processes
            .reap_any(parent)
            .ok_or(SimError::NoChild { pid: parent })?;
        Ok(self.note_reaped(parent, reaped))
    }

    /// Reap one specific zombie child of the current context.
    pub fn wait_pid(&mut self, pid: Pid) -> Result<Reaped> {
        let parent = self.running_context()?;
        let reaped = self
            .processes
            .reap(parent, pid)
            .ok_or(SimError::NoChild { pid: parent })?;
        Ok(self.note_reaped(parent, reaped))
    }

    fn note_reaped(&self, parent: Pid, row: SimulatedProcess) -> Reaped {
        let reaped = Reaped {
            pid: row.pid,
            status: row.exit_status.unwrap_or_default(),
        };
        debug!(
            event = event_names::WAIT,
            parent = %parent,
            child = %reaped.pid,
            status = reaped.status,
            "reaped"
        );
        reaped
    }

    pub fn process(&self, pid: Pid) -> Option<&SimulatedProcess> {
        self.processes.get(pid)
    }

    /// Live rows in pid order.
    pub fn processes(&self) -> impl Iterator<Item = &SimulatedProcess> {
        self.processes.iter()
    }

    pub fn live_process_count(&self) -> usize {
        self.processes.live_count()
    }

    // ------------------------------------------------------------------
    // Pipes and descriptors
    // ------------------------------------------------------------------

    fn exhausted(&self, resource: Resource, capacity: usize) -> SimError {
        warn!(
            event = event_names::EXHAUSTED,
            resource = %resource,
            capacity,
            "pipe refused"
        );
        SimError::ResourceExhausted { resource, capacity }
    }

    /// Create a channel and its two endpoint handles.
    ///
    /// On failure nothing is left allocated.
    pub fn pipe(&mut self) -> Result<PipeEnds> {
        if self.descriptors.free_count() < 2 {
            return Err(self.exhausted(Resource::Descriptors, self.descriptors.capacity()));
        }
        let Some(channel) = self.pipes.create() else {
            return Err(self.exhausted(Resource::Pipes, self.pipes.capacity()));
        };

        let read = self.descriptors.allocate(EndpointKind::Read, channel);
        let write = self.descriptors.allocate(EndpointKind::Write, channel);
        let (Some(read), Some(write)) = (read, write) else {
            for fd in [read, write].into_iter().flatten() {
                self.descriptors.release(fd);
            }
            self.pipes.release(channel);
            return Err(self.exhausted(Resource::Descriptors, self.descriptors.capacity()));
        };

        debug!(
            event = event_names::PIPE,
            channel = %channel,
            read = %read,
            write = %write,
            "pipe created"
        );
        Ok(PipeEnds { read, write })
    }

    /// Resolve `fd` to an open endpoint of the given kind.
    fn endpoint(&self, fd: Fd, kind: EndpointKind) -> Result<ChannelId> {
        match self.descriptors.get(fd) {
            Some(desc) if desc.kind == kind && self.pipes.endpoint_open(desc.channel, kind) => {
                Ok(desc.channel)
            }
            _ => {
                debug!(event = event_names::REJECTED, fd = %fd, expected = %kind, "bad descriptor");
                Err(SimError::BadDescriptor { fd })
            }
        }
    }

    fn channel_error(fd: Fd, err: ChannelError) -> SimError {
        match err {
            ChannelError::Stale(_) => SimError::BadDescriptor { fd },
            ChannelError::NoReader(_) => SimError::ClosedPipe { fd },
        }
    }

    /// Append bytes to the channel behind a write end.
    ///
    /// Accepts as many bytes as fit and returns that count; 0 means the
    /// buffer is full.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize> {
        let channel = self.endpoint(fd, EndpointKind::Write)?;
        let accepted = self.pipes.write(channel, data).map_err(|e| {
            debug!(event = event_names::REJECTED, fd = %fd, error = %e, "write refused");
            Self::channel_error(fd, e)
        })?;
        trace!(
            event = event_names::WRITE,
            fd = %fd,
            channel = %channel,
            requested = data.len(),
            accepted,
            "write"
        );
        Ok(accepted)
    }

    /// Remove up to `buf.len()` bytes from the channel behind a read end.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<ReadOutcome> {
        let channel = self.endpoint(fd, EndpointKind::Read)?;
        let outcome = self
            .pipes
            .read(channel, buf)
            .map_err(|e| Self::channel_error(fd, e))?;
        trace!(
            event = event_names::READ,
            fd = %fd,
            channel = %channel,
            max = buf.len(),
            outcome = outcome.as_str(),
            bytes = outcome.bytes(),
            "read"
        );
        Ok(outcome)
    }

    /// Close one endpoint handle and free it for reuse.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let desc = self
            .descriptors
            .release(fd)
            .ok_or(SimError::BadDescriptor { fd })?;
        let effect = self
            .pipes
            .close_endpoint(desc.channel, desc.kind)
            .map_err(|e| Self::channel_error(fd, e))?;

        debug!(event = event_names::CLOSE, fd = %fd, end = %desc.kind, channel = %desc.channel, "closed");
        if effect == CloseEffect::TornDown {
            debug!(event = event_names::TEARDOWN, channel = %desc.channel, "channel torn down");
        }
        Ok(())
    }

    /// Read-only view of a live channel.
    pub fn channel(&self, id: ChannelId) -> Option<&PipeChannel> {
        self.pipes.get(id)
    }

    /// Live channels in slot order.
    pub fn channels(&self) -> impl Iterator<Item = &PipeChannel> {
        self.pipes.iter()
    }

    pub fn descriptor(&self, fd: Fd) -> Option<&Descriptor> {
        self.descriptors.get(fd)
    }

    /// Open descriptors in handle order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.iter()
    }

    pub fn open_descriptor_count(&self) -> usize {
        self.descriptors.open_count()
    }

    pub fn live_channel_count(&self) -> usize {
        self.pipes.live_count()
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Snapshot of every table. Never mutates the engine.
    pub fn status(&self) -> SimulationStatus {
        SimulationStatus::capture(self)
    }

    /// Write the human-readable status table to `out`.
    pub fn write_status<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        write!(out, "{}", self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessState;

    fn tiny() -> Engine {
        Engine::new(
            SimConfig::default()
                .with_max_processes(4)
                .with_max_pipes(2)
                .with_pipe_buffer_size(8),
        )
    }

    #[test]
    fn test_new_engine_has_root_only() {
        let engine = Engine::default();
        assert_eq!(engine.current_pid(), Pid::ROOT);
        assert_eq!(engine.live_process_count(), 1);
        assert_eq!(engine.live_channel_count(), 0);
        assert_eq!(engine.open_descriptor_count(), 0);
    }

    #[test]
    fn test_fork_parent_mode_keeps_context() {
        let mut engine = Engine::default();
        let forked = engine.fork().unwrap();
        assert_eq!(forked, Forked::Parent { child: Pid(2) });
        assert_eq!(forked.as_raw(), 2);
        assert_eq!(engine.current_pid(), Pid::ROOT);
        assert_eq!(engine.process(Pid(2)).unwrap().parent, Pid::ROOT);
    }

    #[test]
    fn test_fork_child_mode_moves_context() {
        let mut engine = Engine::default();
        let forked = engine.fork_with(ForkMode::Child).unwrap();
        assert!(forked.is_child());
        assert_eq!(forked.as_raw(), 0);
        assert_eq!(engine.current_pid(), Pid(2));

        engine.exit(7).unwrap();
        assert_eq!(engine.current_pid(), Pid::ROOT);
        assert_eq!(engine.wait().unwrap(), Reaped { pid: Pid(2), status: 7 });
    }

    #[test]
    fn test_fork_exhaustion() {
        let mut engine = tiny();
        for _ in 0..3 {
            engine.fork().unwrap();
        }
        let err = engine.fork().unwrap_err();
        assert_eq!(
            err,
            SimError::ResourceExhausted {
                resource: Resource::Processes,
                capacity: 4
            }
        );
        assert_eq!(engine.live_process_count(), 4);
    }

    #[test]
    fn test_wait_without_child_fails() {
        let mut engine = Engine::default();
        assert_eq!(
            engine.wait().unwrap_err(),
            SimError::NoChild { pid: Pid::ROOT }
        );
        engine.fork().unwrap();
        // a running child is not waited for
        assert!(matches!(engine.wait(), Err(SimError::NoChild { .. })));
        assert_eq!(engine.live_process_count(), 2);
    }

    #[test]
    fn test_wait_pid_targets_one_child() {
        let mut engine = Engine::default();
        let a = engine.fork().unwrap().as_raw();
        let b = engine.fork().unwrap().as_raw();
        for (pid, status) in [(a, 1), (b, 2)] {
            engine.switch_context(Pid(pid as u32)).unwrap();
            engine.exit(status).unwrap();
        }
        assert_eq!(engine.wait_pid(Pid(b as u32)).unwrap().status, 2);
        assert!(engine.wait_pid(Pid(b as u32)).is_err());
        assert_eq!(engine.wait().unwrap().pid, Pid(a as u32));
    }

    #[test]
    fn test_switch_to_unknown_process_fails() {
        let mut engine = Engine::default();
        assert_eq!(
            engine.switch_context(Pid(42)).unwrap_err(),
            SimError::NoSuchProcess { pid: Pid(42) }
        );
        assert_eq!(engine.current_pid(), Pid::ROOT);
    }

    #[test]
    fn test_exit_returns_to_root_when_parent_gone() {
        let mut engine = Engine::default();
        engine.fork_with(ForkMode::Child).unwrap(); // now in 2
        engine.fork_with(ForkMode::Child).unwrap(); // now in 3, child of 2
        engine.switch_context(Pid(2)).unwrap();
        engine.exit(0).unwrap();
        assert_eq!(engine.current_pid(), Pid::ROOT);
        assert_eq!(engine.process(Pid(3)).unwrap().parent, Pid::ROOT);

        engine.switch_context(Pid(3)).unwrap();
        engine.exit(5).unwrap();
        assert_eq!(engine.current_pid(), Pid::ROOT);
        assert_eq!(engine.wait().unwrap().pid, Pid(2));
        assert_eq!(engine.wait().unwrap(), Reaped { pid: Pid(3), status: 5 });
    }

    #[test]
    fn test_root_exit_disables_process_calls() {
        let mut engine = Engine::default();
        engine.exit(0).unwrap();
        assert_eq!(engine.process(Pid::ROOT).unwrap().state, ProcessState::Zombie);
        let dead = SimError::NoSuchProcess { pid: Pid::ROOT };
        assert_eq!(engine.fork().unwrap_err(), dead);
        assert_eq!(engine.wait().unwrap_err(), dead);
        assert_eq!(engine.exit(1).unwrap_err(), dead);
    }

    #[test]
    fn test_pipe_handles_start_at_three() {
        let mut engine = Engine::default();
        let ends = engine.pipe().unwrap();
        assert_eq!(ends.as_array(), [Fd(3), Fd(4)]);
        assert_eq!(engine.descriptor(Fd(3)).unwrap().kind, EndpointKind::Read);
        assert_eq!(engine.descriptor(Fd(4)).unwrap().kind, EndpointKind::Write);
    }

    #[test]
    fn test_wrong_end_is_bad_descriptor() {
        let mut engine = Engine::default();
        let ends = engine.pipe().unwrap();
        assert_eq!(
            engine.write(ends.read, b"x").unwrap_err(),
            SimError::BadDescriptor { fd: ends.read }
        );
        let mut buf = [0u8; 4];
        assert_eq!(
            engine.read(ends.write, &mut buf).unwrap_err(),
            SimError::BadDescriptor { fd: ends.write }
        );
    }

    #[test]
    fn test_write_after_reader_closed() {
        let mut engine = Engine::default();
        let ends = engine.pipe().unwrap();
        engine.close(ends.read).unwrap();
        assert_eq!(
            engine.write(ends.write, b"x").unwrap_err(),
            SimError::ClosedPipe { fd: ends.write }
        );
    }

    #[test]
    fn test_read_reports_end_of_stream() {
        let mut engine = Engine::default();
        let ends = engine.pipe().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(engine.read(ends.read, &mut buf).unwrap(), ReadOutcome::Empty);
        engine.write(ends.write, b"hi").unwrap();
        engine.close(ends.write).unwrap();
        assert_eq!(engine.read(ends.read, &mut buf).unwrap(), ReadOutcome::Data(2));
        assert_eq!(
            engine.read(ends.read, &mut buf).unwrap(),
            ReadOutcome::EndOfStream
        );
    }

    #[test]
    fn test_close_twice_is_bad_descriptor() {
        let mut engine = Engine::default();
        let ends = engine.pipe().unwrap();
        engine.close(ends.write).unwrap();
        assert_eq!(
            engine.close(ends.write).unwrap_err(),
            SimError::BadDescriptor { fd: ends.write }
        );
    }

    #[test]
    fn test_pipe_exhaustion_leaves_state_untouched() {
        let mut engine = tiny();
        engine.pipe().unwrap();
        engine.pipe().unwrap();
        let err = engine.pipe().unwrap_err();
        assert_eq!(err.code(), SimError::CODE_RESOURCE_EXHAUSTED);
        assert_eq!(engine.live_channel_count(), 2);
        assert_eq!(engine.open_descriptor_count(), 4);
    }

    #[test]
    fn test_descriptor_shortage_rolls_back_channel() {
        let mut engine = Engine::new(SimConfig::default().with_max_pipes(4).with_max_descriptors(3));
        engine.pipe().unwrap();
        let err = engine.pipe().unwrap_err();
        assert_eq!(
            err,
            SimError::ResourceExhausted {
                resource: Resource::Descriptors,
                capacity: 3
            }
        );
        assert_eq!(engine.live_channel_count(), 1);
        assert_eq!(engine.open_descriptor_count(), 2);
    }

    #[test]
    fn test_pipes_work_from_any_context() {
        let mut engine = Engine::default();
        let ends = engine.pipe().unwrap();
        let child = engine.fork().unwrap().as_raw();
        engine.write(ends.write, b"to child").unwrap();
        engine.switch_context(Pid(child as u32)).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(engine.read(ends.read, &mut buf).unwrap(), ReadOutcome::Data(8));
        assert_eq!(&buf[..8], b"to child");
    }
}
