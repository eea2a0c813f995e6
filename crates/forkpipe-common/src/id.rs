//! Identity types for simulated processes, descriptors, and pipe channels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulated process ID.
///
/// Pid `0` is never assigned to a row; it marks "no parent" for the root
/// process and is the value a child branch observes from `fork`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl Pid {
    /// Parent link of the root process.
    pub const NONE: Pid = Pid(0);

    /// The root process, present before any fork.
    pub const ROOT: Pid = Pid(1);

    /// Raw value as used by the integer call convention.
    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Pid(pid)
    }
}

/// Descriptor handle naming one open pipe endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fd(pub u32);

impl Fd {
    /// Raw value as used by the integer call convention.
    pub fn as_i32(self) -> i32 {
        self.0 as i32
    }

    /// Convert a raw integer handle. Negative values name no descriptor.
    pub fn from_raw(raw: i32) -> Option<Fd> {
        u32::try_from(raw).ok().map(Fd)
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Fd {
    fn from(fd: u32) -> Self {
        Fd(fd)
    }
}

/// Arena handle for a pipe channel.
///
/// `slot` indexes the registry; `generation` is bumped every time the slot's
/// channel is torn down, so a handle taken before teardown never resolves to
/// the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub slot: u32,
    pub generation: u32,
}

impl ChannelId {
    pub fn new(slot: u32, generation: u32) -> Self {
        ChannelId { slot, generation }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}
