//! Descriptor table: small integer handles naming pipe endpoints.

use forkpipe_common::{ChannelId, Fd};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which end of a channel a descriptor names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Read,
    Write,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Read => "read",
            EndpointKind::Write => "write",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An open handle and the endpoint it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub fd: Fd,
    pub kind: EndpointKind,
    pub channel: ChannelId,
}

/// Fixed-size table of open descriptors.
///
/// Handles start at `first` and are always allocated lowest-free-first, so a
/// closed handle is the next one handed out.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    first: u32,
    slots: Vec<Option<Descriptor>>,
    open: usize,
}

impl DescriptorTable {
    pub fn new(first: u32, capacity: usize) -> Self {
        DescriptorTable {
            first,
            slots: vec![None; capacity],
            open: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn open_count(&self) -> usize {
        self.open
    }

    pub fn free_count(&self) -> usize {
        self.capacity() - self.open
    }

    /// Lowest handle this table allocates.
    pub fn first_handle(&self) -> u32 {
        self.first
    }

    fn index(&self, fd: Fd) -> Option<usize> {
        let offset = fd.0.checked_sub(self.first)? as usize;
        (offset < self.slots.len()).then_some(offset)
    }

    /// Allocate the lowest free handle for an endpoint.
    ///
    /// Returns `None` when every handle is in use.
    pub fn allocate(&mut self, kind: EndpointKind, channel: ChannelId) -> Option<Fd> {
        let offset = self.slots.iter().position(Option::is_none)?;
        let fd = Fd(self.first + offset as u32);
        self.slots[offset] = Some(Descriptor { fd, kind, channel });
        self.open += 1;
        Some(fd)
    }

    /// Look up an open handle.
    pub fn get(&self, fd: Fd) -> Option<&Descriptor> {
        self.index(fd).and_then(|i| self.slots[i].as_ref())
    }

    /// Free a handle, returning what it mapped to.
    pub fn release(&mut self, fd: Fd) -> Option<Descriptor> {
        let index = self.index(fd)?;
        let released = self.slots[index].take();
        if released.is_some() {
            self.open -= 1;
        }
        released
    }

    /// Open descriptors in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.slots.iter().flatten()
    }
}
