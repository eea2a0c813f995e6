//! Pipe registry: a fixed number of byte channels addressed by generational ids.
//!
//! A channel lives in one slot of the registry from `create` until both of its
//! endpoints are closed. Teardown discards the buffered bytes and bumps the
//! slot's generation, so an id taken before teardown never resolves to the
//! slot's next occupant.

use crate::descriptor::EndpointKind;
use crate::ring::ByteRing;
use forkpipe_common::ChannelId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of a read on an open read end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "bytes", rename_all = "snake_case")]
pub enum ReadOutcome {
    /// `n > 0` bytes were copied out.
    Data(usize),
    /// Nothing buffered but the write end is still open.
    Empty,
    /// Nothing buffered and the write end is closed; no more data can arrive.
    EndOfStream,
}

impl ReadOutcome {
    /// Bytes copied, with `Empty` and `EndOfStream` both counting as 0.
    pub fn bytes(&self) -> usize {
        match self {
            ReadOutcome::Data(n) => *n,
            ReadOutcome::Empty | ReadOutcome::EndOfStream => 0,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReadOutcome::EndOfStream)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadOutcome::Data(_) => "data",
            ReadOutcome::Empty => "empty",
            ReadOutcome::EndOfStream => "eof",
        }
    }
}

/// Channel-level failures; the engine attaches the offending descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel {0} no longer exists")]
    Stale(ChannelId),

    #[error("channel {0} has no open read end")]
    NoReader(ChannelId),
}

/// Whether closing an endpoint tore the whole channel down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseEffect {
    /// The other endpoint is still open.
    HalfClosed,
    /// Both ends are closed; the channel and its bytes are gone.
    TornDown,
}

/// One live byte channel.
#[derive(Debug, Clone)]
pub struct PipeChannel {
    id: ChannelId,
    buffer: ByteRing,
    read_open: bool,
    write_open: bool,
}

impl PipeChannel {
    fn new(id: ChannelId, capacity: usize) -> Self {
        PipeChannel {
            id,
            buffer: ByteRing::new(capacity),
            read_open: true,
            write_open: true,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Bytes waiting to be read.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn free(&self) -> usize {
        self.buffer.free()
    }

    pub fn is_read_open(&self) -> bool {
        self.read_open
    }

    pub fn is_write_open(&self) -> bool {
        self.write_open
    }

    /// Buffered bytes in read order.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.contents()
    }

    fn is_open(&self, kind: EndpointKind) -> bool {
        match kind {
            EndpointKind::Read => self.read_open,
            EndpointKind::Write => self.write_open,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    channel: Option<PipeChannel>,
}

/// Arena of pipe channels with a fixed slot count.
#[derive(Debug, Clone)]
pub struct PipeRegistry {
    slots: Vec<Slot>,
    buffer_size: usize,
    live: usize,
}

impl PipeRegistry {
    pub fn new(max_pipes: usize, buffer_size: usize) -> Self {
        PipeRegistry {
            slots: vec![Slot::default(); max_pipes],
            buffer_size,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn is_full(&self) -> bool {
        self.live == self.capacity()
    }

    /// Open a new empty channel in the lowest free slot.
    ///
    /// Returns `None` when every slot holds a live channel.
    pub fn create(&mut self) -> Option<ChannelId> {
        let index = self.slots.iter().position(|s| s.channel.is_none())?;
        let slot = &mut self.slots[index];
        let id = ChannelId::new(index as u32, slot.generation);
        slot.channel = Some(PipeChannel::new(id, self.buffer_size));
        self.live += 1;
        Some(id)
    }

    /// Resolve an id to its live channel.
    pub fn get(&self, id: ChannelId) -> Option<&PipeChannel> {
        let slot = self.slots.get(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.channel.as_ref()
    }

    fn get_mut(&mut self, id: ChannelId) -> Result<&mut PipeChannel, ChannelError> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.channel.as_mut())
            .ok_or(ChannelError::Stale(id))
    }

    /// Whether `kind`'s endpoint of `id` is live and still open.
    pub fn endpoint_open(&self, id: ChannelId, kind: EndpointKind) -> bool {
        self.get(id).is_some_and(|c| c.is_open(kind))
    }

    /// Append as much of `data` as fits; returns the count accepted.
    ///
    /// Fails with `NoReader` once the read end has been closed, since nothing
    /// could ever consume the bytes.
    pub fn write(&mut self, id: ChannelId, data: &[u8]) -> Result<usize, ChannelError> {
        let channel = self.get_mut(id)?;
        if !channel.read_open {
            return Err(ChannelError::NoReader(id));
        }
        Ok(channel.buffer.push(data))
    }

    /// Move up to `out.len()` bytes from the front of the channel into `out`.
    pub fn read(&mut self, id: ChannelId, out: &mut [u8]) -> Result<ReadOutcome, ChannelError> {
        let channel = self.get_mut(id)?;
        let copied = channel.buffer.pop(out);
        if copied > 0 {
            return Ok(ReadOutcome::Data(copied));
        }
        if channel.buffer.is_empty() && !channel.write_open {
            Ok(ReadOutcome::EndOfStream)
        } else {
            Ok(ReadOutcome::Empty)
        }
    }

    /// Mark one endpoint closed, tearing the channel down once both are.
    pub fn close_endpoint(
        &mut self,
        id: ChannelId,
        kind: EndpointKind,
    ) -> Result<CloseEffect, ChannelError> {
        let channel = self.get_mut(id)?;
        match kind {
            EndpointKind::Read => channel.read_open = false,
            EndpointKind::Write => channel.write_open = false,
        }
        if channel.read_open || channel.write_open {
            return Ok(CloseEffect::HalfClosed);
        }

        self.release(id);
        Ok(CloseEffect::TornDown)
    }

    /// Discard a channel outright regardless of endpoint state.
    ///
    /// Used to roll back a `create` whose descriptors could not be allocated.
    pub fn release(&mut self, id: ChannelId) -> bool {
        let Some(slot) = self.slots.get_mut(id.slot as usize) else {
            return false;
        };
        if slot.generation != id.generation || slot.channel.is_none() {
            return false;
        }
        slot.channel = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.live -= 1;
        true
    }

    /// Live channels in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &PipeChannel> {
        self.slots.iter().filter_map(|s| s.channel.as_ref())
    }
}
