//! Named scratch buffers reused across swap rounds.
//!
//! The engine moves `Vec<u8>`s out of the pool, wraps them in sparse images,
//! and moves them back when the data is dead, so exclusive ownership of each
//! arena is enforced by the type system rather than by convention. Capacity
//! is retained across rounds; after the first round of a steady-state
//! reduction the engine allocates nothing.

use std::collections::HashMap;

/// Symbolic names for the engine's scratch arenas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferId {
    /// The buffer the current working image usually lives in.
    Working1,
    /// The spare working buffer composites are written into.
    Working2,
    /// Receive buffer for incoming packaged images.
    Incoming,
    /// Buffer for the split piece that is about to be sent.
    SplitPiece,
}

/// A pool of named, growable byte arenas.
#[derive(Debug, Default)]
pub struct ScratchPool {
    slots: HashMap<BufferId, Vec<u8>>,
}

impl ScratchPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of the arena named `id` (empty if never filled). The
    /// slot stays vacant until [`ScratchPool::put_back`].
    pub fn take(&mut self, id: BufferId) -> Vec<u8> {
        self.slots.remove(&id).unwrap_or_default()
    }

    /// Return an arena to the slot named `id`, keeping its capacity.
    pub fn put_back(&mut self, id: BufferId, mut buffer: Vec<u8>) {
        buffer.clear();
        self.slots.insert(id, buffer);
    }

    /// Total capacity currently parked in the pool, in bytes.
    pub fn retained_bytes(&self) -> usize {
        self.slots.values().map(Vec::capacity).sum()
    }
}
