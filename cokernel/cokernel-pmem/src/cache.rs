//! # Per-core free-chunk cache
//!
//! A small, core-private buffer in front of a node's free tree. Frees land
//! here without taking the node lock; repeat allocations are satisfied from
//! here the same way. The only hazard for core-private data is an interrupt
//! handler re-entering on the same core, so every mutation runs under an
//! [`IrqGuard`](cokernel_sync::IrqGuard) instead of a lock.
//!
//! The cache deliberately does no node-ownership checking: whatever the core
//! frees is cached, and the periodic drain hands it back to the node whose
//! lock-protected tree then arbitrates.

use crate::chunks::{ChunkError, ChunkTree};
use crate::phys_mapper::PhysMapper;
use cokernel_addresses::PhysicalAddress;
use cokernel_sync::IrqGuard;

/// Default drain threshold: caches give memory back to their node once they
/// hold more than this many bytes (2 MiB).
pub const DEFAULT_CACHE_CAPACITY: u64 = 2 * 1024 * 1024;

/// Core-private chunk buffer. Owned by exactly one core; `&mut` access is
/// the ownership discipline, interrupt suppression is the reentrancy guard.
pub struct CoreCache {
    tree: ChunkTree,
    bytes: u64,
    capacity: u64,
}

impl Default for CoreCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl CoreCache {
    /// A cache that starts draining once it holds more than `capacity`
    /// bytes.
    #[must_use]
    pub const fn new(capacity: u64) -> Self {
        Self {
            tree: ChunkTree::new(),
            bytes: 0,
            capacity,
        }
    }

    /// Bytes currently parked in this cache (not counted in any node's
    /// `free_bytes`).
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Whether the next free should trigger a drain into the owning node.
    #[must_use]
    pub const fn is_over_threshold(&self) -> bool {
        self.bytes > self.capacity
    }

    /// Try to serve `size` bytes at `align` from the cached chunks.
    pub fn allocate<M: PhysMapper>(
        &mut self,
        mapper: &M,
        size: u64,
        align: u64,
    ) -> Option<PhysicalAddress> {
        let _irq = IrqGuard::new();
        let got = self.tree.allocate(mapper, size, align)?;
        self.bytes -= size;
        Some(got)
    }

    /// Park `[addr, addr + size)` in the cache.
    ///
    /// Pure insert/merge; never contends with anything but this core's own
    /// interrupt handlers. A range already present is still a double free
    /// and is rejected like on the node path.
    pub fn free<M: PhysMapper>(
        &mut self,
        mapper: &M,
        addr: PhysicalAddress,
        size: u64,
    ) -> Result<(), ChunkError> {
        let _irq = IrqGuard::new();
        self.tree.free_range(mapper, addr, size)?;
        self.bytes += size;
        Ok(())
    }

    /// Remove and return the lowest-addressed cached chunk; used by the
    /// owning node to drain the cache.
    pub(crate) fn pop<M: PhysMapper>(&mut self, mapper: &M) -> Option<(PhysicalAddress, u64)> {
        let _irq = IrqGuard::new();
        let (addr, size) = self.tree.pop_first(mapper)?;
        self.bytes -= size;
        Some((addr, size))
    }

    /// Number of chunks currently cached.
    #[must_use]
    pub const fn chunk_count(&self) -> usize {
        self.tree.len()
    }
}
