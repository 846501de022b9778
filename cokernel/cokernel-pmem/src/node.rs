//! # Per-node free memory accounting
//!
//! One [`NumaNode`] per memory-affinity domain. Each node owns exactly one
//! free-chunk tree behind a ticket lock (FIFO under contention — every core
//! in the domain hammers this lock), plus counters and the observed address
//! extent as atomics so diagnostics can read them without taking the lock.
//!
//! Unlocked counter reads are advisory only; the locked re-check inside
//! [`NumaNode::allocate`] is the authoritative one. No operation ever holds
//! two node locks, so there is no lock-ordering protocol across nodes.

use crate::cache::CoreCache;
use crate::chunks::{ChunkError, ChunkTree};
use crate::phys_mapper::PhysMapper;
use cokernel_addresses::{PageSize, PhysicalAddress, Size4K};
use cokernel_sync::TicketMutex;
use core::sync::atomic::{AtomicU64, Ordering};

/// Errors from node-level frees and reservations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// The address lies outside every range this node was ever given.
    #[error("address is outside the node's memory extent")]
    OutOfBounds,
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// A NUMA memory domain: its free-chunk tree, counters, and address extent.
///
/// # Invariants
/// - `free_bytes` equals the summed size of all chunks currently in the
///   tree. Memory parked in a per-core cache is *not* counted here; it is
///   visible through [`CoreCache::bytes`] until the cache drains.
/// - `[min_addr, max_addr)` covers every range ever added to the node.
pub struct NumaNode {
    id: u32,
    tree: TicketMutex<ChunkTree>,
    min_addr: AtomicU64,
    max_addr: AtomicU64,
    total_bytes: AtomicU64,
    free_bytes: AtomicU64,
}

impl NumaNode {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self {
            id,
            tree: TicketMutex::new(ChunkTree::new()),
            min_addr: AtomicU64::new(u64::MAX),
            max_addr: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            free_bytes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Free bytes currently in the node tree. Advisory outside the lock.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes.load(Ordering::Relaxed)
    }

    /// Total bytes ever handed to this node.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Whether `addr` falls inside the node's observed extent.
    #[must_use]
    pub fn contains(&self, addr: PhysicalAddress) -> bool {
        let a = addr.as_u64();
        a >= self.min_addr.load(Ordering::Relaxed) && a < self.max_addr.load(Ordering::Relaxed)
    }

    /// Hand a discovered contiguous physical range to this node.
    ///
    /// Called once per range by boot/discovery code. Widens the observed
    /// extent and raises both counters on success; an overlap with memory
    /// that is already free propagates untouched.
    pub fn add_free_range<M: PhysMapper>(
        &self,
        mapper: &M,
        addr: PhysicalAddress,
        size: u64,
    ) -> Result<(), NodeError> {
        let mut tree = self.tree.lock();
        tree.free_range(mapper, addr, size)?;
        self.min_addr.fetch_min(addr.as_u64(), Ordering::Relaxed);
        self.max_addr
            .fetch_max(addr.as_u64() + size, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        self.free_bytes.fetch_add(size, Ordering::Relaxed);
        drop(tree);
        log::debug!(
            "node {}: added {size:#x} bytes at {addr}, {:#x} free",
            self.id,
            self.free_bytes()
        );
        Ok(())
    }

    /// Allocate `pages` pages at `Size4K::SIZE << align_log2` alignment.
    ///
    /// Fails fast on the counter before searching the tree, so exhausted
    /// nodes answer without walking anything.
    pub fn allocate<M: PhysMapper>(
        &self,
        mapper: &M,
        pages: u64,
        align_log2: u32,
    ) -> Option<PhysicalAddress> {
        let bytes = pages << Size4K::SHIFT;
        let align = Size4K::SIZE << align_log2;
        let mut tree = self.tree.lock();
        if self.free_bytes.load(Ordering::Relaxed) < bytes {
            return None;
        }
        let got = tree.allocate(mapper, bytes, align)?;
        self.free_bytes.fetch_sub(bytes, Ordering::Relaxed);
        Some(got)
    }

    /// Return `pages` pages at `addr` to the node tree.
    ///
    /// A double free is rejected, logged, and leaves the tree and counters
    /// untouched — unlike the bitmap pool, a bad free here is contained and
    /// does not take the kernel down.
    pub fn free<M: PhysMapper>(
        &self,
        mapper: &M,
        addr: PhysicalAddress,
        pages: u64,
    ) -> Result<(), NodeError> {
        if !self.contains(addr) {
            log::error!("node {}: free of {pages} pages at {addr} is out of bounds", self.id);
            return Err(NodeError::OutOfBounds);
        }
        let bytes = pages << Size4K::SHIFT;
        let mut tree = self.tree.lock();
        match tree.free_range(mapper, addr, bytes) {
            Ok(()) => {
                self.free_bytes.fetch_add(bytes, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                drop(tree);
                log::error!("node {}: rejected free of {pages} pages at {addr}: {e}", self.id);
                Err(e.into())
            }
        }
    }

    /// Carve a specific range out of the node's free memory, rounded
    /// outward to page boundaries.
    ///
    /// Refusals (the range is not fully free) are logged as warnings and
    /// change nothing.
    pub fn reserve<M: PhysMapper>(
        &self,
        mapper: &M,
        addr: PhysicalAddress,
        size: u64,
    ) -> Result<(), NodeError> {
        let lo = addr.align_down(Size4K::SIZE);
        let hi = (addr + size).align_up(Size4K::SIZE);
        let bytes = hi - lo;
        let mut tree = self.tree.lock();
        match tree.reserve(mapper, lo, bytes) {
            Ok(()) => {
                self.free_bytes.fetch_sub(bytes, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                drop(tree);
                log::warn!(
                    "node {}: cannot reserve {size:#x} bytes at {addr}: {e}",
                    self.id
                );
                Err(e.into())
            }
        }
    }

    /// Allocate, preferring the calling core's cache.
    ///
    /// The cache is probed under interrupt suppression only — no node lock.
    /// On a miss the request falls through to [`NumaNode::allocate`]; the
    /// cache is not refilled on misses, it fills up from frees.
    pub fn allocate_cached<M: PhysMapper>(
        &self,
        mapper: &M,
        cache: &mut CoreCache,
        pages: u64,
        align_log2: u32,
    ) -> Option<PhysicalAddress> {
        let bytes = pages << Size4K::SHIFT;
        let align = Size4K::SIZE << align_log2;
        if let Some(got) = cache.allocate(mapper, bytes, align) {
            return Some(got);
        }
        self.allocate(mapper, pages, align_log2)
    }

    /// Free into the calling core's cache, draining it into the node when
    /// it has grown past its threshold.
    ///
    /// Cache frees are pure insert/merge and take no lock; only a drain
    /// touches the node tree. Draining pops whole chunks, so merges that
    /// happened in the cache carry over to the node tree.
    pub fn free_cached<M: PhysMapper>(
        &self,
        mapper: &M,
        cache: &mut CoreCache,
        addr: PhysicalAddress,
        pages: u64,
    ) -> Result<(), NodeError> {
        let bytes = pages << Size4K::SHIFT;
        cache.free(mapper, addr, bytes)?;
        if cache.is_over_threshold() {
            let mut tree = self.tree.lock();
            while let Some((chunk, size)) = cache.pop(mapper) {
                match tree.free_range(mapper, chunk, size) {
                    Ok(()) => {
                        self.free_bytes.fetch_add(size, Ordering::Relaxed);
                    }
                    Err(e) => {
                        // a cached chunk came from this node; this firing
                        // means the tree and cache disagree about ownership
                        log::error!(
                            "node {}: drain of cached chunk at {chunk} rejected: {e}",
                            self.id
                        );
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Visit every free chunk in the node tree, in address order.
    pub fn for_each_free<M: PhysMapper>(&self, mapper: &M, f: impl FnMut(PhysicalAddress, u64)) {
        let tree = self.tree.lock();
        tree.for_each(mapper, f);
    }

    /// Number of chunks in the node tree.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.tree.lock().len()
    }
}
