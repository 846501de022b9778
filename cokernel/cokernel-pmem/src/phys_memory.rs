//! # Front end over the pool and the node table
//!
//! [`PhysMemory`] is what the rest of the kernel talks to. It owns the
//! physical-access mapper, an optional fixed-unit bitmap pool, and the NUMA
//! node table. Callers pick the allocator by request shape — fixed small
//! units go to the pool, variable page-granular memory goes to a node — and
//! frees are routed back by address so callers need not remember where an
//! address came from.
//!
//! Construction is a `&mut` boot phase (`set_pool`, `add_node`); everything
//! after runs on `&self` from any core.

use crate::bitmap::BitmapRegion;
use crate::cache::CoreCache;
use crate::node::{NodeError, NumaNode};
use crate::phys_mapper::PhysMapper;
use cokernel_addresses::PhysicalAddress;

/// Upper bound on memory-affinity domains; matches the largest host
/// topologies the cokernel is deployed on.
pub const MAX_NUMA_NODES: usize = 8;

/// Errors registering topology at boot.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("node id {0} exceeds MAX_NUMA_NODES")]
    NodeOutOfRange(u32),
    #[error("node {0} is already registered")]
    DuplicateNode(u32),
}

/// Errors routing a free back to its allocator.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
    /// Neither the pool nor any node's extent covers the address.
    #[error("no allocator owns this address")]
    UnknownAddress,
    #[error(transparent)]
    Node(#[from] NodeError),
}

/// The physical-memory front end: mapper, pool, and node table.
pub struct PhysMemory<'pool, M> {
    mapper: M,
    pool: Option<BitmapRegion<'pool>>,
    nodes: [Option<NumaNode>; MAX_NUMA_NODES],
}

impl<'pool, M: PhysMapper> PhysMemory<'pool, M> {
    #[must_use]
    pub fn new(mapper: M) -> Self {
        Self {
            mapper,
            pool: None,
            nodes: [const { None }; MAX_NUMA_NODES],
        }
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Install the fixed-unit pool. Boot phase only.
    pub fn set_pool(&mut self, pool: BitmapRegion<'pool>) {
        self.pool = Some(pool);
    }

    #[must_use]
    pub const fn pool(&self) -> Option<&BitmapRegion<'pool>> {
        self.pool.as_ref()
    }

    /// Register a memory-affinity domain. Boot phase only.
    pub fn add_node(&mut self, id: u32) -> Result<(), TopologyError> {
        let slot = self
            .nodes
            .get_mut(id as usize)
            .ok_or(TopologyError::NodeOutOfRange(id))?;
        if slot.is_some() {
            return Err(TopologyError::DuplicateNode(id));
        }
        *slot = Some(NumaNode::new(id));
        Ok(())
    }

    #[must_use]
    pub fn node(&self, id: u32) -> Option<&NumaNode> {
        self.nodes.get(id as usize)?.as_ref()
    }

    /// Hand a discovered contiguous range to a node. Called once per range
    /// by boot/discovery code.
    pub fn add_free_range(
        &self,
        node_id: u32,
        addr: PhysicalAddress,
        size: u64,
    ) -> Result<(), FreeError> {
        let node = self.node(node_id).ok_or(FreeError::UnknownAddress)?;
        node.add_free_range(&self.mapper, addr, size)?;
        Ok(())
    }

    /// Allocate `pages` pages from a node, optionally probing the calling
    /// core's cache first. `None` is exhaustion (or an unknown node id).
    pub fn alloc_pages(
        &self,
        node_id: u32,
        pages: u64,
        align_log2: u32,
        cache: Option<&mut CoreCache>,
    ) -> Option<PhysicalAddress> {
        let node = self.node(node_id)?;
        match cache {
            Some(cache) => node.allocate_cached(&self.mapper, cache, pages, align_log2),
            None => node.allocate(&self.mapper, pages, align_log2),
        }
    }

    /// Allocate `units` fixed-size units from the pool.
    pub fn alloc_units(&self, units: u64, align_log2: u32) -> Option<PhysicalAddress> {
        self.pool.as_ref()?.allocate(units, align_log2)
    }

    /// Return memory to whichever allocator owns `addr`.
    ///
    /// `count` is in the owning allocator's granularity: pool units when the
    /// address falls in the pool, pages when it falls in a node's extent.
    /// When a core cache is passed and a node owns the address, the free
    /// lands in the cache.
    pub fn free(
        &self,
        addr: PhysicalAddress,
        count: u64,
        cache: Option<&mut CoreCache>,
    ) -> Result<(), FreeError> {
        if let Some(pool) = &self.pool
            && pool.contains(addr)
        {
            pool.free(addr, count);
            return Ok(());
        }
        let node = self
            .nodes
            .iter()
            .flatten()
            .find(|node| node.contains(addr))
            .ok_or(FreeError::UnknownAddress)?;
        match cache {
            Some(cache) => node.free_cached(&self.mapper, cache, addr, count)?,
            None => node.free(&self.mapper, addr, count)?,
        }
        Ok(())
    }

    /// Free bytes across the pool and every node tree, for host-visible
    /// reporting. Unlocked node counters; advisory.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        let pool = self
            .pool
            .as_ref()
            .map_or(0, |p| p.count_free() * p.unit());
        let nodes: u64 = self.nodes.iter().flatten().map(NumaNode::free_bytes).sum();
        pool + nodes
    }
}
