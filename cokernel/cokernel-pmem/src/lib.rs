//! # Cokernel Physical Memory Manager
//!
//! Tracks which physical page ranges of the cokernel's carve-out are free or
//! allocated and services allocation/free requests from every other kernel
//! subsystem (page tables, heap, DMA buffers, per-core stacks).
//!
//! ## Architecture Overview
//!
//! Two allocators cover two allocation-size regimes, fronted by one facade:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 PhysMemory (facade)                 │
//! │    • routes requests to pool or node                │
//! │    • routes frees back by address                   │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │                          │
//! ┌──────────▼───────────┐   ┌──────────▼───────────────┐
//! │    BitmapRegion      │   │  NumaNode (one per node) │
//! │  • fixed-unit pool   │   │  • CoreCache fast path   │
//! │  • bit-per-unit map  │   │  • ChunkTree (free AVL)  │
//! │  • rotating cursor   │   │  • byte counters         │
//! └──────────────────────┘   └──────────────────────────┘
//! ```
//!
//! ### Bitmap pool ([`bitmap`])
//!
//! A single contiguous region managed at a fixed unit granularity with one
//! occupancy bit per unit. Serves small, latency-critical allocations and
//! permanently reserved ranges. A rotating cursor spreads allocations across
//! the region instead of hammering its start.
//!
//! ### NUMA allocator ([`chunks`], [`node`], [`cache`])
//!
//! One [`node::NumaNode`] per memory-affinity domain, each owning an
//! address-ordered AVL tree of free chunks ([`chunks::ChunkTree`]). A chunk's
//! bookkeeping record is embedded in the free memory it describes, so the
//! tree costs no memory beyond the free memory itself. Arbitrary sizes and
//! alignments are served first-fit by address; adjacent chunks always merge.
//! An optional per-core cache ([`cache::CoreCache`]) buffers frees and
//! satisfies repeat allocations without touching the node-wide lock.
//!
//! ### Physical access seam ([`phys_mapper`])
//!
//! Chunk headers are written into free physical memory, which requires
//! turning a physical address into a dereferenceable pointer. All such
//! accesses go through [`phys_mapper::PhysMapper`]; the kernel supplies a
//! direct-map implementation, tests supply an in-process arena. Every
//! `unsafe` block in this crate sits at that seam.
//!
//! ## Concurrency Model
//!
//! No operation blocks or suspends: a caller either gets an address or a
//! failure sentinel synchronously. The bitmap pool holds one spin lock per
//! region; each node's tree is behind a ticket lock; no operation takes two
//! node locks, so there is no cross-node ordering protocol. Per-core caches
//! are single-owner and guard only against same-core interrupt reentrancy.
//!
//! ## Error Model
//!
//! Exhaustion is an `Option::None`, never an error type: running out of
//! memory is an answer, not a fault. Freeing memory that is already free is
//! a fault — fatal (panic) on the bitmap pool, whose map would be
//! untrustworthy afterwards, and a reported [`chunks::ChunkError`] on the
//! tree path, where the tree remains intact and the caller decides.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bitmap;
pub mod cache;
pub mod chunks;
pub mod node;
pub mod phys_mapper;
pub mod phys_memory;

pub use bitmap::{BitmapInitError, BitmapRegion};
pub use cache::CoreCache;
pub use chunks::{ChunkError, ChunkTree};
pub use node::{NodeError, NumaNode};
pub use phys_mapper::{DirectMapper, PhysMapper};
pub use phys_memory::{FreeError, PhysMemory, TopologyError, MAX_NUMA_NODES};
