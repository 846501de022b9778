//! # Fixed-granularity bitmap pool
//!
//! A single contiguous physical region managed as one occupancy bit per
//! allocation unit (1 = occupied). This is the pool for small,
//! latency-critical allocations (metadata, descriptors, per-core scratch)
//! and for ranges that must be carved out permanently.
//!
//! Allocation scans rotate through the map from a remembered cursor instead
//! of always starting at the front, spreading wear and keeping the scan
//! short when the region is mostly empty. Wide requests are matched at
//! word granularity, narrow ones at bit granularity.

use crate::phys_mapper::PhysMapper;
use cokernel_addresses::PhysicalAddress;
use cokernel_sync::SpinMutex;

const BITS_PER_WORD: u64 = u64::BITS as u64;

/// Requests or alignments of at least this many units are matched at word
/// granularity rather than probing individual bit offsets.
const WORD_SEARCH_MIN: u64 = 32;

/// Errors constructing a [`BitmapRegion`]. All of them are fatal boot-time
/// conditions for the kernel: there is no usable pool to fall back to.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BitmapInitError {
    #[error("allocation unit must be a nonzero power of two")]
    BadUnit,
    #[error("region start must be aligned to the allocation unit")]
    UnalignedStart,
    #[error("region is smaller than one allocation unit")]
    EmptyRegion,
    #[error("bitmap needs {needed} words but storage holds {provided}")]
    StorageTooSmall { needed: u64, provided: u64 },
}

/// Mutable scan state, all behind the region's lock.
struct BitmapInner<'a> {
    /// One bit per unit, 1 = occupied. Bits past the managed unit count are
    /// permanently set so a wrapping scan can never hand out padding.
    words: &'a mut [u64],
    /// Word index to resume scanning from.
    cursor: usize,
}

/// A contiguous physical region allocated at a fixed unit granularity.
///
/// # Invariants
/// - Every bit at index `>= units` (the padding in the final word) is set.
/// - `start` and `end` are unit-aligned; `end - start == units << unit_shift`.
/// - All mutation and scanning happens under the single region lock, so any
///   observer sees a consistent map.
pub struct BitmapRegion<'a> {
    start: PhysicalAddress,
    end: PhysicalAddress,
    unit_shift: u32,
    units: u64,
    inner: SpinMutex<BitmapInner<'a>>,
}

impl<'a> BitmapRegion<'a> {
    /// Create a pool covering `size` bytes from `start`, allocated in `unit`
    /// byte steps, with the occupancy map living in `storage`.
    ///
    /// `storage` is caller-provided because the pool exists before any
    /// general-purpose allocator does; boot code carves it out of early
    /// memory. Only the leading words the map actually needs are used.
    ///
    /// A trailing partial unit of the region is not managed (rounded down);
    /// the corresponding map bits are pre-set and never handed out.
    pub fn new(
        start: PhysicalAddress,
        size: u64,
        unit: u64,
        storage: &'a mut [u64],
    ) -> Result<Self, BitmapInitError> {
        if unit == 0 || !unit.is_power_of_two() {
            return Err(BitmapInitError::BadUnit);
        }
        if !start.is_aligned_to(unit) {
            return Err(BitmapInitError::UnalignedStart);
        }
        let unit_shift = unit.trailing_zeros();
        let units = size >> unit_shift;
        if units == 0 {
            return Err(BitmapInitError::EmptyRegion);
        }
        let needed = units.div_ceil(BITS_PER_WORD);
        if (storage.len() as u64) < needed {
            return Err(BitmapInitError::StorageTooSmall {
                needed,
                provided: storage.len() as u64,
            });
        }

        let words = &mut storage[..needed as usize];
        words.fill(0);
        let tail = units % BITS_PER_WORD;
        if tail != 0 {
            // padding past the managed range is permanently occupied
            words[needed as usize - 1] = !0 << tail;
        }

        Ok(Self {
            start,
            end: start + (units << unit_shift),
            unit_shift,
            units,
            inner: SpinMutex::new(BitmapInner { words, cursor: 0 }),
        })
    }

    /// First managed address.
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    /// One past the last managed address.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.end
    }

    /// Allocation unit in bytes.
    #[must_use]
    pub const fn unit(&self) -> u64 {
        1 << self.unit_shift
    }

    /// Number of managed units.
    #[must_use]
    pub const fn units(&self) -> u64 {
        self.units
    }

    /// Whether `addr` falls inside the managed region.
    #[must_use]
    pub fn contains(&self, addr: PhysicalAddress) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Allocate `count` contiguous units whose base address is a multiple of
    /// `unit << align_log2`. Returns `None` when no fit exists; exhaustion
    /// is the caller's problem, not a fault.
    ///
    /// The scan starts at the cursor and wraps across the whole map exactly
    /// once. Requests (or alignments) of [`WORD_SEARCH_MIN`] units or more
    /// go through the word-granularity matcher; smaller ones probe
    /// alignment-strided bit offsets inside each not-yet-full word.
    pub fn allocate(&self, count: u64, align_log2: u32) -> Option<PhysicalAddress> {
        if count == 0 || count > self.units {
            return None;
        }
        let align_units = 1u64 << align_log2;
        let mut inner = self.inner.lock();
        if count >= WORD_SEARCH_MIN || align_units >= WORD_SEARCH_MIN {
            self.alloc_words(&mut inner, count, align_units)
        } else {
            self.alloc_bits(&mut inner, count, align_units)
        }
    }

    /// Word-granularity search: candidate bases are word-aligned unit
    /// indices whose run of words is entirely clear. Exactly `count` bits
    /// are claimed so that a later `free` restores the map bit-for-bit.
    fn alloc_words(
        &self,
        inner: &mut BitmapInner<'_>,
        count: u64,
        align_units: u64,
    ) -> Option<PhysicalAddress> {
        let nwords = inner.words.len() as u64;
        let span = count.div_ceil(BITS_PER_WORD);
        let start_units = self.start.as_u64() >> self.unit_shift;

        for step in 0..nwords {
            let w = (inner.cursor as u64 + step) % nwords;
            if w + span > nwords {
                // a run cannot cross the end of the map
                continue;
            }
            let base = w * BITS_PER_WORD;
            if (start_units + base) % align_units != 0 {
                continue;
            }
            let wi = w as usize;
            let run = &inner.words[wi..wi + span as usize];
            if run.iter().any(|&word| word != 0) {
                continue;
            }

            let full = (count / BITS_PER_WORD) as usize;
            let tail = count % BITS_PER_WORD;
            for word in &mut inner.words[wi..wi + full] {
                *word = u64::MAX;
            }
            if tail != 0 {
                inner.words[wi + full] |= (1 << tail) - 1;
            }
            inner.cursor = ((w + span) % nwords) as usize;
            return Some(self.start + (base << self.unit_shift));
        }
        None
    }

    /// Bit-granularity search: within each not-entirely-occupied word, probe
    /// every offset on the alignment stride for a clear `count`-wide mask.
    fn alloc_bits(
        &self,
        inner: &mut BitmapInner<'_>,
        count: u64,
        align_units: u64,
    ) -> Option<PhysicalAddress> {
        let nwords = inner.words.len();
        let start_units = self.start.as_u64() >> self.unit_shift;

        for step in 0..nwords {
            let w = (inner.cursor + step) % nwords;
            let word = inner.words[w];
            if word == u64::MAX {
                continue;
            }
            let base = w as u64 * BITS_PER_WORD;
            let misalign = (start_units + base) % align_units;
            let mut off = if misalign == 0 {
                0
            } else {
                align_units - misalign
            };
            while off + count <= BITS_PER_WORD {
                // count < WORD_SEARCH_MIN, so the mask fits the word
                let mask = ((1 << count) - 1) << off;
                if word & mask == 0 {
                    inner.words[w] |= mask;
                    inner.cursor = w;
                    return Some(self.start + ((base + off) << self.unit_shift));
                }
                off += align_units;
            }
        }
        None
    }

    /// Return `count` units starting at `addr` to the pool.
    ///
    /// # Panics
    ///
    /// Panics if any unit in the range is already free, or if the range does
    /// not lie inside the region on unit boundaries. Either condition means
    /// the occupancy map can no longer be trusted for any future decision,
    /// which the kernel must treat as fatal.
    pub fn free(&self, addr: PhysicalAddress, count: u64) {
        assert!(count > 0, "pool {}: freeing zero units at {addr}", self.start);
        assert!(
            self.contains(addr) && addr.is_aligned_to(self.unit()),
            "pool {}: freeing unmanaged address {addr}",
            self.start
        );
        let first = (addr - self.start) >> self.unit_shift;
        assert!(
            first + count <= self.units,
            "pool {}: free of {count} units at {addr} runs past the region",
            self.start
        );

        let mut inner = self.inner.lock();
        let mut bit = first;
        let mut left = count;
        while left > 0 {
            let w = (bit / BITS_PER_WORD) as usize;
            let off = bit % BITS_PER_WORD;
            let n = (BITS_PER_WORD - off).min(left);
            let mask = if n == BITS_PER_WORD {
                u64::MAX
            } else {
                ((1 << n) - 1) << off
            };
            assert!(
                inner.words[w] & mask == mask,
                "pool {}: double free of {count} units at {addr}",
                self.start
            );
            inner.words[w] &= !mask;
            bit += n;
            left -= n;
        }
    }

    /// Unconditionally mark the absolute range `[from, to)` occupied,
    /// clipped to the region and rounded outward to unit boundaries.
    ///
    /// Reservations bypass allocation bookkeeping entirely: bits already set
    /// stay set, and nothing is counted as "allocated". Used for firmware
    /// ranges, the kernel image, and other memory that must never be handed
    /// out.
    pub fn reserve(&self, from: PhysicalAddress, to: PhysicalAddress) {
        let lo = from.max(self.start);
        let hi = to.min(self.end);
        if lo >= hi {
            return;
        }
        let first = (lo - self.start) >> self.unit_shift;
        let last = (hi - self.start).div_ceil(self.unit());

        let mut inner = self.inner.lock();
        let mut bit = first;
        while bit < last {
            let w = (bit / BITS_PER_WORD) as usize;
            let off = bit % BITS_PER_WORD;
            let n = (BITS_PER_WORD - off).min(last - bit);
            let mask = if n == BITS_PER_WORD {
                u64::MAX
            } else {
                ((1 << n) - 1) << off
            };
            inner.words[w] |= mask;
            bit += n;
        }
    }

    /// Count free units with a full linear scan.
    ///
    /// Cheap but linear; meant for occasional diagnostics (host-visible
    /// free-memory reporting), not for allocation decisions.
    #[must_use]
    pub fn count_free(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .words
            .iter()
            .map(|word| u64::from(word.count_zeros()))
            .sum()
    }

    /// Zero the contents of every currently-free unit.
    ///
    /// Called once by boot code before the pool is opened up for general
    /// use, so memory inherited from a previous lifetime never leaks into
    /// fresh allocations. Holds the region lock across the whole scan.
    pub fn zero_all_free<M: PhysMapper>(&self, mapper: &M) {
        let inner = self.inner.lock();
        let unit = self.unit() as usize;
        for (wi, &word) in inner.words.iter().enumerate() {
            if word == u64::MAX {
                continue;
            }
            for off in 0..BITS_PER_WORD {
                if word & (1 << off) == 0 {
                    // padding bits are always set, so this index is managed
                    let idx = wi as u64 * BITS_PER_WORD + off;
                    let pa = self.start + (idx << self.unit_shift);
                    // SAFETY: `pa` lies inside the managed region, which the
                    // mapper must cover writable for at least one unit.
                    unsafe {
                        let p: *mut u8 = core::ptr::from_mut(mapper.phys_to_mut::<u8>(pa));
                        core::ptr::write_bytes(p, 0, unit);
                    }
                }
            }
        }
    }
}
