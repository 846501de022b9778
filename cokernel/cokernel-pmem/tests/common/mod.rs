//! Shared test fixture: a fake physical carve-out.
//!
//! Simulates the memory the cokernel receives from the host as one
//! contiguous, page-aligned in-process buffer addressed from a chosen
//! "physical" base. The mapper turns a physical address into a pointer by
//! plain offset arithmetic, the same shape as the kernel's direct map.

use cokernel_addresses::PhysicalAddress;
use cokernel_pmem::PhysMapper;

pub const PAGE: u64 = 4096;

pub struct TestRam {
    buf: Vec<u8>,
    skew: usize,
    base: u64,
}

impl TestRam {
    /// A carve-out of `bytes` bytes whose first byte answers to physical
    /// address `base`.
    pub fn new(base: u64, bytes: usize) -> Self {
        let buf = vec![0u8; bytes + PAGE as usize];
        let skew = buf.as_ptr().align_offset(PAGE as usize);
        Self { buf, skew, base }
    }

    #[allow(dead_code)]
    pub fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// Paint the whole carve-out with `value`.
    #[allow(dead_code)]
    pub fn fill(&mut self, value: u8) {
        let skew = self.skew;
        self.buf[skew..].fill(value);
    }

    #[allow(dead_code)]
    pub fn byte_at(&self, pa: u64) -> u8 {
        self.buf[self.skew + usize::try_from(pa - self.base).unwrap()]
    }
}

impl PhysMapper for TestRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let off = usize::try_from(pa.as_u64() - self.base).unwrap();
        assert!(off + size_of::<T>() <= self.buf.len() - self.skew, "access past the carve-out");
        let p = self.buf[self.skew + off..].as_ptr().cast_mut();
        // SAFETY: the buffer outlives every test allocator, and tests only
        // touch memory through one allocator at a time.
        unsafe { &mut *p.cast::<T>() }
    }
}
