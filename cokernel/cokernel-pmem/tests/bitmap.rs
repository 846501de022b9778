mod common;

use cokernel_addresses::PhysicalAddress;
use cokernel_pmem::{BitmapInitError, BitmapRegion};
use common::{TestRam, PAGE};

fn pa(v: u64) -> PhysicalAddress {
    PhysicalAddress::new(v)
}

#[test]
fn sixteen_unit_pool_round_trip() {
    let mut storage = [0u64; 1];
    let pool = BitmapRegion::new(pa(0x10_0000), 0x1_0000, PAGE, &mut storage).unwrap();

    assert_eq!(pool.units(), 16);
    assert_eq!(pool.count_free(), 16);

    assert_eq!(pool.allocate(2, 0), Some(pa(0x10_0000)));
    assert_eq!(pool.allocate(1, 0), Some(pa(0x10_2000)));
    assert_eq!(pool.count_free(), 13);

    pool.free(pa(0x10_0000), 2);
    assert_eq!(pool.count_free(), 15);

    // the freed pair is the first fit again
    assert_eq!(pool.allocate(2, 0), Some(pa(0x10_0000)));

    pool.free(pa(0x10_0000), 2);
    pool.free(pa(0x10_2000), 1);
    assert_eq!(pool.count_free(), 16);
}

#[test]
fn alignment_is_honored() {
    let mut storage = [0u64; 1];
    let pool = BitmapRegion::new(pa(0x10_0000), 0x1_0000, PAGE, &mut storage).unwrap();

    // knock the pool off its natural alignment first
    assert_eq!(pool.allocate(1, 0), Some(pa(0x10_0000)));

    let got = pool.allocate(1, 2).unwrap();
    assert_eq!(got.as_u64() % (PAGE << 2), 0);
    assert_eq!(got, pa(0x10_4000));

    let got = pool.allocate(2, 1).unwrap();
    assert_eq!(got.as_u64() % (PAGE << 1), 0);
}

#[test]
fn no_fit_returns_none_not_panic() {
    let mut storage = [0u64; 1];
    let pool = BitmapRegion::new(pa(0x10_0000), 0x1_0000, PAGE, &mut storage).unwrap();

    assert!(pool.allocate(15, 0).is_some());
    assert_eq!(pool.allocate(2, 0), None);
    assert!(pool.allocate(1, 0).is_some());
    assert_eq!(pool.allocate(1, 0), None);
    assert_eq!(pool.count_free(), 0);
}

#[test]
fn oversized_request_is_exhaustion() {
    let mut storage = [0u64; 1];
    let pool = BitmapRegion::new(pa(0x10_0000), 0x1_0000, PAGE, &mut storage).unwrap();
    assert_eq!(pool.allocate(17, 0), None);
    assert_eq!(pool.allocate(0, 0), None);
}

#[test]
fn wide_requests_use_word_runs_and_rotate() {
    let mut storage = [0u64; 4];
    let pool = BitmapRegion::new(pa(0x10_0000), 256 * PAGE, PAGE, &mut storage).unwrap();

    // 64 units: word-granularity path, lands on the first clear word
    assert_eq!(pool.allocate(64, 0), Some(pa(0x10_0000)));
    // next wide request resumes past the cursor, not at the front
    assert_eq!(pool.allocate(32, 0), Some(pa(0x10_0000 + 64 * PAGE)));
    // narrow requests also resume from the cursor
    let narrow = pool.allocate(1, 0).unwrap();
    assert_eq!(narrow, pa(0x10_0000 + 128 * PAGE));

    assert_eq!(pool.count_free(), 256 - 64 - 32 - 1);

    // the cursor keeps rotating forward past the freed word...
    pool.free(pa(0x10_0000), 64);
    assert_eq!(pool.allocate(64, 0), Some(pa(0x10_0000 + 192 * PAGE)));
    // ...and only the wrap-around reuses it
    assert_eq!(pool.allocate(64, 0), Some(pa(0x10_0000)));
}

#[test]
fn wide_request_conserves_exact_unit_count() {
    let mut storage = [0u64; 4];
    let pool = BitmapRegion::new(pa(0x10_0000), 256 * PAGE, PAGE, &mut storage).unwrap();

    let before = pool.count_free();
    let got = pool.allocate(40, 0).unwrap();
    assert_eq!(pool.count_free(), before - 40);
    pool.free(got, 40);
    assert_eq!(pool.count_free(), before);
}

#[test]
#[should_panic(expected = "double free")]
fn double_free_is_fatal() {
    let mut storage = [0u64; 1];
    let pool = BitmapRegion::new(pa(0x10_0000), 0x1_0000, PAGE, &mut storage).unwrap();

    let got = pool.allocate(2, 0).unwrap();
    pool.free(got, 2);
    pool.free(got, 2);
}

#[test]
#[should_panic(expected = "double free")]
fn freeing_never_allocated_memory_is_fatal() {
    let mut storage = [0u64; 1];
    let pool = BitmapRegion::new(pa(0x10_0000), 0x1_0000, PAGE, &mut storage).unwrap();
    pool.free(pa(0x10_4000), 1);
}

#[test]
fn reserve_is_unconditional_and_outside_bookkeeping() {
    let mut storage = [0u64; 1];
    let pool = BitmapRegion::new(pa(0x10_0000), 0x1_0000, PAGE, &mut storage).unwrap();

    // partial units round outward
    pool.reserve(pa(0x10_2800), pa(0x10_3800));
    assert_eq!(pool.count_free(), 14);

    // reserving twice is fine; reservation is not an allocation
    pool.reserve(pa(0x10_2000), pa(0x10_4000));
    assert_eq!(pool.count_free(), 14);

    // reserved units are never handed out, and nothing is handed out twice
    let mut seen = Vec::new();
    for _ in 0..14 {
        let got = pool.allocate(1, 0).unwrap();
        assert!(!(0x10_2000..0x10_4000).contains(&got.as_u64()));
        assert!(!seen.contains(&got));
        seen.push(got);
    }
    assert_eq!(pool.allocate(1, 0), None);
}

#[test]
fn reserve_clips_to_the_region() {
    let mut storage = [0u64; 1];
    let pool = BitmapRegion::new(pa(0x10_0000), 0x1_0000, PAGE, &mut storage).unwrap();

    pool.reserve(pa(0x0), pa(0x10_1000));
    pool.reserve(pa(0x10_F000), pa(0x20_0000));
    assert_eq!(pool.count_free(), 14);

    // fully outside: no effect
    pool.reserve(pa(0x20_0000), pa(0x30_0000));
    assert_eq!(pool.count_free(), 14);
}

#[test]
fn zero_all_free_scrubs_only_free_units() {
    let mut ram = TestRam::new(0x10_0000, 16 * PAGE as usize);
    ram.fill(0xAA);

    let mut storage = [0u64; 1];
    let pool = BitmapRegion::new(pa(0x10_0000), 16 * PAGE, PAGE, &mut storage).unwrap();

    let kept = pool.allocate(2, 0).unwrap();
    pool.zero_all_free(&ram);

    // the allocated units keep their contents across the hygiene pass
    assert_eq!(ram.byte_at(kept.as_u64()), 0xAA);
    assert_eq!(ram.byte_at(kept.as_u64() + 2 * PAGE - 1), 0xAA);

    // every free unit is scrubbed
    for unit in 2..16 {
        let base = 0x10_0000 + unit * PAGE;
        assert_eq!(ram.byte_at(base), 0, "unit {unit} not scrubbed");
        assert_eq!(ram.byte_at(base + PAGE - 1), 0, "unit {unit} not scrubbed");
    }
}

#[test]
fn construction_rejects_bad_configuration() {
    let mut storage = [0u64; 1];
    assert_eq!(
        BitmapRegion::new(pa(0x10_0000), 0x1_0000, 0, &mut storage).unwrap_err(),
        BitmapInitError::BadUnit
    );
    assert_eq!(
        BitmapRegion::new(pa(0x10_0000), 0x1_0000, 3000, &mut storage).unwrap_err(),
        BitmapInitError::BadUnit
    );
    assert_eq!(
        BitmapRegion::new(pa(0x10_0800), 0x1_0000, PAGE, &mut storage).unwrap_err(),
        BitmapInitError::UnalignedStart
    );
    assert_eq!(
        BitmapRegion::new(pa(0x10_0000), 0x800, PAGE, &mut storage).unwrap_err(),
        BitmapInitError::EmptyRegion
    );

    let mut small = [0u64; 1];
    assert_eq!(
        BitmapRegion::new(pa(0x10_0000), 128 * PAGE, PAGE, &mut small).unwrap_err(),
        BitmapInitError::StorageTooSmall {
            needed: 2,
            provided: 1
        }
    );
}

#[test]
fn trailing_partial_unit_is_never_handed_out() {
    let mut storage = [0u64; 1];
    // 4.5 units: the half unit is padding
    let pool = BitmapRegion::new(pa(0x10_0000), 4 * PAGE + PAGE / 2, PAGE, &mut storage).unwrap();
    assert_eq!(pool.units(), 4);
    assert_eq!(pool.count_free(), 4);
    for _ in 0..4 {
        let got = pool.allocate(1, 0).unwrap();
        assert!(got.as_u64() + PAGE <= 0x10_0000 + 4 * PAGE);
    }
    assert_eq!(pool.allocate(1, 0), None);
}
