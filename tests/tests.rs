use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tierpool::constants::{ALIGNMENT, MAX_BYTES, PAGE_SIZE, SPAN_PAGES};
use tierpool::{alloc, dealloc, Pool};

#[test]
fn hello_alloc() {
    unsafe {
        let ptr = alloc(40).unwrap();
        *ptr = 0xAB;
        assert_eq!(*ptr, 0xAB);
        dealloc(ptr, 40);
    }
}

#[test]
fn zero_size_is_served() {
    unsafe {
        let ptr = alloc(0).unwrap();
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % ALIGNMENT, 0);
        dealloc(ptr, 0);
    }
}

#[test]
fn addresses_are_word_aligned() {
    unsafe {
        for size in [1, 3, 8, 24, 100, 4096, 65_536, MAX_BYTES, MAX_BYTES + 1] {
            let ptr = alloc(size).unwrap();
            assert_eq!(ptr as usize % ALIGNMENT, 0, "size {size}");
            dealloc(ptr, size);
        }
    }
}

#[test]
fn alloc_too_big() {
    let result = unsafe { alloc(usize::MAX / 2) };
    assert!(result.is_err());
}

#[test]
fn many_classes_at_once() {
    let pool = Pool::new();
    let cache = pool.local();
    let mut ptrs = Vec::new();

    for size in (8..=2048).step_by(8) {
        for _ in 0..4 {
            ptrs.push((cache.alloc(size).unwrap(), size));
        }
    }

    for (ptr, size) in ptrs {
        unsafe { cache.dealloc(ptr, size) };
    }
}

#[test]
fn oversize_requests_bypass_the_pool() {
    let pool = Pool::new();
    let cache = pool.local();

    let size = 300 * 1024;
    let ptr = cache.alloc(size).unwrap();

    unsafe {
        *ptr = 1;
        *ptr.add(size - 1) = 2;
        cache.dealloc(ptr, size);
    }

    assert_eq!(pool.mapped_bytes(), 0);
    assert_eq!(pool.free_pages(), 0);
}

#[test]
fn max_bytes_is_the_routing_boundary() {
    let tiered = Pool::new();
    let cache = tiered.local();
    let ptr = cache.alloc(MAX_BYTES).unwrap();
    assert!(tiered.mapped_bytes() > 0);
    unsafe { cache.dealloc(ptr, MAX_BYTES) };

    let bypassed = Pool::new();
    let cache = bypassed.local();
    let ptr = cache.alloc(MAX_BYTES + 1).unwrap();
    assert_eq!(bypassed.mapped_bytes(), 0);
    unsafe { cache.dealloc(ptr, MAX_BYTES + 1) };
}

#[test]
fn hot_class_runs_out_of_one_span() {
    let pool = Pool::new();
    let cache = pool.local();
    let mut seen = HashSet::new();

    // 32 B blocks: one 8-page span carves into 1024 of them, which covers
    // 1000 live allocations round after round
    for _ in 0..3 {
        let mut ptrs = Vec::with_capacity(1000);

        for _ in 0..1000 {
            let ptr = cache.alloc(32).unwrap();
            ptrs.push(ptr);
            seen.insert(ptr as usize);
        }
        for ptr in ptrs {
            unsafe { cache.dealloc(ptr, 32) };
        }
    }

    assert_eq!(pool.mapped_bytes(), SPAN_PAGES * PAGE_SIZE);
    assert!(seen.len() <= 1024);
}

#[test]
fn sustained_churn_returns_the_span_to_the_page_tier() {
    let pool = Pool::new();
    let cache = pool.local();

    // every round's free phase crosses the eviction high-water mark at
    // least once, so sixty rounds push the delay count past its threshold
    for _ in 0..60 {
        let mut ptrs = Vec::with_capacity(300);
        for _ in 0..300 {
            ptrs.push(cache.alloc(32).unwrap());
        }
        for ptr in ptrs {
            unsafe { cache.dealloc(ptr, 32) };
        }
    }

    assert_eq!(pool.free_pages(), 0);

    // the sweep is also gated on wall-clock time
    thread::sleep(Duration::from_millis(1100));

    // flushing the thread cache puts every block back in the central list;
    // that return trips the sweep, which hands the span to the page tier
    drop(cache);

    assert_eq!(pool.free_pages(), SPAN_PAGES);
    assert_eq!(pool.mapped_bytes(), SPAN_PAGES * PAGE_SIZE);
}

#[test]
fn threads_race_one_class() {
    let pool = Arc::new(Pool::new());
    let mut handles = Vec::new();

    for tid in 0..8u8 {
        let pool = pool.clone();

        handles.push(thread::spawn(move || {
            let cache = pool.local();

            for round in 0..20u8 {
                let mut ptrs = Vec::with_capacity(200);

                for i in 0..200u8 {
                    let ptr = cache.alloc(64).unwrap();
                    let fill = tid ^ round ^ i;

                    unsafe {
                        for off in 0..64 {
                            *ptr.add(off) = fill;
                        }
                    }
                    ptrs.push((ptr, fill));
                }

                // a block handed to two threads at once would show up as a
                // torn fill pattern
                for &(ptr, fill) in &ptrs {
                    unsafe {
                        for off in 0..64 {
                            assert_eq!(*ptr.add(off), fill);
                        }
                    }
                }

                for (ptr, _) in ptrs {
                    unsafe { cache.dealloc(ptr, 64) };
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(pool.mapped_bytes() > 0);
}
