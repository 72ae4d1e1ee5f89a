// Threads hammer a shared pool with random sizes while keeping a shadow
// copy of every live allocation, so recycled or aliased blocks show up as
// pattern mismatches.
use rand::prelude::*;
use std::sync::Arc;
use tierpool::Pool;

const NUM_THREADS: usize = 8;
const ROUNDS: usize = 3;
const OPS: usize = 2_000;

struct Slot {
    ptr: *mut u8,
    size: usize,
    seed: u8,
}

fn fill(slot: &Slot) {
    let n = slot.size.min(256);

    unsafe {
        for i in 0..n {
            *slot.ptr.add(i) = slot.seed.wrapping_add(i as u8);
        }
        if slot.size > n {
            *slot.ptr.add(slot.size - 1) = slot.seed;
        }
    }
}

fn check(slot: &Slot) {
    let n = slot.size.min(256);

    unsafe {
        for i in 0..n {
            assert_eq!(*slot.ptr.add(i), slot.seed.wrapping_add(i as u8));
        }
        if slot.size > n {
            assert_eq!(*slot.ptr.add(slot.size - 1), slot.seed);
        }
    }
}

#[test]
fn fuzz() {
    let pool = Arc::new(Pool::new());

    for _ in 0..ROUNDS {
        let mut handles = vec![];

        for _ in 0..NUM_THREADS {
            let pool = pool.clone();

            handles.push(std::thread::spawn(move || {
                let cache = pool.local();
                let mut rng = rand::thread_rng();
                let mut live: Vec<Slot> = vec![];

                for _ in 0..OPS {
                    if live.is_empty() || rng.gen_bool(0.6) {
                        let mut size = rng.gen_range(1..=2_000);

                        if rng.gen_range(0..100) == 0 {
                            // exercise the bypass path too
                            size = 300 * 1024;
                        }

                        let slot = Slot {
                            ptr: cache.alloc(size).unwrap(),
                            size,
                            seed: rng.gen(),
                        };
                        fill(&slot);
                        live.push(slot);
                    } else {
                        let slot = live.swap_remove(rng.gen_range(0..live.len()));
                        check(&slot);
                        unsafe { cache.dealloc(slot.ptr, slot.size) };
                    }
                }

                for slot in live.drain(..) {
                    check(&slot);
                    unsafe { cache.dealloc(slot.ptr, slot.size) };
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    let bytes = pool.mapped_bytes() as f64;
    println!("POOL SIZE: {:.2} kb", bytes / 1024.0);
}
