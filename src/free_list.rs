use core::ptr;

// Free blocks carry no header. The first word of a free block is the link
// to the next free block of the same class; the rest of the block is dead
// storage until it is handed back out.

/// SAFETY: `block` must point at a free block of at least one word.
pub unsafe fn next_of(block: *mut u8) -> *mut u8 {
    (block as *const *mut u8).read()
}

/// SAFETY: `block` must point at a free block of at least one word.
pub unsafe fn set_next(block: *mut u8, next: *mut u8) {
    (block as *mut *mut u8).write(next)
}

/// Walks at most `max_hops` links from `start` and returns the last node
/// reached together with the number of nodes visited (including `start`).
/// Stops early at the first null link.
///
/// SAFETY: `start` must be non-null and head a well-formed chain.
pub unsafe fn walk(start: *mut u8, max_hops: usize) -> (*mut u8, usize) {
    let mut end = start;
    let mut visited = 1;

    while visited <= max_hops {
        let next = next_of(end);
        if next.is_null() {
            break;
        }
        end = next;
        visited += 1;
    }

    (end, visited)
}

/// Partitions `[base, base + count * size)` into `count` blocks of `size`
/// bytes and links them in address order. Returns the first and last block;
/// the last block's link is null.
///
/// SAFETY: the region must be owned by the caller, writable, and at least
/// `count * size` bytes with `size >= ALIGNMENT`.
pub unsafe fn carve(base: *mut u8, size: usize, count: usize) -> (*mut u8, *mut u8) {
    debug_assert!(count > 0);

    let mut last = base;
    for i in 0..count {
        let block = base.add(i * size);
        let next = if i + 1 < count {
            base.add((i + 1) * size)
        } else {
            ptr::null_mut()
        };
        set_next(block, next);
        last = block;
    }

    (base, last)
}
