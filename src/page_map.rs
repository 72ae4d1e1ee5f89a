use super::constants::PAGE_SIZE;
use std::ptr::null_mut;

/// Maps `num_pages` fresh pages of anonymous memory. The mapping is
/// page-aligned and zero-initialized. Returns null when the OS refuses.
///
/// Pages are never unmapped; released spans are retained and recycled by
/// the page cache, and the process exit tears the mappings down.
pub fn map_pages(num_pages: usize) -> *mut u8 {
    let size = num_pages * PAGE_SIZE;

    let ptr = unsafe {
        libc::mmap(
            null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        null_mut()
    } else {
        ptr as *mut u8
    }
}
