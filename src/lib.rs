//! Three-tier small-object pool: a per-thread cache over per-class central
//! free-lists over a page cache. Requests above `MAX_BYTES` bypass the
//! tiers and go straight to the system allocator.

mod central_cache;
mod error;
mod free_list;
mod page_cache;
mod page_map;
mod size_class;
mod span_tracker;
mod spin;
mod thread_cache;

pub mod constants;

use central_cache::CentralCache;
use page_cache::PageCache;
use std::sync::{Arc, OnceLock};

pub use error::AllocError;
pub use thread_cache::ThreadCache;

/// A self-contained allocator instance: one central tier over one page
/// tier. Threads allocate through a [`ThreadCache`] obtained from
/// [`Pool::local`]. The process-wide [`alloc`]/[`dealloc`] functions run on
/// a shared singleton pool.
pub struct Pool {
    central: Arc<CentralCache>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    pub fn new() -> Self {
        let pages = Arc::new(PageCache::new());

        Self {
            central: Arc::new(CentralCache::new(pages)),
        }
    }

    /// A thread-local front for this pool. Dropping it returns its
    /// inventory to the central tier.
    pub fn local(&self) -> ThreadCache {
        ThreadCache::new(self.central.clone())
    }

    /// Total bytes this pool has mapped from the OS.
    pub fn mapped_bytes(&self) -> usize {
        self.central.mapped_bytes()
    }

    /// Pages currently free in the page tier.
    pub fn free_pages(&self) -> usize {
        self.central.free_pages()
    }
}

fn global() -> &'static Pool {
    static POOL: OnceLock<Pool> = OnceLock::new();
    POOL.get_or_init(Pool::new)
}

std::thread_local!(static THREAD_CACHE: ThreadCache = global().local());

/// Allocates `size` bytes, aligned to at least one word. `size == 0` is
/// served as one word.
pub unsafe fn alloc(size: usize) -> Result<*mut u8, AllocError> {
    THREAD_CACHE.with(|cache| cache.alloc(size))
}

/// SAFETY: `ptr` must come from [`alloc`] with this exact `size`, once.
pub unsafe fn dealloc(ptr: *mut u8, size: usize) {
    THREAD_CACHE.with(|cache| unsafe { cache.dealloc(ptr, size) })
}

pub fn mapped_bytes() -> usize {
    global().mapped_bytes()
}
