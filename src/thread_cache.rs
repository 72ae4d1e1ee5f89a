use super::central_cache::CentralCache;
use super::constants::{ALIGNMENT, CLASS_COUNT, HIGH_WATER, MAX_BYTES};
use super::error::AllocError;
use super::free_list;
use super::size_class;
use std::alloc::{alloc as system_alloc, dealloc as system_dealloc, Layout};
use std::cell::Cell;
use std::ptr::null_mut;
use std::sync::Arc;

/// Per-thread front of the pool: one free-list per class, touched by no one
/// but the owning thread. Misses pull a batch from the central tier; long
/// lists evict their tail back to it.
pub struct ThreadCache {
    central: Arc<CentralCache>,
    heads: Box<[Cell<*mut u8>]>,
    counts: Box<[Cell<usize>]>,
}

impl Drop for ThreadCache {
    fn drop(&mut self) {
        self.flush()
    }
}

impl ThreadCache {
    // outside the crate, thread caches are built through `Pool::local`
    pub(crate) fn new(central: Arc<CentralCache>) -> Self {
        Self {
            central,
            heads: (0..CLASS_COUNT).map(|_| Cell::new(null_mut())).collect(),
            counts: (0..CLASS_COUNT).map(|_| Cell::new(0)).collect(),
        }
    }

    /// Hands the entire remaining inventory back to the central tier.
    pub fn flush(&self) {
        for index in 0..CLASS_COUNT {
            let head = self.heads[index].get();
            if head.is_null() {
                continue;
            }

            let count = self.counts[index].get().max(1);
            self.heads[index].set(null_mut());
            self.counts[index].set(0);

            self.central
                .return_range(head, count * size_class::class_size(index), index);
        }
    }

    pub fn alloc(&self, size: usize) -> Result<*mut u8, AllocError> {
        let size = if size == 0 { ALIGNMENT } else { size };

        if size > MAX_BYTES {
            return Self::bypass_alloc(size);
        }

        let index = size_class::index(size);
        let head = self.heads[index].get();

        if !head.is_null() {
            self.heads[index].set(unsafe { free_list::next_of(head) });
            let count = self.counts[index].get();
            self.counts[index].set(count.saturating_sub(1));
            return Ok(head);
        }

        self.refill(index)
    }

    /// SAFETY: `ptr` must come from `alloc` on this pool with this exact
    /// `size`, and must not be freed twice. Neither is detected.
    pub unsafe fn dealloc(&self, ptr: *mut u8, size: usize) {
        let size = if size == 0 { ALIGNMENT } else { size };

        if size > MAX_BYTES {
            Self::bypass_dealloc(ptr, size);
            return;
        }

        let index = size_class::index(size);

        free_list::set_next(ptr, self.heads[index].get());
        self.heads[index].set(ptr);

        let count = self.counts[index].get() + 1;
        self.counts[index].set(count);

        if count > HIGH_WATER {
            self.evict(index, count);
        }
    }

    fn refill(&self, index: usize) -> Result<*mut u8, AllocError> {
        let size = size_class::class_size(index);
        let hint = size_class::batch_hint(size);

        let batch = self
            .central
            .fetch_range(hint, index)
            .ok_or(AllocError::Oom)?;

        // first block satisfies the caller, the rest becomes local inventory
        unsafe {
            let rest = free_list::next_of(batch.start);
            if !rest.is_null() {
                free_list::set_next(batch.end, self.heads[index].get());
                self.heads[index].set(rest);
                self.counts[index].set(self.counts[index].get() + batch.len - 1);
            }
        }

        Ok(batch.start)
    }

    /// Keeps roughly a quarter of the list and returns the tail to the
    /// central tier.
    fn evict(&self, index: usize, count: usize) {
        let keep = (count / 4).max(1);

        let head = self.heads[index].get();
        let (split, kept) = unsafe { free_list::walk(head, keep - 1) };
        let tail = unsafe { free_list::next_of(split) };
        unsafe { free_list::set_next(split, null_mut()) };

        self.counts[index].set(kept);

        if !tail.is_null() && count > kept {
            let size = size_class::class_size(index);
            self.central.return_range(tail, (count - kept) * size, index);
        }
    }

    fn bypass_alloc(size: usize) -> Result<*mut u8, AllocError> {
        let layout = Layout::from_size_align(size, ALIGNMENT)?;
        let ptr = unsafe { system_alloc(layout) };

        if ptr.is_null() {
            Err(AllocError::Oom)
        } else {
            Ok(ptr)
        }
    }

    unsafe fn bypass_dealloc(ptr: *mut u8, size: usize) {
        if let Ok(layout) = Layout::from_size_align(size, ALIGNMENT) {
            system_dealloc(ptr, layout);
        }
    }

    #[cfg(test)]
    pub fn list_len(&self, index: usize) -> usize {
        self.counts[index].get()
    }
}
