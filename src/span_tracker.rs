use super::constants::{PAGE_SIZE, TRACKER_CAPACITY};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-span bookkeeping for carved spans: where the span lives, how many
/// blocks it was carved into, and how many of those sit in the central
/// free-list right now. All fields are atomics so readers tolerate torn
/// views; `base` is written last and read first, so a non-zero base implies
/// the other fields are visible.
pub struct SpanTracker {
    base: AtomicUsize,
    pages: AtomicUsize,
    block_count: AtomicUsize,
    free_count: AtomicUsize,
}

impl SpanTracker {
    fn empty() -> Self {
        Self {
            base: AtomicUsize::new(0),
            pages: AtomicUsize::new(0),
            block_count: AtomicUsize::new(0),
            free_count: AtomicUsize::new(0),
        }
    }

    fn assign(&self, base: usize, pages: usize, block_count: usize, free_count: usize) {
        self.pages.store(pages, Ordering::Release);
        self.block_count.store(block_count, Ordering::Release);
        self.free_count.store(free_count, Ordering::Release);
        self.base.store(base, Ordering::Release);
    }

    /// Whether `addr` falls inside this span. Inert trackers cover nothing.
    pub fn covers(&self, addr: usize) -> bool {
        let base = self.base.load(Ordering::Acquire);
        if base == 0 {
            return false;
        }

        let pages = self.pages.load(Ordering::Acquire);
        addr >= base && addr < base + pages * PAGE_SIZE
    }

    pub fn base(&self) -> usize {
        self.base.load(Ordering::Acquire)
    }

    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::Acquire)
    }

    pub fn block_count(&self) -> usize {
        self.block_count.load(Ordering::Acquire)
    }

    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::Acquire)
    }

    pub fn add_free(&self, n: usize) {
        self.free_count.fetch_add(n, Ordering::Release);
    }

    pub fn sub_free(&self, n: usize) {
        self.free_count.fetch_sub(n, Ordering::Release);
    }

    /// Detaches the tracker from its span once the span went back to the
    /// page tier. The slot is spent; it never tracks another span, and a
    /// recycled address range can no longer match it.
    pub fn retire(&self) {
        self.base.store(0, Ordering::Release);
        self.pages.store(0, Ordering::Release);
        self.block_count.store(0, Ordering::Release);
        self.free_count.store(0, Ordering::Release);
    }
}

/// Bounded table of span trackers. Slots are claimed with an atomic cursor
/// and spent exactly once; when the table fills up, further spans stay
/// usable but are never reclaimed.
pub struct TrackerTable {
    slots: Vec<SpanTracker>,
    cursor: AtomicUsize,
}

impl TrackerTable {
    pub fn new() -> Self {
        Self {
            slots: (0..TRACKER_CAPACITY).map(|_| SpanTracker::empty()).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claims a slot for a freshly carved span. Returns false when the
    /// table is exhausted.
    pub fn register(&self, base: usize, pages: usize, block_count: usize, free_count: usize) -> bool {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);

        if idx < self.slots.len() {
            self.slots[idx].assign(base, pages, block_count, free_count);
            true
        } else {
            self.cursor.store(self.slots.len(), Ordering::Relaxed);
            false
        }
    }

    pub fn registered(&self) -> usize {
        self.cursor.load(Ordering::Relaxed).min(self.slots.len())
    }

    pub fn get(&self, idx: usize) -> &SpanTracker {
        &self.slots[idx]
    }

    /// Linear scan for the tracker whose span contains `addr`. Off the fast
    /// path; the table is small enough that O(n) does not matter.
    pub fn lookup_index(&self, addr: usize) -> Option<usize> {
        (0..self.registered()).find(|&i| self.slots[i].covers(addr))
    }

    pub fn lookup(&self, addr: usize) -> Option<&SpanTracker> {
        self.lookup_index(addr).map(|i| &self.slots[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let table = TrackerTable::new();

        assert!(table.register(0x10000, 2, 64, 60));
        assert!(table.register(0x40000, 8, 1024, 1000));
        assert_eq!(table.registered(), 2);

        let t = table.lookup(0x10000 + 100).unwrap();
        assert_eq!(t.base(), 0x10000);
        assert_eq!(t.block_count(), 64);

        // one past the end of the first span
        assert_eq!(
            table.lookup(0x10000 + 2 * PAGE_SIZE).map(|t| t.base()),
            None
        );
        assert!(table.lookup(0x40000 + 8 * PAGE_SIZE - 1).is_some());
    }

    #[test]
    fn free_count_accounting() {
        let table = TrackerTable::new();
        table.register(0x10000, 2, 64, 64);

        let t = table.lookup(0x10000).unwrap();
        t.sub_free(10);
        assert_eq!(t.free_count(), 54);
        t.add_free(10);
        assert_eq!(t.free_count(), 64);
    }

    #[test]
    fn retired_tracker_covers_nothing() {
        let table = TrackerTable::new();
        table.register(0x10000, 2, 64, 64);

        table.get(0).retire();
        assert!(table.lookup(0x10000).is_none());
        // the slot is spent, not recycled
        assert_eq!(table.registered(), 1);
    }

    #[test]
    fn overflow_disables_registration() {
        let table = TrackerTable::new();

        for i in 0..TRACKER_CAPACITY {
            assert!(table.register((i + 1) * 0x100000, 1, 8, 8));
        }
        assert!(!table.register(0x90000000, 1, 8, 8));
        assert_eq!(table.registered(), TRACKER_CAPACITY);
        assert!(table.lookup(0x90000000).is_none());
    }
}
