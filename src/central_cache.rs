use super::constants::{
    CAS_RETRY_BUDGET, CLASS_COUNT, DELAY_INTERVAL_MS, MAX_DELAY_COUNT, MAX_SPAN_PAGES,
    MIN_REFILL_BLOCKS, PAGE_SIZE, SCAN_BUDGET, SPAN_PAGES,
};
use super::free_list;
use super::page_cache::PageCache;
use super::size_class;
use super::span_tracker::{SpanTracker, TrackerTable};
use super::spin::SpinFlag;
use std::collections::HashMap;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Instant;

fn now_millis() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// A detached sub-chain handed to a thread cache: `len` blocks from `start`
/// to `end`, with `end`'s link already null.
pub struct Batch {
    pub start: *mut u8,
    pub end: *mut u8,
    pub len: usize,
}

struct ClassList {
    head: AtomicPtr<u8>,
    // guards multi-node list surgery; single-node prepends go CAS-only
    spin: SpinFlag,
    // elects at most one reclamation worker per class
    reclaim_busy: SpinFlag,
    delay_count: AtomicUsize,
    last_reclaim_at: AtomicU64,
}

impl ClassList {
    fn new() -> Self {
        Self {
            head: AtomicPtr::new(null_mut()),
            spin: SpinFlag::new(),
            reclaim_busy: SpinFlag::new(),
            delay_count: AtomicUsize::new(0),
            last_reclaim_at: AtomicU64::new(now_millis()),
        }
    }
}

/// One concurrent free-list per size class. Underflow refills from the page
/// tier by carving a fresh span; surplus returns from thread caches land
/// here; spans whose every block drifted back are periodically handed to
/// the page tier.
///
/// Head-pointer discipline: every mutation of a class head is a CAS or a
/// swap. Prepending never takes the spin; batch detach and the sweep hold
/// the spin so the segment they walk cannot be detached underneath them,
/// and their head CAS only loses to prepends, which are retried against.
pub struct CentralCache {
    lists: Vec<ClassList>,
    trackers: TrackerTable,
    pages: Arc<PageCache>,
}

impl CentralCache {
    pub fn new(pages: Arc<PageCache>) -> Self {
        Self {
            lists: (0..CLASS_COUNT).map(|_| ClassList::new()).collect(),
            trackers: TrackerTable::new(),
            pages,
        }
    }

    pub fn mapped_bytes(&self) -> usize {
        self.pages.mapped_bytes()
    }

    pub fn free_pages(&self) -> usize {
        self.pages.free_pages()
    }

    /// Detaches up to `batch` blocks of class `index` as one chain. Refills
    /// from the page tier when the list is empty; `None` means the OS
    /// refused pages.
    pub fn fetch_range(&self, batch: usize, index: usize) -> Option<Batch> {
        if batch == 0 || index >= CLASS_COUNT {
            return None;
        }

        let list = &self.lists[index];

        if !list.head.load(Ordering::Acquire).is_null() {
            list.spin.acquire();
            let detached = Self::detach_batch(list, batch);
            list.spin.release();

            if let Some(taken) = detached {
                // outside the spin: the chain is ours now and no longer
                // reachable from the list
                self.for_tracker_runs(taken.start, |tracker, run| tracker.sub_free(run));
                return Some(taken);
            }
            // drained while we waited on the spin
        }

        self.refill(batch, index)
    }

    /// Splices a chain back onto the class list. `total_bytes` bounds the
    /// chain length; the receiver re-terminates it, so senders may hand
    /// over an unterminated tail.
    pub fn return_range(&self, start: *mut u8, total_bytes: usize, index: usize) {
        if start.is_null() || index >= CLASS_COUNT {
            return;
        }

        let size = size_class::class_size(index);
        let count = (total_bytes / size).max(1);

        let (end, _) = unsafe { free_list::walk(start, count - 1) };
        unsafe { free_list::set_next(end, null_mut()) };

        // Tracker credit happens before publication: once the CAS lands,
        // the chain belongs to the list and may be detached any moment.
        self.for_tracker_runs(start, |tracker, run| tracker.add_free(run));

        self.publish(index, start, end, true);

        let list = &self.lists[index];
        let delayed = list.delay_count.fetch_add(1, Ordering::Relaxed) + 1;

        if delayed >= MAX_DELAY_COUNT {
            let now = now_millis();
            let last = list.last_reclaim_at.load(Ordering::Relaxed);

            if now.saturating_sub(last) >= DELAY_INTERVAL_MS && list.reclaim_busy.try_acquire() {
                list.spin.acquire();
                self.reclaim_full_spans(index);
                list.spin.release();
                list.reclaim_busy.release();
            }
        }
    }

    /// Pops up to `batch` nodes under the spin. `None` when the list went
    /// empty before the spin was ours.
    fn detach_batch(list: &ClassList, batch: usize) -> Option<Batch> {
        loop {
            let head = list.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }

            let (end, len) = unsafe { free_list::walk(head, batch - 1) };
            let rest = unsafe { free_list::next_of(end) };

            // only a concurrent prepend can move the head; our walked
            // segment is pinned by the spin
            if list
                .head
                .compare_exchange(head, rest, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                unsafe { free_list::set_next(end, null_mut()) };
                return Some(Batch { start: head, end, len });
            }

            thread::yield_now();
        }
    }

    /// Carves a fresh span from the page tier, hands `batch` blocks to the
    /// caller and publishes the remainder.
    fn refill(&self, batch: usize, index: usize) -> Option<Batch> {
        let size = size_class::class_size(index);

        let target = MIN_REFILL_BLOCKS * size;
        let span_pages = ((target + PAGE_SIZE - 1) / PAGE_SIZE).clamp(SPAN_PAGES, MAX_SPAN_PAGES);

        let base = self.pages.allocate(span_pages);
        if base.is_null() {
            return None;
        }

        let block_count = span_pages * PAGE_SIZE / size;
        debug_assert!(block_count > 0);

        let (first, last) = unsafe { free_list::carve(base, size, block_count) };
        let take = batch.min(block_count);

        let (end, _) = unsafe { free_list::walk(first, take - 1) };
        let rest = unsafe { free_list::next_of(end) };
        unsafe { free_list::set_next(end, null_mut()) };

        if !rest.is_null() {
            self.publish(index, rest, last, false);
        }

        // table full: the span stays usable but is never reclaimed
        self.trackers
            .register(base as usize, span_pages, block_count, block_count - take);

        Some(Batch {
            start: first,
            end,
            len: take,
        })
    }

    /// Prepends `[start, end]` onto the class head. With `fallback`, a
    /// starved publisher takes the spin to shut out detachers and retries
    /// against prepends only.
    fn publish(&self, index: usize, start: *mut u8, end: *mut u8, fallback: bool) {
        let list = &self.lists[index];
        let mut attempts = 0usize;

        loop {
            let head = list.head.load(Ordering::Acquire);
            unsafe { free_list::set_next(end, head) };

            if list
                .head
                .compare_exchange_weak(head, start, Ordering::Release, Ordering::Acquire)
                .is_ok()
            {
                return;
            }

            thread::yield_now();

            attempts += 1;
            if fallback && attempts > CAS_RETRY_BUDGET {
                list.spin.acquire();
                loop {
                    let head = list.head.load(Ordering::Acquire);
                    unsafe { free_list::set_next(end, head) };
                    if list
                        .head
                        .compare_exchange_weak(head, start, Ordering::Release, Ordering::Acquire)
                        .is_ok()
                    {
                        break;
                    }
                }
                list.spin.release();
                return;
            }
        }
    }

    /// Returns every span whose blocks all sit in this class's list back to
    /// the page tier. Caller holds the class spin and `reclaim_busy`.
    fn reclaim_full_spans(&self, index: usize) {
        let list = &self.lists[index];

        list.delay_count.store(0, Ordering::Relaxed);
        list.last_reclaim_at.store(now_millis(), Ordering::Relaxed);

        // tally pass: non-mutating walk of the current head snapshot
        let mut tallies: HashMap<usize, usize> = HashMap::new();
        let mut cursor = list.head.load(Ordering::Acquire);
        let mut budget = SCAN_BUDGET;

        while !cursor.is_null() {
            if budget == 0 {
                // cycle-suspect list: give up this round, try again later
                return;
            }
            budget -= 1;

            if let Some(idx) = self.trackers.lookup_index(cursor as usize) {
                *tallies.entry(idx).or_insert(0) += 1;
            }
            cursor = unsafe { free_list::next_of(cursor) };
        }

        // Eligibility comes from the tally alone. `free_count` is left to
        // its fetch/return debits and credits: a concurrent return can
        // CAS-prepend (and credit) mid-sweep, so writing tallies back here
        // would clobber credits the snapshot never saw.
        let mut full: Vec<(usize, usize, usize)> = Vec::new();
        for (&idx, &count) in &tallies {
            let tracker = self.trackers.get(idx);

            if count == tracker.block_count() {
                full.push((tracker.base(), tracker.pages(), idx));
            }
        }

        if full.is_empty() {
            return;
        }

        // Take the whole list private. Concurrent returns land on the empty
        // head and simply miss this sweep; nothing else can detach while we
        // hold the spin.
        let mut chain = list.head.swap(null_mut(), Ordering::AcqRel);
        let mut kept_head: *mut u8 = null_mut();
        let mut kept_tail: *mut u8 = null_mut();

        unsafe {
            while !chain.is_null() {
                let next = free_list::next_of(chain);
                let addr = chain as usize;

                let reclaimed = full
                    .iter()
                    .any(|&(base, pages, _)| addr >= base && addr < base + pages * PAGE_SIZE);

                if !reclaimed {
                    if kept_head.is_null() {
                        kept_head = chain;
                    } else {
                        free_list::set_next(kept_tail, chain);
                    }
                    kept_tail = chain;
                }

                chain = next;
            }

            if !kept_head.is_null() {
                free_list::set_next(kept_tail, null_mut());
                self.publish(index, kept_head, kept_tail, false);
            }
        }

        // retire before release so a recycled range can never match a
        // stale tracker
        for &(base, pages, idx) in &full {
            self.trackers.get(idx).retire();
            self.pages.release(base as *mut u8, pages);
        }
    }

    /// Applies `apply(tracker, run_length)` over a privately-owned chain,
    /// aggregating consecutive blocks of the same span into one call.
    /// Untracked blocks are skipped.
    fn for_tracker_runs(&self, chain: *mut u8, apply: impl Fn(&SpanTracker, usize)) {
        let mut current: Option<&SpanTracker> = None;
        let mut run = 0usize;
        let mut cursor = chain;

        while !cursor.is_null() {
            let tracker = self.trackers.lookup(cursor as usize);

            let same_span = match (current, tracker) {
                (Some(a), Some(b)) => std::ptr::eq(a, b),
                (None, None) => true,
                _ => false,
            };

            if !same_span {
                if let Some(t) = current {
                    apply(t, run);
                }
                current = tracker;
                run = 0;
            }
            if tracker.is_some() {
                run += 1;
            }

            cursor = unsafe { free_list::next_of(cursor) };
        }

        if let Some(t) = current {
            if run > 0 {
                apply(t, run);
            }
        }
    }

    #[cfg(test)]
    pub fn tracked_spans(&self) -> usize {
        self.trackers.registered()
    }

    #[cfg(test)]
    pub fn tracker_free_count(&self, addr: usize) -> Option<usize> {
        self.trackers.lookup(addr).map(|t| t.free_count())
    }

    #[cfg(test)]
    pub fn list_len(&self, index: usize) -> usize {
        let mut n = 0;
        let mut cursor = self.lists[index].head.load(Ordering::Acquire);

        while !cursor.is_null() && n < SCAN_BUDGET {
            n += 1;
            cursor = unsafe { free_list::next_of(cursor) };
        }
        n
    }

    #[cfg(test)]
    pub fn force_reclaim(&self, index: usize) {
        let list = &self.lists[index];

        if list.reclaim_busy.try_acquire() {
            list.spin.acquire();
            self.reclaim_full_spans(index);
            list.spin.release();
            list.reclaim_busy.release();
        }
    }
}
