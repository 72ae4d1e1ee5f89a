use super::constants::PAGE_SIZE;
use super::page_map;
use std::collections::BTreeMap;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

struct SpanRecord {
    pages: usize,
    free: bool,
}

struct Spans {
    // free span bases bucketed by page count; the end of a bucket is its head
    free: BTreeMap<usize, Vec<usize>>,
    // every base ever handed out keeps a record here until merged away
    records: BTreeMap<usize, SpanRecord>,
}

impl Spans {
    fn unlink_free(&mut self, pages: usize, base: usize) {
        let bucket = self.free.get_mut(&pages).unwrap();
        let pos = bucket.iter().position(|&b| b == base).unwrap();
        bucket.remove(pos);

        if bucket.is_empty() {
            self.free.remove(&pages);
        }
    }

    fn push_free(&mut self, pages: usize, base: usize) {
        self.free.entry(pages).or_default().push(base);
    }
}

/// Supplies runs of contiguous pages and recycles released runs, merging
/// adjacent free spans. Pages acquired from the OS are kept for the life of
/// the process.
pub struct PageCache {
    mapped_bytes: AtomicUsize,
    spans: Mutex<Spans>,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            mapped_bytes: AtomicUsize::new(0),
            spans: Mutex::new(Spans {
                free: BTreeMap::new(),
                records: BTreeMap::new(),
            }),
        }
    }

    /// Total bytes ever mapped from the OS.
    pub fn mapped_bytes(&self) -> usize {
        self.mapped_bytes.load(Ordering::Relaxed)
    }

    /// Returns the base of a span of exactly `num_pages` pages, or null when
    /// the OS refuses fresh pages. Recycled spans larger than the request
    /// are split; the tail stays free.
    pub fn allocate(&self, num_pages: usize) -> *mut u8 {
        debug_assert!(num_pages > 0);

        let mut guard = self.spans.lock().unwrap();
        let spans = &mut *guard;

        // best fit: smallest free span that covers the request
        if let Some(found) = spans.free.range(num_pages..).next().map(|(&p, _)| p) {
            let bucket = spans.free.get_mut(&found).unwrap();
            let base = bucket.pop().unwrap();
            if bucket.is_empty() {
                spans.free.remove(&found);
            }

            if found > num_pages {
                let tail_base = base + num_pages * PAGE_SIZE;
                let tail_pages = found - num_pages;

                spans.records.insert(
                    tail_base,
                    SpanRecord {
                        pages: tail_pages,
                        free: true,
                    },
                );
                spans.push_free(tail_pages, tail_base);
            }

            let record = spans.records.get_mut(&base).unwrap();
            record.pages = num_pages;
            record.free = false;

            return base as *mut u8;
        }

        let ptr = page_map::map_pages(num_pages);
        if ptr.is_null() {
            return null_mut();
        }

        self.mapped_bytes
            .fetch_add(num_pages * PAGE_SIZE, Ordering::Relaxed);
        spans.records.insert(
            ptr as usize,
            SpanRecord {
                pages: num_pages,
                free: false,
            },
        );

        ptr
    }

    /// Returns a span to the free pool, merging it with free neighbors.
    /// Addresses that did not originate here, and spans already free, are
    /// silently ignored.
    pub fn release(&self, base: *mut u8, num_pages: usize) {
        let mut guard = self.spans.lock().unwrap();
        let spans = &mut *guard;

        let mut cur_base = base as usize;
        let mut cur_pages = match spans.records.get(&cur_base) {
            Some(record) if !record.free => record.pages,
            _ => return,
        };
        debug_assert_eq!(cur_pages, num_pages);

        // merge into a free predecessor that ends exactly at our base
        if let Some((&prev_base, prev)) = spans.records.range(..cur_base).next_back() {
            if prev.free && prev_base + prev.pages * PAGE_SIZE == cur_base {
                let prev_pages = prev.pages;

                spans.unlink_free(prev_pages, prev_base);
                spans.records.remove(&cur_base);

                cur_base = prev_base;
                cur_pages += prev_pages;
            }
        }

        // absorb a free successor starting exactly at our end
        let succ_base = cur_base + cur_pages * PAGE_SIZE;
        if let Some(succ) = spans.records.get(&succ_base) {
            if succ.free {
                let succ_pages = succ.pages;

                spans.unlink_free(succ_pages, succ_base);
                spans.records.remove(&succ_base);

                cur_pages += succ_pages;
            }
        }

        let record = spans.records.get_mut(&cur_base).unwrap();
        record.pages = cur_pages;
        record.free = true;
        spans.push_free(cur_pages, cur_base);
    }

    /// Pages currently sitting free in the cache.
    pub fn free_pages(&self) -> usize {
        self.spans
            .lock()
            .unwrap()
            .free
            .iter()
            .map(|(&pages, bucket)| pages * bucket.len())
            .sum()
    }

    /// (page count, spans of that size) for every free bucket, ascending.
    #[cfg(test)]
    pub fn free_shape(&self) -> Vec<(usize, usize)> {
        self.spans
            .lock()
            .unwrap()
            .free
            .iter()
            .map(|(&pages, bucket)| (pages, bucket.len()))
            .collect()
    }
}
