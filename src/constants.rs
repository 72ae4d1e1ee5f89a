/// Word-aligned allocation unit. Every class size is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Largest request served by the tiers; anything bigger bypasses to the
/// system allocator.
pub const MAX_BYTES: usize = 256 * 1024;

/// One size class per ALIGNMENT step up to MAX_BYTES.
pub const CLASS_COUNT: usize = MAX_BYTES / ALIGNMENT;

pub const PAGE_SIZE: usize = 4096;

/// Default span size for a central-tier refill, in pages.
pub const SPAN_PAGES: usize = 8;

/// A single refill span never exceeds this many pages.
pub const MAX_SPAN_PAGES: usize = 128;

/// A refill targets at least this many blocks per span.
pub const MIN_REFILL_BLOCKS: usize = 64;

/// Returns to a central list before a reclamation sweep is considered.
pub const MAX_DELAY_COUNT: usize = 48;

/// Minimum time between reclamation sweeps of one class.
pub const DELAY_INTERVAL_MS: u64 = 1000;

/// Thread-tier list length that triggers an eviction to the central tier.
pub const HIGH_WATER: usize = 256;

/// Concurrently tracked spans; spans past this stay usable but are never
/// returned to the page tier.
pub const TRACKER_CAPACITY: usize = 1024;

/// Failed head CAS attempts before a publisher falls back to the spin.
pub const CAS_RETRY_BUDGET: usize = 1_000_000;

/// Nodes a sweep will walk before treating the list as cycle-suspect.
pub const SCAN_BUDGET: usize = 1_000_000;

const _: () = assert!(ALIGNMENT >= std::mem::size_of::<*mut u8>());
const _: () = assert!(MAX_BYTES % ALIGNMENT == 0);
const _: () = assert!(PAGE_SIZE % ALIGNMENT == 0);
const _: () = assert!(SPAN_PAGES <= MAX_SPAN_PAGES);
