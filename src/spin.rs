use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// One-bit test-and-set flag. Critical sections behind it are short list
/// walks, so contention is handled by yielding rather than parking.
pub struct SpinFlag {
    locked: AtomicBool,
}

impl SpinFlag {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Test-and-set until the flag is ours.
    pub fn acquire(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            thread::yield_now();
        }
    }

    /// Single test-and-set, no spinning. Used to elect one reclamation
    /// worker.
    pub fn try_acquire(&self) -> bool {
        !self.locked.swap(true, Ordering::Acquire)
    }

    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}
