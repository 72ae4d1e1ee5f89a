use super::constants::{ALIGNMENT, MAX_BYTES};

/// Smallest multiple of ALIGNMENT that fits `bytes` (at least one unit).
pub fn round_up(bytes: usize) -> usize {
    let bytes = bytes.max(ALIGNMENT);
    (bytes + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Class index for a request of `bytes`. Valid for `bytes <= MAX_BYTES`.
pub fn index(bytes: usize) -> usize {
    let bytes = bytes.max(ALIGNMENT);
    (bytes + ALIGNMENT - 1) / ALIGNMENT - 1
}

/// Block size of class `index`.
pub fn class_size(index: usize) -> usize {
    (index + 1) * ALIGNMENT
}

/// How many blocks a thread cache should pull from the central tier in one
/// refill of this class. Small blocks come in big batches, big blocks in
/// small ones.
pub fn batch_hint(class_size: usize) -> usize {
    if class_size <= 64 {
        512
    } else if class_size <= 512 {
        128
    } else if class_size <= 4096 {
        32
    } else {
        4
    }
}
