//! Process-wide id generation.
//!
//! Expression nodes and object instances draw unique, monotonic ids from a
//! single atomic counter. Ids 0 and 1 are reserved for the interned boolean
//! hashed values; ids derived from plain data content live in a disjoint,
//! tagged id space so they can never collide with generated ids.

use std::sync::atomic::{AtomicU64, Ordering};

/// Ids 0 and 1 belong to `false` and `true`.
pub(crate) const FALSE_ID: u64 = 0;
pub(crate) const TRUE_ID: u64 = 1;

/// The wildcard sentinel id; compares equal to every hashed value.
pub(crate) const ANY_ID: u64 = u64::MAX;

/// Tag bit marking ids derived from value content rather than the counter.
pub(crate) const CONTENT_TAG: u64 = 1 << 63;

static COUNTER: AtomicU64 = AtomicU64::new(2);

/// Next unique id. Never reuses a value within a process.
pub(crate) fn next_id() -> u64 {
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Map a content hash into the tagged id space, avoiding the reserved ids.
pub(crate) fn content_id(hash: u64) -> u64 {
    let id = hash | CONTENT_TAG;
    if id == ANY_ID {
        id - 1
    } else {
        id
    }
}
