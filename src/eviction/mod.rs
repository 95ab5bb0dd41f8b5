//! Eviction policies
//!
//! A policy tracks the access order of live handles and answers two
//! questions: is the store under memory pressure, and which entry should go
//! next. The store invokes it from user-facing operations and from the
//! background janitor, so implementations must serialize internally.

mod lru;

pub use lru::LruPolicy;

use std::sync::Arc;

use crate::Handle;

/// A strategy for choosing eviction victims under memory pressure.
pub trait EvictionPolicy: Send + Sync {
    /// Record an access to an entry, making it the most recently used.
    /// Unknown entries are inserted; `size` updates the entry's known
    /// payload size either way.
    fn record_access(&self, id: Handle, size: u32);

    /// Forget an entry after it was removed or evicted.
    fn record_removal(&self, id: Handle);

    /// Peek at the next victim without unlinking it, or `None` when the
    /// policy tracks nothing.
    fn next_victim(&self) -> Option<Handle>;

    /// Whether memory pressure warrants eviction. Memoryless: the answer
    /// depends only on the arguments and the configured threshold.
    fn should_evict(&self, used: u64, total: u64) -> bool;

    /// The configured pressure ratio, in (0, 1).
    fn threshold(&self) -> f64;
}

// Policies are often shared between a store and its observers.
impl<P: EvictionPolicy + ?Sized> EvictionPolicy for Arc<P> {
    fn record_access(&self, id: Handle, size: u32) {
        (**self).record_access(id, size)
    }

    fn record_removal(&self, id: Handle) {
        (**self).record_removal(id)
    }

    fn next_victim(&self) -> Option<Handle> {
        (**self).next_victim()
    }

    fn should_evict(&self, used: u64, total: u64) -> bool {
        (**self).should_evict(used, total)
    }

    fn threshold(&self) -> f64 {
        (**self).threshold()
    }
}
