//! Least-recently-used eviction.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::error::{Result, UmbraError};
use crate::eviction::EvictionPolicy;
use crate::Handle;

/// Access-ordered state behind one lock.
#[derive(Debug, Default)]
struct LruState {
    /// Handles ordered by recency (front is most recent, back is the
    /// victim). Ties are broken by strict insertion order.
    order: VecDeque<Handle>,
    /// Last known payload size per handle.
    sizes: HashMap<Handle, u32>,
}

/// An eviction policy that victimizes the least recently used entry.
#[derive(Debug)]
pub struct LruPolicy {
    threshold: f64,
    state: RwLock<LruState>,
}

impl LruPolicy {
    /// Create an LRU policy that signals pressure at the given ratio of
    /// used to total bytes.
    ///
    /// The threshold must lie strictly between 0 and 1.
    pub fn new(threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(UmbraError::InvalidArgument(format!(
                "eviction threshold must be in (0, 1), got {}",
                threshold
            )));
        }

        Ok(LruPolicy {
            threshold,
            state: RwLock::new(LruState::default()),
        })
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.state.read().sizes.len()
    }

    /// Whether the policy tracks nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EvictionPolicy for LruPolicy {
    /// Move the entry to the most-recent end, inserting it if unknown.
    fn record_access(&self, id: Handle, size: u32) {
        let mut state = self.state.write();

        if state.sizes.insert(id, size).is_some() {
            // Unlink the stale position before re-inserting at the front.
            if let Some(pos) = state.order.iter().position(|&h| h == id) {
                state.order.remove(pos);
            }
        }
        state.order.push_front(id);
    }

    fn record_removal(&self, id: Handle) {
        let mut state = self.state.write();

        if state.sizes.remove(&id).is_some() {
            state.order.retain(|&h| h != id);
        }
    }

    fn next_victim(&self) -> Option<Handle> {
        self.state.read().order.back().copied()
    }

    fn should_evict(&self, used: u64, total: u64) -> bool {
        if total == 0 {
            return false;
        }
        (used as f64) / (total as f64) >= self.threshold
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}
