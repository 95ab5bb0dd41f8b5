//! The store façade
//!
//! Owns an allocator and an eviction policy, maintains the handle registry,
//! and orchestrates admission and eviction. Admission is linearizable: `put`
//! holds one lock across the evict/allocate/write/insert sequence so the
//! capacity invariants cannot be raced apart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::allocator::{Allocator, ByteAllocator};
use crate::config::StoreBuilder;
use crate::error::{Result, UmbraError};
use crate::eviction::EvictionPolicy;
use crate::janitor::Janitor;
use crate::pointer::MemoryPointer;
use crate::units::format_size;
use crate::Handle;

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Lock-free operation counters.
#[derive(Debug, Default)]
struct Counters {
    puts: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    removes: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time view of a store's usage and operation counts.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    /// Arena capacity in bytes.
    pub capacity: u64,
    /// Live bytes across all tiers.
    pub used: u64,
    /// Live bytes in the in-memory tier.
    pub used_memory: u64,
    /// Live bytes in the file tier.
    pub used_file: u64,
    /// Number of live entries.
    pub live_entries: u64,
    /// Successful `put` operations.
    pub puts: u64,
    /// `get` calls that found their entry.
    pub hits: u64,
    /// `get` calls that missed.
    pub misses: u64,
    /// Explicit removals of live entries.
    pub removes: u64,
    /// Entries discarded by the eviction policy.
    pub evictions: u64,
}

impl StoreStats {
    /// Hit rate over all lookups, as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

pub(crate) struct StoreInner {
    allocator: Allocator,
    policy: Box<dyn EvictionPolicy>,

    /// Handle registry. Readers take the shared side; admission, removal
    /// and eviction take the exclusive side.
    registry: RwLock<HashMap<Handle, MemoryPointer>>,

    /// Next handle. Monotonic; handles are never reissued.
    next_id: AtomicU64,

    /// Lifecycle: open, closing, closed.
    state: AtomicU8,

    /// Serializes the evict/allocate/write/insert admission sequence.
    admission: Mutex<()>,

    counters: Counters,
}

impl StoreInner {
    /// Evict the policy's next victim.
    ///
    /// Returns `false` only when the policy has nothing left to offer. A
    /// ghost victim (known to the policy but absent from the registry) is
    /// purged from the policy and still counts as progress.
    fn evict_one(&self) -> bool {
        let Some(victim) = self.policy.next_victim() else {
            return false;
        };

        let removed = self.registry.write().remove(&victim);
        match removed {
            Some(ptr) => {
                if let Err(e) = self.allocator.free(ptr) {
                    tracing::warn!(victim, "failed to free evicted block: {}", e);
                }
                self.policy.record_removal(victim);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(victim, size = ptr.size, "evicted entry");
            }
            None => {
                tracing::debug!(victim, "purged ghost policy entry");
                self.policy.record_removal(victim);
            }
        }
        true
    }

    /// One cleanup pass: evict while the policy signals pressure.
    ///
    /// Terminates because every iteration shrinks the policy by one entry.
    pub(crate) fn tick(&self) {
        if self.state.load(Ordering::Acquire) != STATE_OPEN {
            return;
        }

        loop {
            let used = self.allocator.used();
            let total = self.allocator.capacity();
            if !self.policy.should_evict(used, total) {
                break;
            }
            if !self.evict_one() {
                break;
            }
        }
    }

    fn remove_entry(&self, id: Handle) {
        let removed = self.registry.write().remove(&id);
        if let Some(ptr) = removed {
            if let Err(e) = self.allocator.free(ptr) {
                tracing::warn!(id, "failed to free removed block: {}", e);
            }
            self.policy.record_removal(id);
            self.counters.removes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Off-heap object store.
///
/// Payloads are opaque byte slices parked outside the host heap and
/// addressed by opaque 64-bit handles. When usage crosses the eviction
/// threshold, the policy discards the least valuable entries to admit new
/// ones.
///
/// All operations take `&self`; the store is meant to be shared across
/// threads (wrap it in an [`Arc`] if multiple owners are needed). Dropping
/// the store closes it.
///
/// # Examples
///
/// ```
/// use umbra::{Store, units};
///
/// let store = Store::with_capacity(units::mib(1))?;
///
/// let id = store.put(b"hello")?;
/// assert_eq!(store.get(id).as_deref(), Some(&b"hello"[..]));
///
/// store.remove(id);
/// assert_eq!(store.get(id), None);
/// # Ok::<(), umbra::UmbraError>(())
/// ```
pub struct Store {
    inner: Arc<StoreInner>,
    janitor: Mutex<Option<Janitor>>,
}

impl Store {
    /// Create a store with default settings: a 1 GiB arena with LRU
    /// eviction at 75% usage.
    pub fn new() -> Result<Self> {
        StoreBuilder::new().build()
    }

    /// Create a store with an arena of the given capacity and otherwise
    /// default settings.
    pub fn with_capacity(bytes: u64) -> Result<Self> {
        StoreBuilder::new().memory_capacity(bytes).build()
    }

    /// Start configuring a store.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub(crate) fn from_parts(
        allocator: Allocator,
        policy: Box<dyn EvictionPolicy>,
        cleanup_interval: Duration,
    ) -> Result<Self> {
        let capacity = allocator.capacity();

        let inner = Arc::new(StoreInner {
            allocator,
            policy,
            registry: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            state: AtomicU8::new(STATE_OPEN),
            admission: Mutex::new(()),
            counters: Counters::default(),
        });

        let janitor = if cleanup_interval > Duration::ZERO {
            Some(Janitor::spawn(Arc::downgrade(&inner), cleanup_interval)?)
        } else {
            None
        };

        tracing::info!("store initialized with capacity {}", format_size(capacity));

        Ok(Store {
            inner,
            janitor: Mutex::new(janitor),
        })
    }

    /// Store a payload and return its handle.
    ///
    /// If admitting the payload would push usage past the eviction
    /// threshold, existing entries are evicted first, oldest first. A
    /// payload no amount of eviction could fit is rejected immediately.
    ///
    /// # Errors
    ///
    /// - `OutOfCapacity` when the payload does not fit even after all
    ///   evictable entries are gone
    /// - `InvalidArgument` on an empty payload
    /// - `Closed` once [`close`](Store::close) has been called
    pub fn put(&self, bytes: &[u8]) -> Result<Handle> {
        let inner = &self.inner;

        if inner.state.load(Ordering::Acquire) != STATE_OPEN {
            return Err(UmbraError::Closed);
        }
        if bytes.is_empty() {
            return Err(UmbraError::InvalidArgument(
                "cannot store an empty payload".to_string(),
            ));
        }

        let need = bytes.len() as u64;
        let capacity = inner.allocator.capacity();
        if need > u32::MAX as u64 {
            return Err(UmbraError::InvalidArgument(format!(
                "payload of {} bytes exceeds the maximum block size",
                need
            )));
        }
        // Larger than the arena can ever hold; eviction cannot help, and
        // the policy must not be disturbed for a hopeless request.
        if need > capacity {
            return Err(UmbraError::OutOfCapacity { requested: need });
        }

        let _admission = inner.admission.lock();

        // Preemptive eviction: make room before allocating.
        let threshold = inner.policy.threshold();
        while (inner.allocator.used() + need) as f64 > capacity as f64 * threshold {
            if !inner.evict_one() {
                break;
            }
        }

        let ptr = match inner.allocator.allocate(bytes.len() as u32) {
            Ok(ptr) => ptr,
            Err(UmbraError::OutOfCapacity { .. }) => {
                // One forced eviction, one retry; a second failure surfaces.
                if !inner.evict_one() {
                    return Err(UmbraError::OutOfCapacity { requested: need });
                }
                inner.allocator.allocate(bytes.len() as u32)?
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = inner.allocator.write(ptr, bytes) {
            // Roll the allocation back so a failed put leaves no trace.
            if let Err(free_err) = inner.allocator.free(ptr) {
                tracing::warn!("failed to roll back allocation: {}", free_err);
            }
            return Err(e);
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        inner.registry.write().insert(id, ptr);
        inner.policy.record_access(id, bytes.len() as u32);
        inner.counters.puts.fetch_add(1, Ordering::Relaxed);

        Ok(id)
    }

    /// Retrieve a payload by handle.
    ///
    /// Returns `None` for handles that were never issued, were removed, or
    /// were evicted. A hit refreshes the entry's position in the eviction
    /// order. Never fails.
    pub fn get(&self, id: Handle) -> Option<Vec<u8>> {
        let inner = &self.inner;

        if inner.state.load(Ordering::Acquire) == STATE_CLOSED {
            return None;
        }

        // Hold the shared registry lock across the read so a concurrent
        // remove cannot free the block mid-copy.
        let registry = inner.registry.read();
        let Some(ptr) = registry.get(&id).copied() else {
            drop(registry);
            inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let result = inner.allocator.read(ptr);
        drop(registry);

        match result {
            Ok(bytes) => {
                inner.policy.record_access(id, ptr.size);
                inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(bytes)
            }
            Err(e) => {
                tracing::error!(id, "failed to read live block: {}", e);
                None
            }
        }
    }

    /// Remove a payload, releasing its storage.
    ///
    /// Removing an unknown or already-removed handle is a no-op.
    pub fn remove(&self, id: Handle) {
        let inner = &self.inner;
        if inner.state.load(Ordering::Acquire) == STATE_CLOSED {
            return;
        }
        inner.remove_entry(id);
    }

    /// Run one cleanup pass, evicting entries while the policy reports
    /// memory pressure.
    ///
    /// The background janitor calls this periodically when a cleanup
    /// interval is configured; embedders that schedule their own
    /// maintenance can call it directly.
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// Arena capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.inner.allocator.capacity()
    }

    /// Live bytes across all tiers.
    pub fn used(&self) -> u64 {
        self.inner.allocator.used()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot usage and operation counters.
    pub fn stats(&self) -> StoreStats {
        let inner = &self.inner;
        StoreStats {
            capacity: inner.allocator.capacity(),
            used: inner.allocator.used(),
            used_memory: inner.allocator.used_memory(),
            used_file: inner.allocator.used_file(),
            live_entries: inner.registry.read().len() as u64,
            puts: inner.counters.puts.load(Ordering::Relaxed),
            hits: inner.counters.hits.load(Ordering::Relaxed),
            misses: inner.counters.misses.load(Ordering::Relaxed),
            removes: inner.counters.removes.load(Ordering::Relaxed),
            evictions: inner.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Serialize a value and store it.
    ///
    /// A serialization failure allocates nothing.
    pub fn put_value<T: Serialize>(&self, value: &T) -> Result<Handle> {
        let bytes = serde_json::to_vec(value)?;
        self.put(&bytes)
    }

    /// Retrieve and deserialize a value.
    ///
    /// Returns `Ok(None)` when the handle has no live entry, and a
    /// `Serialization` error when the stored bytes do not decode as `T`.
    pub fn get_value<T: DeserializeOwned>(&self, id: Handle) -> Result<Option<T>> {
        match self.get(id) {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Close the store, stopping the janitor and releasing all storage.
    ///
    /// New `put`s are refused as soon as the close begins. Scratch files
    /// are deleted. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let inner = &self.inner;

        // Only the first caller performs the transition.
        if inner
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        if let Some(janitor) = self.janitor.lock().take() {
            janitor.stop();
        }

        let result = inner.allocator.close();
        inner.state.store(STATE_CLOSED, Ordering::Release);
        tracing::info!("store closed");
        result
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("error while closing store on drop: {}", e);
        }
    }
}
