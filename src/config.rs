//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::allocator::{Allocator, ArenaAllocator, HybridAllocator, MappedAllocator};
use crate::error::{Result, UmbraError};
use crate::eviction::{EvictionPolicy, LruPolicy};
use crate::store::Store;
use crate::units::gib;

/// Default arena capacity (1 GiB).
pub const DEFAULT_MEMORY_CAPACITY: u64 = gib(1);

/// Default arena fill ratio above which the hybrid backend spills to file.
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.5;

/// Default usage ratio at which eviction kicks in.
pub const DEFAULT_EVICTION_THRESHOLD: f64 = 0.75;

/// Default cleanup cadence (60 seconds).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Which backend holds the payload bytes.
enum Backend {
    Arena,
    Hybrid { path: PathBuf },
    Mapped { path: PathBuf },
}

/// Configures and constructs a [`Store`].
///
/// All settings have defaults; only deviations need to be spelled out.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use umbra::{Store, units};
///
/// let store = Store::builder()
///     .memory_capacity(units::mib(256))
///     .eviction_threshold(0.9)
///     .cleanup_interval(Duration::from_secs(5))
///     .hybrid("/tmp/umbra-spill.bin")
///     .build()?;
/// # Ok::<(), umbra::UmbraError>(())
/// ```
pub struct StoreBuilder {
    memory_capacity: u64,
    memory_threshold: f64,
    eviction_threshold: f64,
    cleanup_interval: Duration,
    backend: Backend,
    policy: Option<Box<dyn EvictionPolicy>>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        StoreBuilder {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            backend: Backend::Arena,
            policy: None,
        }
    }

    /// Arena capacity in bytes.
    pub fn memory_capacity(mut self, bytes: u64) -> Self {
        self.memory_capacity = bytes;
        self
    }

    /// Arena fill ratio above which the hybrid backend spills new payloads
    /// to its scratch file. Only meaningful together with [`hybrid`].
    ///
    /// [`hybrid`]: StoreBuilder::hybrid
    pub fn memory_threshold(mut self, ratio: f64) -> Self {
        self.memory_threshold = ratio;
        self
    }

    /// Usage ratio at which the default policy starts evicting.
    pub fn eviction_threshold(mut self, ratio: f64) -> Self {
        self.eviction_threshold = ratio;
        self
    }

    /// Cadence of the background cleanup thread. `Duration::ZERO` disables
    /// the thread entirely; [`Store::tick`] remains callable either way.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Use the hybrid backend, spilling to a scratch file at `path` once
    /// the arena crosses the memory threshold. The file is deleted on
    /// close.
    pub fn hybrid(mut self, path: impl Into<PathBuf>) -> Self {
        self.backend = Backend::Hybrid { path: path.into() };
        self
    }

    /// Use the memory-mapped backend with its bounded region backed by a
    /// file at `path`. The file is deleted on close.
    pub fn mapped(mut self, path: impl Into<PathBuf>) -> Self {
        self.backend = Backend::Mapped { path: path.into() };
        self
    }

    /// Replace the default LRU policy.
    pub fn policy<P: EvictionPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Validate the configuration and construct the store.
    pub fn build(self) -> Result<Store> {
        if self.memory_capacity == 0 {
            return Err(UmbraError::InvalidArgument(
                "memory capacity must be non-zero".to_string(),
            ));
        }
        if !(self.eviction_threshold > 0.0 && self.eviction_threshold < 1.0) {
            return Err(UmbraError::InvalidArgument(format!(
                "eviction threshold must be in (0, 1), got {}",
                self.eviction_threshold
            )));
        }

        let allocator = match self.backend {
            Backend::Arena => Allocator::Arena(ArenaAllocator::new(self.memory_capacity)?),
            Backend::Hybrid { path } => Allocator::Hybrid(HybridAllocator::new(
                self.memory_capacity,
                path,
                self.memory_threshold,
            )?),
            Backend::Mapped { path } => {
                Allocator::Mapped(MappedAllocator::new(self.memory_capacity, path)?)
            }
        };

        let policy = match self.policy {
            Some(policy) => policy,
            None => Box::new(LruPolicy::new(self.eviction_threshold)?),
        };

        Store::from_parts(allocator, policy, self.cleanup_interval)
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_eviction_threshold_rejected() {
        for threshold in [0.0, 1.0, -0.1, 1.1] {
            let result = StoreBuilder::new()
                .memory_capacity(1000)
                .eviction_threshold(threshold)
                .cleanup_interval(Duration::ZERO)
                .build();
            assert!(matches!(result, Err(UmbraError::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = StoreBuilder::new()
            .memory_capacity(0)
            .cleanup_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(UmbraError::InvalidArgument(_))));
    }

    #[test]
    fn test_invalid_memory_threshold_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = StoreBuilder::new()
            .memory_capacity(1000)
            .memory_threshold(1.5)
            .cleanup_interval(Duration::ZERO)
            .hybrid(dir.path().join("spill.bin"))
            .build();
        assert!(matches!(result, Err(UmbraError::InvalidArgument(_))));
    }

    #[test]
    fn test_defaults_build() {
        let store = StoreBuilder::new()
            .memory_capacity(4096)
            .cleanup_interval(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(store.capacity(), 4096);
        assert_eq!(store.used(), 0);
    }
}
