//! umbra — embeddable off-heap object cache
//!
//! Parks large volumes of serialized objects outside the host heap,
//! addressed by opaque 64-bit handles, so the managed heap stays small
//! while cold data lives in a bounded arena or spills to disk.
//!
//! ## Features
//!
//! - **Off-heap arena** with free-extent reclamation and 8-byte-aligned
//!   blocks
//! - **Tiered storage**: the hybrid backend spills to an ephemeral scratch
//!   file once the arena crosses a configurable fill ratio
//! - **Automatic eviction** driven by a pluggable policy (LRU by default)
//! - **Thread-safe**: linearizable admission, shared-lock reads, atomic
//!   counters
//! - **Background cleanup** on a configurable cadence, or an explicit
//!   [`Store::tick`] for embedders that schedule their own maintenance
//!
//! ## Example
//!
//! ```
//! use umbra::{Store, units};
//!
//! let store = Store::with_capacity(units::mib(64))?;
//!
//! let id = store.put(b"a large serialized object")?;
//! assert_eq!(store.get(id).as_deref(), Some(&b"a large serialized object"[..]));
//!
//! store.remove(id);
//! assert_eq!(store.get(id), None);
//! # Ok::<(), umbra::UmbraError>(())
//! ```
//!
//! Handles are minted monotonically and never reused; a handle stays valid
//! until its entry is removed or evicted. The store never inspects payload
//! bytes — serialization belongs to the embedding application, though
//! [`Store::put_value`] and [`Store::get_value`] offer a JSON convenience
//! layer.

mod allocator;
mod config;
pub mod error;
pub mod eviction;
mod janitor;
mod pointer;
mod store;
pub mod units;

pub use config::{
    StoreBuilder, DEFAULT_CLEANUP_INTERVAL, DEFAULT_EVICTION_THRESHOLD, DEFAULT_MEMORY_CAPACITY,
    DEFAULT_MEMORY_THRESHOLD,
};
pub use error::{Result, UmbraError};
pub use eviction::{EvictionPolicy, LruPolicy};
pub use store::{Store, StoreStats};

/// Opaque identity of a stored payload.
///
/// Non-zero, minted monotonically from 1, and never reused by the issuing
/// store.
pub type Handle = u64;
