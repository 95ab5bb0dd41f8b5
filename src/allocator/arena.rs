//! Bounded off-heap arena
//!
//! A single contiguous region allocated outside the host heap, carved into
//! blocks by a free-extent allocator. Freed space is tracked as byte extents
//! in a B-tree with automatic coalescing, so holes are reused instead of
//! leaking to a bump cursor.

use std::alloc::{alloc, dealloc, Layout};
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::allocator::ByteAllocator;
use crate::error::{Result, UmbraError};
use crate::pointer::{Location, MemoryPointer};

/// Alignment guaranteed for the start of every arena block.
const ALIGNMENT: usize = 8;

/// Rounds a length up to the block alignment.
const fn align_up(len: u64) -> u64 {
    (len + ALIGNMENT as u64 - 1) & !(ALIGNMENT as u64 - 1)
}

/// A raw off-heap region with its allocation layout.
struct Region {
    base: NonNull<u8>,
    layout: Layout,
}

impl Region {
    fn new(capacity: u64) -> Result<Self> {
        let layout = Layout::from_size_align(capacity as usize, ALIGNMENT)
            .map_err(|e| UmbraError::InvalidArgument(format!("invalid region layout: {}", e)))?;

        // SAFETY: the layout is valid and non-zero sized (capacity is
        // checked by the caller).
        let raw = unsafe { alloc(layout) };
        let base = NonNull::new(raw).ok_or(UmbraError::OutOfCapacity {
            requested: capacity,
        })?;

        Ok(Region { base, layout })
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

// SAFETY: the region is a plain byte range. All carving is serialized by the
// arena's extent lock, and the store layer never aliases a live block with
// another writer (one pointer, one handle).
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

/// Off-heap arena backend with free-extent reclamation.
///
/// Invariants:
/// - every block starts 8-byte aligned; free extents always start aligned
/// - `used` is the sum of live block sizes and never exceeds `capacity`
pub(crate) struct ArenaAllocator {
    region: Region,
    capacity: u64,

    /// Live bytes (requested sizes, not aligned footprints).
    used: AtomicU64,

    /// Free extents indexed by byte offset; values are extent lengths.
    /// BTreeMap provides sorted order for efficient coalescing.
    free: Mutex<BTreeMap<u64, u64>>,
}

impl ArenaAllocator {
    /// Create a new arena of `capacity` bytes.
    pub(crate) fn new(capacity: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(UmbraError::InvalidArgument(
                "arena capacity must be non-zero".to_string(),
            ));
        }

        let region = Region::new(capacity)?;

        let mut free = BTreeMap::new();
        free.insert(0, capacity);

        Ok(ArenaAllocator {
            region,
            capacity,
            used: AtomicU64::new(0),
            free: Mutex::new(free),
        })
    }

    /// Bytes actually consumed by a block at `offset`: the aligned footprint,
    /// clipped at the end of the region where padding has nowhere to spill.
    fn footprint(&self, offset: u64, size: u32) -> u64 {
        align_up(size as u64).min(self.capacity - offset)
    }

    /// Validate a pointer and return its offset.
    fn check(&self, ptr: MemoryPointer) -> Result<usize> {
        let Location::InMemory(offset) = ptr.location else {
            return Err(UmbraError::InvalidPointer);
        };
        if offset % ALIGNMENT != 0 || offset as u64 + ptr.size as u64 > self.capacity {
            return Err(UmbraError::InvalidPointer);
        }
        Ok(offset)
    }

    /// Insert a free extent and coalesce with adjacent extents.
    fn insert_and_coalesce(free: &mut BTreeMap<u64, u64>, mut offset: u64, mut len: u64) {
        // Merge with the extent ending exactly at `offset`.
        if let Some((&prev_off, &prev_len)) = free.range(..offset).next_back() {
            if prev_off + prev_len == offset {
                free.remove(&prev_off);
                offset = prev_off;
                len += prev_len;
            }
        }

        // Merge with the extent starting exactly at the end.
        if let Some((&next_off, &next_len)) = free.range(offset + len..).next() {
            if offset + len == next_off {
                free.remove(&next_off);
                len += next_len;
            }
        }

        free.insert(offset, len);
    }

    /// Number of free extents (fragmentation indicator).
    #[cfg(test)]
    fn extent_count(&self) -> usize {
        self.free.lock().len()
    }
}

impl ByteAllocator for ArenaAllocator {
    fn allocate(&self, size: u32) -> Result<MemoryPointer> {
        if size == 0 {
            return Err(UmbraError::InvalidArgument(
                "allocation size must be non-zero".to_string(),
            ));
        }

        let need = size as u64;
        if self.used.load(Ordering::Relaxed) + need > self.capacity {
            return Err(UmbraError::OutOfCapacity { requested: need });
        }

        let aligned = align_up(need);
        let mut free = self.free.lock();

        // Best fit: the smallest extent that holds the aligned footprint. An
        // extent running to the end of the region qualifies on the raw size
        // alone, since its alignment padding is clipped at the boundary.
        let best = free
            .iter()
            .filter(|&(&off, &len)| len >= aligned || (off + len == self.capacity && len >= need))
            .min_by_key(|&(_, &len)| len)
            .map(|(&off, &len)| (off, len));

        let Some((offset, len)) = best else {
            return Err(UmbraError::OutOfCapacity { requested: need });
        };

        free.remove(&offset);
        let consumed = self.footprint(offset, size);
        if len > consumed {
            free.insert(offset + consumed, len - consumed);
        }

        self.used.fetch_add(need, Ordering::Relaxed);

        Ok(MemoryPointer::in_memory(offset as usize, size))
    }

    fn write(&self, ptr: MemoryPointer, bytes: &[u8]) -> Result<()> {
        let offset = self.check(ptr)?;
        if bytes.len() > ptr.size as usize {
            return Err(UmbraError::InvalidArgument(format!(
                "payload of {} bytes exceeds block size {}",
                bytes.len(),
                ptr.size
            )));
        }

        // SAFETY: the bounds check above keeps the copy inside the region,
        // and no other thread writes this block while the store layer holds
        // its pointer.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.region.base.as_ptr().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    fn read(&self, ptr: MemoryPointer) -> Result<Vec<u8>> {
        let offset = self.check(ptr)?;

        // SAFETY: bounds checked; live blocks are never concurrently
        // rewritten, so the copy is not torn.
        let bytes = unsafe {
            std::slice::from_raw_parts(self.region.base.as_ptr().add(offset), ptr.size as usize)
                .to_vec()
        };
        Ok(bytes)
    }

    fn free(&self, ptr: MemoryPointer) -> Result<()> {
        let offset = self.check(ptr)? as u64;
        let consumed = self.footprint(offset, ptr.size);

        let mut free = self.free.lock();
        Self::insert_and_coalesce(&mut free, offset, consumed);
        drop(free);

        self.used.fetch_sub(ptr.size as u64, Ordering::Relaxed);
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    fn close(&self) -> Result<()> {
        // The region itself is released when the arena is dropped.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_creation() {
        let arena = ArenaAllocator::new(1000).unwrap();
        assert_eq!(arena.capacity(), 1000);
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.extent_count(), 1);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            ArenaAllocator::new(0),
            Err(UmbraError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_size_allocation_rejected() {
        let arena = ArenaAllocator::new(1000).unwrap();
        assert!(matches!(
            arena.allocate(0),
            Err(UmbraError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_write_read_round_trip() {
        let arena = ArenaAllocator::new(1000).unwrap();

        let ptr = arena.allocate(11).unwrap();
        arena.write(ptr, b"hello arena").unwrap();

        assert_eq!(arena.read(ptr).unwrap(), b"hello arena");
    }

    #[test]
    fn test_blocks_are_aligned() {
        let arena = ArenaAllocator::new(1000).unwrap();

        // Odd sizes must not misalign subsequent blocks.
        for size in [1, 3, 7, 13, 100] {
            let ptr = arena.allocate(size).unwrap();
            let Location::InMemory(offset) = ptr.location else {
                panic!("arena pointer must be in-memory");
            };
            assert_eq!(offset % 8, 0);
        }
    }

    #[test]
    fn test_exact_capacity_succeeds() {
        let arena = ArenaAllocator::new(1000).unwrap();
        let ptr = arena.allocate(1000).unwrap();
        assert_eq!(arena.used(), 1000);

        arena.free(ptr).unwrap();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.extent_count(), 1);
    }

    #[test]
    fn test_over_capacity_fails() {
        let arena = ArenaAllocator::new(1000).unwrap();
        let result = arena.allocate(1001);
        assert!(matches!(result, Err(UmbraError::OutOfCapacity { .. })));
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_unaligned_tail_is_allocatable() {
        // Capacity not a multiple of the alignment: the final block absorbs
        // the clipped padding.
        let arena = ArenaAllocator::new(100).unwrap();
        let ptr = arena.allocate(100).unwrap();
        assert_eq!(arena.used(), 100);

        arena.free(ptr).unwrap();
        assert_eq!(arena.used(), 0);

        // The full region is allocatable again.
        arena.allocate(100).unwrap();
    }

    #[test]
    fn test_free_reclaims_holes() {
        let arena = ArenaAllocator::new(1000).unwrap();

        let a = arena.allocate(300).unwrap();
        let b = arena.allocate(300).unwrap();
        let c = arena.allocate(300).unwrap();
        assert_eq!(arena.used(), 900);

        // Free the middle block and allocate into the hole.
        arena.free(b).unwrap();
        assert_eq!(arena.used(), 600);

        let d = arena.allocate(300).unwrap();
        assert_eq!(d.location, b.location);

        arena.free(a).unwrap();
        arena.free(c).unwrap();
        arena.free(d).unwrap();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.extent_count(), 1);
    }

    #[test]
    fn test_coalescing_merges_neighbours() {
        let arena = ArenaAllocator::new(1000).unwrap();

        let a = arena.allocate(104).unwrap();
        let b = arena.allocate(104).unwrap();
        let c = arena.allocate(104).unwrap();

        arena.free(a).unwrap();
        arena.free(c).unwrap();
        // a leaves a hole; c's hole merges into the tail extent.
        assert_eq!(arena.extent_count(), 2);

        arena.free(b).unwrap();
        // Freeing b bridges everything back into one extent.
        assert_eq!(arena.extent_count(), 1);
    }

    #[test]
    fn test_churn_does_not_exhaust() {
        // A bump-only arena would fail this: repeated allocate/free cycles
        // must keep succeeding because holes are reused.
        let arena = ArenaAllocator::new(1000).unwrap();

        for _ in 0..100 {
            let ptr = arena.allocate(800).unwrap();
            arena.free(ptr).unwrap();
        }
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_foreign_tier_pointer_rejected() {
        let arena = ArenaAllocator::new(1000).unwrap();
        let foreign = MemoryPointer::on_file(0, 10);

        assert!(matches!(
            arena.read(foreign),
            Err(UmbraError::InvalidPointer)
        ));
        assert!(matches!(
            arena.write(foreign, b"x"),
            Err(UmbraError::InvalidPointer)
        ));
        assert!(matches!(
            arena.free(foreign),
            Err(UmbraError::InvalidPointer)
        ));
    }

    #[test]
    fn test_out_of_bounds_pointer_rejected() {
        let arena = ArenaAllocator::new(1000).unwrap();
        let bogus = MemoryPointer::in_memory(992, 100);
        assert!(matches!(arena.read(bogus), Err(UmbraError::InvalidPointer)));
    }

    #[test]
    fn test_oversized_write_rejected() {
        let arena = ArenaAllocator::new(1000).unwrap();
        let ptr = arena.allocate(4).unwrap();
        assert!(matches!(
            arena.write(ptr, b"too many bytes"),
            Err(UmbraError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_short_write_keeps_block_readable() {
        let arena = ArenaAllocator::new(1000).unwrap();
        let ptr = arena.allocate(16).unwrap();
        arena.write(ptr, b"abc").unwrap();

        let bytes = arena.read(ptr).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..3], b"abc");
    }

    #[test]
    fn test_used_tracks_requested_sizes() {
        let arena = ArenaAllocator::new(1000).unwrap();

        let a = arena.allocate(7).unwrap();
        let b = arena.allocate(9).unwrap();
        assert_eq!(arena.used(), 16);

        arena.free(a).unwrap();
        assert_eq!(arena.used(), 9);
        arena.free(b).unwrap();
        assert_eq!(arena.used(), 0);
    }
}
