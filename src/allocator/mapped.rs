//! Memory-mapped file backend
//!
//! A bounded region backed by a scratch file mapped read-write into the
//! address space. Allocation is a bump cursor that never rewinds: `free`
//! zeroes the block and releases its bytes from the live counter, but the
//! space is not reused. This makes the backend a fit for write-mostly
//! workloads where entries are appended and eventually discarded wholesale.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;

use crate::allocator::ByteAllocator;
use crate::error::{Result, UmbraError};
use crate::pointer::{Location, MemoryPointer};

pub(crate) struct MappedAllocator {
    /// The mapping. `None` once closed.
    map: Mutex<Option<MmapMut>>,
    path: PathBuf,
    capacity: u64,

    /// Bump position of the next allocation.
    cursor: Mutex<u64>,

    /// Live bytes.
    used: AtomicU64,
}

impl MappedAllocator {
    /// Create a mapped region of `capacity` bytes backed by `path`.
    pub(crate) fn new<P: AsRef<Path>>(capacity: u64, path: P) -> Result<Self> {
        if capacity == 0 {
            return Err(UmbraError::InvalidArgument(
                "mapped capacity must be non-zero".to_string(),
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(capacity)?;

        // SAFETY: the file was just created and sized by us; no other
        // mapping of it exists.
        let map = unsafe { MmapOptions::new().map_mut(&file)? };

        Ok(MappedAllocator {
            map: Mutex::new(Some(map)),
            path: path.as_ref().to_path_buf(),
            capacity,
            cursor: Mutex::new(0),
            used: AtomicU64::new(0),
        })
    }

    fn check(&self, ptr: MemoryPointer) -> Result<u64> {
        let Location::OnFile(offset) = ptr.location else {
            return Err(UmbraError::InvalidPointer);
        };
        if offset + ptr.size as u64 > self.capacity {
            return Err(UmbraError::InvalidPointer);
        }
        Ok(offset)
    }
}

impl ByteAllocator for MappedAllocator {
    fn allocate(&self, size: u32) -> Result<MemoryPointer> {
        if size == 0 {
            return Err(UmbraError::InvalidArgument(
                "allocation size must be non-zero".to_string(),
            ));
        }

        let mut cursor = self.cursor.lock();
        if *cursor + size as u64 > self.capacity {
            return Err(UmbraError::OutOfCapacity {
                requested: size as u64,
            });
        }

        let offset = *cursor;
        *cursor += size as u64;
        drop(cursor);

        self.used.fetch_add(size as u64, Ordering::Relaxed);
        Ok(MemoryPointer::on_file(offset, size))
    }

    fn write(&self, ptr: MemoryPointer, bytes: &[u8]) -> Result<()> {
        let offset = self.check(ptr)? as usize;
        if bytes.len() > ptr.size as usize {
            return Err(UmbraError::InvalidArgument(format!(
                "payload of {} bytes exceeds block size {}",
                bytes.len(),
                ptr.size
            )));
        }

        let mut guard = self.map.lock();
        let Some(map) = guard.as_mut() else {
            return Err(UmbraError::Closed);
        };
        map[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, ptr: MemoryPointer) -> Result<Vec<u8>> {
        let offset = self.check(ptr)? as usize;

        let guard = self.map.lock();
        let Some(map) = guard.as_ref() else {
            return Err(UmbraError::Closed);
        };
        Ok(map[offset..offset + ptr.size as usize].to_vec())
    }

    fn free(&self, ptr: MemoryPointer) -> Result<()> {
        let offset = self.check(ptr)? as usize;

        // Zero the block; the cursor does not rewind.
        let mut guard = self.map.lock();
        let Some(map) = guard.as_mut() else {
            return Err(UmbraError::Closed);
        };
        map[offset..offset + ptr.size as usize].fill(0);
        drop(guard);

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
        let taken = self.map.lock().take();
        if let Some(map) = taken {
            map.flush()?;
            drop(map);
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    "failed to delete mapped file: {}", e
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backing(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("mapped.bin")
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let alloc = MappedAllocator::new(1000, backing(&dir)).unwrap();

        let ptr = alloc.allocate(12).unwrap();
        alloc.write(ptr, b"hello mapped").unwrap();
        assert_eq!(alloc.read(ptr).unwrap(), b"hello mapped");
    }

    #[test]
    fn test_capacity_bound() {
        let dir = TempDir::new().unwrap();
        let alloc = MappedAllocator::new(1000, backing(&dir)).unwrap();

        alloc.allocate(1000).unwrap();
        let result = alloc.allocate(1);
        assert!(matches!(result, Err(UmbraError::OutOfCapacity { .. })));
    }

    #[test]
    fn test_free_zeroes_and_releases() {
        let dir = TempDir::new().unwrap();
        let alloc = MappedAllocator::new(1000, backing(&dir)).unwrap();

        let a = alloc.allocate(8).unwrap();
        alloc.write(a, &[0xFF; 8]).unwrap();
        assert_eq!(alloc.used(), 8);

        alloc.free(a).unwrap();
        assert_eq!(alloc.used(), 0);

        // The cursor is bump-only: the freed range is not handed out again,
        // and the zeroed bytes stay zero.
        let b = alloc.allocate(8).unwrap();
        assert!(matches!(b.location, Location::OnFile(8)));
    }

    #[test]
    fn test_foreign_tier_pointer_rejected() {
        let dir = TempDir::new().unwrap();
        let alloc = MappedAllocator::new(1000, backing(&dir)).unwrap();

        let foreign = MemoryPointer::in_memory(0, 8);
        assert!(matches!(
            alloc.read(foreign),
            Err(UmbraError::InvalidPointer)
        ));
    }

    #[test]
    fn test_close_deletes_backing_file() {
        let dir = TempDir::new().unwrap();
        let path = backing(&dir);
        let alloc = MappedAllocator::new(1000, &path).unwrap();

        assert!(path.exists());
        alloc.close().unwrap();
        assert!(!path.exists());
        alloc.close().unwrap();
    }
}
