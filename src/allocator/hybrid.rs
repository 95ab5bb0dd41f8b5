//! Hybrid backend: arena with file spill
//!
//! Payloads land in the off-heap arena while it is below the configured fill
//! ratio; beyond that they are appended to a scratch file. The file tier is
//! semantically unbounded: `capacity()` reports only the arena, and freed
//! file ranges are not compacted.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::allocator::{ArenaAllocator, ByteAllocator};
use crate::error::{Result, UmbraError};
use crate::pointer::{Location, MemoryPointer};

/// Arena-plus-file backend.
///
/// The scratch file is ephemeral: it is created empty on construction and
/// deleted on close. Its format is a raw concatenation of payloads at
/// monotonically increasing offsets, with no header and no index.
pub(crate) struct HybridAllocator {
    arena: ArenaAllocator,

    /// Arena fill ratio above which new allocations spill to the file.
    memory_threshold: f64,

    /// Scratch file channel. Position and transfer form one critical
    /// section because the handle carries cursor state.
    file: Mutex<Option<File>>,
    path: PathBuf,

    /// Next append offset. Advanced by exactly the allocation size; freed
    /// ranges are never rewound.
    file_cursor: AtomicU64,

    /// Live bytes in the file tier.
    used_file: AtomicU64,
}

impl HybridAllocator {
    /// Create a hybrid backend with an arena of `capacity` bytes spilling to
    /// a scratch file at `path`.
    pub(crate) fn new<P: AsRef<Path>>(
        capacity: u64,
        path: P,
        memory_threshold: f64,
    ) -> Result<Self> {
        if !(memory_threshold > 0.0 && memory_threshold < 1.0) {
            return Err(UmbraError::InvalidArgument(format!(
                "memory threshold must be in (0, 1), got {}",
                memory_threshold
            )));
        }

        let arena = ArenaAllocator::new(capacity)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(HybridAllocator {
            arena,
            memory_threshold,
            file: Mutex::new(Some(file)),
            path: path.as_ref().to_path_buf(),
            file_cursor: AtomicU64::new(0),
            used_file: AtomicU64::new(0),
        })
    }

    /// Live bytes in the arena tier.
    pub(crate) fn used_memory(&self) -> u64 {
        self.arena.used()
    }

    /// Live bytes in the file tier.
    pub(crate) fn used_file(&self) -> u64 {
        self.used_file.load(Ordering::Relaxed)
    }

    /// Whether a new allocation of `size` bytes belongs in the arena.
    fn arena_admits(&self, size: u32) -> bool {
        let used = self.arena.used();
        let capacity = self.arena.capacity();
        (used as f64) / (capacity as f64) < self.memory_threshold
            && used + size as u64 <= capacity
    }

    /// Reserve a range in the file tier and make sure the file covers it.
    fn allocate_in_file(&self, size: u32) -> Result<MemoryPointer> {
        let offset = self.file_cursor.fetch_add(size as u64, Ordering::Relaxed);
        let end = offset + size as u64;

        let guard = self.file.lock();
        let Some(file) = guard.as_ref() else {
            return Err(UmbraError::Closed);
        };
        // Extend only: a racing reservation may already have grown past us.
        if file.metadata()?.len() < end {
            file.set_len(end)?;
        }
        drop(guard);

        self.used_file.fetch_add(size as u64, Ordering::Relaxed);
        Ok(MemoryPointer::on_file(offset, size))
    }

    /// Validate a file-tier pointer against the issued range.
    fn check_file(&self, offset: u64, size: u32) -> Result<()> {
        if offset + size as u64 > self.file_cursor.load(Ordering::Relaxed) {
            return Err(UmbraError::InvalidPointer);
        }
        Ok(())
    }
}

impl ByteAllocator for HybridAllocator {
    fn allocate(&self, size: u32) -> Result<MemoryPointer> {
        if size == 0 {
            return Err(UmbraError::InvalidArgument(
                "allocation size must be non-zero".to_string(),
            ));
        }

        if self.arena_admits(size) {
            match self.arena.allocate(size) {
                Ok(ptr) => return Ok(ptr),
                // Fragmentation can defeat the admission estimate; the file
                // tier still takes the payload.
                Err(UmbraError::OutOfCapacity { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.allocate_in_file(size)
    }

    fn write(&self, ptr: MemoryPointer, bytes: &[u8]) -> Result<()> {
        match ptr.location {
            Location::InMemory(_) => self.arena.write(ptr, bytes),
            Location::OnFile(offset) => {
                self.check_file(offset, ptr.size)?;
                if bytes.len() > ptr.size as usize {
                    return Err(UmbraError::InvalidArgument(format!(
                        "payload of {} bytes exceeds block size {}",
                        bytes.len(),
                        ptr.size
                    )));
                }

                let mut guard = self.file.lock();
                let Some(file) = guard.as_mut() else {
                    return Err(UmbraError::Closed);
                };
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(bytes)?;
                Ok(())
            }
        }
    }

    fn read(&self, ptr: MemoryPointer) -> Result<Vec<u8>> {
        match ptr.location {
            Location::InMemory(_) => self.arena.read(ptr),
            Location::OnFile(offset) => {
                self.check_file(offset, ptr.size)?;

                let mut buffer = vec![0u8; ptr.size as usize];
                let mut guard = self.file.lock();
                let Some(file) = guard.as_mut() else {
                    return Err(UmbraError::Closed);
                };
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buffer)?;
                drop(guard);

                Ok(buffer)
            }
        }
    }

    fn free(&self, ptr: MemoryPointer) -> Result<()> {
        match ptr.location {
            Location::InMemory(_) => self.arena.free(ptr),
            Location::OnFile(offset) => {
                self.check_file(offset, ptr.size)?;
                // File holes are not compacted; only the live counter drops.
                self.used_file.fetch_sub(ptr.size as u64, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    fn capacity(&self) -> u64 {
        // The file tier is unbounded for admission purposes.
        self.arena.capacity()
    }

    fn used(&self) -> u64 {
        self.arena.used() + self.used_file.load(Ordering::Relaxed)
    }

    fn close(&self) -> Result<()> {
        let taken = self.file.lock().take();
        if taken.is_some() {
            drop(taken);
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    "failed to delete scratch file: {}", e
                );
            }
        }
        self.arena.close()
    }
}
