//! Physical placement of a stored payload.

/// Tier-local address of an allocated block.
///
/// The tier is explicit in the type, so backends dispatch with a `match`
/// instead of a runtime type test, and a pointer handed to the wrong tier is
/// rejected as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Location {
    /// Byte offset into the off-heap arena region.
    InMemory(usize),
    /// Byte offset into the backing file.
    OnFile(u64),
}

/// Pointer to an allocated block: where it lives and exactly how many bytes
/// it holds.
///
/// `size` is the exact payload length, not a capacity; a read through this
/// pointer returns exactly `size` bytes. Structural equality and hashing over
/// (tier, address, size) make the pointer usable as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MemoryPointer {
    pub(crate) location: Location,
    pub(crate) size: u32,
}

impl MemoryPointer {
    pub(crate) fn in_memory(offset: usize, size: u32) -> Self {
        MemoryPointer {
            location: Location::InMemory(offset),
            size,
        }
    }

    pub(crate) fn on_file(offset: u64, size: u32) -> Self {
        MemoryPointer {
            location: Location::OnFile(offset),
            size,
        }
    }
}
