//! # Memory Error Types
//!
//! All errors that can occur in the memory core. Allocation failures are
//! always returned to the immediate caller; nothing is retried internally.

use std::fmt;

use thiserror::Error;

/// Which allocator strategy produced an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocatorKind {
    /// Linear bump allocator with marker rewind.
    Stack,
    /// Pair of stack allocators swapped every frame.
    DoubleBuffered,
    /// General allocator with arbitrary-order free.
    FreeList,
    /// Relocating arena for dynamic objects.
    Arena,
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stack => "stack",
            Self::DoubleBuffered => "double-buffered",
            Self::FreeList => "free-list",
            Self::Arena => "arena",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in the memory core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The request cannot be satisfied with the space left in the allocator.
    #[error("{allocator} allocator out of memory: requested {requested} bytes, {available} bytes free")]
    OutOfMemory {
        /// The allocator that ran out of space.
        allocator: AllocatorKind,
        /// Number of bytes requested.
        requested: usize,
        /// Free bytes left (not necessarily contiguous).
        available: usize,
    },

    /// Freeing an address the allocator never issued, or freeing it twice.
    #[error("invalid release on {allocator} allocator at offset {offset}")]
    InvalidRelease {
        /// The allocator the release was attempted on.
        allocator: AllocatorKind,
        /// Offset of the rejected block.
        offset: usize,
    },

    /// The handle's object was deleted, or the handle belongs to another arena.
    #[error("stale handle: slot {index}, generation {generation}")]
    StaleHandle {
        /// Slot index encoded in the handle.
        index: u32,
        /// Generation encoded in the handle.
        generation: u32,
    },

    /// The manager was used before `start_up` or after `shut_down`.
    #[error("memory manager accessed before start-up or after shutdown")]
    Uninitialized,

    /// `start_up` was called on a running manager.
    #[error("memory manager is already started")]
    AlreadyInitialized,

    /// An allocator was constructed with a zero-byte region.
    #[error("{allocator} allocator created with zero capacity")]
    ZeroCapacity {
        /// The allocator being constructed.
        allocator: AllocatorKind,
    },

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Alignment is not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),

    /// Marker from another allocator, ahead of the cursor, or never captured.
    #[error("invalid stack marker")]
    InvalidMarker,

    /// Block does not resolve to live memory in this allocator, or has the
    /// wrong size for the requested type.
    #[error("invalid block: offset {offset}, length {len}")]
    InvalidBlock {
        /// Offset of the block.
        offset: usize,
        /// Length of the block in bytes.
        len: usize,
    },
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_message() {
        let err = MemoryError::OutOfMemory {
            allocator: AllocatorKind::Stack,
            requested: 100,
            available: 56,
        };
        assert_eq!(
            err.to_string(),
            "stack allocator out of memory: requested 100 bytes, 56 bytes free"
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(AllocatorKind::FreeList.to_string(), "free-list");
        assert_eq!(AllocatorKind::Arena.to_string(), "arena");
    }
}
