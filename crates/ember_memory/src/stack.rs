//! # Stack Allocator
//!
//! A linear bump allocator with marker-based rewind.
//!
//! ```text
//! base                     marker            top                capacity
//!  │ engine-lifetime data │ level data ...   │       free        │
//!  └──────────────────────┴──────────────────┴───────────────────┘
//! ```
//!
//! Used in two roles:
//! - **Single-frame scratch**: `clear()` once per frame.
//! - **Level stack**: a marker is captured once start-up finishes and the
//!   stack is rewound to it on every level unload, releasing every level
//!   allocation in O(1) while keeping engine-lifetime data below the marker.

use bytemuck::Pod;

use crate::error::{AllocatorKind, MemoryError, MemoryResult};
use crate::region::{validate_alignment, MemBlock, Region, RegionId};

/// Opaque snapshot of a [`StackAllocator`]'s cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Marker {
    region: RegionId,
    offset: usize,
}

impl Marker {
    /// Cursor position captured by this marker.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }
}

/// A bump-pointer allocator over a fixed region.
///
/// Individual blocks are never freed. Memory is released in LIFO order by
/// rewinding to a [`Marker`] or all at once with [`StackAllocator::clear`].
///
/// # Thread Safety
///
/// NOT thread-safe. One owner thread mutates it.
///
/// # Example
///
/// ```rust
/// use ember_memory::StackAllocator;
///
/// let mut stack = StackAllocator::new(1024)?;
/// let marker = stack.get_marker();
/// let block = stack.new_value(42_u32)?;
/// assert_eq!(*stack.get::<u32>(block)?, 42);
///
/// stack.free_to_marker(marker)?;
/// assert_eq!(stack.used(), 0);
/// # Ok::<(), ember_memory::MemoryError>(())
/// ```
pub struct StackAllocator {
    region: Region,
    /// First free byte.
    top: usize,
}

impl StackAllocator {
    /// Creates a stack allocator with `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> MemoryResult<Self> {
        Ok(Self {
            region: Region::new(capacity, AllocatorKind::Stack)?,
            top: 0,
        })
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Returns the number of bytes below the cursor, padding included.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.top
    }

    /// Returns the number of bytes above the cursor.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.region.capacity() - self.top
    }

    /// Identity of the backing region.
    #[inline]
    #[must_use]
    pub const fn region_id(&self) -> RegionId {
        self.region.id()
    }

    /// Whether `block` was issued by this allocator (live or not).
    #[inline]
    #[must_use]
    pub fn owns(&self, block: MemBlock) -> bool {
        block.region() == self.region.id()
    }

    /// Bumps the cursor to the next address aligned to `alignment` and
    /// reserves `size` bytes there.
    ///
    /// The returned bytes hold whatever was last written there.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidAlignment`] if `alignment` is not a power of two.
    /// - [`MemoryError::OutOfMemory`] if the request does not fit; the cursor
    ///   is left where it was.
    pub fn alloc(&mut self, size: usize, alignment: usize) -> MemoryResult<MemBlock> {
        validate_alignment(alignment)?;

        let start = self.region.aligned_offset(self.top, alignment);
        let end = start.and_then(|s| s.checked_add(size));

        match (start, end) {
            (Some(start), Some(end)) if end <= self.capacity() => {
                self.top = end;
                Ok(MemBlock::new(self.region.id(), start, size))
            }
            _ => {
                tracing::warn!(
                    requested = size,
                    available = self.remaining(),
                    "stack allocator out of memory"
                );
                Err(MemoryError::OutOfMemory {
                    allocator: AllocatorKind::Stack,
                    requested: size,
                    available: self.remaining(),
                })
            }
        }
    }

    /// Allocates space for `value` and copies it in.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfMemory`] if the value does not fit.
    pub fn new_value<T: Pod>(&mut self, value: T) -> MemoryResult<MemBlock> {
        let block = self.alloc(std::mem::size_of::<T>(), std::mem::align_of::<T>())?;
        self.region.write(block.offset(), &value);
        Ok(block)
    }

    /// Allocates a zeroed array of `count` elements.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfMemory`] if the array does not fit.
    pub fn new_slice<T: Pod>(&mut self, count: usize) -> MemoryResult<MemBlock> {
        let size = std::mem::size_of::<T>()
            .checked_mul(count)
            .ok_or(MemoryError::OutOfMemory {
                allocator: AllocatorKind::Stack,
                requested: usize::MAX,
                available: self.remaining(),
            })?;
        let block = self.alloc(size, std::mem::align_of::<T>())?;
        self.region.zero(block.offset(), size);
        Ok(block)
    }

    /// Captures the current cursor.
    #[inline]
    #[must_use]
    pub const fn get_marker(&self) -> Marker {
        Marker {
            region: self.region.id(),
            offset: self.top,
        }
    }

    /// Rewinds the cursor to `marker`, releasing everything allocated after it.
    ///
    /// Blocks past the marker become invalid; blocks below it stay valid.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidMarker`] if the marker came from another
    /// allocator or lies above the current cursor.
    pub fn free_to_marker(&mut self, marker: Marker) -> MemoryResult<()> {
        if marker.region != self.region.id() || marker.offset > self.top {
            return Err(MemoryError::InvalidMarker);
        }
        self.top = marker.offset;
        Ok(())
    }

    /// Resets the cursor to the start of the region.
    ///
    /// This is a **zero-cost** operation - memory is not touched.
    #[inline]
    pub fn clear(&mut self) {
        self.top = 0;
    }

    /// Absolute address of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] for blocks this allocator did not issue.
    pub fn address_of(&self, block: MemBlock) -> MemoryResult<usize> {
        if !self.owns(block) {
            return Err(block.invalid());
        }
        Ok(self.region.base_address() + block.offset())
    }

    /// Bytes of a live block.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] for foreign blocks or blocks
    /// released by a rewind.
    pub fn bytes(&self, block: MemBlock) -> MemoryResult<&[u8]> {
        self.region.block_bytes(block, self.top)
    }

    /// Mutable bytes of a live block.
    ///
    /// # Errors
    ///
    /// See [`StackAllocator::bytes`].
    pub fn bytes_mut(&mut self, block: MemBlock) -> MemoryResult<&mut [u8]> {
        self.region.block_bytes_mut(block, self.top)
    }

    /// A live block viewed as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] if the block is not live or is
    /// not exactly one `T`.
    pub fn get<T: Pod>(&self, block: MemBlock) -> MemoryResult<&T> {
        self.region.block_value(block, self.top)
    }

    /// A live block viewed as mutable `T`.
    ///
    /// # Errors
    ///
    /// See [`StackAllocator::get`].
    pub fn get_mut<T: Pod>(&mut self, block: MemBlock) -> MemoryResult<&mut T> {
        self.region.block_value_mut(block, self.top)
    }

    /// A live block viewed as `[T]`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] if the block is not live or its
    /// length is not a whole number of `T`.
    pub fn slice<T: Pod>(&self, block: MemBlock) -> MemoryResult<&[T]> {
        self.region.block_slice(block, self.top)
    }

    /// A live block viewed as `&mut [T]`.
    ///
    /// # Errors
    ///
    /// See [`StackAllocator::slice`].
    pub fn slice_mut<T: Pod>(&mut self, block: MemBlock) -> MemoryResult<&mut [T]> {
        self.region.block_slice_mut(block, self.top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_allocation() {
        let mut stack = StackAllocator::new(1024).unwrap();
        let a = stack.alloc(10, 1).unwrap();
        let b = stack.alloc(10, 1).unwrap();
        assert_eq!(a.end(), b.offset());
        assert_eq!(stack.used(), 20);
    }

    #[test]
    fn test_alignment_padding() {
        let mut stack = StackAllocator::new(1024).unwrap();
        let _ = stack.alloc(3, 1).unwrap();
        let block = stack.alloc(8, 64).unwrap();
        assert_eq!(stack.address_of(block).unwrap() % 64, 0);
        assert!(block.offset() >= 3);
    }

    #[test]
    fn test_out_of_memory_keeps_cursor() {
        let mut stack = StackAllocator::new(256).unwrap();
        let first = stack.alloc(200, 16).unwrap();
        let err = stack.alloc(100, 16).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { allocator: AllocatorKind::Stack, .. }));
        assert_eq!(stack.used(), 200);
        assert_eq!(first.offset(), 0);
    }

    #[test]
    fn test_marker_round_trip() {
        let mut stack = StackAllocator::new(1024).unwrap();
        let _ = stack.alloc(13, 1).unwrap();
        let marker = stack.get_marker();
        let first = stack.alloc(32, 16).unwrap();
        let _ = stack.alloc(100, 8).unwrap();

        stack.free_to_marker(marker).unwrap();
        let again = stack.alloc(32, 16).unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn test_rewound_block_is_invalid() {
        let mut stack = StackAllocator::new(64).unwrap();
        let marker = stack.get_marker();
        let block = stack.new_value(7_u32).unwrap();
        stack.free_to_marker(marker).unwrap();
        assert!(stack.get::<u32>(block).is_err());
    }

    #[test]
    fn test_foreign_marker_rejected() {
        let mut a = StackAllocator::new(64).unwrap();
        let b = StackAllocator::new(64).unwrap();
        assert_eq!(a.free_to_marker(b.get_marker()), Err(MemoryError::InvalidMarker));
    }

    #[test]
    fn test_forward_marker_rejected() {
        let mut stack = StackAllocator::new(64).unwrap();
        let _ = stack.alloc(32, 1).unwrap();
        let marker = stack.get_marker();
        stack.clear();
        assert_eq!(stack.free_to_marker(marker), Err(MemoryError::InvalidMarker));
    }

    #[test]
    fn test_slice_is_zeroed() {
        let mut stack = StackAllocator::new(256).unwrap();
        let dirty = stack.alloc(64, 16).unwrap();
        stack.bytes_mut(dirty).unwrap().fill(0xFF);
        stack.clear();

        let block = stack.new_slice::<u32>(16).unwrap();
        assert!(stack.slice::<u32>(block).unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_invalid_alignment() {
        let mut stack = StackAllocator::new(64).unwrap();
        assert_eq!(stack.alloc(8, 3), Err(MemoryError::InvalidAlignment(3)));
    }
}
