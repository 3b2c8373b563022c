//! # Double-Buffered Allocator
//!
//! Two stack allocators that trade roles every frame.
//!
//! ```text
//! Frame N:
//!   alloc() writes into Buffer A (current)
//!   Buffer B (previous) still holds frame N-1's data
//!
//! Frame N+1 (after swap_buffer + clear_current_buffer):
//!   alloc() writes into Buffer B (frame N-1's data is discarded)
//!   Buffer A (previous) still holds frame N's data
//! ```
//!
//! Used for producer/consumer hand-offs across one frame boundary, such as
//! last-frame transform snapshots.

use bytemuck::Pod;

use crate::error::{AllocatorKind, MemoryError, MemoryResult};
use crate::region::MemBlock;
use crate::stack::StackAllocator;

/// Pair of [`StackAllocator`]s, "current" and "previous".
///
/// Blocks from either buffer resolve through [`DoubleBufferedAllocator::get`]
/// and friends; the allocator finds the owning buffer by region id.
pub struct DoubleBufferedAllocator {
    buffers: [StackAllocator; 2],
    /// Index of the buffer receiving allocations (0 or 1).
    current: usize,
    /// Number of swaps performed.
    frame_count: u64,
}

impl DoubleBufferedAllocator {
    /// Creates two buffers of `capacity` bytes each.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> MemoryResult<Self> {
        if capacity == 0 {
            return Err(MemoryError::ZeroCapacity {
                allocator: AllocatorKind::DoubleBuffered,
            });
        }
        Ok(Self {
            buffers: [StackAllocator::new(capacity)?, StackAllocator::new(capacity)?],
            current: 0,
            frame_count: 0,
        })
    }

    /// Capacity of each buffer in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.buffers[0].capacity()
    }

    /// Number of swaps performed so far.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The buffer receiving allocations this frame.
    #[inline]
    #[must_use]
    pub fn current(&self) -> &StackAllocator {
        &self.buffers[self.current]
    }

    /// The buffer written during the previous frame.
    #[inline]
    #[must_use]
    pub fn previous(&self) -> &StackAllocator {
        &self.buffers[self.current ^ 1]
    }

    /// Allocates from the current buffer.
    ///
    /// # Errors
    ///
    /// Same as [`StackAllocator::alloc`].
    pub fn alloc(&mut self, size: usize, alignment: usize) -> MemoryResult<MemBlock> {
        self.buffers[self.current].alloc(size, alignment)
    }

    /// Copies `value` into the current buffer.
    ///
    /// # Errors
    ///
    /// Same as [`StackAllocator::new_value`].
    pub fn new_value<T: Pod>(&mut self, value: T) -> MemoryResult<MemBlock> {
        self.buffers[self.current].new_value(value)
    }

    /// Allocates a zeroed array in the current buffer.
    ///
    /// # Errors
    ///
    /// Same as [`StackAllocator::new_slice`].
    pub fn new_slice<T: Pod>(&mut self, count: usize) -> MemoryResult<MemBlock> {
        self.buffers[self.current].new_slice::<T>(count)
    }

    /// Exchanges current and previous without touching memory.
    #[inline]
    pub fn swap_buffer(&mut self) {
        self.current ^= 1;
        self.frame_count += 1;
    }

    /// Resets the current buffer's cursor; its old contents (two frames old
    /// after a swap) are discarded.
    #[inline]
    pub fn clear_current_buffer(&mut self) {
        self.buffers[self.current].clear();
    }

    fn owner(&self, block: MemBlock) -> MemoryResult<&StackAllocator> {
        self.buffers
            .iter()
            .find(|buffer| buffer.owns(block))
            .ok_or_else(|| block.invalid())
    }

    fn owner_mut(&mut self, block: MemBlock) -> MemoryResult<&mut StackAllocator> {
        self.buffers
            .iter_mut()
            .find(|buffer| buffer.owns(block))
            .ok_or_else(|| block.invalid())
    }

    /// Absolute address of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] for blocks issued elsewhere.
    pub fn address_of(&self, block: MemBlock) -> MemoryResult<usize> {
        self.owner(block)?.address_of(block)
    }

    /// Bytes of a live block in either buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] for foreign or discarded blocks.
    pub fn bytes(&self, block: MemBlock) -> MemoryResult<&[u8]> {
        self.owner(block)?.bytes(block)
    }

    /// Mutable bytes of a live block in either buffer.
    ///
    /// # Errors
    ///
    /// See [`DoubleBufferedAllocator::bytes`].
    pub fn bytes_mut(&mut self, block: MemBlock) -> MemoryResult<&mut [u8]> {
        self.owner_mut(block)?.bytes_mut(block)
    }

    /// A live block viewed as `T`.
    ///
    /// # Errors
    ///
    /// See [`StackAllocator::get`].
    pub fn get<T: Pod>(&self, block: MemBlock) -> MemoryResult<&T> {
        self.owner(block)?.get(block)
    }

    /// A live block viewed as mutable `T`.
    ///
    /// # Errors
    ///
    /// See [`StackAllocator::get_mut`].
    pub fn get_mut<T: Pod>(&mut self, block: MemBlock) -> MemoryResult<&mut T> {
        self.owner_mut(block)?.get_mut(block)
    }

    /// A live block viewed as `[T]`.
    ///
    /// # Errors
    ///
    /// See [`StackAllocator::slice`].
    pub fn slice<T: Pod>(&self, block: MemBlock) -> MemoryResult<&[T]> {
        self.owner(block)?.slice(block)
    }

    /// A live block viewed as `&mut [T]`.
    ///
    /// # Errors
    ///
    /// See [`StackAllocator::slice_mut`].
    pub fn slice_mut<T: Pod>(&mut self, block: MemBlock) -> MemoryResult<&mut [T]> {
        self.owner_mut(block)?.slice_mut(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_frame_survives_one_swap() {
        let mut db = DoubleBufferedAllocator::new(256).unwrap();
        let block = db.new_value(0x1234_5678_u32).unwrap();
        assert!(db.current().owns(block));

        db.swap_buffer();
        db.clear_current_buffer();

        assert!(db.previous().owns(block));
        assert_eq!(*db.get::<u32>(block).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_data_discarded_after_second_swap() {
        let mut db = DoubleBufferedAllocator::new(256).unwrap();
        let block = db.new_value(9_u64).unwrap();

        db.swap_buffer();
        db.clear_current_buffer();
        db.swap_buffer();
        db.clear_current_buffer();

        assert!(db.current().owns(block));
        assert!(db.get::<u64>(block).is_err());
    }

    #[test]
    fn test_swap_does_not_touch_contents() {
        let mut db = DoubleBufferedAllocator::new(64).unwrap();
        let block = db.new_slice::<u8>(4).unwrap();
        db.slice_mut::<u8>(block).unwrap().copy_from_slice(&[1, 2, 3, 4]);

        db.swap_buffer();
        assert_eq!(db.slice::<u8>(block).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(db.frame_count(), 1);
    }

    #[test]
    fn test_allocations_target_current() {
        let mut db = DoubleBufferedAllocator::new(64).unwrap();
        let _ = db.alloc(16, 8).unwrap();
        assert_eq!(db.current().used(), 16);
        assert_eq!(db.previous().used(), 0);

        db.swap_buffer();
        assert_eq!(db.current().used(), 0);
        assert_eq!(db.previous().used(), 16);
    }

    #[test]
    fn test_zero_capacity() {
        assert_eq!(
            DoubleBufferedAllocator::new(0).err(),
            Some(MemoryError::ZeroCapacity {
                allocator: AllocatorKind::DoubleBuffered
            })
        );
    }
}
