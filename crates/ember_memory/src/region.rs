//! # Backing Regions
//!
//! Every allocator owns exactly one [`Region`]: a fixed-size byte buffer
//! allocated once at start-up and never resized.
//!
//! ## Alignment
//!
//! The buffer base is aligned to [`BASE_ALIGNMENT`]. Alignment arithmetic is
//! done on absolute addresses, so an offset returned by [`Region::aligned_offset`]
//! is aligned in real memory for any power-of-two alignment, including ones
//! larger than the base alignment.
//!
//! ## Typed access
//!
//! Objects are constructed by copying their bytes in and read back through
//! `bytemuck` views. Only [`bytemuck::Pod`] types can live in a region, which
//! is what makes byte-exact relocation legal.

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};

use crate::error::{AllocatorKind, MemoryError, MemoryResult};

/// Alignment guaranteed for the first byte of every region.
pub const BASE_ALIGNMENT: usize = 16;

/// Alignment used by the untyped entry points when callers have no preference.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Storage unit that gives the buffer its base alignment.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, align(16))]
// Only ever read through `bytemuck` casts.
#[allow(dead_code)]
struct Chunk([u8; BASE_ALIGNMENT]);

/// Process-unique identity of a region.
///
/// Blocks, markers and handles remember the region that issued them so they
/// cannot be resolved against a different allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u32);

impl RegionId {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A contiguous byte range handed out by a stack, double-buffered or
/// free-list allocator.
///
/// A block is a plain value: it does not borrow the allocator. Resolving it
/// always goes back through the allocator, which rejects blocks it does not
/// currently consider live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub struct MemBlock {
    region: RegionId,
    offset: usize,
    len: usize,
    /// Allocation tag; zero for allocators that do not track individual blocks.
    tag: u32,
}

impl MemBlock {
    #[inline]
    pub(crate) const fn new(region: RegionId, offset: usize, len: usize) -> Self {
        Self {
            region,
            offset,
            len,
            tag: 0,
        }
    }

    #[inline]
    pub(crate) const fn with_tag(self, tag: u32) -> Self {
        Self { tag, ..self }
    }

    #[inline]
    pub(crate) const fn tag(self) -> u32 {
        self.tag
    }

    /// Region that issued the block.
    #[inline]
    #[must_use]
    pub const fn region(self) -> RegionId {
        self.region
    }

    /// Byte offset from the start of the region.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }

    /// Length in bytes.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }

    /// Whether the block is zero bytes long.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }

    /// Offset one past the last byte.
    #[inline]
    #[must_use]
    pub const fn end(self) -> usize {
        self.offset + self.len
    }

    #[inline]
    pub(crate) const fn with_len(self, len: usize) -> Self {
        Self { len, ..self }
    }

    pub(crate) const fn invalid(self) -> MemoryError {
        MemoryError::InvalidBlock {
            offset: self.offset,
            len: self.len,
        }
    }
}

/// Rejects alignments that are not a power of two.
///
/// # Errors
///
/// Returns [`MemoryError::InvalidAlignment`] for zero or non power-of-two values.
#[inline]
pub fn validate_alignment(alignment: usize) -> MemoryResult<()> {
    if alignment.is_power_of_two() {
        Ok(())
    } else {
        Err(MemoryError::InvalidAlignment(alignment))
    }
}

/// Rounds `value` up to a multiple of `alignment` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub const fn align_up(value: usize, alignment: usize) -> Option<usize> {
    let mask = alignment - 1;
    match value.checked_add(mask) {
        Some(bumped) => Some(bumped & !mask),
        None => None,
    }
}

/// Owned, fixed-capacity backing buffer.
pub struct Region {
    id: RegionId,
    storage: Box<[Chunk]>,
    capacity: usize,
}

impl Region {
    /// Allocates a zeroed region of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize, allocator: AllocatorKind) -> MemoryResult<Self> {
        if capacity == 0 {
            return Err(MemoryError::ZeroCapacity { allocator });
        }

        let chunks = capacity.div_ceil(BASE_ALIGNMENT);
        let storage = vec![Chunk::zeroed(); chunks].into_boxed_slice();

        Ok(Self {
            id: RegionId::next(),
            storage,
            capacity,
        })
    }

    /// Identity of this region.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> RegionId {
        self.id
    }

    /// Usable size in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Absolute address of the first byte.
    #[inline]
    #[must_use]
    pub fn base_address(&self) -> usize {
        self.storage.as_ptr() as usize
    }

    /// Whole region as bytes.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        let all: &[u8] = bytemuck::cast_slice(&self.storage);
        &all[..self.capacity]
    }

    /// Whole region as mutable bytes.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let capacity = self.capacity;
        let all: &mut [u8] = bytemuck::cast_slice_mut(&mut self.storage);
        &mut all[..capacity]
    }

    /// Smallest offset `>= offset` whose absolute address is a multiple of
    /// `alignment`.
    ///
    /// The result may lie past the end of the region; callers bound-check it.
    #[inline]
    #[must_use]
    pub fn aligned_offset(&self, offset: usize, alignment: usize) -> Option<usize> {
        let base = self.base_address();
        let address = base.checked_add(offset)?;
        Some(align_up(address, alignment)? - base)
    }

    /// Whether `block` was issued by this region and ends at or before `limit`.
    #[inline]
    #[must_use]
    pub fn holds(&self, block: MemBlock, limit: usize) -> bool {
        block.region == self.id && block.end() <= limit.min(self.capacity)
    }

    /// Bytes of `block`, provided it ends at or before `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] for foreign or out-of-range blocks.
    pub fn block_bytes(&self, block: MemBlock, limit: usize) -> MemoryResult<&[u8]> {
        if !self.holds(block, limit) {
            return Err(block.invalid());
        }
        Ok(&self.bytes()[block.offset..block.end()])
    }

    /// Mutable bytes of `block`, provided it ends at or before `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] for foreign or out-of-range blocks.
    pub fn block_bytes_mut(&mut self, block: MemBlock, limit: usize) -> MemoryResult<&mut [u8]> {
        if !self.holds(block, limit) {
            return Err(block.invalid());
        }
        Ok(&mut self.bytes_mut()[block.offset..block.end()])
    }

    /// `block` viewed as a single `T`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] if the block is not live or its
    /// size or alignment does not match `T`.
    pub fn block_value<T: Pod>(&self, block: MemBlock, limit: usize) -> MemoryResult<&T> {
        let bytes = self.block_bytes(block, limit)?;
        bytemuck::try_from_bytes(bytes).map_err(|_| block.invalid())
    }

    /// `block` viewed as a single mutable `T`.
    ///
    /// # Errors
    ///
    /// See [`Region::block_value`].
    pub fn block_value_mut<T: Pod>(&mut self, block: MemBlock, limit: usize) -> MemoryResult<&mut T> {
        let bytes = self.block_bytes_mut(block, limit)?;
        bytemuck::try_from_bytes_mut(bytes).map_err(|_| block.invalid())
    }

    /// `block` viewed as a slice of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] if the block is not live or its
    /// length is not a multiple of `size_of::<T>()`.
    pub fn block_slice<T: Pod>(&self, block: MemBlock, limit: usize) -> MemoryResult<&[T]> {
        let bytes = self.block_bytes(block, limit)?;
        bytemuck::try_cast_slice(bytes).map_err(|_| block.invalid())
    }

    /// `block` viewed as a mutable slice of `T`.
    ///
    /// # Errors
    ///
    /// See [`Region::block_slice`].
    pub fn block_slice_mut<T: Pod>(&mut self, block: MemBlock, limit: usize) -> MemoryResult<&mut [T]> {
        let bytes = self.block_bytes_mut(block, limit)?;
        bytemuck::try_cast_slice_mut(bytes).map_err(|_| block.invalid())
    }

    /// Copies `value`'s bytes to `offset`.
    ///
    /// `offset + size_of::<T>()` must already be bound-checked by the caller.
    #[inline]
    pub fn write<T: Pod>(&mut self, offset: usize, value: &T) {
        let src = bytemuck::bytes_of(value);
        self.bytes_mut()[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Zeroes `len` bytes starting at `offset`.
    #[inline]
    pub fn zero(&mut self, offset: usize, len: usize) {
        self.bytes_mut()[offset..offset + len].fill(0);
    }
}
