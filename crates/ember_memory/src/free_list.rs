//! # Free-List Allocator
//!
//! General allocator for allocations with unpredictable, non-scoped
//! lifetimes (network message buffers, ring buffers).
//!
//! ## Layout
//!
//! ```text
//! block start                        payload (aligned)
//!  │ padding │ BlockHeader (24 bytes) │ payload ...          │ slack │
//!  └─────────┴────────────────────────┴──────────────────────┴───────┘
//!  ◄──────────── adjustment ─────────►
//!  ◄──────────────────────── block_size ─────────────────────────────►
//! ```
//!
//! ## Policy
//!
//! **First-fit over an address-ordered free list.** The lowest-addressed free
//! range that can hold header, padding and payload is used. Released blocks
//! are coalesced with both neighbours.
//!
//! ## Stale blocks
//!
//! Every allocation draws a fresh tag that is stored in the header and in the
//! returned [`MemBlock`]. A block whose tag no longer matches its header was
//! freed, even when the same address has since been handed out again.

use bytemuck::{Pod, Zeroable};

use crate::error::{AllocatorKind, MemoryError, MemoryResult};
use crate::free_ranges::{FreeRange, FreeRanges};
use crate::region::{validate_alignment, MemBlock, Region};

/// In-band bookkeeping stored immediately before every payload.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct BlockHeader {
    /// Bytes from block start to block end, header and padding included.
    block_size: u64,
    /// Bytes from block start to payload.
    adjustment: u32,
    /// [`LIVE_MAGIC`] while allocated, [`FREED_MAGIC`] after release.
    magic: u32,
    /// Tag of the allocation currently occupying the block.
    tag: u32,
    _reserved: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();
const HEADER_ALIGN: usize = std::mem::align_of::<BlockHeader>();

const LIVE_MAGIC: u32 = 0xA110_C8ED;
const FREED_MAGIC: u32 = 0xF4EE_D0FF;

/// Remainders smaller than this stay attached to the allocation instead of
/// becoming a free range.
const MIN_FRAGMENT: usize = HEADER_SIZE;

/// Where a request lands inside a free range.
#[derive(Clone, Copy, Debug)]
struct Placement {
    start: usize,
    payload: usize,
    end: usize,
    adjustment: u32,
}

/// A first-fit allocator with per-block free, realloc and coalescing.
///
/// # Thread Safety
///
/// NOT thread-safe. One owner thread mutates it.
///
/// # Example
///
/// ```rust
/// use ember_memory::FreeListAllocator;
///
/// let mut heap = FreeListAllocator::new(4096)?;
/// let buffer = heap.alloc(256, 16)?;
/// let buffer = heap.realloc(buffer, 512, 16)?;
/// heap.free(buffer)?;
/// assert_eq!(heap.used(), 0);
/// # Ok::<(), ember_memory::MemoryError>(())
/// ```
pub struct FreeListAllocator {
    region: Region,
    free: FreeRanges,
    /// Bytes held by live blocks, headers and padding included.
    used: usize,
    /// Number of live blocks.
    live: usize,
    /// Tag handed to the next allocation.
    next_tag: u32,
}

impl FreeListAllocator {
    /// Creates a free-list allocator with `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> MemoryResult<Self> {
        let region = Region::new(capacity, AllocatorKind::FreeList)?;
        Ok(Self {
            free: FreeRanges::whole(capacity),
            region,
            used: 0,
            live: 0,
            next_tag: 1,
        })
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Bytes held by live blocks, including headers and padding.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Number of live blocks.
    #[inline]
    #[must_use]
    pub const fn live_count(&self) -> usize {
        self.live
    }

    /// Total free bytes across all ranges.
    #[inline]
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free.total()
    }

    /// Length of the largest free range.
    #[inline]
    #[must_use]
    pub fn largest_free(&self) -> usize {
        self.free.largest()
    }

    /// Number of disjoint free ranges; 1 means no fragmentation.
    #[inline]
    #[must_use]
    pub fn free_range_count(&self) -> usize {
        self.free.len()
    }

    fn place(region: &Region, range: FreeRange, size: usize, alignment: usize) -> Option<Placement> {
        let payload_floor = range.offset.checked_add(HEADER_SIZE)?;
        let payload = region.aligned_offset(payload_floor, alignment.max(HEADER_ALIGN))?;
        let mut end = payload.checked_add(size)?;
        if end > range.end() {
            return None;
        }
        if range.end() - end < MIN_FRAGMENT {
            end = range.end();
        }
        let adjustment = u32::try_from(payload - range.offset).ok()?;
        Some(Placement {
            start: range.offset,
            payload,
            end,
            adjustment,
        })
    }

    fn out_of_memory(&self, requested: usize) -> MemoryError {
        tracing::warn!(
            requested,
            free = self.free.total(),
            largest = self.free.largest(),
            "free-list allocator out of memory"
        );
        MemoryError::OutOfMemory {
            allocator: AllocatorKind::FreeList,
            requested,
            available: self.free.total(),
        }
    }

    /// Allocates `size` bytes aligned to `alignment`.
    ///
    /// The returned bytes hold whatever was last written there.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidAlignment`] if `alignment` is not a power of two.
    /// - [`MemoryError::OutOfMemory`] if no free range can hold the request.
    pub fn alloc(&mut self, size: usize, alignment: usize) -> MemoryResult<MemBlock> {
        validate_alignment(alignment)?;

        let region = &self.region;
        let Some((index, placement)) = self
            .free
            .first_fit(|range| Self::place(region, range, size, alignment))
        else {
            return Err(self.out_of_memory(size));
        };

        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1).max(1);

        self.free.carve(index, placement.start, placement.end);
        self.write_header(
            placement.payload,
            BlockHeader {
                block_size: (placement.end - placement.start) as u64,
                adjustment: placement.adjustment,
                magic: LIVE_MAGIC,
                tag,
                _reserved: 0,
            },
        );
        self.used += placement.end - placement.start;
        self.live += 1;

        Ok(MemBlock::new(self.region.id(), placement.payload, size).with_tag(tag))
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
    pub fn new_array<T: Pod>(&mut self, count: usize) -> MemoryResult<MemBlock> {
        let Some(size) = std::mem::size_of::<T>().checked_mul(count) else {
            return Err(self.out_of_memory(usize::MAX));
        };
        let block = self.alloc(size, std::mem::align_of::<T>())?;
        self.region.zero(block.offset(), size);
        Ok(block)
    }

    /// Reads the value out of `block` and frees it.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRelease`] if `block` is not a live
    /// allocation holding exactly one `T`.
    pub fn delete<T: Pod>(&mut self, block: MemBlock) -> MemoryResult<T> {
        let value = *self.get::<T>(block).map_err(|_| self.reject(block))?;
        self.free(block)?;
        Ok(value)
    }

    fn write_header(&mut self, payload: usize, header: BlockHeader) {
        self.region.write(payload - HEADER_SIZE, &header);
    }

    /// Header of a live block issued by this allocator.
    fn live_header(&self, block: MemBlock) -> Option<BlockHeader> {
        if block.region() != self.region.id() || block.offset() < HEADER_SIZE {
            return None;
        }
        let bytes = self
            .region
            .bytes()
            .get(block.offset() - HEADER_SIZE..block.offset())?;
        let header: BlockHeader = *bytemuck::try_from_bytes(bytes).ok()?;

        let adjustment = header.adjustment as usize;
        let block_size = usize::try_from(header.block_size).ok()?;
        let start = block.offset().checked_sub(adjustment)?;
        let payload_capacity = block_size.checked_sub(adjustment)?;

        let consistent = header.magic == LIVE_MAGIC
            && header.tag == block.tag()
            && adjustment >= HEADER_SIZE
            && block.len() <= payload_capacity
            && start.checked_add(block_size).is_some_and(|end| end <= self.capacity());
        consistent.then_some(header)
    }

    fn reject(&self, block: MemBlock) -> MemoryError {
        tracing::error!(
            offset = block.offset(),
            len = block.len(),
            "invalid release on free-list allocator"
        );
        MemoryError::InvalidRelease {
            allocator: AllocatorKind::FreeList,
            offset: block.offset(),
        }
    }

    /// Returns `block` to the free list, coalescing with adjacent free ranges.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRelease`] for blocks this allocator did
    /// not issue or that were already freed, including when the address has
    /// been reallocated since.
    pub fn free(&mut self, block: MemBlock) -> MemoryResult<()> {
        let Some(mut header) = self.live_header(block) else {
            return Err(self.reject(block));
        };

        let start = block.offset() - header.adjustment as usize;
        let size = header.block_size as usize;
        if !self.free.insert(start, size) {
            return Err(self.reject(block));
        }

        header.magic = FREED_MAGIC;
        self.write_header(block.offset(), header);
        self.used -= size;
        self.live -= 1;
        Ok(())
    }

    /// Resizes `block` to `new_size` bytes.
    ///
    /// - Shrinking never moves a block whose address already satisfies
    ///   `alignment`; the released tail rejoins the free list.
    /// - Growing extends in place when the range right after the block is free
    ///   and large enough.
    /// - Otherwise a new block is allocated, the payload copied and the old
    ///   block freed.
    ///
    /// A block whose address does not satisfy the new `alignment` always moves.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::InvalidRelease`] if `block` is not live.
    /// - [`MemoryError::OutOfMemory`] if the block must move and nothing fits;
    ///   the original block is left intact.
    pub fn realloc(&mut self, block: MemBlock, new_size: usize, alignment: usize) -> MemoryResult<MemBlock> {
        validate_alignment(alignment)?;
        let Some(mut header) = self.live_header(block) else {
            return Err(self.reject(block));
        };

        let payload = block.offset();
        let start = payload - header.adjustment as usize;
        let end = start + header.block_size as usize;
        let aligned = self.region.aligned_offset(payload, alignment.max(HEADER_ALIGN)) == Some(payload);

        if let (true, Some(wanted_end)) = (aligned, payload.checked_add(new_size)) {
            if wanted_end <= end {
                let tail = end - wanted_end;
                if tail >= MIN_FRAGMENT && self.free.insert(wanted_end, tail) {
                    header.block_size = (wanted_end - start) as u64;
                    self.write_header(payload, header);
                    self.used -= tail;
                }
                return Ok(block.with_len(new_size));
            }

            if let Some((index, next)) = self.free.starting_at(end) {
                if next.end() >= wanted_end {
                    let new_end = if next.end() - wanted_end < MIN_FRAGMENT {
                        next.end()
                    } else {
                        wanted_end
                    };
                    self.free.carve(index, end, new_end);
                    header.block_size = (new_end - start) as u64;
                    self.write_header(payload, header);
                    self.used += new_end - end;
                    return Ok(block.with_len(new_size));
                }
            }
        }

        let moved = self.alloc(new_size, alignment)?;
        let copied = block.len().min(new_size);
        self.region
            .bytes_mut()
            .copy_within(payload..payload + copied, moved.offset());
        self.free(block)?;
        Ok(moved)
    }

    /// Absolute address of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] for blocks this allocator did not issue.
    pub fn address_of(&self, block: MemBlock) -> MemoryResult<usize> {
        if block.region() != self.region.id() {
            return Err(block.invalid());
        }
        Ok(self.region.base_address() + block.offset())
    }

    fn check_live(&self, block: MemBlock) -> MemoryResult<()> {
        self.live_header(block).map(|_| ()).ok_or_else(|| block.invalid())
    }

    /// Bytes of a live block.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] if the block is not live.
    pub fn bytes(&self, block: MemBlock) -> MemoryResult<&[u8]> {
        self.check_live(block)?;
        self.region.block_bytes(block, self.capacity())
    }

    /// Mutable bytes of a live block.
    ///
    /// # Errors
    ///
    /// See [`FreeListAllocator::bytes`].
    pub fn bytes_mut(&mut self, block: MemBlock) -> MemoryResult<&mut [u8]> {
        self.check_live(block)?;
        let capacity = self.capacity();
        self.region.block_bytes_mut(block, capacity)
    }

    /// A live block viewed as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] if the block is not live or is
    /// not exactly one `T`.
    pub fn get<T: Pod>(&self, block: MemBlock) -> MemoryResult<&T> {
        self.check_live(block)?;
        self.region.block_value(block, self.capacity())
    }

    /// A live block viewed as mutable `T`.
    ///
    /// # Errors
    ///
    /// See [`FreeListAllocator::get`].
    pub fn get_mut<T: Pod>(&mut self, block: MemBlock) -> MemoryResult<&mut T> {
        self.check_live(block)?;
        let capacity = self.capacity();
        self.region.block_value_mut(block, capacity)
    }

    /// A live block viewed as `[T]`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidBlock`] if the block is not live or its
    /// length is not a whole number of `T`.
    pub fn slice<T: Pod>(&self, block: MemBlock) -> MemoryResult<&[T]> {
        self.check_live(block)?;
        self.region.block_slice(block, self.capacity())
    }

    /// A live block viewed as `&mut [T]`.
    ///
    /// # Errors
    ///
    /// See [`FreeListAllocator::slice`].
    pub fn slice_mut<T: Pod>(&mut self, block: MemBlock) -> MemoryResult<&mut [T]> {
        self.check_live(block)?;
        let capacity = self.capacity();
        self.region.block_slice_mut(block, capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_restores_capacity() {
        let mut heap = FreeListAllocator::new(1024).unwrap();
        let a = heap.alloc(100, 8).unwrap();
        let b = heap.alloc(50, 16).unwrap();
        assert_eq!(heap.live_count(), 2);
        assert_eq!(heap.used() + heap.free_bytes(), 1024);

        heap.free(a).unwrap();
        heap.free(b).unwrap();
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.free_range_count(), 1);
        assert_eq!(heap.largest_free(), 1024);
    }

    #[test]
    fn test_payload_alignment() {
        let mut heap = FreeListAllocator::new(4096).unwrap();
        let _ = heap.alloc(3, 1).unwrap();
        for alignment in [1, 8, 32, 128] {
            let block = heap.alloc(10, alignment).unwrap();
            assert_eq!(heap.address_of(block).unwrap() % alignment, 0);
        }
    }

    #[test]
    fn test_first_fit_reuses_lowest_hole() {
        let mut heap = FreeListAllocator::new(1024).unwrap();
        let a = heap.alloc(64, 16).unwrap();
        let _b = heap.alloc(64, 16).unwrap();
        heap.free(a).unwrap();

        let c = heap.alloc(32, 16).unwrap();
        assert_eq!(c.offset(), a.offset());
    }

    #[test]
    fn test_coalesce_adjacent_blocks() {
        let mut heap = FreeListAllocator::new(256).unwrap();
        let a = heap.alloc(96, 16).unwrap();
        let b = heap.alloc(96, 16).unwrap();
        assert!(heap.alloc(200, 16).is_err());

        heap.free(a).unwrap();
        heap.free(b).unwrap();
        let whole = heap.alloc(200, 16).unwrap();
        assert_eq!(whole.offset(), a.offset());
    }

    #[test]
    fn test_double_free_rejected() {
        let mut heap = FreeListAllocator::new(256).unwrap();
        let block = heap.alloc(32, 8).unwrap();
        heap.free(block).unwrap();
        assert!(matches!(
            heap.free(block),
            Err(MemoryError::InvalidRelease { allocator: AllocatorKind::FreeList, .. })
        ));
        assert_eq!(heap.free_bytes(), 256);
    }

    #[test]
    fn test_double_free_after_reuse_rejected() {
        let mut heap = FreeListAllocator::new(256).unwrap();
        let stale = heap.alloc(32, 8).unwrap();
        heap.free(stale).unwrap();
        let reused = heap.new_value(0x5EED_u64).unwrap();
        assert_eq!(reused.offset(), stale.offset());

        assert!(matches!(
            heap.free(stale),
            Err(MemoryError::InvalidRelease { allocator: AllocatorKind::FreeList, .. })
        ));
        assert!(heap.bytes(stale).is_err());
        assert_eq!(heap.live_count(), 1);
        assert_eq!(*heap.get::<u64>(reused).unwrap(), 0x5EED);
        heap.free(reused).unwrap();
    }

    #[test]
    fn test_realloc_keeps_tag() {
        let mut heap = FreeListAllocator::new(1024).unwrap();
        let block = heap.alloc(128, 8).unwrap();
        let shrunk = heap.realloc(block, 32, 8).unwrap();
        assert!(heap.free(block.with_len(32)).is_ok());
        assert!(heap.free(shrunk).is_err());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_adjustment_is_not_placed() {
        let heap = FreeListAllocator::new(64).unwrap();
        let alignment = 1_usize << 33;
        let floor = heap.region.base_address() + HEADER_SIZE;
        // Start the range one byte past an aligned address so the payload
        // lands almost a full alignment step later.
        let offset = (alignment + 1 - floor % alignment) % alignment;
        let range = FreeRange {
            offset,
            len: 1 << 40,
        };
        assert!(FreeListAllocator::place(&heap.region, range, 8, alignment).is_none());
    }

    #[test]
    fn test_foreign_block_rejected() {
        let mut a = FreeListAllocator::new(256).unwrap();
        let mut b = FreeListAllocator::new(256).unwrap();
        let block = b.alloc(16, 8).unwrap();
        assert!(a.free(block).is_err());
        assert!(b.free(block).is_ok());
    }

    #[test]
    fn test_realloc_shrink_in_place() {
        let mut heap = FreeListAllocator::new(1024).unwrap();
        let block = heap.alloc(256, 16).unwrap();
        let used_before = heap.used();

        let shrunk = heap.realloc(block, 64, 16).unwrap();
        assert_eq!(shrunk.offset(), block.offset());
        assert_eq!(shrunk.len(), 64);
        assert!(heap.used() < used_before);
        assert_eq!(heap.used() + heap.free_bytes(), 1024);
    }

    #[test]
    fn test_realloc_shrink_never_moves() {
        let mut heap = FreeListAllocator::new(2048).unwrap();
        let _ = heap.alloc(40, 8).unwrap();
        for alignment in [1, 8, 16] {
            let block = heap.alloc(300, alignment).unwrap();
            let mut current = block;
            for size in [200, 100, 17, 1] {
                current = heap.realloc(current, size, alignment).unwrap();
                assert_eq!(current.offset(), block.offset());
                assert_eq!(current.len(), size);
            }
        }
        assert_eq!(heap.used() + heap.free_bytes(), heap.capacity());
    }

    #[test]
    fn test_realloc_stricter_alignment_moves() {
        let mut heap = FreeListAllocator::new(2048).unwrap();
        let _ = heap.alloc(8, 8).unwrap();
        let block = heap.alloc(128, 8).unwrap();
        let aligned = heap.address_of(block).unwrap() % 256 == 0;

        let moved = heap.realloc(block, 16, 256).unwrap();
        assert_eq!(heap.address_of(moved).unwrap() % 256, 0);
        if !aligned {
            assert_ne!(moved.offset(), block.offset());
        }
    }

    #[test]
    fn test_realloc_grow_in_place() {
        let mut heap = FreeListAllocator::new(1024).unwrap();
        let block = heap.alloc(64, 16).unwrap();
        heap.bytes_mut(block).unwrap().fill(0xAB);

        let grown = heap.realloc(block, 300, 16).unwrap();
        assert_eq!(grown.offset(), block.offset());
        assert!(heap.bytes(grown).unwrap()[..64].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_realloc_grow_moves_and_copies() {
        let mut heap = FreeListAllocator::new(1024).unwrap();
        let block = heap.alloc(64, 16).unwrap();
        let _blocker = heap.alloc(64, 16).unwrap();
        for (i, byte) in heap.bytes_mut(block).unwrap().iter_mut().enumerate() {
            *byte = i as u8;
        }

        let moved = heap.realloc(block, 200, 16).unwrap();
        assert_ne!(moved.offset(), block.offset());
        let bytes = heap.bytes(moved).unwrap();
        assert!((0..64).all(|i| bytes[i] == i as u8));
        assert!(heap.bytes(block).is_err());
    }

    #[test]
    fn test_realloc_failure_keeps_block() {
        let mut heap = FreeListAllocator::new(256).unwrap();
        let block = heap.new_value(77_u64).unwrap();
        let _blocker = heap.alloc(16, 8).unwrap();
        assert!(heap.realloc(block, 4096, 8).is_err());
        assert_eq!(*heap.get::<u64>(block).unwrap(), 77);
    }

    #[test]
    fn test_typed_array_and_delete() {
        let mut heap = FreeListAllocator::new(1024).unwrap();
        let array = heap.new_array::<u32>(8).unwrap();
        heap.slice_mut::<u32>(array).unwrap()[3] = 42;
        assert_eq!(heap.slice::<u32>(array).unwrap()[3], 42);

        let value = heap.new_value(3.5_f64).unwrap();
        assert_eq!(heap.delete::<f64>(value).unwrap(), 3.5);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn test_out_of_memory() {
        let mut heap = FreeListAllocator::new(128).unwrap();
        assert!(matches!(
            heap.alloc(512, 8),
            Err(MemoryError::OutOfMemory { allocator: AllocatorKind::FreeList, .. })
        ));
    }
}
