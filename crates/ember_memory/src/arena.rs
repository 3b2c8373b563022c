//! # Relocating Arena
//!
//! Long-lived dynamic objects whose lifetimes do not nest. Objects are
//! reached only through [`ObjectHandle`]s, which lets the arena move them.
//!
//! ## Bookkeeping
//!
//! ```text
//! slots:          [ {offset, size, gen, live} ... ]   handle.index -> location
//! address_index:  BTreeMap<offset, slot>              live objects by address
//! free:           FreeRanges                          gaps, coalesced
//! ```
//!
//! ## Compaction
//!
//! [`MemoryArena::defragment`] walks live objects in ascending address order
//! and slides each one down to the lowest aligned offset past the previously
//! placed object. Every target is at or below the object's current offset and
//! at or above the end of everything already placed, so an object that has
//! not been relocated yet is never overwritten. Bytes are copied, not
//! reconstructed.

use std::collections::BTreeMap;

use bytemuck::Pod;

use crate::error::{AllocatorKind, MemoryError, MemoryResult};
use crate::free_ranges::{FreeRange, FreeRanges};
use crate::handle::ObjectHandle;
use crate::region::Region;

/// Slot indices must fit in a handle's `u32`.
const MAX_SLOTS: usize = u32::MAX as usize;

/// Location record for one arena object.
#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: usize,
    /// Reserved bytes (at least one, so zero-sized objects still own an address).
    size: usize,
    align: usize,
    generation: u32,
    live: bool,
}

/// Outcome of one [`MemoryArena::defragment`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefragStats {
    /// Objects relocated.
    pub moved: usize,
    /// Bytes copied.
    pub bytes_moved: usize,
    /// Largest contiguous free range afterwards.
    pub largest_free: usize,
}

/// Compacting arena for dynamic objects.
///
/// # Thread Safety
///
/// NOT thread-safe. The slot table is mutated only by
/// [`new_dynamic`](Self::new_dynamic), [`delete_dynamic`](Self::delete_dynamic)
/// and [`defragment`](Self::defragment), all on the owner thread.
///
/// # Example
///
/// ```rust
/// use ember_memory::MemoryArena;
///
/// let mut arena = MemoryArena::new(1024)?;
/// let a = arena.new_dynamic(1_u64)?;
/// let b = arena.new_dynamic(2_u64)?;
/// arena.delete_dynamic(a)?;
///
/// arena.defragment();
/// assert_eq!(*b.get(&arena)?, 2);
/// # Ok::<(), ember_memory::MemoryError>(())
/// ```
pub struct MemoryArena {
    region: Region,
    slots: Vec<Slot>,
    /// Indices of dead slots available for reuse.
    free_slots: Vec<u32>,
    address_index: BTreeMap<usize, u32>,
    free: FreeRanges,
    live_bytes: usize,
    /// Upper bound on `slots.len()`.
    slot_limit: usize,
}

impl MemoryArena {
    /// Creates an arena with `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroCapacity`] when `capacity` is zero.
    pub fn new(capacity: usize) -> MemoryResult<Self> {
        let region = Region::new(capacity, AllocatorKind::Arena)?;
        Ok(Self {
            free: FreeRanges::whole(capacity),
            region,
            slots: Vec::new(),
            free_slots: Vec::new(),
            address_index: BTreeMap::new(),
            live_bytes: 0,
            slot_limit: MAX_SLOTS,
        })
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Bytes reserved by live objects.
    #[inline]
    #[must_use]
    pub const fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Bytes not reserved by any live object.
    #[inline]
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free.total()
    }

    /// Length of the largest contiguous free range.
    #[inline]
    #[must_use]
    pub fn largest_free(&self) -> usize {
        self.free.largest()
    }

    /// Number of disjoint free ranges.
    #[inline]
    #[must_use]
    pub fn free_range_count(&self) -> usize {
        self.free.len()
    }

    /// Number of live objects.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.address_index.len()
    }

    /// Constructs `value` in the arena and returns a handle to it.
    ///
    /// Placement is first-fit by address. There is no automatic compaction:
    /// on failure the caller may [`defragment`](Self::defragment) and retry.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfMemory`] when no contiguous free range can
    /// hold the object or every slot index is taken.
    pub fn new_dynamic<T: Pod>(&mut self, value: T) -> MemoryResult<ObjectHandle<T>> {
        let size = std::mem::size_of::<T>().max(1);
        let align = std::mem::align_of::<T>();

        let region = &self.region;
        let Some((range_index, start)) = self.free.first_fit(|range| {
            let start = region.aligned_offset(range.offset, align)?;
            let end = start.checked_add(size)?;
            (end <= range.end()).then_some(start)
        }) else {
            tracing::warn!(
                requested = size,
                free = self.free.total(),
                largest = self.free.largest(),
                "arena out of memory"
            );
            return Err(self.out_of_memory(size));
        };

        let Some((index, generation)) = self.acquire_slot(start, size, align) else {
            tracing::warn!(slots = self.slots.len(), "arena slot table exhausted");
            return Err(self.out_of_memory(size));
        };

        self.free.carve(range_index, start, start + size);
        self.region.write(start, &value);
        self.address_index.insert(start, index);
        self.live_bytes += size;

        Ok(ObjectHandle::new(self.region.id(), index, generation))
    }

    fn out_of_memory(&self, requested: usize) -> MemoryError {
        MemoryError::OutOfMemory {
            allocator: AllocatorKind::Arena,
            requested,
            available: self.free.total(),
        }
    }

    /// Reuses a dead slot or appends one. `None` once the index space is full.
    fn acquire_slot(&mut self, offset: usize, size: usize, align: usize) -> Option<(u32, u32)> {
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.offset = offset;
            slot.size = size;
            slot.align = align;
            slot.live = true;
            return Some((index, slot.generation));
        }

        if self.slots.len() >= self.slot_limit {
            return None;
        }
        let index = u32::try_from(self.slots.len()).ok()?;
        self.slots.push(Slot {
            offset,
            size,
            align,
            generation: 0,
            live: true,
        });
        Some((index, 0))
    }

    fn slot<T>(&self, handle: ObjectHandle<T>) -> MemoryResult<Slot> {
        let stale = MemoryError::StaleHandle {
            index: handle.index(),
            generation: handle.generation(),
        };
        if handle.arena_id() != self.region.id() {
            return Err(stale);
        }
        match self.slots.get(handle.index() as usize) {
            Some(slot) if slot.live && slot.generation == handle.generation() => Ok(*slot),
            _ => Err(stale),
        }
    }

    /// Whether `handle` still refers to a live object in this arena.
    #[inline]
    #[must_use]
    pub fn contains<T>(&self, handle: ObjectHandle<T>) -> bool {
        self.slot(handle).is_ok()
    }

    /// Current offset of the object behind `handle`.
    ///
    /// Only meaningful until the next [`defragment`](Self::defragment).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::StaleHandle`] if the object was deleted.
    pub fn offset_of<T>(&self, handle: ObjectHandle<T>) -> MemoryResult<usize> {
        self.slot(handle).map(|slot| slot.offset)
    }

    /// Resolves `handle` to its object.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::StaleHandle`] if the object was deleted.
    pub fn get<T: Pod>(&self, handle: ObjectHandle<T>) -> MemoryResult<&T> {
        let slot = self.slot(handle)?;
        let bytes = &self.region.bytes()[slot.offset..slot.offset + std::mem::size_of::<T>()];
        bytemuck::try_from_bytes(bytes).map_err(|_| MemoryError::InvalidBlock {
            offset: slot.offset,
            len: slot.size,
        })
    }

    /// Resolves `handle` to its object mutably.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::StaleHandle`] if the object was deleted.
    pub fn get_mut<T: Pod>(&mut self, handle: ObjectHandle<T>) -> MemoryResult<&mut T> {
        let slot = self.slot(handle)?;
        let bytes = &mut self.region.bytes_mut()[slot.offset..slot.offset + std::mem::size_of::<T>()];
        bytemuck::try_from_bytes_mut(bytes).map_err(|_| MemoryError::InvalidBlock {
            offset: slot.offset,
            len: slot.size,
        })
    }

    /// Destroys the object behind `handle`, returning its value.
    ///
    /// The slot's generation is bumped so every copy of `handle` goes stale,
    /// and the bytes rejoin the free ranges.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::StaleHandle`] if the object was already deleted.
    pub fn delete_dynamic<T: Pod>(&mut self, handle: ObjectHandle<T>) -> MemoryResult<T> {
        let value = *self.get(handle)?;
        let index = handle.index();
        let slot = &mut self.slots[index as usize];

        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        let (offset, size) = (slot.offset, slot.size);

        self.address_index.remove(&offset);
        let released = self.free.insert(offset, size);
        debug_assert!(released, "arena slot overlapped a free range");
        self.free_slots.push(index);
        self.live_bytes -= size;

        Ok(value)
    }

    /// Whether live objects already sit packed at the start of the region.
    fn is_compact(&self) -> bool {
        match self.free.len() {
            0 => true,
            1 => self.free.get(0).end() == self.capacity(),
            _ => false,
        }
    }

    /// Slides every live object toward offset 0, closing the gaps between them.
    ///
    /// Runs to completion; handles resolve to the new locations immediately
    /// afterwards. Never allocates region space and cannot fail.
    pub fn defragment(&mut self) -> DefragStats {
        let mut stats = DefragStats::default();
        if self.is_compact() {
            stats.largest_free = self.free.largest();
            return stats;
        }

        let placed = std::mem::take(&mut self.address_index);
        let mut gaps = Vec::with_capacity(placed.len() / 4 + 1);
        let mut cursor = 0;

        for (offset, index) in placed {
            let slot = &mut self.slots[index as usize];
            let target = self
                .region
                .aligned_offset(cursor, slot.align)
                .map_or(offset, |aligned| aligned.min(offset));

            if target > cursor {
                gaps.push(FreeRange {
                    offset: cursor,
                    len: target - cursor,
                });
            }
            if target < offset {
                self.region
                    .bytes_mut()
                    .copy_within(offset..offset + slot.size, target);
                slot.offset = target;
                stats.moved += 1;
                stats.bytes_moved += slot.size;
            }

            self.address_index.insert(target, index);
            cursor = target + slot.size;
        }

        let capacity = self.capacity();
        if cursor < capacity {
            gaps.push(FreeRange {
                offset: cursor,
                len: capacity - cursor,
            });
        }
        self.free.reset(gaps);

        stats.largest_free = self.free.largest();
        tracing::debug!(
            moved = stats.moved,
            bytes_moved = stats.bytes_moved,
            largest_free = stats.largest_free,
            "arena defragmented"
        );
        stats
    }
}
