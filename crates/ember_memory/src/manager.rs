//! # Memory Manager
//!
//! The facade every subsystem allocates through. It owns one instance of each
//! allocator and drives their lifecycle:
//!
//! ```text
//! new() ──► start_up(config) ──► finish_engine_startup_listener()
//!                                   │
//!                 ┌─────────────────┘
//!                 ▼
//!       ┌──► frame: alloc_on_* / new_* ... update()
//!       │         (clear frame stack, swap + clear double buffer,
//!       │          defragment arena)
//!       └──── level unload: clear_level_memory()
//!
//! shut_down() ──► every call fails with Uninitialized
//! ```
//!
//! ## Ordering
//!
//! `update()` must run after every other subsystem finished allocating for the
//! frame and before the next frame's requests begin, otherwise frame-scoped
//! memory is reclaimed while still referenced.

use bytemuck::Pod;

use crate::arena::{DefragStats, MemoryArena};
use crate::config::MemoryConfig;
use crate::double_buffer::DoubleBufferedAllocator;
use crate::error::{MemoryError, MemoryResult};
use crate::free_list::FreeListAllocator;
use crate::handle::ObjectHandle;
use crate::region::MemBlock;
use crate::stack::{Marker, StackAllocator};

/// Every allocator, alive between `start_up` and `shut_down`.
struct Allocators {
    single_frame: StackAllocator,
    double_buffered: DoubleBufferedAllocator,
    level_stack: StackAllocator,
    free_list: FreeListAllocator,
    arena: MemoryArena,
    /// Level stack cursor captured once engine start-up completed.
    level_marker: Option<Marker>,
}

/// Usage of a single region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionUsage {
    /// Bytes in use.
    pub used: usize,
    /// Total bytes.
    pub capacity: usize,
}

/// Point-in-time usage of every allocator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Single-frame stack.
    pub single_frame: RegionUsage,
    /// Current double-buffered stack.
    pub double_buffered_current: RegionUsage,
    /// Previous double-buffered stack.
    pub double_buffered_previous: RegionUsage,
    /// Level stack.
    pub level_stack: RegionUsage,
    /// Free-list allocator.
    pub free_list: RegionUsage,
    /// Live free-list blocks.
    pub free_list_blocks: usize,
    /// Arena.
    pub arena: RegionUsage,
    /// Live arena objects.
    pub arena_objects: usize,
    /// Largest contiguous free range in the arena.
    pub arena_largest_free: usize,
    /// Frames completed since start-up.
    pub frame: u64,
}

/// Explicit memory context passed to every subsystem that allocates.
///
/// # Thread Safety
///
/// Single owner thread. Every method takes `&mut self` or `&self`; no
/// internal synchronization is provided.
///
/// # Example
///
/// ```rust
/// use ember_memory::{MemoryConfig, MemoryManager};
///
/// let mut memory = MemoryManager::new();
/// memory.start_up(&MemoryConfig::uniform(64 * 1024))?;
/// memory.finish_engine_startup_listener()?;
///
/// let scratch = memory.new_on_single_frame([0.0_f32; 4])?;
/// let enemy = memory.new_dynamic(100_u32)?;
/// memory.update()?;
///
/// assert!(memory.single_frame()?.get::<[f32; 4]>(scratch).is_err());
/// assert_eq!(*memory.get_dynamic(enemy)?, 100);
///
/// memory.shut_down()?;
/// # Ok::<(), ember_memory::MemoryError>(())
/// ```
#[derive(Default)]
pub struct MemoryManager {
    allocators: Option<Allocators>,
    frame: u64,
}

impl MemoryManager {
    /// Creates a manager in the uninitialized state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocators: None,
            frame: 0,
        }
    }

    /// Whether `start_up` ran and `shut_down` has not.
    #[inline]
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.allocators.is_some()
    }

    fn allocators(&self) -> MemoryResult<&Allocators> {
        self.allocators.as_ref().ok_or(MemoryError::Uninitialized)
    }

    fn allocators_mut(&mut self) -> MemoryResult<&mut Allocators> {
        self.allocators.as_mut().ok_or(MemoryError::Uninitialized)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Validates `config` and builds every allocator.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::AlreadyInitialized`] if the manager is running.
    /// - [`MemoryError::InvalidConfig`] for zero capacities.
    pub fn start_up(&mut self, config: &MemoryConfig) -> MemoryResult<()> {
        if self.allocators.is_some() {
            return Err(MemoryError::AlreadyInitialized);
        }
        config.validate()?;

        self.allocators = Some(Allocators {
            single_frame: StackAllocator::new(config.single_frame_size)?,
            double_buffered: DoubleBufferedAllocator::new(config.double_buffered_size)?,
            level_stack: StackAllocator::new(config.level_stack_size)?,
            free_list: FreeListAllocator::new(config.free_list_size)?,
            arena: MemoryArena::new(config.dynamic_arena_size)?,
            level_marker: None,
        });
        self.frame = 0;

        tracing::info!(
            single_frame = config.single_frame_size,
            double_buffered = config.double_buffered_size,
            level_stack = config.level_stack_size,
            free_list = config.free_list_size,
            dynamic_arena = config.dynamic_arena_size,
            "memory manager started"
        );
        Ok(())
    }

    /// End-of-frame housekeeping. Call after every other subsystem.
    ///
    /// Clears the single-frame stack, swaps the double buffer and clears its
    /// new current side, then defragments the arena.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn update(&mut self) -> MemoryResult<DefragStats> {
        let allocators = self.allocators_mut()?;
        allocators.single_frame.clear();
        allocators.double_buffered.swap_buffer();
        allocators.double_buffered.clear_current_buffer();
        let stats = allocators.arena.defragment();
        self.frame += 1;
        Ok(stats)
    }

    /// Releases every backing region.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn shut_down(&mut self) -> MemoryResult<()> {
        let allocators = self.allocators.take().ok_or(MemoryError::Uninitialized)?;
        tracing::info!(
            frames = self.frame,
            leaked_free_list_blocks = allocators.free_list.live_count(),
            leaked_arena_objects = allocators.arena.live_count(),
            "memory manager shut down"
        );
        Ok(())
    }

    /// Snapshots the level stack cursor. Call once, right after start-up.
    ///
    /// Everything allocated on the level stack before this point survives
    /// every [`clear_level_memory`](Self::clear_level_memory).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn finish_engine_startup_listener(&mut self) -> MemoryResult<()> {
        let allocators = self.allocators_mut()?;
        let marker = allocators.level_stack.get_marker();
        allocators.level_marker = Some(marker);
        tracing::debug!(offset = marker.offset(), "level memory marker captured");
        Ok(())
    }

    /// Frees every level-stack allocation made since start-up finished.
    ///
    /// # Errors
    ///
    /// - [`MemoryError::Uninitialized`] if the manager is not running.
    /// - [`MemoryError::InvalidMarker`] if the start-up listener never ran.
    pub fn clear_level_memory(&mut self) -> MemoryResult<()> {
        let allocators = self.allocators_mut()?;
        let marker = allocators.level_marker.ok_or(MemoryError::InvalidMarker)?;
        let released = allocators.level_stack.used().saturating_sub(marker.offset());
        allocators.level_stack.free_to_marker(marker)?;
        tracing::debug!(released, "level memory cleared");
        Ok(())
    }

    // =========================================================================
    // Untyped entry points
    // =========================================================================

    /// Allocates on the stack cleared at the end of this frame.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`], or any error of [`StackAllocator::alloc`].
    pub fn alloc_on_single_frame(&mut self, size: usize, alignment: usize) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.single_frame.alloc(size, alignment)
    }

    /// Allocates on the double buffer; readable until the end of next frame.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`], or any error of [`StackAllocator::alloc`].
    pub fn alloc_on_double_buffered(&mut self, size: usize, alignment: usize) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.double_buffered.alloc(size, alignment)
    }

    /// Allocates on the level stack.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`], or any error of [`StackAllocator::alloc`].
    pub fn alloc_on_stack(&mut self, size: usize, alignment: usize) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.level_stack.alloc(size, alignment)
    }

    /// Allocates on the free list.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`], or any error of [`FreeListAllocator::alloc`].
    pub fn alloc_on_free_list(&mut self, size: usize, alignment: usize) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.free_list.alloc(size, alignment)
    }

    /// Resizes a free-list block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`], or any error of [`FreeListAllocator::realloc`].
    pub fn realloc_on_free_list(
        &mut self,
        block: MemBlock,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.free_list.realloc(block, size, alignment)
    }

    /// Frees a free-list block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`], or any error of [`FreeListAllocator::free`].
    pub fn free_on_free_list(&mut self, block: MemBlock) -> MemoryResult<()> {
        self.allocators_mut()?.free_list.free(block)
    }

    // =========================================================================
    // Typed entry points
    // =========================================================================

    /// Copies `value` onto the single-frame stack.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::OutOfMemory`].
    pub fn new_on_single_frame<T: Pod>(&mut self, value: T) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.single_frame.new_value(value)
    }

    /// Copies `value` into the current double buffer.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::OutOfMemory`].
    pub fn new_on_double_buffered<T: Pod>(&mut self, value: T) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.double_buffered.new_value(value)
    }

    /// Copies `value` onto the level stack.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::OutOfMemory`].
    pub fn new_on_stack<T: Pod>(&mut self, value: T) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.level_stack.new_value(value)
    }

    /// Copies `value` into a new free-list block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::OutOfMemory`].
    pub fn new_on_free_list<T: Pod>(&mut self, value: T) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.free_list.new_value(value)
    }

    /// Allocates a zeroed array of `count` elements on the free list.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::OutOfMemory`].
    pub fn new_arr_on_free_list<T: Pod>(&mut self, count: usize) -> MemoryResult<MemBlock> {
        self.allocators_mut()?.free_list.new_array::<T>(count)
    }

    /// Reads a value out of a free-list block and frees the block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::InvalidRelease`].
    pub fn delete_on_free_list<T: Pod>(&mut self, block: MemBlock) -> MemoryResult<T> {
        self.allocators_mut()?.free_list.delete(block)
    }

    /// Constructs `value` in the relocating arena.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::OutOfMemory`].
    pub fn new_dynamic<T: Pod>(&mut self, value: T) -> MemoryResult<ObjectHandle<T>> {
        self.allocators_mut()?.arena.new_dynamic(value)
    }

    /// Destroys an arena object, returning its value.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::StaleHandle`].
    pub fn delete_dynamic<T: Pod>(&mut self, handle: ObjectHandle<T>) -> MemoryResult<T> {
        self.allocators_mut()?.arena.delete_dynamic(handle)
    }

    /// Resolves an arena handle.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::StaleHandle`].
    pub fn get_dynamic<T: Pod>(&self, handle: ObjectHandle<T>) -> MemoryResult<&T> {
        self.allocators()?.arena.get(handle)
    }

    /// Resolves an arena handle mutably.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Uninitialized`] or [`MemoryError::StaleHandle`].
    pub fn get_dynamic_mut<T: Pod>(&mut self, handle: ObjectHandle<T>) -> MemoryResult<&mut T> {
        self.allocators_mut()?.arena.get_mut(handle)
    }

    /// Runs a compaction pass outside of [`update`](Self::update), e.g. before
    /// retrying a failed [`new_dynamic`](Self::new_dynamic).
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn defragment(&mut self) -> MemoryResult<DefragStats> {
        Ok(self.allocators_mut()?.arena.defragment())
    }

    // =========================================================================
    // Allocator access
    // =========================================================================

    /// The single-frame stack, for resolving its blocks.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn single_frame(&self) -> MemoryResult<&StackAllocator> {
        Ok(&self.allocators()?.single_frame)
    }

    /// Mutable single-frame stack.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn single_frame_mut(&mut self) -> MemoryResult<&mut StackAllocator> {
        Ok(&mut self.allocators_mut()?.single_frame)
    }

    /// The double-buffered allocator.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn double_buffered(&self) -> MemoryResult<&DoubleBufferedAllocator> {
        Ok(&self.allocators()?.double_buffered)
    }

    /// Mutable double-buffered allocator.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn double_buffered_mut(&mut self) -> MemoryResult<&mut DoubleBufferedAllocator> {
        Ok(&mut self.allocators_mut()?.double_buffered)
    }

    /// The level stack.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn level_stack(&self) -> MemoryResult<&StackAllocator> {
        Ok(&self.allocators()?.level_stack)
    }

    /// Mutable level stack.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn level_stack_mut(&mut self) -> MemoryResult<&mut StackAllocator> {
        Ok(&mut self.allocators_mut()?.level_stack)
    }

    /// The free-list allocator.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn free_list(&self) -> MemoryResult<&FreeListAllocator> {
        Ok(&self.allocators()?.free_list)
    }

    /// Mutable free-list allocator.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn free_list_mut(&mut self) -> MemoryResult<&mut FreeListAllocator> {
        Ok(&mut self.allocators_mut()?.free_list)
    }

    /// The relocating arena.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn arena(&self) -> MemoryResult<&MemoryArena> {
        Ok(&self.allocators()?.arena)
    }

    /// Mutable relocating arena.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn arena_mut(&mut self) -> MemoryResult<&mut MemoryArena> {
        Ok(&mut self.allocators_mut()?.arena)
    }

    /// Usage snapshot of every allocator.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Uninitialized`] if the manager is not running.
    pub fn stats(&self) -> MemoryResult<MemoryStats> {
        let a = self.allocators()?;
        let stack_usage = |stack: &StackAllocator| RegionUsage {
            used: stack.used(),
            capacity: stack.capacity(),
        };

        Ok(MemoryStats {
            single_frame: stack_usage(&a.single_frame),
            double_buffered_current: stack_usage(a.double_buffered.current()),
            double_buffered_previous: stack_usage(a.double_buffered.previous()),
            level_stack: stack_usage(&a.level_stack),
            free_list: RegionUsage {
                used: a.free_list.used(),
                capacity: a.free_list.capacity(),
            },
            free_list_blocks: a.free_list.live_count(),
            arena: RegionUsage {
                used: a.arena.live_bytes(),
                capacity: a.arena.capacity(),
            },
            arena_objects: a.arena.live_count(),
            arena_largest_free: a.arena.largest_free(),
            frame: self.frame,
        })
    }
}
