//! # EMBER Memory Core
//!
//! Pre-allocated memory regions for a real-time engine runtime:
//! - No general-purpose heap traffic once the engine is running
//! - Frame-scoped scratch memory reclaimed in O(1)
//! - Long-lived dynamic objects compacted in the background
//!
//! ## Allocators
//!
//! ```text
//! ┌──────────────────────── MemoryManager ────────────────────────┐
//! │                                                               │
//! │  single frame   [##########.............]  cleared per frame  │
//! │  double buffer  [#####......] [########.]  swapped per frame  │
//! │  level stack    [engine|level.........]    rewound per level  │
//! │  free list      [#..##....###..#.......]   first fit          │
//! │  arena          [##.#..##.#] ─► [######...] compacted         │
//! │                                                               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every allocator hands out [`MemBlock`] descriptors (region id, offset and
//! length) instead of raw pointers. Reads and writes go back through the
//! owning allocator, which checks the block against its live extent. Arena
//! objects are reached through [`ObjectHandle`], which survives relocation.
//!
//! ## Example
//!
//! ```rust
//! use ember_memory::{FreeListAllocator, MemoryArena, MemoryError, StackAllocator};
//!
//! let mut stack = StackAllocator::new(1024)?;
//! let marker = stack.get_marker();
//! let block = stack.new_value(7_u32)?;
//! assert_eq!(*stack.get::<u32>(block)?, 7);
//! stack.free_to_marker(marker)?;
//!
//! let mut heap = FreeListAllocator::new(1024)?;
//! let block = heap.alloc(64, 16)?;
//! heap.free(block)?;
//!
//! let mut arena = MemoryArena::new(1024)?;
//! let handle = arena.new_dynamic([1.0_f32, 2.0, 3.0])?;
//! arena.defragment();
//! assert_eq!(handle.get(&arena)?[2], 3.0);
//! # Ok::<(), MemoryError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod arena;
pub mod config;
pub mod double_buffer;
pub mod error;
pub mod free_list;
mod free_ranges;
pub mod handle;
pub mod manager;
pub mod region;
pub mod stack;

pub use arena::{DefragStats, MemoryArena};
pub use config::MemoryConfig;
pub use double_buffer::DoubleBufferedAllocator;
pub use error::{AllocatorKind, MemoryError, MemoryResult};
pub use free_list::FreeListAllocator;
pub use handle::ObjectHandle;
pub use manager::{MemoryManager, MemoryStats, RegionUsage};
pub use region::{MemBlock, RegionId, DEFAULT_ALIGNMENT};
pub use stack::{Marker, StackAllocator};
