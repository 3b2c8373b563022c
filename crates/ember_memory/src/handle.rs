//! # Object Handles
//!
//! Clients of the relocating arena hold an [`ObjectHandle`] instead of a
//! pointer. Every access resolves through the arena's slot table, so a handle
//! stays valid across any number of defragmentation passes.
//!
//! The handle is split into:
//! - The arena's region id (handles from another arena never resolve)
//! - A slot index
//! - A generation counter for detecting deleted objects

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use bytemuck::Pod;

use crate::arena::MemoryArena;
use crate::error::MemoryResult;
use crate::region::RegionId;

/// Typed indirection handle to an object living in a [`MemoryArena`].
///
/// Handles are only created by [`MemoryArena::new_dynamic`]. Copying a
/// handle never copies the object, and holding one does not keep the arena
/// alive.
pub struct ObjectHandle<T> {
    arena: RegionId,
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectHandle<T> {
    #[inline]
    pub(crate) const fn new(arena: RegionId, index: u32, generation: u32) -> Self {
        Self {
            arena,
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Arena that issued this handle.
    #[inline]
    #[must_use]
    pub const fn arena_id(&self) -> RegionId {
        self.arena
    }

    /// Slot index in the arena.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the object was created.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T: Pod> ObjectHandle<T> {
    /// Resolves the handle to the object's current location.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MemoryError::StaleHandle`] if the object was deleted.
    #[inline]
    pub fn get<'a>(&self, arena: &'a MemoryArena) -> MemoryResult<&'a T> {
        arena.get(*self)
    }

    /// Resolves the handle mutably.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MemoryError::StaleHandle`] if the object was deleted.
    #[inline]
    pub fn get_mut<'a>(&self, arena: &'a mut MemoryArena) -> MemoryResult<&'a mut T> {
        arena.get_mut(*self)
    }

    /// Whether the object is still alive in `arena`.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, arena: &MemoryArena) -> bool {
        arena.contains(*self)
    }
}

impl<T> Clone for ObjectHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectHandle<T> {}

impl<T> PartialEq for ObjectHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.arena == other.arena && self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for ObjectHandle<T> {}

impl<T> Hash for ObjectHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.arena.hash(state);
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for ObjectHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("arena", &self.arena.raw())
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_copies_compare_equal() {
        let mut arena = MemoryArena::new(256).unwrap();
        let handle = arena.new_dynamic(5_u32).unwrap();
        let copy = handle;
        assert_eq!(handle, copy);
        assert_eq!(*copy.get(&arena).unwrap(), 5);
    }

    #[test]
    fn test_handles_hash_by_identity() {
        let mut arena = MemoryArena::new(256).unwrap();
        let a = arena.new_dynamic(1_u32).unwrap();
        let b = arena.new_dynamic(1_u32).unwrap();

        let set: HashSet<_> = [a, a, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_write_through_handle() {
        let mut arena = MemoryArena::new(256).unwrap();
        let handle = arena.new_dynamic([0_u16; 4]).unwrap();
        handle.get_mut(&mut arena).unwrap()[2] = 9;
        assert_eq!(handle.get(&arena).unwrap(), &[0, 0, 9, 0]);
    }

    #[test]
    fn test_reused_slot_rejects_old_handle() {
        let mut arena = MemoryArena::new(256).unwrap();
        let old = arena.new_dynamic(1_u64).unwrap();
        arena.delete_dynamic(old).unwrap();
        let new = arena.new_dynamic(2_u64).unwrap();

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(!old.is_valid(&arena));
        assert_eq!(*new.get(&arena).unwrap(), 2);
    }
}
