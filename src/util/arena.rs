//! Generational slot arena backing the heap's node storage.
//!
//! Nodes reference each other by [`ArenaIndex`] instead of by pointer, which
//! keeps the intrusive child/sibling/prev graph free of aliasing concerns.
//! Each slot carries a generation counter, so an index held after its slot
//! was freed and reused simply stops resolving.

use core::fmt;
use core::hash::{Hash, Hasher};

/// Index into an [`Arena`], paired with the generation it was allocated at.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArenaIndex {
    slot: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Returns the raw slot position.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Returns the generation this index was allocated at.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.slot, self.generation)
    }
}

impl Hash for ArenaIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64((u64::from(self.slot) << 32) | u64::from(self.generation));
    }
}

#[derive(Debug)]
enum Slot<T> {
    Full { value: T, generation: u32 },
    Free { next: Option<u32>, generation: u32 },
}

/// Slot arena with generation-checked indices.
///
/// Freed slots go on a free list and are reused by later allocations with a
/// bumped generation, so stale indices never resolve to a new occupant.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    occupied: usize,
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            occupied: 0,
        }
    }

    /// Creates an arena with room for `capacity` values before reallocating.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            occupied: 0,
        }
    }

    /// Number of live values.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.occupied
    }

    /// Returns true when no slot is occupied.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Allocates a slot for the value produced by `f`.
    ///
    /// The closure receives the index the value will live at, so records that
    /// embed their own identity can be built without a placeholder pass.
    pub fn alloc_with<F>(&mut self, f: F) -> ArenaIndex
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        self.occupied += 1;

        if let Some(slot_pos) = self.free_head {
            let slot = &mut self.slots[slot_pos as usize];
            let Slot::Free { next, generation } = *slot else {
                unreachable!("free list pointed at an occupied slot");
            };
            self.free_head = next;
            let index = ArenaIndex {
                slot: slot_pos,
                generation,
            };
            *slot = Slot::Full {
                value: f(index),
                generation,
            };
            index
        } else {
            let slot_pos = u32::try_from(self.slots.len()).expect("arena slot count overflow");
            let index = ArenaIndex {
                slot: slot_pos,
                generation: 0,
            };
            self.slots.push(Slot::Full {
                value: f(index),
                generation: 0,
            });
            index
        }
    }

    /// Frees the slot at `index`, returning its value.
    ///
    /// Returns `None` when the index is stale or out of range.
    pub fn free(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.slot as usize)?;
        match slot {
            Slot::Full { generation, .. } if *generation == index.generation => {
                let freed = Slot::Free {
                    next: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                let Slot::Full { value, .. } = core::mem::replace(slot, freed) else {
                    unreachable!();
                };
                self.free_head = Some(index.slot);
                self.occupied -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// Returns the value at `index`, if the index is still live.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.slots.get(index.slot as usize)? {
            Slot::Full { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Mutable counterpart of [`Arena::get`].
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(index.slot as usize)? {
            Slot::Full { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Returns true when `index` resolves to a live value.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Frees every occupied slot, invalidating all outstanding indices.
    pub fn clear(&mut self) {
        for (pos, slot) in self.slots.iter_mut().enumerate() {
            if let Slot::Full { generation, .. } = slot {
                *slot = Slot::Free {
                    next: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                self.free_head = Some(pos as u32);
            }
        }
        self.occupied = 0;
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_get() {
        let mut arena = Arena::new();
        let idx = arena.alloc_with(|_| 7);
        assert_eq!(arena.get(idx), Some(&7));
        assert_eq!(arena.len(), 1);
        assert!(arena.contains(idx));
    }

    #[test]
    fn alloc_with_sees_final_index() {
        let mut arena = Arena::new();
        let idx = arena.alloc_with(|i| i.slot());
        assert_eq!(arena.get(idx), Some(&idx.slot()));
    }

    #[test]
    fn free_invalidates_and_reuses_slot() {
        let mut arena = Arena::new();
        let a = arena.alloc_with(|_| 'a');
        let b = arena.alloc_with(|_| 'b');

        assert_eq!(arena.free(a), Some('a'));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.len(), 1);

        let c = arena.alloc_with(|_| 'c');
        assert_eq!(c.slot(), a.slot());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(arena.get(b), Some(&'b'));
        assert_eq!(arena.get(c), Some(&'c'));
    }

    #[test]
    fn stale_index_does_not_resolve_new_occupant() {
        let mut arena = Arena::new();
        let old = arena.alloc_with(|_| 1);
        arena.free(old);
        let fresh = arena.alloc_with(|_| 2);

        assert_eq!(old.slot(), fresh.slot());
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.free(old), None);
        assert_eq!(arena.get(fresh), Some(&2));
    }

    #[test]
    fn clear_frees_everything() {
        let mut arena = Arena::new();
        let indices: Vec<_> = (0..4).map(|v| arena.alloc_with(|_| v)).collect();
        arena.clear();

        assert!(arena.is_empty());
        for idx in &indices {
            assert_eq!(arena.get(*idx), None);
        }

        // Slots are reusable after a clear.
        let idx = arena.alloc_with(|_| 9);
        assert_eq!(arena.get(idx), Some(&9));
        assert_eq!(arena.len(), 1);
    }
}
