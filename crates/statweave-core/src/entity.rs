//! Entity identifiers and stat slot allocation.
//!
//! Every entity owns one slot in the world's stat storage. Its [`EntityId`]
//! carries the slot number together with the generation the slot had when the
//! entity was spawned. Despawning advances the slot's generation, so any
//! [`StatHandle`](crate::stat::StatHandle) or
//! [`ModifierHandle`](crate::modifier::ModifierHandle) still naming the old
//! entity resolves to [`StatError::StaleEntity`](crate::StatError::StaleEntity)
//! rather than to whoever took the slot over.
//!
//! Slot numbers are also what [`StatWorld::batches`](crate::world::StatWorld::batches)
//! partitions on: an entity belongs to the batch whose range holds its slot.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A stat slot number plus the generation it was spawned at.
///
/// Packed as `[generation: u32 | slot: u32]`. Ordering follows the packed
/// value, which snapshots rely on for a stable entity order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// Stat slot this entity occupies.
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct SlotRecord {
    generation: u32,
    occupied: bool,
}

/// Tracks which stat slots are occupied and at which generation.
///
/// A vacated slot is reused only after every slot vacated before it, which
/// spreads generation bumps across the table under spawn/despawn churn.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    slots: Vec<SlotRecord>,
    vacated: VecDeque<u32>,
    occupied: usize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot for a new entity.
    ///
    /// The world grows its stat storage in step whenever this returns a slot
    /// past the current end.
    pub fn allocate(&mut self) -> EntityId {
        self.occupied += 1;
        if let Some(index) = self.vacated.pop_front() {
            let record = &mut self.slots[index as usize];
            record.occupied = true;
            return EntityId::new(index, record.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(SlotRecord {
            generation: 0,
            occupied: true,
        });
        EntityId::new(index, 0)
    }

    /// Vacate the slot held by `id` and advance its generation.
    ///
    /// Returns `false`, leaving the table untouched, if `id` is stale.
    pub fn deallocate(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let record = &mut self.slots[id.index() as usize];
        record.occupied = false;
        record.generation = record.generation.wrapping_add(1);
        self.vacated.push_back(id.index());
        self.occupied -= 1;
        true
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.slots
            .get(id.index() as usize)
            .is_some_and(|record| record.occupied && record.generation == id.generation())
    }

    /// The entity occupying slot `index`, if any.
    pub fn id_at(&self, index: u32) -> Option<EntityId> {
        let record = self.slots.get(index as usize)?;
        record
            .occupied
            .then(|| EntityId::new(index, record.generation))
    }

    /// Live entities whose slots fall inside `range`, in slot order.
    ///
    /// Used for whole-world listings and for the entities of one batch.
    pub fn live_in(&self, range: Range<u32>) -> impl Iterator<Item = EntityId> + '_ {
        range.filter_map(move |index| self.id_at(index))
    }

    /// Entity count reported by [`StatWorld::entity_count`](crate::world::StatWorld::entity_count).
    pub fn alive_count(&self) -> usize {
        self.occupied
    }

    /// Length of the slot table, occupied or not. Batches partition `0..slot_count`.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Generation of every slot, in slot order, as recorded in world snapshots.
    pub fn generations(&self) -> Vec<u32> {
        self.slots.iter().map(|record| record.generation).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slots_are_distinct() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<EntityId> = (0..64).map(|_| alloc.allocate()).collect();
        let mut slots: Vec<u32> = ids.iter().map(|id| id.index()).collect();
        slots.dedup();
        assert_eq!(slots, (0..64).collect::<Vec<u32>>());
        assert_eq!(alloc.alive_count(), 64);
        assert_eq!(alloc.slot_count(), 64);
    }

    #[test]
    fn reused_slot_rejects_the_old_id() {
        let mut alloc = EntityAllocator::new();
        let first = alloc.allocate();
        assert!(alloc.deallocate(first));
        let second = alloc.allocate();
        assert_eq!(second.index(), first.index());
        assert_eq!(second.generation(), first.generation() + 1);
        assert!(!alloc.is_alive(first));
        assert!(alloc.is_alive(second));
        assert_eq!(alloc.generations(), vec![1]);
    }

    #[test]
    fn vacated_slots_are_reused_oldest_first() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<EntityId> = (0..4).map(|_| alloc.allocate()).collect();
        alloc.deallocate(ids[2]);
        alloc.deallocate(ids[0]);
        assert_eq!(alloc.allocate().index(), 2);
        assert_eq!(alloc.allocate().index(), 0);
        assert_eq!(alloc.allocate().index(), 4);
    }

    #[test]
    fn stale_deallocate_leaves_count_alone() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate();
        assert!(alloc.deallocate(e));
        assert!(!alloc.deallocate(e));
        assert!(!alloc.deallocate(EntityId::new(9, 0)));
        assert_eq!(alloc.alive_count(), 0);
        assert_eq!(alloc.generations(), vec![1]);
    }

    #[test]
    fn live_in_skips_vacated_and_out_of_table_slots() {
        let mut alloc = EntityAllocator::new();
        let ids: Vec<EntityId> = (0..5).map(|_| alloc.allocate()).collect();
        alloc.deallocate(ids[1]);
        assert_eq!(alloc.id_at(ids[1].index()), None);
        assert_eq!(alloc.id_at(99), None);
        let batch: Vec<EntityId> = alloc.live_in(0..3).collect();
        assert_eq!(batch, vec![ids[0], ids[2]]);
        assert_eq!(alloc.live_in(3..8).count(), 2);
    }

    #[test]
    fn ids_order_by_generation_then_slot() {
        let id = EntityId::new(42, 7);
        assert_eq!((id.index(), id.generation()), (42, 7));
        assert!(EntityId::new(3, 0) < EntityId::new(1, 1));
        assert_eq!(format!("{id:?}"), "EntityId(42v7)");
    }
}
