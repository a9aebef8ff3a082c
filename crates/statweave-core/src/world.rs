//! The [`StatWorld`] owns every entity's stat storage, the stat type registry
//! and the registered layouts. [`StatBatch`] is a mutable view over a
//! contiguous range of entity slots, used to process disjoint ranges in
//! parallel.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::accessor::{collect_dependents, recompute_ordered};
use crate::entity::{EntityAllocator, EntityId};
use crate::modifier::ModifierSource;
use crate::scratch::{Scratch, ScratchGuard};
use crate::stat::{LayoutId, StatHandle, StatIndex, StatLayout, StatTypeId, StatTypeRegistry};
use crate::storage::{EntityStats, StatStore, WorldBinding};
use crate::StatError;

static NEXT_WORLD_ID: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// StatWorld
// ---------------------------------------------------------------------------

/// Top-level container for stat storage.
pub struct StatWorld {
    id: u64,
    /// Advances on every spawn and despawn.
    epoch: u64,
    pub(crate) allocator: EntityAllocator,
    pub(crate) registry: StatTypeRegistry,
    pub(crate) layouts: Vec<StatLayout>,
    /// Indexed by `EntityId::index`.
    pub(crate) slots: Vec<Option<EntityStats>>,
}

impl std::fmt::Debug for StatWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatWorld")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("entity_count", &self.allocator.alive_count())
            .field("layout_count", &self.layouts.len())
            .finish()
    }
}

impl Default for StatWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl StatWorld {
    pub fn new() -> Self {
        Self {
            id: NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed),
            epoch: 0,
            allocator: EntityAllocator::new(),
            registry: StatTypeRegistry::new(),
            layouts: Vec::new(),
            slots: Vec::new(),
        }
    }

    pub fn binding(&self) -> WorldBinding {
        WorldBinding {
            world: self.id,
            epoch: self.epoch,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn registry(&self) -> &StatTypeRegistry {
        &self.registry
    }

    pub fn register_stat_type(&mut self, name: &str) -> StatTypeId {
        self.registry.register(name)
    }

    /// Register a layout that entities can be spawned with.
    ///
    /// # Panics
    ///
    /// Panics if the layout names a stat type this world never registered.
    pub fn register_layout(&mut self, layout: StatLayout) -> LayoutId {
        for &stat_type in layout.types() {
            assert!(
                self.registry.get_info(stat_type).is_some(),
                "layout uses unregistered stat type {stat_type:?}"
            );
        }
        let id = LayoutId(self.layouts.len() as u32);
        self.layouts.push(layout);
        id
    }

    pub fn layout(&self, id: LayoutId) -> Option<&StatLayout> {
        self.layouts.get(id.0 as usize)
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Spawn an entity whose stats start at the layout's default bases.
    pub fn spawn(&mut self, layout: LayoutId) -> Result<EntityId, StatError> {
        let stat_layout = self
            .layouts
            .get(layout.0 as usize)
            .ok_or(StatError::UnknownLayout { layout })?;
        let stats = EntityStats::new(layout, stat_layout);

        let entity = self.allocator.allocate();
        let idx = entity.index() as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx] = Some(stats);
        self.epoch += 1;

        debug!(entity = ?entity, ?layout, "entity spawned");
        Ok(entity)
    }

    /// Destroy an entity and everything that references its stats.
    ///
    /// Modifiers sourced from the entity's stats are removed from their
    /// targets, which are recomputed. Observer entries registered on other
    /// entities by the entity's own modifiers are removed. Handles cached to
    /// any removed modifier become stale.
    pub fn despawn(&mut self, entity: EntityId) -> Result<(), StatError> {
        if !self.allocator.is_alive(entity) {
            return Err(StatError::StaleEntity { entity });
        }
        let stats = self.slots[entity.index() as usize]
            .take()
            .ok_or(StatError::StaleEntity { entity })?;

        // Entities with modifiers sourced from the dying entity.
        let dependents: BTreeSet<EntityId> = stats
            .observers
            .iter()
            .map(|entry| entry.target.entity)
            .filter(|&target| target != entity)
            .collect();

        let mut affected: Vec<StatHandle> = Vec::new();
        for &target in &dependents {
            let Some(target_stats) = self.slot_mut(target) else {
                continue;
            };
            target_stats.modifiers.retain(|entry| {
                let sourced_here = matches!(
                    entry.modifier.source,
                    ModifierSource::Stat(source) if source.entity == entity
                );
                if sourced_here {
                    affected.push(StatHandle::new(target, entry.stat));
                }
                !sourced_here
            });
        }

        // Observer entries the dying entity's own modifiers left elsewhere.
        for entry in &stats.modifiers {
            if let ModifierSource::Stat(source) = entry.modifier.source {
                if source.entity == entity {
                    continue;
                }
                let observed = StatHandle::new(entity, entry.stat);
                if let Some(source_stats) = self.slot_mut(source.entity) {
                    source_stats.remove_observer(source.index, observed);
                }
            }
        }

        let freed = self.allocator.deallocate(entity);
        debug_assert!(freed, "liveness was checked on entry");
        self.epoch += 1;

        affected.sort_unstable();
        affected.dedup();
        let mut scratch = Scratch::with_capacity(affected.len());
        for &handle in &affected {
            let mut guard = ScratchGuard::new(&mut scratch, affected.len());
            collect_dependents(&*self, handle, &mut guard)?;
            recompute_ordered(self, &mut guard)?;
        }

        debug!(
            entity = ?entity,
            dropped_modifiers = stats.modifiers.len(),
            recomputed = affected.len(),
            "entity despawned"
        );
        Ok(())
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.allocator.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// All live entities, in slot order.
    pub fn entities(&self) -> Vec<EntityId> {
        self.allocator
            .live_in(0..self.allocator.slot_count() as u32)
            .collect()
    }

    // -- lookups ------------------------------------------------------------

    pub fn entity_stats(&self, entity: EntityId) -> Option<&EntityStats> {
        if !self.allocator.is_alive(entity) {
            return None;
        }
        self.slots.get(entity.index() as usize)?.as_ref()
    }

    fn slot_mut(&mut self, entity: EntityId) -> Option<&mut EntityStats> {
        if !self.allocator.is_alive(entity) {
            return None;
        }
        self.slots.get_mut(entity.index() as usize)?.as_mut()
    }

    pub fn layout_of(&self, entity: EntityId) -> Option<LayoutId> {
        self.entity_stats(entity).map(EntityStats::layout)
    }

    /// Index of `stat_type` in the entity's layout.
    ///
    /// Returns [`StatIndex::INVALID`] when the entity is dead or its layout
    /// lacks the type.
    pub fn stat_index(&self, entity: EntityId, stat_type: StatTypeId) -> StatIndex {
        self.layout_of(entity)
            .and_then(|layout| self.layout(layout))
            .map_or(StatIndex::INVALID, |layout| layout.index_of(stat_type))
    }

    pub fn stat_handle(&self, entity: EntityId, stat_type: StatTypeId) -> Option<StatHandle> {
        let index = self.stat_index(entity, stat_type);
        index.is_valid().then(|| StatHandle::new(entity, index))
    }

    pub fn modifier_count(&self, entity: EntityId) -> Option<usize> {
        self.entity_stats(entity).map(EntityStats::modifier_count)
    }

    // -- batches ------------------------------------------------------------

    /// Split the world into disjoint mutable views of `batch_size` slots.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn batches(&mut self, batch_size: usize) -> Vec<StatBatch<'_>> {
        assert!(batch_size > 0, "batch size must be positive");
        let binding = self.binding();
        let Self {
            allocator, slots, ..
        } = self;
        let allocator: &EntityAllocator = allocator;
        slots
            .chunks_mut(batch_size)
            .enumerate()
            .map(move |(i, chunk)| StatBatch {
                binding,
                start: i * batch_size,
                allocator,
                slots: chunk,
            })
            .collect()
    }
}

impl StatStore for StatWorld {
    fn binding(&self) -> WorldBinding {
        StatWorld::binding(self)
    }

    fn entity(&self, entity: EntityId) -> Result<&EntityStats, StatError> {
        self.entity_stats(entity)
            .ok_or(StatError::StaleEntity { entity })
    }

    fn entity_mut(&mut self, entity: EntityId) -> Result<&mut EntityStats, StatError> {
        self.slot_mut(entity).ok_or(StatError::StaleEntity { entity })
    }
}

// ---------------------------------------------------------------------------
// StatBatch
// ---------------------------------------------------------------------------

/// Mutable view over the entity slots `range()` of a [`StatWorld`].
///
/// Batches produced by one [`StatWorld::batches`] call never overlap, so
/// they can be processed on different threads. Any access to an entity
/// outside the range fails with [`StatError::OutsidePartition`] before
/// anything is written.
pub struct StatBatch<'w> {
    binding: WorldBinding,
    start: usize,
    allocator: &'w EntityAllocator,
    slots: &'w mut [Option<EntityStats>],
}

impl std::fmt::Debug for StatBatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatBatch")
            .field("range", &self.range())
            .finish()
    }
}

impl StatBatch<'_> {
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Live entities in this batch, in slot order.
    pub fn entities(&self) -> Vec<EntityId> {
        let range = self.range();
        self.allocator
            .live_in(range.start as u32..range.end as u32)
            .collect()
    }

    fn local_index(&self, entity: EntityId) -> Result<usize, StatError> {
        if !self.allocator.is_alive(entity) {
            return Err(StatError::StaleEntity { entity });
        }
        let range = self.range();
        let index = entity.index() as usize;
        if !range.contains(&index) {
            return Err(StatError::OutsidePartition {
                entity,
                start: range.start,
                end: range.end,
            });
        }
        Ok(index - self.start)
    }
}

impl StatStore for StatBatch<'_> {
    fn binding(&self) -> WorldBinding {
        self.binding
    }

    fn entity(&self, entity: EntityId) -> Result<&EntityStats, StatError> {
        let local = self.local_index(entity)?;
        self.slots[local]
            .as_ref()
            .ok_or(StatError::StaleEntity { entity })
    }

    fn entity_mut(&mut self, entity: EntityId) -> Result<&mut EntityStats, StatError> {
        let local = self.local_index(entity)?;
        self.slots[local]
            .as_mut()
            .ok_or(StatError::StaleEntity { entity })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::StatAccessor;
    use crate::modifier::StatModifier;
    use crate::scratch::WorldData;

    fn world_with(count: usize) -> (StatWorld, StatTypeId, Vec<EntityId>) {
        let mut world = StatWorld::new();
        let hp = world.register_stat_type("health");
        let layout = world.register_layout(StatLayout::new().with_stat(hp, 10.0));
        let entities = (0..count).map(|_| world.spawn(layout).unwrap()).collect();
        (world, hp, entities)
    }

    #[test]
    fn spawn_and_despawn_track_epoch() {
        let (mut world, _, entities) = world_with(2);
        assert_eq!(world.epoch(), 2);
        world.despawn(entities[0]).unwrap();
        assert_eq!(world.epoch(), 3);
        assert_eq!(world.entity_count(), 1);
        assert!(world.despawn(entities[0]).is_err());
        assert_eq!(world.epoch(), 3);
    }

    #[test]
    fn despawn_frees_slot_for_the_next_spawn() {
        let (mut world, _, entities) = world_with(3);
        let layout = world.layout_of(entities[1]).unwrap();
        world.despawn(entities[1]).unwrap();
        assert!(!world.is_alive(entities[1]));
        assert_eq!(world.entities(), vec![entities[0], entities[2]]);

        let reused = world.spawn(layout).unwrap();
        assert_eq!(reused.index(), entities[1].index());
        assert_eq!(reused.generation(), entities[1].generation() + 1);
        assert_eq!(world.entity_count(), 3);
    }

    #[test]
    fn spawn_unknown_layout_fails() {
        let mut world = StatWorld::new();
        let result = world.spawn(LayoutId(7));
        assert!(matches!(result, Err(StatError::UnknownLayout { .. })));
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn stat_index_is_invalid_for_missing_type() {
        let (mut world, hp, entities) = world_with(1);
        let mana = world.register_stat_type("mana");
        assert!(world.stat_index(entities[0], hp).is_valid());
        assert!(!world.stat_index(entities[0], mana).is_valid());
        assert_eq!(world.stat_handle(entities[0], mana), None);
    }

    #[test]
    fn recycled_slot_starts_fresh() {
        let (mut world, hp, entities) = world_with(1);
        let accessor = StatAccessor::new(&world);
        let mut scratch = WorldData::new(&accessor, 1);
        let handle = world.stat_handle(entities[0], hp).unwrap();
        accessor
            .try_add_stat_modifier(&mut world, handle, StatModifier::add(3.0), &mut scratch)
            .unwrap();

        world.despawn(entities[0]).unwrap();
        assert_eq!(world.layout_of(entities[0]), None);
        let reborn = world.spawn(LayoutId(0)).unwrap();
        assert_eq!(reborn.index(), entities[0].index());
        assert_eq!(world.modifier_count(reborn), Some(0));
        assert_eq!(world.modifier_count(entities[0]), None);
    }

    #[test]
    fn batches_cover_all_slots_without_overlap() {
        let (mut world, _, _) = world_with(10);
        let ranges: Vec<Range<usize>> = world.batches(4).iter().map(StatBatch::range).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn batch_rejects_entities_outside_its_range() {
        let (mut world, hp, entities) = world_with(4);
        let accessor = StatAccessor::new(&world);
        let mut scratch = WorldData::new(&accessor, 2);
        let outside = StatHandle::new(entities[3], world.stat_index(entities[3], hp));

        let mut batches = world.batches(2);
        let first = &mut batches[0];
        assert_eq!(first.entities(), vec![entities[0], entities[1]]);
        let result = accessor.try_set_stat_base_value(first, outside, 1.0, &mut scratch);
        assert!(matches!(result, Err(StatError::OutsidePartition { start: 0, end: 2, .. })));
    }

    #[test]
    fn batch_rejects_propagation_leaving_its_range() {
        let (mut world, hp, entities) = world_with(4);
        let accessor = StatAccessor::new(&world);
        let mut scratch = WorldData::new(&accessor, 4);
        let source = world.stat_handle(entities[0], hp).unwrap();
        let target = world.stat_handle(entities[3], hp).unwrap();
        accessor
            .try_add_stat_modifier(&mut world, target, StatModifier::add(source), &mut scratch)
            .unwrap();

        {
            let mut batches = world.batches(2);
            let result = accessor.try_set_stat_base_value(&mut batches[0], source, 50.0, &mut scratch);
            assert!(matches!(result, Err(StatError::OutsidePartition { .. })));
        }
        // Nothing was written.
        assert_eq!(accessor.try_get_stat(&world, source).unwrap().base, 10.0);
        assert_eq!(accessor.try_get_stat(&world, target).unwrap().value, 20.0);
    }
}
