//! The stat evaluator.
//!
//! [`StatAccessor`] mediates every read and write of stat values and modifier
//! lists. It owns no stat data: each call borrows a [`StatStore`] (the whole
//! world or one batch) and a [`WorldData`] scratch arena.
//!
//! Every mutation runs in two phases. The first phase only reads: it
//! validates the handles, walks the observer graph downstream of the touched
//! stat, and checks that every stat it will recompute can read all of its
//! sources. Only then does the second phase write the change and recompute the
//! affected stats in dependency order. A failing call therefore never leaves a
//! store half-updated.
//!
//! Recomputation is eager: effective values are up to date when a call
//! returns.

use tracing::{debug, trace};

use crate::modifier::{ModifierEntry, ModifierHandle, ModifierSource, ModifierTerms, StatModifier};
use crate::scratch::{Scratch, WalkFrame, WorldData};
use crate::stat::{StatHandle, StatValue};
use crate::storage::{ObserverEntry, StatStore, WorldBinding};
use crate::world::StatWorld;
use crate::StatError;

// ---------------------------------------------------------------------------
// StatAccessor
// ---------------------------------------------------------------------------

/// Evaluator handle bound to one [`StatWorld`].
///
/// Call [`update`](Self::update) once per tick, and again after spawning or
/// despawning entities, before issuing further calls.
#[derive(Debug, Clone)]
pub struct StatAccessor {
    binding: WorldBinding,
}

impl StatAccessor {
    pub fn new(world: &StatWorld) -> Self {
        Self {
            binding: world.binding(),
        }
    }

    /// Re-bind to the world's current structural epoch.
    ///
    /// # Panics
    ///
    /// Panics if `world` is not the world this accessor was created for.
    pub fn update(&mut self, world: &StatWorld) {
        let binding = world.binding();
        assert_eq!(
            binding.world, self.binding.world,
            "StatAccessor updated against a different world"
        );
        self.binding = binding;
    }

    pub fn binding(&self) -> WorldBinding {
        self.binding
    }

    fn check_store<S: StatStore + ?Sized>(&self, store: &S) {
        let binding = store.binding();
        assert_eq!(
            binding.world, self.binding.world,
            "StatAccessor used with a store from a different world"
        );
        assert_eq!(
            binding.epoch, self.binding.epoch,
            "StatAccessor is stale: call update() after spawning or despawning"
        );
    }

    /// Read a stat's base and effective value.
    pub fn try_get_stat<S: StatStore + ?Sized>(
        &self,
        store: &S,
        handle: StatHandle,
    ) -> Result<StatValue, StatError> {
        self.check_store(store);
        read_stat(&*store, handle).copied()
    }

    /// Set a stat's base value and recompute it and everything observing it.
    pub fn try_set_stat_base_value<S: StatStore + ?Sized>(
        &self,
        store: &mut S,
        handle: StatHandle,
        base: f32,
        world_data: &mut WorldData,
    ) -> Result<(), StatError> {
        self.check_store(store);
        let mut scratch = world_data.begin(self.binding);

        read_stat(&*store, handle)?;
        collect_dependents(&*store, handle, &mut scratch)?;

        stat_mut(store, handle)?.base = base;
        recompute_ordered(store, &mut scratch)?;

        trace!(stat = ?handle, base, recomputed = scratch.order.len(), "stat base value set");
        Ok(())
    }

    /// Append `modifier` to the target entity's packed list.
    ///
    /// The returned handle records the slot the modifier was appended at. A
    /// stat-sourced modifier registers an observer on the source entity;
    /// adding one that would make a stat depend on itself fails with
    /// [`StatError::InfiniteLoop`].
    pub fn try_add_stat_modifier<S: StatStore + ?Sized>(
        &self,
        store: &mut S,
        target: StatHandle,
        modifier: StatModifier,
        world_data: &mut WorldData,
    ) -> Result<ModifierHandle, StatError> {
        self.check_store(store);
        let mut scratch = world_data.begin(self.binding);

        read_stat(&*store, target)?;
        let source = modifier.source.stat();
        if let Some(source) = source {
            read_stat(&*store, source)?;
        }

        collect_dependents(&*store, target, &mut scratch)?;
        if let Some(source) = source {
            // The source would end up observing itself.
            if scratch.visited.contains(&source) {
                return Err(StatError::InfiniteLoop {
                    source_stat: source,
                    target,
                });
            }
        }

        let entity = store.entity_mut(target.entity)?;
        let id = entity.next_modifier_id();
        let slot = u32::try_from(entity.modifiers.len()).expect("modifier list exceeds u32 slots");
        entity.modifiers.push(ModifierEntry {
            id,
            stat: target.index,
            modifier,
        });
        if let Some(source) = source {
            store.entity_mut(source.entity)?.observers.push(ObserverEntry {
                source: source.index,
                target,
            });
        }
        recompute_ordered(store, &mut scratch)?;

        trace!(stat = ?target, ?id, slot, op = ?modifier.op, "modifier added");
        Ok(ModifierHandle {
            affected: target,
            slot,
            id,
            modifier,
        })
    }

    /// Remove the modifier `handle` refers to.
    ///
    /// Returns a copy of the handle carrying the slot the modifier actually
    /// occupied; callers caching other handles to the same target patch them
    /// with it (see [`ModifierHandleBuffer::patch_after_removal`]). Fails with
    /// [`StatError::StaleModifier`] if the modifier was already removed.
    ///
    /// [`ModifierHandleBuffer::patch_after_removal`]: crate::modifier::ModifierHandleBuffer::patch_after_removal
    pub fn try_remove_stat_modifier<S: StatStore + ?Sized>(
        &self,
        store: &mut S,
        handle: &ModifierHandle,
        world_data: &mut WorldData,
    ) -> Result<ModifierHandle, StatError> {
        self.check_store(store);
        let mut scratch = world_data.begin(self.binding);

        let target_entity = handle.target();
        let entity = store.entity(target_entity)?;
        let slot = entity
            .locate_modifier(handle.slot, handle.id)
            .ok_or(StatError::StaleModifier {
                entity: target_entity,
                id: handle.id,
            })?;
        let entry = entity.modifiers[slot];
        if slot != handle.slot as usize {
            debug!(
                entity = ?target_entity,
                id = ?handle.id,
                cached_slot = handle.slot,
                slot,
                "cached modifier slot was stale, resolved by id"
            );
        }

        let affected = StatHandle::new(target_entity, entry.stat);
        let source = entry.modifier.source.stat();
        if let Some(source) = source {
            store.entity(source.entity)?;
        }
        collect_dependents(&*store, affected, &mut scratch)?;

        store.entity_mut(target_entity)?.modifiers.remove(slot);
        if let Some(source) = source {
            let removed = store
                .entity_mut(source.entity)?
                .remove_observer(source.index, affected);
            debug_assert!(removed, "missing observer entry for {source:?} -> {affected:?}");
        }
        recompute_ordered(store, &mut scratch)?;

        trace!(stat = ?affected, id = ?handle.id, slot, "modifier removed");
        Ok(ModifierHandle {
            affected,
            slot: slot as u32,
            id: entry.id,
            modifier: entry.modifier,
        })
    }

    /// Recompute a stat and everything observing it from the current lists.
    pub fn try_recompute_stat<S: StatStore + ?Sized>(
        &self,
        store: &mut S,
        handle: StatHandle,
        world_data: &mut WorldData,
    ) -> Result<(), StatError> {
        self.check_store(store);
        let mut scratch = world_data.begin(self.binding);

        read_stat(&*store, handle)?;
        collect_dependents(&*store, handle, &mut scratch)?;
        recompute_ordered(store, &mut scratch)
    }
}

// ---------------------------------------------------------------------------
// Evaluation internals
// ---------------------------------------------------------------------------

pub(crate) fn read_stat<S: StatStore + ?Sized>(
    store: &S,
    handle: StatHandle,
) -> Result<&StatValue, StatError> {
    store
        .entity(handle.entity)?
        .stat(handle.index)
        .ok_or(StatError::InvalidStatIndex {
            entity: handle.entity,
            index: handle.index,
        })
}

fn stat_mut<S: StatStore + ?Sized>(
    store: &mut S,
    handle: StatHandle,
) -> Result<&mut StatValue, StatError> {
    store
        .entity_mut(handle.entity)?
        .stat_mut(handle.index)
        .ok_or(StatError::InvalidStatIndex {
            entity: handle.entity,
            index: handle.index,
        })
}

/// Fill `scratch.order` with `root` and every stat downstream of it, in an
/// order where each stat comes after all of its sources in the set.
///
/// Also checks that every one of those stats can read all of its sources, so
/// the recompute phase cannot fail halfway.
///
/// # Panics
///
/// Panics if the observer graph contains a cycle. Cycles are rejected when
/// modifiers are added, so reaching one means storage was corrupted.
pub(crate) fn collect_dependents<S: StatStore + ?Sized>(
    store: &S,
    root: StatHandle,
    scratch: &mut Scratch,
) -> Result<(), StatError> {
    scratch.visited.insert(root);
    scratch.on_stack.insert(root);
    scratch.stack.push(WalkFrame {
        handle: root,
        next_observer: 0,
    });

    while let Some(frame) = scratch.stack.last().copied() {
        let observers = store.entity(frame.handle.entity)?.observers();
        let next = observers[frame.next_observer..]
            .iter()
            .position(|entry| entry.source == frame.handle.index)
            .map(|offset| frame.next_observer + offset);

        match next {
            Some(pos) => {
                if let Some(top) = scratch.stack.last_mut() {
                    top.next_observer = pos + 1;
                }
                let target = observers[pos].target;
                assert!(
                    !scratch.on_stack.contains(&target),
                    "observer cycle detected at {target:?}"
                );
                if scratch.visited.insert(target) {
                    read_stat(&*store, target)?;
                    scratch.on_stack.insert(target);
                    scratch.stack.push(WalkFrame {
                        handle: target,
                        next_observer: 0,
                    });
                }
            }
            None => {
                scratch.stack.pop();
                scratch.on_stack.remove(&frame.handle);
                scratch.order.push(frame.handle);
            }
        }
    }
    scratch.order.reverse();

    for &handle in &scratch.order {
        let entity = store.entity(handle.entity)?;
        for entry in entity.modifiers_for(handle.index) {
            if let Some(source) = entry.modifier.source.stat() {
                read_stat(&*store, source)?;
            }
        }
    }
    Ok(())
}

/// Effective value of `handle` from its base and current modifier list.
pub(crate) fn compute_stat<S: StatStore + ?Sized>(
    store: &S,
    handle: StatHandle,
    terms: &mut ModifierTerms,
) -> Result<f32, StatError> {
    let entity = store.entity(handle.entity)?;
    let base = read_stat(&*store, handle)?.base;

    terms.clear();
    for entry in entity.modifiers_for(handle.index) {
        let value = match entry.modifier.source {
            ModifierSource::Constant(value) => value,
            ModifierSource::Stat(source) => read_stat(&*store, source)?.value,
        };
        terms.push(entry.modifier.op, value);
    }
    Ok(terms.fold(base))
}

/// Recompute every stat in `scratch.order`, in order.
pub(crate) fn recompute_ordered<S: StatStore + ?Sized>(
    store: &mut S,
    scratch: &mut Scratch,
) -> Result<(), StatError> {
    for &handle in &scratch.order {
        let value = compute_stat(&*store, handle, &mut scratch.terms)?;
        stat_mut(store, handle)?.value = value;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
