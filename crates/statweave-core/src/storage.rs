//! Per-entity stat storage and the [`StatStore`] trait.
//!
//! Everything the evaluator knows about one entity lives in its
//! [`EntityStats`]: the stat values, the packed list of modifiers that target
//! the entity, and the observer entries for modifiers elsewhere that read one
//! of the entity's stats.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::modifier::{ModifierEntry, ModifierId};
use crate::stat::{LayoutId, StatHandle, StatIndex, StatLayout, StatValue};
use crate::StatError;

// ---------------------------------------------------------------------------
// WorldBinding
// ---------------------------------------------------------------------------

/// Which world a store belongs to and its structural epoch.
///
/// The epoch advances on every spawn and despawn. An accessor bound to an
/// older epoch must be [`update`](crate::accessor::StatAccessor::update)d
/// before it is used again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldBinding {
    pub world: u64,
    pub epoch: u64,
}

// ---------------------------------------------------------------------------
// ObserverEntry
// ---------------------------------------------------------------------------

/// Records that `target` has a modifier sourced from stat `source` of the
/// entity holding this entry. One entry per such modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverEntry {
    pub source: StatIndex,
    pub target: StatHandle,
}

// ---------------------------------------------------------------------------
// EntityStats
// ---------------------------------------------------------------------------

/// Stat storage owned by one entity.
#[derive(Debug, Clone)]
pub struct EntityStats {
    layout: LayoutId,
    pub(crate) stats: Vec<StatValue>,
    pub(crate) modifiers: Vec<ModifierEntry>,
    pub(crate) observers: Vec<ObserverEntry>,
    next_modifier_id: u32,
}

impl EntityStats {
    pub(crate) fn new(layout_id: LayoutId, layout: &StatLayout) -> Self {
        Self {
            layout: layout_id,
            stats: layout.initial_values(),
            modifiers: Vec::new(),
            observers: Vec::new(),
            next_modifier_id: 0,
        }
    }

    pub fn layout(&self) -> LayoutId {
        self.layout
    }

    pub fn stats(&self) -> &[StatValue] {
        &self.stats
    }

    pub fn stat(&self, index: StatIndex) -> Option<&StatValue> {
        self.stats.get(index.get()?)
    }

    pub(crate) fn stat_mut(&mut self, index: StatIndex) -> Option<&mut StatValue> {
        self.stats.get_mut(index.get()?)
    }

    /// The packed modifier list, in slot order.
    pub fn modifiers(&self) -> &[ModifierEntry] {
        &self.modifiers
    }

    pub fn modifier_count(&self) -> usize {
        self.modifiers.len()
    }

    pub fn observers(&self) -> &[ObserverEntry] {
        &self.observers
    }

    /// Modifiers feeding stat `index`, in slot order.
    pub fn modifiers_for(&self, index: StatIndex) -> impl Iterator<Item = &ModifierEntry> {
        self.modifiers.iter().filter(move |entry| entry.stat == index)
    }

    pub(crate) fn next_modifier_id(&mut self) -> ModifierId {
        let id = ModifierId::new(self.next_modifier_id);
        self.next_modifier_id = self
            .next_modifier_id
            .checked_add(1)
            .expect("modifier ids exhausted for entity");
        id
    }

    /// Find the current slot of modifier `id`.
    ///
    /// `hint` is the slot recorded in the caller's handle; it is checked
    /// first and the list is scanned only when it no longer holds `id`.
    pub(crate) fn locate_modifier(&self, hint: u32, id: ModifierId) -> Option<usize> {
        let hint = hint as usize;
        if self.modifiers.get(hint).is_some_and(|entry| entry.id == id) {
            return Some(hint);
        }
        self.modifiers.iter().position(|entry| entry.id == id)
    }

    /// Remove one observer entry matching `source -> target`.
    pub(crate) fn remove_observer(&mut self, source: StatIndex, target: StatHandle) -> bool {
        let found = self
            .observers
            .iter()
            .position(|entry| entry.source == source && entry.target == target);
        match found {
            Some(pos) => {
                self.observers.remove(pos);
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// StatStore
// ---------------------------------------------------------------------------

/// Access to per-entity stat storage.
///
/// Implemented by the whole [`StatWorld`](crate::world::StatWorld) and by a
/// [`StatBatch`](crate::world::StatBatch), which only reaches entities in its
/// own index range.
pub trait StatStore {
    fn binding(&self) -> WorldBinding;

    /// Read access to a live entity's stats.
    fn entity(&self, entity: EntityId) -> Result<&EntityStats, StatError>;

    /// Write access to a live entity's stats.
    fn entity_mut(&mut self, entity: EntityId) -> Result<&mut EntityStats, StatError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
