//! Modifiers, modifier handles, and the affector-side handle buffer.
//!
//! A modifier folds a source value into one stat of a target entity. Every
//! target entity keeps its active modifiers in one packed, ordered list; a
//! [`ModifierHandle`] records the position (`slot`) the modifier occupied when
//! it was added together with a stable [`ModifierId`].
//!
//! Removing slot `k` from a target's list shifts every later slot down by
//! one. Whoever caches handles to that target must then decrement every
//! cached slot greater than `k`. [`ModifierHandleBuffer`] does this for the
//! handles an affector owns:
//!
//! ```
//! use statweave_core::prelude::*;
//!
//! let target = StatHandle::new(EntityId::new(0, 0), StatIndex::new(0));
//! let mut buffer = ModifierHandleBuffer::new();
//! for slot in 0..4 {
//!     buffer.push(ModifierHandle {
//!         affected: target,
//!         slot,
//!         id: ModifierId::new(slot),
//!         modifier: StatModifier::add(1.0),
//!     });
//! }
//!
//! buffer.remove_at(1);
//! let slots: Vec<u32> = buffer.iter().map(|h| h.slot).collect();
//! assert_eq!(slots, vec![0, 1, 2]);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::stat::{StatHandle, StatIndex};

// ---------------------------------------------------------------------------
// StatOp / ModifierSource / StatModifier
// ---------------------------------------------------------------------------

/// How a modifier's source value folds into the affected stat.
///
/// The effective value is
/// `(base + Σ Add) × (1 + Σ AddMultiplier) × Π MultiplyMultiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatOp {
    Add,
    AddMultiplier,
    MultiplyMultiplier,
}

/// Where a modifier's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ModifierSource {
    Constant(#[serde(with = "crate::stat::f32_bits")] f32),
    /// The current effective value of another stat. The source entity
    /// observes this modifier: changing the source recomputes the target.
    Stat(StatHandle),
}

impl ModifierSource {
    /// The source stat, if this modifier is stat-driven.
    pub fn stat(&self) -> Option<StatHandle> {
        match *self {
            ModifierSource::Stat(handle) => Some(handle),
            ModifierSource::Constant(_) => None,
        }
    }
}

impl From<f32> for ModifierSource {
    fn from(value: f32) -> Self {
        ModifierSource::Constant(value)
    }
}

impl From<StatHandle> for ModifierSource {
    fn from(handle: StatHandle) -> Self {
        ModifierSource::Stat(handle)
    }
}

/// A modifier definition, before it is attached to a target stat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatModifier {
    pub op: StatOp,
    pub source: ModifierSource,
}

impl StatModifier {
    pub fn new(op: StatOp, source: impl Into<ModifierSource>) -> Self {
        Self {
            op,
            source: source.into(),
        }
    }

    pub fn add(source: impl Into<ModifierSource>) -> Self {
        Self::new(StatOp::Add, source)
    }

    pub fn add_multiplier(source: impl Into<ModifierSource>) -> Self {
        Self::new(StatOp::AddMultiplier, source)
    }

    pub fn multiply_multiplier(source: impl Into<ModifierSource>) -> Self {
        Self::new(StatOp::MultiplyMultiplier, source)
    }
}

// ---------------------------------------------------------------------------
// ModifierId / ModifierHandle
// ---------------------------------------------------------------------------

/// Stable identifier of a modifier, unique within its target entity.
///
/// Ids are never reused for the lifetime of the target entity, so a handle
/// to a removed modifier can never match a newer one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModifierId(u32);

impl ModifierId {
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ModifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModifierId({})", self.0)
    }
}

/// Identifies one applied modifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModifierHandle {
    /// The stat this modifier feeds.
    pub affected: StatHandle,
    /// Position in the target entity's packed modifier list.
    pub slot: u32,
    pub id: ModifierId,
    pub modifier: StatModifier,
}

impl ModifierHandle {
    /// The entity whose modifier list holds this modifier.
    #[inline]
    pub fn target(&self) -> EntityId {
        self.affected.entity
    }
}

/// Patch cached handles after `removed` was taken out of its target's list.
///
/// Every handle to the same target entity whose slot is greater than the
/// removed slot moves down by one. Handles to other entities are untouched.
pub fn patch_handles_after_removal(handles: &mut [ModifierHandle], removed: &ModifierHandle) {
    for handle in handles.iter_mut() {
        if handle.target() == removed.target() && handle.slot > removed.slot {
            handle.slot -= 1;
        }
    }
}

// ---------------------------------------------------------------------------
// ModifierHandleBuffer
// ---------------------------------------------------------------------------

/// The handles of every modifier one affector entity is the source of.
///
/// Entries keep their insertion order; removal is ordered (never
/// swap-remove) and patches the slots of the remaining entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifierHandleBuffer {
    handles: Vec<ModifierHandle>,
}

impl ModifierHandleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handles: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, handle: ModifierHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ModifierHandle> {
        self.handles.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModifierHandle> {
        self.handles.iter()
    }

    pub fn as_slice(&self) -> &[ModifierHandle] {
        &self.handles
    }

    /// Remove entry `index` and patch the slots of the remaining entries.
    ///
    /// Call this after the modifier itself has been removed from its target.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove_at(&mut self, index: usize) -> ModifierHandle {
        let removed = self.handles.remove(index);
        self.patch_after_removal(&removed);
        removed
    }

    /// Patch entries after a modifier was removed from its target by some
    /// other path (e.g. a snapshot being swept).
    pub fn patch_after_removal(&mut self, removed: &ModifierHandle) {
        patch_handles_after_removal(&mut self.handles, removed);
    }

    /// Move every entry out, leaving the buffer empty.
    pub fn drain_into(&mut self, out: &mut Vec<ModifierHandle>) {
        out.append(&mut self.handles);
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }
}

// ---------------------------------------------------------------------------
// Packed list entry + aggregation
// ---------------------------------------------------------------------------

/// One modifier inside a target entity's packed list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModifierEntry {
    pub id: ModifierId,
    /// The stat of the owning entity this modifier feeds.
    pub stat: StatIndex,
    pub modifier: StatModifier,
}

/// Term buffers for one aggregation, reused through the scratch arena.
#[derive(Debug, Default)]
pub(crate) struct ModifierTerms {
    pub(crate) adds: Vec<f32>,
    pub(crate) add_multipliers: Vec<f32>,
    pub(crate) multipliers: Vec<f32>,
}

impl ModifierTerms {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            adds: Vec::with_capacity(capacity),
            add_multipliers: Vec::with_capacity(capacity),
            multipliers: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, op: StatOp, value: f32) {
        match op {
            StatOp::Add => self.adds.push(value),
            StatOp::AddMultiplier => self.add_multipliers.push(value),
            StatOp::MultiplyMultiplier => self.multipliers.push(value),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.adds.clear();
        self.add_multipliers.clear();
        self.multipliers.clear();
    }

    /// Fold the collected terms onto `base`.
    ///
    /// Each group is sorted with `total_cmp` first, so the result depends on
    /// the multiset of terms only, never on the order they were collected in.
    pub(crate) fn fold(&mut self, base: f32) -> f32 {
        self.adds.sort_unstable_by(f32::total_cmp);
        self.add_multipliers.sort_unstable_by(f32::total_cmp);
        self.multipliers.sort_unstable_by(f32::total_cmp);

        let added = self.adds.iter().fold(base, |acc, v| acc + v);
        let add_multiplier = self.add_multipliers.iter().fold(1.0, |acc, v| acc + v);
        let multiplier = self.multipliers.iter().fold(1.0, |acc, v| acc * v);
        added * add_multiplier * multiplier
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
