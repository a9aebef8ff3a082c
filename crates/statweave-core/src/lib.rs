//! Statweave core -- data-oriented stat and modifier evaluation.
//!
//! Entities carry a fixed [`StatLayout`](stat::StatLayout) of numeric stats.
//! Modifiers targeting an entity live in one packed, ordered list on that
//! entity; each modifier folds a constant or another stat's current value into
//! one stat. The [`StatAccessor`](accessor::StatAccessor) recomputes affected
//! stats eagerly, following observer links from source stats to the stats
//! they feed. Generational entity IDs make every handle to a despawned entity
//! fail cleanly instead of touching whatever reused its slot.
//!
//! # Quick Start
//!
//! ```
//! use statweave_core::prelude::*;
//!
//! let mut world = StatWorld::new();
//! let strength = world.register_stat_type("strength");
//! let damage = world.register_stat_type("damage");
//! let layout = world.register_layout(
//!     StatLayout::new().with_stat(strength, 10.0).with_stat(damage, 5.0),
//! );
//! let hero = world.spawn(layout).unwrap();
//!
//! let accessor = StatAccessor::new(&world);
//! let mut scratch = WorldData::new(&accessor, 1);
//! let str_handle = world.stat_handle(hero, strength).unwrap();
//! let dmg_handle = world.stat_handle(hero, damage).unwrap();
//!
//! // damage = (5 + strength) * (1 + 0.5)
//! accessor
//!     .try_add_stat_modifier(&mut world, dmg_handle, StatModifier::add(str_handle), &mut scratch)
//!     .unwrap();
//! accessor
//!     .try_add_stat_modifier(&mut world, dmg_handle, StatModifier::add_multiplier(0.5), &mut scratch)
//!     .unwrap();
//! assert_eq!(accessor.try_get_stat(&world, dmg_handle).unwrap().value, 22.5);
//!
//! // Changing the source recomputes everything that reads it.
//! accessor
//!     .try_set_stat_base_value(&mut world, str_handle, 15.0, &mut scratch)
//!     .unwrap();
//! assert_eq!(accessor.try_get_stat(&world, dmg_handle).unwrap().value, 30.0);
//! ```

#![deny(unsafe_code)]

pub mod accessor;
pub mod entity;
pub mod modifier;
pub mod scratch;
pub mod snapshot;
pub mod stat;
pub mod storage;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by stat operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatError {
    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::EntityId },

    /// The stat index is invalid or outside the entity's layout.
    #[error("entity {entity:?} has no stat at {index:?}")]
    InvalidStatIndex {
        entity: entity::EntityId,
        index: stat::StatIndex,
    },

    /// The modifier is no longer in the target's list (already removed).
    #[error("modifier {id:?} is not active on entity {entity:?}")]
    StaleModifier {
        entity: entity::EntityId,
        id: modifier::ModifierId,
    },

    /// Spawn was given a layout the world never registered.
    #[error("layout {layout:?} is not registered")]
    UnknownLayout { layout: stat::LayoutId },

    /// A batch was asked to touch an entity outside its slot range.
    #[error("entity {entity:?} is outside the batch range {start}..{end}")]
    OutsidePartition {
        entity: entity::EntityId,
        start: usize,
        end: usize,
    },

    /// The stat-sourced modifier would make a stat depend on itself.
    #[error("modifier sourced from {source_stat:?} on {target:?} would create a cycle")]
    InfiniteLoop {
        source_stat: stat::StatHandle,
        target: stat::StatHandle,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::accessor::StatAccessor;
    pub use crate::entity::{EntityAllocator, EntityId};
    pub use crate::modifier::{
        patch_handles_after_removal, ModifierEntry, ModifierHandle, ModifierHandleBuffer,
        ModifierId, ModifierSource, StatModifier, StatOp,
    };
    pub use crate::scratch::WorldData;
    pub use crate::snapshot::{EntitySnapshot, WorldSnapshot};
    pub use crate::stat::{
        LayoutId, StatHandle, StatIndex, StatLayout, StatTypeId, StatTypeRegistry, StatValue,
    };
    pub use crate::storage::{EntityStats, ObserverEntry, StatStore, WorldBinding};
    pub use crate::world::{StatBatch, StatWorld};
    pub use crate::StatError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
