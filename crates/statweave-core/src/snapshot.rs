//! World snapshots and state hashing.
//!
//! [`WorldSnapshot`] is a serializable capture of every live entity's stat
//! values, packed modifier list and observer entries, plus the allocator
//! generations. Two worlds that went through equivalent work produce the same
//! [`state_hash`](WorldSnapshot::state_hash), which is how batch scheduling
//! and simulation runs are checked for determinism.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::modifier::ModifierEntry;
use crate::stat::{LayoutId, StatValue};
use crate::storage::ObserverEntry;
use crate::world::StatWorld;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Serializable state of one live entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub layout: LayoutId,
    pub stats: Vec<StatValue>,
    /// The packed modifier list, in slot order.
    pub modifiers: Vec<ModifierEntry>,
    pub observers: Vec<ObserverEntry>,
}

/// A complete, serializable capture of a [`StatWorld`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Per-slot allocator generations.
    pub generations: Vec<u32>,
    /// Registered stat type names, in registration order.
    pub stat_types: Vec<String>,
    /// Live entities, sorted by id.
    pub entities: Vec<EntitySnapshot>,
}

impl WorldSnapshot {
    /// BLAKE3 hash (hex) of the snapshot's JSON encoding.
    pub fn state_hash(&self) -> String {
        let json_bytes =
            serde_json::to_vec(self).expect("WorldSnapshot should always be JSON-serializable");
        blake3::hash(&json_bytes).to_hex().to_string()
    }

    pub fn entity(&self, entity: EntityId) -> Option<&EntitySnapshot> {
        self.entities
            .binary_search_by_key(&entity, |snapshot| snapshot.entity_id)
            .ok()
            .map(|pos| &self.entities[pos])
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl StatWorld {
    /// Capture every live entity's stat state.
    pub fn capture_snapshot(&self) -> WorldSnapshot {
        let mut entities: Vec<EntitySnapshot> = self
            .entities()
            .into_iter()
            .filter_map(|entity_id| {
                let stats = self.entity_stats(entity_id)?;
                Some(EntitySnapshot {
                    entity_id,
                    layout: stats.layout(),
                    stats: stats.stats().to_vec(),
                    modifiers: stats.modifiers().to_vec(),
                    observers: stats.observers().to_vec(),
                })
            })
            .collect();
        entities.sort_by_key(|snapshot| snapshot.entity_id);

        let snapshot = WorldSnapshot {
            generations: self.allocator.generations(),
            stat_types: self
                .registry
                .names()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            entities,
        };
        tracing::debug!(
            entity_count = snapshot.entities.len(),
            "world snapshot captured"
        );
        snapshot
    }

    /// Shorthand for `capture_snapshot().state_hash()`.
    pub fn state_hash(&self) -> String {
        self.capture_snapshot().state_hash()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
