//! Stat types, layouts, and stat handles.
//!
//! Stat types are registered by name in a [`StatTypeRegistry`]. A
//! [`StatLayout`] is the fixed, ordered set of stat types an entity carries
//! (together with their default base values); it plays the role an archetype
//! plays for components. Looking a type up in a layout yields a [`StatIndex`],
//! which is invalid when the layout does not carry that type.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// StatTypeId
// ---------------------------------------------------------------------------

/// Opaque identifier for a registered stat type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatTypeId(pub(crate) u16);

impl fmt::Debug for StatTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatTypeId({})", self.0)
    }
}

/// Metadata about a registered stat type.
#[derive(Debug, Clone)]
pub struct StatTypeInfo {
    pub id: StatTypeId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// StatTypeRegistry
// ---------------------------------------------------------------------------

/// Registry mapping stat names to [`StatTypeId`]s.
///
/// Registering a name twice returns the id from the first registration.
#[derive(Debug, Default)]
pub struct StatTypeRegistry {
    by_name: HashMap<String, StatTypeId>,
    /// Indexed by `StatTypeId.0`.
    infos: Vec<StatTypeInfo>,
}

impl StatTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stat type under `name`.
    ///
    /// # Panics
    ///
    /// Panics if more than `u16::MAX` stat types are registered.
    pub fn register(&mut self, name: &str) -> StatTypeId {
        if let Some(&existing) = self.by_name.get(name) {
            return existing;
        }
        let raw = u16::try_from(self.infos.len())
            .ok()
            .filter(|&raw| raw != u16::MAX)
            .expect("stat type registry is full");
        let id = StatTypeId(raw);
        self.infos.push(StatTypeInfo {
            id,
            name: name.to_owned(),
        });
        self.by_name.insert(name.to_owned(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<StatTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn get_info(&self, id: StatTypeId) -> Option<&StatTypeInfo> {
        self.infos.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Names of all registered stat types, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.infos.iter().map(|info| info.name.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// StatIndex
// ---------------------------------------------------------------------------

/// Position of a stat inside an entity's layout.
///
/// [`StatIndex::INVALID`] is returned when a layout does not carry the
/// requested stat type. Callers check [`is_valid`](Self::is_valid) and skip.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatIndex(u16);

impl StatIndex {
    pub const INVALID: StatIndex = StatIndex(u16::MAX);

    #[inline]
    pub fn new(index: u16) -> Self {
        Self(index)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// The raw position, or `None` for [`StatIndex::INVALID`].
    #[inline]
    pub fn get(self) -> Option<usize> {
        self.is_valid().then_some(self.0 as usize)
    }

    #[inline]
    pub fn to_raw(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for StatIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "StatIndex({})", self.0)
        } else {
            write!(f, "StatIndex(INVALID)")
        }
    }
}

// ---------------------------------------------------------------------------
// StatHandle / StatValue
// ---------------------------------------------------------------------------

/// Identifies one stat slot: an owning entity plus the stat's index in that
/// entity's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatHandle {
    pub entity: EntityId,
    pub index: StatIndex,
}

impl StatHandle {
    pub fn new(entity: EntityId, index: StatIndex) -> Self {
        Self { entity, index }
    }
}

/// Serialize an `f32` as its raw bits.
///
/// `serde_json` writes NaN and the infinities as `null`, which neither reads
/// back nor hashes apart. Stat values can reach those through modifier
/// stacking, so snapshots store the bit pattern instead.
pub(crate) mod f32_bits {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, s: S) -> Result<S::Ok, S::Error> {
        value.to_bits().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
        Ok(f32::from_bits(u32::deserialize(d)?))
    }
}

/// Base and effective value of one stat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatValue {
    #[serde(with = "f32_bits")]
    pub base: f32,
    /// Effective value: `base` folded with every active modifier.
    #[serde(with = "f32_bits")]
    pub value: f32,
}

impl StatValue {
    pub fn new(base: f32) -> Self {
        Self { base, value: base }
    }
}

// ---------------------------------------------------------------------------
// StatLayout
// ---------------------------------------------------------------------------

/// Identifier of a layout registered in a [`StatWorld`](crate::world::StatWorld).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayoutId(pub(crate) u32);

/// The ordered set of stat types an entity carries, with default base values.
///
/// ```
/// use statweave_core::prelude::*;
///
/// let mut world = StatWorld::new();
/// let strength = world.register_stat_type("strength");
/// let agility = world.register_stat_type("agility");
/// let layout = StatLayout::new().with_stat(strength, 10.0);
///
/// assert!(layout.index_of(strength).is_valid());
/// assert!(!layout.index_of(agility).is_valid());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatLayout {
    types: Vec<StatTypeId>,
    defaults: Vec<f32>,
}

impl StatLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `stat_type` with a default base value. Adding a type that is
    /// already present replaces its default.
    pub fn with_stat(mut self, stat_type: StatTypeId, default_base: f32) -> Self {
        match self.types.iter().position(|&t| t == stat_type) {
            Some(pos) => self.defaults[pos] = default_base,
            None => {
                assert!(
                    self.types.len() < u16::MAX as usize,
                    "stat layout cannot hold more than {} stats",
                    u16::MAX - 1
                );
                self.types.push(stat_type);
                self.defaults.push(default_base);
            }
        }
        self
    }

    pub fn index_of(&self, stat_type: StatTypeId) -> StatIndex {
        self.types
            .iter()
            .position(|&t| t == stat_type)
            .map_or(StatIndex::INVALID, |pos| StatIndex::new(pos as u16))
    }

    pub fn types(&self) -> &[StatTypeId] {
        &self.types
    }

    pub fn default_base(&self, index: StatIndex) -> Option<f32> {
        self.defaults.get(index.get()?).copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Fresh stat values for a newly spawned entity.
    pub(crate) fn initial_values(&self) -> Vec<StatValue> {
        self.defaults.iter().map(|&base| StatValue::new(base)).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut reg = StatTypeRegistry::new();
        let id = reg.register("strength");
        assert_eq!(reg.lookup("strength"), Some(id));
        assert_eq!(reg.get_info(id).unwrap().name, "strength");
        assert_eq!(reg.lookup("missing"), None);
    }

    #[test]
    fn same_name_same_id() {
        let mut reg = StatTypeRegistry::new();
        let a = reg.register("strength");
        let b = reg.register("strength");
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn layout_indices_follow_insertion_order() {
        let mut reg = StatTypeRegistry::new();
        let str_id = reg.register("strength");
        let dex_id = reg.register("dexterity");
        let int_id = reg.register("intelligence");

        let layout = StatLayout::new()
            .with_stat(dex_id, 3.0)
            .with_stat(str_id, 5.0);

        assert_eq!(layout.index_of(dex_id), StatIndex::new(0));
        assert_eq!(layout.index_of(str_id), StatIndex::new(1));
        assert_eq!(layout.index_of(int_id), StatIndex::INVALID);
        assert_eq!(layout.default_base(StatIndex::new(1)), Some(5.0));
        assert_eq!(layout.default_base(StatIndex::INVALID), None);
    }

    #[test]
    fn duplicate_type_replaces_default() {
        let mut reg = StatTypeRegistry::new();
        let hp = reg.register("health");
        let layout = StatLayout::new().with_stat(hp, 1.0).with_stat(hp, 50.0);
        assert_eq!(layout.len(), 1);
        assert_eq!(layout.default_base(StatIndex::new(0)), Some(50.0));
    }

    #[test]
    fn invalid_index_has_no_position() {
        assert!(!StatIndex::INVALID.is_valid());
        assert_eq!(StatIndex::INVALID.get(), None);
        assert_eq!(StatIndex::new(4).get(), Some(4));
    }
}
