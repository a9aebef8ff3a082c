//! Simulation state.
//!
//! [`SimState`] owns the [`StatWorld`] plus the per-entity simulation data
//! the sample systems need ([`Agent`]): remaining lifetime, whether the
//! entity is an affector, and the affector's [`ModifierHandleBuffer`]. Agent
//! data is indexed by entity slot, like the world's own storage, so the two
//! can be split into the same disjoint batches.

use rand::SeedableRng;
use rand_pcg::Pcg32;
use rayon::prelude::*;
use serde::Serialize;

use statweave_core::prelude::*;

use crate::config::SimConfig;

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Simulation data attached to one live entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    pub entity: EntityId,
    /// Ticks left before the entity is disabled.
    pub lifetime: u32,
    pub affector: bool,
    /// Whether the affector has attached its modifiers yet.
    pub initialized: bool,
    /// Set when the lifetime runs out; the entity is destroyed once its
    /// buffer is empty.
    pub disabled: bool,
    /// Handles of the modifiers this entity is the source of.
    pub buffer: ModifierHandleBuffer,
}

impl Agent {
    pub fn new(entity: EntityId, lifetime: u32, affector: bool) -> Self {
        Self {
            entity,
            lifetime,
            affector,
            initialized: false,
            disabled: false,
            buffer: ModifierHandleBuffer::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// StatKinds
// ---------------------------------------------------------------------------

/// Stat indices of the single layout the simulation spawns.
#[derive(Debug, Clone, Copy)]
pub struct StatKinds {
    pub health: StatIndex,
    pub armor: StatIndex,
    /// Only ever read as a modifier source, never targeted.
    pub power: StatIndex,
}

// ---------------------------------------------------------------------------
// SimState
// ---------------------------------------------------------------------------

/// Everything a simulation tick reads and writes.
pub struct SimState {
    pub(crate) config: SimConfig,
    pub(crate) world: StatWorld,
    pub(crate) accessor: StatAccessor,
    pub(crate) layout: LayoutId,
    pub(crate) stats: StatKinds,
    /// Indexed by `EntityId::index`, same as the world's slots.
    pub(crate) agents: Vec<Option<Agent>>,
    /// Stream for structural decisions (spawning), which run sequentially.
    pub(crate) rng: Pcg32,
    pub(crate) tick: u64,
    pub(crate) totals: SimTotals,
}

/// Running counters over the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimTotals {
    pub spawned: u64,
    pub destroyed: u64,
    pub modifiers_added: u64,
    pub modifiers_removed: u64,
    /// Removals whose target had already been despawned.
    pub removals_skipped: u64,
}

impl std::fmt::Debug for SimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimState")
            .field("tick", &self.tick)
            .field("entity_count", &self.world.entity_count())
            .field("totals", &self.totals)
            .finish()
    }
}

impl SimState {
    pub fn new(config: SimConfig) -> Self {
        let mut world = StatWorld::new();
        let health = world.register_stat_type("health");
        let armor = world.register_stat_type("armor");
        let power = world.register_stat_type("power");
        let stat_layout = StatLayout::new()
            .with_stat(health, 100.0)
            .with_stat(armor, 10.0)
            .with_stat(power, 1.0);
        let stats = StatKinds {
            health: stat_layout.index_of(health),
            armor: stat_layout.index_of(armor),
            power: stat_layout.index_of(power),
        };
        let layout = world.register_layout(stat_layout);
        let accessor = StatAccessor::new(&world);
        let rng = Pcg32::seed_from_u64(config.seed);

        Self {
            config,
            world,
            accessor,
            layout,
            stats,
            agents: Vec::new(),
            rng,
            tick: 0,
            totals: SimTotals::default(),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn world(&self) -> &StatWorld {
        &self.world
    }

    pub fn accessor(&self) -> &StatAccessor {
        &self.accessor
    }

    pub fn stats(&self) -> StatKinds {
        self.stats
    }

    pub fn totals(&self) -> SimTotals {
        self.totals
    }

    pub fn agent(&self, entity: EntityId) -> Option<&Agent> {
        self.agents
            .get(entity.index() as usize)?
            .as_ref()
            .filter(|agent| agent.entity == entity)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter().flatten()
    }

    /// Total handles held across every affector buffer.
    pub fn buffered_handles(&self) -> usize {
        self.agents().map(|agent| agent.buffer.len()).sum()
    }

    // -- structural changes -------------------------------------------------

    pub(crate) fn spawn_agent(&mut self, lifetime: u32, affector: bool) -> Result<EntityId, StatError> {
        let entity = self.world.spawn(self.layout)?;
        let idx = entity.index() as usize;
        if idx >= self.agents.len() {
            self.agents.resize_with(idx + 1, || None);
        }
        self.agents[idx] = Some(Agent::new(entity, lifetime, affector));
        self.totals.spawned += 1;
        Ok(entity)
    }

    pub(crate) fn despawn_agent(&mut self, entity: EntityId) -> Result<(), StatError> {
        self.world.despawn(entity)?;
        self.agents[entity.index() as usize] = None;
        self.totals.destroyed += 1;
        Ok(())
    }

    /// Re-bind the accessor after structural changes.
    pub(crate) fn refresh_accessor(&mut self) {
        self.accessor.update(&self.world);
    }

    // -- batches ------------------------------------------------------------

    /// Run `work` over every batch in parallel, each batch paired with its
    /// agents, its index and a private RNG stream for this tick.
    pub(crate) fn par_batches<F>(&mut self, work: F) -> BatchCounts
    where
        F: Fn(&mut BatchContext<'_, '_>) + Sync + Send,
    {
        let batch_size = self.config.batch_size;
        let seed = self.config.seed;
        let tick = self.tick;
        let stats = self.stats;
        let config = &self.config;
        let accessor = &self.accessor;

        self.world
            .batches(batch_size)
            .into_par_iter()
            .zip(self.agents.par_chunks_mut(batch_size))
            .enumerate()
            .map(|(index, (mut batch, agents))| {
                let mut ctx = BatchContext {
                    scratch: WorldData::new(accessor, batch.len()),
                    rng: batch_rng(seed, tick, index),
                    accessor,
                    batch: &mut batch,
                    agents,
                    stats,
                    config,
                    counts: BatchCounts::default(),
                };
                work(&mut ctx);
                ctx.counts
            })
            .reduce(BatchCounts::default, BatchCounts::merge)
    }
}

/// Private stream for one batch in one tick.
pub(crate) fn batch_rng(seed: u64, tick: u64, batch_index: usize) -> Pcg32 {
    let state = seed ^ tick.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    Pcg32::new(state, batch_index as u64)
}

// ---------------------------------------------------------------------------
// BatchContext
// ---------------------------------------------------------------------------

/// Everything one batch of a parallel system may touch.
pub(crate) struct BatchContext<'b, 'w> {
    pub(crate) accessor: &'b StatAccessor,
    pub(crate) batch: &'b mut StatBatch<'w>,
    pub(crate) scratch: WorldData,
    /// Agents for the batch's slot range.
    pub(crate) agents: &'b mut [Option<Agent>],
    pub(crate) rng: Pcg32,
    pub(crate) stats: StatKinds,
    pub(crate) config: &'b SimConfig,
    pub(crate) counts: BatchCounts,
}

/// Per-batch counters, summed after a parallel pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BatchCounts {
    pub(crate) added: u64,
    pub(crate) removed: u64,
    pub(crate) skipped: u64,
}

impl BatchCounts {
    fn merge(self, other: Self) -> Self {
        Self {
            added: self.added + other.added,
            removed: self.removed + other.removed,
            skipped: self.skipped + other.skipped,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
