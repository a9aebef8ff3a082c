//! The sample systems.
//!
//! Registered in this order by [`build_simulation`](crate::build_simulation):
//!
//! 1. [`spawn_system`] tops the population up, then initializes new
//!    affectors in parallel batches: each attaches modifiers to random
//!    targets inside its own batch.
//! 2. [`lifetime_system`] counts lifetimes down and disables expired
//!    entities.
//! 3. [`modifier_removal_system`] sweeps affector buffers in parallel
//!    batches and removes the modifiers that are due.
//! 4. [`destroy_system`] despawns disabled entities whose buffers are empty.
//!
//! Parallel passes run over disjoint [`StatBatch`](statweave_core::world::StatBatch)
//! views, so an affector only ever targets entities of its own batch.

use rand::Rng;
use tracing::{debug, trace, warn};

use statweave_core::prelude::*;

use crate::state::{BatchContext, SimState};
use crate::SimError;

pub const SPAWN_SYSTEM: &str = "spawn";
pub const LIFETIME_SYSTEM: &str = "lifetime";
pub const MODIFIER_REMOVAL_SYSTEM: &str = "modifier_removal";
pub const DESTROY_SYSTEM: &str = "destroy";

// ---------------------------------------------------------------------------
// spawn
// ---------------------------------------------------------------------------

/// Spawn up to `spawn_per_tick` entities towards `population`, then let every
/// new affector attach its modifiers.
pub fn spawn_system(state: &mut SimState) -> Result<(), SimError> {
    let missing = state
        .config
        .population
        .saturating_sub(state.world.entity_count())
        .min(state.config.spawn_per_tick);

    if missing > 0 {
        let lifetimes = state.config.min_lifetime..=state.config.max_lifetime;
        for _ in 0..missing {
            let lifetime = state.rng.gen_range(lifetimes.clone());
            let affector = state.rng.gen_bool(state.config.affector_ratio);
            state.spawn_agent(lifetime, affector)?;
        }
        state.refresh_accessor();
        debug!(tick = state.tick, spawned = missing, "entities spawned");
    }

    let counts = state.par_batches(initialize_affectors);
    state.totals.modifiers_added += counts.added;
    Ok(())
}

fn initialize_affectors(ctx: &mut BatchContext<'_, '_>) {
    let targets = ctx.batch.entities();
    if targets.is_empty() {
        return;
    }
    let stats = ctx.stats;

    for agent in ctx.agents.iter_mut().flatten() {
        if !agent.affector || agent.initialized || agent.disabled {
            continue;
        }
        agent.initialized = true;

        let power = StatHandle::new(agent.entity, stats.power);
        let strength = ctx.rng.gen_range(0.5f32..3.0);
        if let Err(err) =
            ctx.accessor
                .try_set_stat_base_value(&mut *ctx.batch, power, strength, &mut ctx.scratch)
        {
            warn!(entity = ?agent.entity, %err, "affector power could not be set");
            continue;
        }

        for _ in 0..ctx.config.modifiers_per_affector {
            let target_entity = targets[ctx.rng.gen_range(0..targets.len())];
            let index = if ctx.rng.gen_bool(0.5) {
                stats.health
            } else {
                stats.armor
            };
            let target = StatHandle::new(target_entity, index);
            let modifier = match ctx.rng.gen_range(0..4) {
                0 => StatModifier::add(ctx.rng.gen_range(-10.0f32..10.0)),
                1 => StatModifier::add_multiplier(ctx.rng.gen_range(-0.2f32..0.5)),
                2 => StatModifier::multiply_multiplier(ctx.rng.gen_range(0.8f32..1.25)),
                _ => StatModifier::add(power),
            };

            match ctx.accessor.try_add_stat_modifier(
                &mut *ctx.batch,
                target,
                modifier,
                &mut ctx.scratch,
            ) {
                Ok(handle) => {
                    agent.buffer.push(handle);
                    ctx.counts.added += 1;
                }
                Err(err) => {
                    warn!(affector = ?agent.entity, target = ?target, %err, "modifier rejected");
                }
            }
        }
        trace!(affector = ?agent.entity, modifiers = agent.buffer.len(), "affector initialized");
    }
}

// ---------------------------------------------------------------------------
// lifetime
// ---------------------------------------------------------------------------

/// Count every lifetime down by one tick; entities reaching zero are disabled.
pub fn lifetime_system(state: &mut SimState) -> Result<(), SimError> {
    let mut expired = 0usize;
    for agent in state.agents.iter_mut().flatten() {
        if agent.disabled {
            continue;
        }
        agent.lifetime = agent.lifetime.saturating_sub(1);
        if agent.lifetime == 0 {
            agent.disabled = true;
            expired += 1;
        }
    }
    if expired > 0 {
        debug!(tick = state.tick, expired, "entities disabled");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// modifier removal
// ---------------------------------------------------------------------------

/// Remove due modifiers from every affector buffer.
///
/// A disabled affector's modifiers are all due; otherwise each modifier is
/// due with probability `removal_chance`. Each buffer is drained into a
/// scratch list first, then due handles are removed and the rest pushed
/// back. After every removal the handles still waiting in the scratch list
/// and the ones already pushed back are patched.
pub fn modifier_removal_system(state: &mut SimState) -> Result<(), SimError> {
    let counts = state.par_batches(remove_due_modifiers);
    state.totals.modifiers_removed += counts.removed;
    state.totals.removals_skipped += counts.skipped;
    if counts.removed + counts.skipped > 0 {
        debug!(
            tick = state.tick,
            removed = counts.removed,
            skipped = counts.skipped,
            "modifier removal sweep"
        );
    }
    Ok(())
}

fn remove_due_modifiers(ctx: &mut BatchContext<'_, '_>) {
    let mut pending: Vec<ModifierHandle> = Vec::new();

    for agent in ctx.agents.iter_mut().flatten() {
        if agent.buffer.is_empty() {
            continue;
        }
        pending.clear();
        agent.buffer.drain_into(&mut pending);

        for i in 0..pending.len() {
            let handle = pending[i];
            let due = agent.disabled || ctx.rng.gen_bool(ctx.config.removal_chance);
            if !due {
                agent.buffer.push(handle);
                continue;
            }

            match ctx
                .accessor
                .try_remove_stat_modifier(&mut *ctx.batch, &handle, &mut ctx.scratch)
            {
                Ok(removed) => {
                    patch_handles_after_removal(&mut pending[i + 1..], &removed);
                    agent.buffer.patch_after_removal(&removed);
                    ctx.counts.removed += 1;
                }
                // The target was despawned and took the modifier with it.
                Err(StatError::StaleEntity { .. }) | Err(StatError::StaleModifier { .. }) => {
                    ctx.counts.skipped += 1;
                }
                Err(err) => {
                    warn!(affector = ?agent.entity, %err, "modifier removal failed, keeping handle");
                    agent.buffer.push(handle);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// destroy
// ---------------------------------------------------------------------------

/// Despawn every disabled entity whose modifier buffer has been emptied.
pub fn destroy_system(state: &mut SimState) -> Result<(), SimError> {
    let doomed: Vec<EntityId> = state
        .agents()
        .filter(|agent| agent.disabled && agent.buffer.is_empty())
        .map(|agent| agent.entity)
        .collect();
    if doomed.is_empty() {
        return Ok(());
    }

    for &entity in &doomed {
        state.despawn_agent(entity)?;
    }
    state.refresh_accessor();
    debug!(tick = state.tick, destroyed = doomed.len(), "entities destroyed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
