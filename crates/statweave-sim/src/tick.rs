//! Fixed-timestep tick loop for deterministic simulation.
//!
//! The [`TickLoop`] drives a [`SimState`] forward. Each tick:
//!
//! 1. The state learns the current tick number (it seeds the per-batch RNG
//!    streams from it).
//! 2. All registered systems run in registration order. A system error stops
//!    the tick and is returned.
//! 3. The tick counter advances.
//!
//! Because system ordering is fixed, parallel systems only work on disjoint
//! batches, and every random stream is seeded from the config seed, the tick
//! loop is fully deterministic: same config + same systems = same state hash.
//!
//! # Example
//!
//! ```
//! use statweave_sim::prelude::*;
//!
//! let state = SimState::new(SimConfig { population: 16, ..Default::default() });
//! let mut tick_loop = TickLoop::new(state, TickConfig::default());
//! tick_loop.add_system("spawn", spawn_system);
//!
//! tick_loop.run_ticks(10).unwrap();
//! assert_eq!(tick_loop.tick_count(), 10);
//! assert_eq!(tick_loop.state().world().entity_count(), 16);
//! ```

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::TickConfig;
use crate::state::{SimState, SimTotals};
use crate::SimError;

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Wall-clock time per system (in order of execution).
    pub system_times: Vec<(String, Duration)>,
    /// Total time for the tick.
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// SystemFn
// ---------------------------------------------------------------------------

/// A system function run once per tick with exclusive access to the state.
pub type SystemFn = fn(&mut SimState) -> Result<(), SimError>;

#[derive(Debug)]
struct RegisteredSystem {
    name: String,
    func: SystemFn,
}

// ---------------------------------------------------------------------------
// SimSummary
// ---------------------------------------------------------------------------

/// End-of-run report printed by the binary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimSummary {
    pub ticks: u64,
    pub sim_time: f64,
    pub entities: usize,
    pub buffered_handles: usize,
    pub totals: SimTotals,
    pub state_hash: String,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// The deterministic fixed-timestep tick loop.
pub struct TickLoop {
    state: SimState,
    /// Ordered list of systems to run each tick.
    systems: Vec<RegisteredSystem>,
    /// Number of ticks executed so far.
    tick_counter: u64,
    /// Fixed time step in seconds per tick.
    fixed_dt: f64,
    config: TickConfig,
    /// Diagnostics from the last tick.
    last_diagnostics: TickDiagnostics,
}

impl TickLoop {
    /// Create a new tick loop around `state`.
    ///
    /// # Panics
    ///
    /// Panics if `config.fixed_dt` is not positive and finite.
    pub fn new(state: SimState, config: TickConfig) -> Self {
        assert!(
            config.fixed_dt > 0.0 && config.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            config.fixed_dt
        );
        Self {
            state,
            systems: Vec::new(),
            tick_counter: 0,
            fixed_dt: config.fixed_dt,
            config,
            last_diagnostics: TickDiagnostics::default(),
        }
    }

    /// Register a system to be run each tick, after every system registered
    /// before it.
    ///
    /// # Panics
    ///
    /// Panics if a system with the same name is already registered.
    pub fn add_system(&mut self, name: &str, func: SystemFn) {
        assert!(
            !self.systems.iter().any(|s| s.name == name),
            "duplicate system name: {name:?}"
        );
        self.systems.push(RegisteredSystem {
            name: name.to_owned(),
            func,
        });
    }

    /// Execute one simulation tick.
    pub fn tick(&mut self) -> Result<(), SimError> {
        let tick_start = Instant::now();
        let mut system_times = Vec::with_capacity(self.systems.len());

        self.state.tick = self.tick_counter;
        for system in &self.systems {
            let sys_start = Instant::now();
            (system.func)(&mut self.state)?;
            system_times.push((system.name.clone(), sys_start.elapsed()));
        }

        self.tick_counter += 1;
        self.last_diagnostics = TickDiagnostics {
            system_times,
            total_time: tick_start.elapsed(),
        };
        tracing::trace!(
            tick = self.tick_counter,
            total_us = self.last_diagnostics.total_time.as_micros() as u64,
            "tick complete"
        );
        Ok(())
    }

    /// Run `count` ticks in sequence, stopping at the first error.
    pub fn run_ticks(&mut self, count: u64) -> Result<(), SimError> {
        for _ in 0..count {
            self.tick()?;
        }
        Ok(())
    }

    // -- accessors ----------------------------------------------------------

    /// The number of ticks executed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// The current simulation time in seconds.
    ///
    /// Computed as `tick_count * fixed_dt` to avoid floating-point drift from
    /// repeated addition.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.fixed_dt
    }

    pub fn fixed_dt(&self) -> f64 {
        self.fixed_dt
    }

    pub fn state(&self) -> &SimState {
        &self.state
    }

    /// Mutable access to the state, for setup and tests.
    pub fn state_mut(&mut self) -> &mut SimState {
        &mut self.state
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// The names of all registered systems, in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    pub fn is_headless(&self) -> bool {
        self.config.headless
    }

    /// BLAKE3 hash over the world snapshot, the agents and the tick counter.
    pub fn state_hash(&self) -> String {
        #[derive(Serialize)]
        struct HashableState<'a> {
            world: &'a statweave_core::snapshot::WorldSnapshot,
            agents: Vec<&'a crate::state::Agent>,
            tick_counter: u64,
            fixed_dt: f64,
        }

        let world = self.state.world().capture_snapshot();
        let hashable = HashableState {
            world: &world,
            agents: self.state.agents().collect(),
            tick_counter: self.tick_counter,
            fixed_dt: self.fixed_dt,
        };
        let json_bytes = serde_json::to_vec(&hashable)
            .expect("simulation state should always be JSON-serializable");
        blake3::hash(&json_bytes).to_hex().to_string()
    }

    pub fn summary(&self) -> SimSummary {
        SimSummary {
            ticks: self.tick_counter,
            sim_time: self.sim_time(),
            entities: self.state.world().entity_count(),
            buffered_handles: self.state.buffered_handles(),
            totals: self.state.totals(),
            state_hash: self.state_hash(),
        }
    }
}

impl std::fmt::Debug for TickLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickLoop")
            .field("tick_counter", &self.tick_counter)
            .field("fixed_dt", &self.fixed_dt)
            .field("systems", &self.system_names())
            .field("state", &self.state)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn empty_loop() -> TickLoop {
        TickLoop::new(SimState::new(SimConfig::default()), TickConfig::default())
    }

    fn failing_system(_state: &mut SimState) -> Result<(), SimError> {
        Err(SimError::InvalidConfig {
            field: "test",
            reason: "always fails".into(),
        })
    }

    fn count_ticks(state: &mut SimState) -> Result<(), SimError> {
        state.totals.spawned = state.tick + 1;
        Ok(())
    }

    #[test]
    fn new_tick_loop_starts_at_zero() {
        let tick_loop = empty_loop();
        assert_eq!(tick_loop.tick_count(), 0);
        assert_eq!(tick_loop.sim_time(), 0.0);
        assert_eq!(tick_loop.system_count(), 0);
        assert!(tick_loop.is_headless());
    }

    #[test]
    #[should_panic(expected = "fixed_dt must be positive")]
    fn zero_dt_panics() {
        let _tick_loop = TickLoop::new(
            SimState::new(SimConfig::default()),
            TickConfig {
                fixed_dt: 0.0,
                ..Default::default()
            },
        );
    }

    #[test]
    #[should_panic(expected = "duplicate system name")]
    fn duplicate_system_name_panics() {
        let mut tick_loop = empty_loop();
        tick_loop.add_system("spawn", count_ticks);
        tick_loop.add_system("spawn", count_ticks);
    }

    #[test]
    fn systems_see_the_current_tick() {
        let mut tick_loop = empty_loop();
        tick_loop.add_system("count", count_ticks);
        tick_loop.run_ticks(5).unwrap();
        assert_eq!(tick_loop.tick_count(), 5);
        assert_eq!(tick_loop.state().totals().spawned, 5);
        assert_eq!(tick_loop.last_diagnostics().system_times.len(), 1);
    }

    #[test]
    fn system_error_stops_the_tick() {
        let mut tick_loop = empty_loop();
        tick_loop.add_system("fail", failing_system);
        assert!(tick_loop.tick().is_err());
        assert_eq!(tick_loop.tick_count(), 0);
    }

    #[test]
    fn sim_time_uses_multiplication() {
        let mut tick_loop = TickLoop::new(
            SimState::new(SimConfig::default()),
            TickConfig {
                fixed_dt: 0.1,
                ..Default::default()
            },
        );
        tick_loop.run_ticks(10).unwrap();
        assert!((tick_loop.sim_time() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn state_hash_changes_with_tick_counter() {
        let mut tick_loop = empty_loop();
        let before = tick_loop.state_hash();
        tick_loop.tick().unwrap();
        assert_ne!(before, tick_loop.state_hash());
    }
}
