//! Statweave sim -- reference scheduler for the stat evaluator.
//!
//! This crate drives [`statweave_core`] the way a game would: a fixed-step
//! [`TickLoop`](tick::TickLoop) runs the sample systems each tick (spawn,
//! lifetime, modifier removal sweep, destroy). Affector initialization and
//! the removal sweep run over disjoint entity batches with rayon, each batch
//! drawing from its own `Pcg32` stream, so a run is reproducible from its
//! config alone.
//!
//! # Quick Start
//!
//! ```
//! use statweave_sim::prelude::*;
//!
//! let config = SimConfig { population: 64, ticks: 20, ..Default::default() };
//! let mut sim = build_simulation(config.clone()).unwrap();
//! sim.run_ticks(config.ticks).unwrap();
//!
//! let again = {
//!     let mut sim = build_simulation(config.clone()).unwrap();
//!     sim.run_ticks(config.ticks).unwrap();
//!     sim.state_hash()
//! };
//! assert_eq!(sim.state_hash(), again);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod state;
pub mod systems;
pub mod tick;

use statweave_core::StatError;

use crate::config::SimConfig;
use crate::state::SimState;
use crate::tick::TickLoop;

/// Re-export the core crate for convenience.
pub use statweave_core;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while configuring or running a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A stat operation failed where the simulation cannot recover.
    #[error(transparent)]
    Stat(#[from] StatError),

    /// A config value is out of range.
    #[error("invalid config field '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The config is not valid JSON for [`SimConfig`].
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    /// The config file could not be read.
    #[error("failed to read config '{path}'")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Validate `config` and build a tick loop with the sample systems
/// registered in order.
pub fn build_simulation(config: SimConfig) -> Result<TickLoop, SimError> {
    config.validate()?;
    let tick_config = config.tick.clone();
    tracing::debug!(seed = config.seed, population = config.population, "building simulation");

    let mut tick_loop = TickLoop::new(SimState::new(config), tick_config);
    tick_loop.add_system(systems::SPAWN_SYSTEM, systems::spawn_system);
    tick_loop.add_system(systems::LIFETIME_SYSTEM, systems::lifetime_system);
    tick_loop.add_system(
        systems::MODIFIER_REMOVAL_SYSTEM,
        systems::modifier_removal_system,
    );
    tick_loop.add_system(systems::DESTROY_SYSTEM, systems::destroy_system);
    Ok(tick_loop)
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use statweave_core::prelude::*;

    pub use crate::build_simulation;
    pub use crate::config::{SimConfig, TickConfig};
    pub use crate::state::{Agent, SimState, SimTotals, StatKinds};
    pub use crate::systems::{
        destroy_system, lifetime_system, modifier_removal_system, spawn_system,
    };
    pub use crate::tick::{SimSummary, SystemFn, TickDiagnostics, TickLoop};
    pub use crate::SimError;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
