//! Simulation configuration.
//!
//! [`SimConfig`] is loaded from JSON and validated before a simulation is
//! built. Every field has a default, so a config file only needs to name the
//! values it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::SimError;

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Configuration for the fixed-timestep tick loop.
///
/// The `fixed_dt` is the duration in seconds of each simulation tick. A value
/// of `1.0 / 60.0` gives 60 ticks per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
    /// Headless mode: tick as fast as possible.
    pub headless: bool,
}

impl Default for TickConfig {
    /// Defaults to 60 Hz (1/60 second per tick), headless on.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            headless: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Parameters of a reference simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for every random stream in the run.
    pub seed: u64,
    /// Number of ticks the binary runs.
    pub ticks: u64,
    /// Population the spawn system tops the world up to.
    pub population: usize,
    /// Maximum number of entities spawned per tick.
    pub spawn_per_tick: usize,
    /// Entity slots per parallel batch.
    pub batch_size: usize,
    /// Fraction of spawned entities that become affectors.
    pub affector_ratio: f64,
    /// Modifiers each affector attaches when it is initialized.
    pub modifiers_per_affector: usize,
    /// Per-tick chance that any one active modifier is removed early.
    pub removal_chance: f64,
    /// Entity lifetime range in ticks, inclusive.
    pub min_lifetime: u32,
    pub max_lifetime: u32,
    pub tick: TickConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            ticks: 600,
            population: 1_024,
            spawn_per_tick: 128,
            batch_size: 64,
            affector_ratio: 0.25,
            modifiers_per_affector: 4,
            removal_chance: 0.02,
            min_lifetime: 60,
            max_lifetime: 240,
            tick: TickConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let json = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&json)?;
        tracing::debug!(path = %path.display(), ?config, "sim config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let invalid = |field: &'static str, reason: String| -> Result<(), SimError> {
            Err(SimError::InvalidConfig { field, reason })
        };

        if !(self.tick.fixed_dt > 0.0 && self.tick.fixed_dt.is_finite()) {
            return invalid(
                "tick.fixed_dt",
                format!("must be positive and finite, got {}", self.tick.fixed_dt),
            );
        }
        if self.batch_size == 0 {
            return invalid("batch_size", "must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.affector_ratio) {
            return invalid(
                "affector_ratio",
                format!("must be within 0..=1, got {}", self.affector_ratio),
            );
        }
        if !(0.0..=1.0).contains(&self.removal_chance) {
            return invalid(
                "removal_chance",
                format!("must be within 0..=1, got {}", self.removal_chance),
            );
        }
        if self.min_lifetime == 0 || self.min_lifetime > self.max_lifetime {
            return invalid(
                "min_lifetime",
                format!(
                    "must satisfy 0 < min_lifetime <= max_lifetime, got {}..={}",
                    self.min_lifetime, self.max_lifetime
                ),
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
