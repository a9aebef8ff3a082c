//! statweave-sim - runs the reference simulation headless.
//!
//! Usage: `statweave-sim [config.json]`. Without a config file the defaults
//! are used. Logging follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use statweave_sim::prelude::*;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => SimConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            info!("no config file given, using defaults");
            SimConfig::default()
        }
    };

    let ticks = config.ticks;
    let mut sim = build_simulation(config).context("building simulation")?;
    info!(
        ticks,
        seed = sim.state().config().seed,
        population = sim.state().config().population,
        headless = sim.is_headless(),
        "starting simulation"
    );

    let started = Instant::now();
    let pace = Duration::from_secs_f64(sim.fixed_dt());
    for _ in 0..ticks {
        sim.tick()
            .with_context(|| format!("tick {} failed", sim.tick_count()))?;
        if !sim.is_headless() {
            std::thread::sleep(pace);
        }
    }

    let summary = sim.summary();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        entities = summary.entities,
        spawned = summary.totals.spawned,
        destroyed = summary.totals.destroyed,
        modifiers_added = summary.totals.modifiers_added,
        modifiers_removed = summary.totals.modifiers_removed,
        state_hash = %summary.state_hash,
        "simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
