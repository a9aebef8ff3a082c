//! End-to-end simulation tests.
//!
//! Runs the full system pipeline and checks determinism, buffer/storage
//! consistency, and config loading.

use proptest::prelude::*;
use statweave_sim::prelude::*;

fn quick_config(seed: u64) -> SimConfig {
    SimConfig {
        seed,
        ticks: 120,
        population: 200,
        spawn_per_tick: 50,
        batch_size: 32,
        affector_ratio: 0.3,
        modifiers_per_affector: 4,
        removal_chance: 0.05,
        min_lifetime: 10,
        max_lifetime: 40,
        ..Default::default()
    }
}

fn run(config: SimConfig) -> TickLoop {
    let ticks = config.ticks;
    let mut sim = build_simulation(config).unwrap();
    sim.run_ticks(ticks).unwrap();
    sim
}

/// Every buffered handle names a modifier that is still in its target's list,
/// and every stat-sourced modifier in the world is held by some buffer.
fn assert_buffers_consistent(sim: &TickLoop) {
    let state = sim.state();
    let world = state.world();
    for agent in state.agents() {
        for handle in agent.buffer.iter() {
            if let Some(stats) = world.entity_stats(handle.target()) {
                assert!(
                    stats.modifiers().iter().any(|entry| entry.id == handle.id),
                    "buffered handle {handle:?} has no live modifier"
                );
            }
        }
    }
    for entity in world.entities() {
        for entry in world.entity_stats(entity).unwrap().modifiers() {
            if let ModifierSource::Stat(source) = entry.modifier.source {
                let owner = state.agent(source.entity).expect("source entity is alive");
                assert!(owner
                    .buffer
                    .iter()
                    .any(|handle| handle.target() == entity && handle.id == entry.id));
            }
        }
    }
}

#[test]
fn same_seed_same_hash() {
    let a = run(quick_config(11));
    let b = run(quick_config(11));
    assert_eq!(a.state_hash(), b.state_hash());
    assert_eq!(a.summary(), b.summary());
}

#[test]
fn different_seed_different_hash() {
    assert_ne!(
        run(quick_config(11)).state_hash(),
        run(quick_config(12)).state_hash()
    );
}

#[test]
fn batch_size_does_not_break_consistency() {
    for batch_size in [1, 7, 64, 1024] {
        let sim = run(SimConfig {
            batch_size,
            ..quick_config(3)
        });
        assert_buffers_consistent(&sim);
    }
}

#[test]
fn population_churns_over_a_long_run() {
    let sim = run(quick_config(5));
    let totals = sim.state().totals();
    assert!(totals.spawned > 200, "no respawns: {totals:?}");
    assert!(totals.destroyed > 0);
    assert!(totals.modifiers_added > 0);
    assert!(totals.modifiers_removed > 0);
    assert_buffers_consistent(&sim);
}

#[test]
fn full_removal_sweep_empties_buffers() {
    let mut sim = build_simulation(SimConfig {
        removal_chance: 1.0,
        ..quick_config(9)
    })
    .unwrap();
    sim.tick().unwrap();

    // Everything attached in the spawn system was swept in the same tick.
    assert!(sim.state().totals().modifiers_added > 0);
    assert_eq!(sim.state().buffered_handles(), 0);
    let world = sim.state().world();
    for entity in world.entities() {
        assert_eq!(world.modifier_count(entity), Some(0));
    }
    // With no modifiers left, every stat is back at its base.
    for entity in world.entities() {
        for value in world.entity_stats(entity).unwrap().stats() {
            assert_eq!(value.value, value.base);
        }
    }
}

#[test]
fn config_file_roundtrip() {
    let config = quick_config(21);
    let path = std::env::temp_dir().join(format!("statweave-sim-{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = SimConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn missing_config_file_is_an_io_error() {
    let path = std::env::temp_dir().join("statweave-sim-does-not-exist.json");
    assert!(matches!(SimConfig::load(&path), Err(SimError::Io { .. })));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_configs_stay_consistent(
        seed in any::<u64>(),
        batch_size in 1usize..80,
        removal_chance in 0.0f64..=1.0,
        affector_ratio in 0.0f64..=1.0,
    ) {
        let sim = run(SimConfig {
            seed,
            ticks: 30,
            population: 120,
            batch_size,
            removal_chance,
            affector_ratio,
            ..quick_config(seed)
        });
        assert_buffers_consistent(&sim);
        prop_assert_eq!(
            sim.state().buffered_handles() as u64,
            sim.state().totals().modifiers_added
                - sim.state().totals().modifiers_removed
                - sim.state().totals().removals_skipped
        );
    }
}
