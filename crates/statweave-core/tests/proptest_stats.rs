//! Property tests for stat evaluation.
//!
//! Random sequences of base-value writes, modifier adds (constant and
//! stat-sourced) and removals are applied to a small world and mirrored in a
//! plain reference model. After every step each stat's effective value must
//! match the model bit for bit, and modifier counts must match exactly.

use statweave_core::prelude::*;
use proptest::prelude::*;

const ENTITIES: usize = 6;

#[derive(Debug, Clone, Copy)]
enum StatOpCase {
    SetBase(usize, f32),
    AddConstant(usize, StatOp, f32),
    AddSourced(usize, StatOp, usize),
    Remove(usize),
    RemoveTwice(usize),
}

#[derive(Debug, Clone, Copy)]
enum ModelSource {
    Constant(f32),
    Entity(usize),
}

#[derive(Debug, Clone)]
struct ModelModifier {
    target: usize,
    op: StatOp,
    source: ModelSource,
    handle: ModifierHandle,
}

/// Strategy for small finite values, so chained multipliers stay in range.
fn small_f32() -> impl Strategy<Value = f32> {
    (-400i32..400i32).prop_map(|v| v as f32 * 0.005)
}

fn stat_op() -> impl Strategy<Value = StatOp> {
    prop_oneof![
        Just(StatOp::Add),
        Just(StatOp::AddMultiplier),
        Just(StatOp::MultiplyMultiplier),
    ]
}

fn op_strategy() -> impl Strategy<Value = StatOpCase> {
    prop_oneof![
        (0..ENTITIES, small_f32()).prop_map(|(e, v)| StatOpCase::SetBase(e, v)),
        (0..ENTITIES, stat_op(), small_f32()).prop_map(|(e, op, v)| StatOpCase::AddConstant(e, op, v)),
        (0..ENTITIES, stat_op(), 0..ENTITIES).prop_map(|(t, op, s)| StatOpCase::AddSourced(t, op, s)),
        (0..64usize).prop_map(StatOpCase::Remove),
        (0..64usize).prop_map(StatOpCase::RemoveTwice),
    ]
}

/// `true` if `from` reads `to`, directly or through other stats.
fn depends_on(modifiers: &[ModelModifier], from: usize, to: usize) -> bool {
    let mut stack = vec![from];
    let mut seen = [false; ENTITIES];
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if std::mem::replace(&mut seen[current], true) {
            continue;
        }
        for m in modifiers.iter().filter(|m| m.target == current) {
            if let ModelSource::Entity(source) = m.source {
                stack.push(source);
            }
        }
    }
    false
}

/// Effective value from the model's modifier list, folded the documented way:
/// each term group sorted, then `(base + adds) * (1 + add_mults) * mults`.
fn model_value(bases: &[f32], modifiers: &[ModelModifier], entity: usize) -> f32 {
    let mut adds = Vec::new();
    let mut add_mults = Vec::new();
    let mut mults = Vec::new();
    for m in modifiers.iter().filter(|m| m.target == entity) {
        let value = match m.source {
            ModelSource::Constant(v) => v,
            ModelSource::Entity(source) => model_value(bases, modifiers, source),
        };
        match m.op {
            StatOp::Add => adds.push(value),
            StatOp::AddMultiplier => add_mults.push(value),
            StatOp::MultiplyMultiplier => mults.push(value),
        }
    }
    adds.sort_by(f32::total_cmp);
    add_mults.sort_by(f32::total_cmp);
    mults.sort_by(f32::total_cmp);

    let added = adds.iter().fold(bases[entity], |acc, v| acc + v);
    let add_mult = add_mults.iter().fold(1.0, |acc, v| acc + v);
    let mult = mults.iter().fold(1.0, |acc, v| acc * v);
    added * add_mult * mult
}

fn same_value(actual: f32, expected: f32) -> bool {
    actual.to_bits() == expected.to_bits() || (actual.is_nan() && expected.is_nan())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn random_ops_match_reference_model(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut world = StatWorld::new();
        let x = world.register_stat_type("x");
        let layout = world.register_layout(StatLayout::new().with_stat(x, 1.0));
        let entities: Vec<EntityId> = (0..ENTITIES).map(|_| world.spawn(layout).unwrap()).collect();
        let handles: Vec<StatHandle> = entities.iter().map(|&e| world.stat_handle(e, x).unwrap()).collect();

        let accessor = StatAccessor::new(&world);
        let mut scratch = WorldData::new(&accessor, ENTITIES);
        let mut bases = vec![1.0f32; ENTITIES];
        let mut model: Vec<ModelModifier> = Vec::new();

        for op in ops {
            match op {
                StatOpCase::SetBase(e, v) => {
                    accessor.try_set_stat_base_value(&mut world, handles[e], v, &mut scratch).unwrap();
                    bases[e] = v;
                }
                StatOpCase::AddConstant(e, op, v) => {
                    let handle = accessor
                        .try_add_stat_modifier(&mut world, handles[e], StatModifier::new(op, v), &mut scratch)
                        .unwrap();
                    model.push(ModelModifier { target: e, op, source: ModelSource::Constant(v), handle });
                }
                StatOpCase::AddSourced(t, op, s) => {
                    let cycle = depends_on(&model, s, t);
                    let result = accessor.try_add_stat_modifier(
                        &mut world,
                        handles[t],
                        StatModifier::new(op, handles[s]),
                        &mut scratch,
                    );
                    if cycle {
                        let is_loop = matches!(result, Err(StatError::InfiniteLoop { .. }));
                        prop_assert!(is_loop);
                    } else {
                        let handle = result.unwrap();
                        model.push(ModelModifier { target: t, op, source: ModelSource::Entity(s), handle });
                    }
                }
                StatOpCase::Remove(i) | StatOpCase::RemoveTwice(i) => {
                    if model.is_empty() {
                        continue;
                    }
                    let removed = model.remove(i % model.len());
                    // Cached slots are never patched here; removal resolves by id.
                    let actual = accessor
                        .try_remove_stat_modifier(&mut world, &removed.handle, &mut scratch)
                        .unwrap();
                    prop_assert_eq!(actual.id, removed.handle.id);
                    if matches!(op, StatOpCase::RemoveTwice(_)) {
                        let again = accessor.try_remove_stat_modifier(&mut world, &removed.handle, &mut scratch);
                        let is_stale = matches!(again, Err(StatError::StaleModifier { .. }));
                        prop_assert!(is_stale);
                    }
                }
            }

            for e in 0..ENTITIES {
                let expected = model_value(&bases, &model, e);
                let actual = accessor.try_get_stat(&world, handles[e]).unwrap().value;
                prop_assert!(same_value(actual, expected), "entity {}: {} vs {}", e, actual, expected);

                let count = model.iter().filter(|m| m.target == e).count();
                prop_assert_eq!(world.modifier_count(entities[e]), Some(count));
            }
        }
    }

    #[test]
    fn buffer_patching_matches_live_slots(removals in prop::collection::vec(0..16usize, 0..12)) {
        let mut world = StatWorld::new();
        let x = world.register_stat_type("x");
        let layout = world.register_layout(StatLayout::new().with_stat(x, 0.0));
        let target = world.spawn(layout).unwrap();
        let handle = world.stat_handle(target, x).unwrap();

        let accessor = StatAccessor::new(&world);
        let mut scratch = WorldData::new(&accessor, 1);
        let mut buffer = ModifierHandleBuffer::new();
        for i in 0..12 {
            let h = accessor
                .try_add_stat_modifier(&mut world, handle, StatModifier::add(i as f32), &mut scratch)
                .unwrap();
            buffer.push(h);
        }

        for r in removals {
            if buffer.is_empty() {
                break;
            }
            let index = r % buffer.len();
            let cached = *buffer.get(index).unwrap();
            let actual = accessor.try_remove_stat_modifier(&mut world, &cached, &mut scratch).unwrap();
            // The only writer is this buffer, so its slots never go stale.
            prop_assert_eq!(actual.slot, cached.slot);
            buffer.remove_at(index);
        }

        let live = world.entity_stats(target).unwrap().modifiers();
        prop_assert_eq!(live.len(), buffer.len());
        for (slot, (entry, cached)) in live.iter().zip(buffer.iter()).enumerate() {
            prop_assert_eq!(cached.slot as usize, slot);
            prop_assert_eq!(cached.id, entry.id);
        }
    }
}
