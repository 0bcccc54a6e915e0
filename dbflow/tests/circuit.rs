//! End-to-end circuit behavior: optimization must be unobservable at the
//! outputs, and the runtimes must agree with each other.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dbflow::circuit::optimize::Optimizer;
use dbflow::circuit::{CircuitBuilder, CircuitDefinition};
use dbflow::runtime::{ParallelRuntime, Runtime, RuntimeConfig};
use dbflow::zset::ZSet;

fn pipeline() -> CircuitDefinition<u64> {
    let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
    let input = builder.add_input("src").unwrap();
    let evens = builder.filter(&input, "evens", |n| n % 2 == 0).unwrap();
    let doubled = builder.map(&evens, "doubled", |n| n * 2).unwrap();
    let total = builder.integrate(&doubled, "total").unwrap();
    builder.add_output(&total, "total").unwrap();
    // A fusable map-then-filter pair on a second path.
    let bumped = builder.map(&input, "bumped", |n| n + 1).unwrap();
    let odds = builder.filter(&bumped, "odds", |n| n % 2 == 1).unwrap();
    builder.add_output(&odds, "odds").unwrap();
    // Dead weight the optimizer should discard.
    let dead = builder.map(&input, "dead", |n| n * 100).unwrap();
    let _deader = builder.negate(&dead, "deader").unwrap();
    builder.build().unwrap()
}

fn random_deltas(seed: u64, steps: usize) -> Vec<Vec<(u64, i64)>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..steps)
        .map(|_| {
            (0..rng.gen_range(0..12))
                .map(|_| (rng.gen_range(0..20u64), rng.gen_range(-3..=3i64)))
                .collect()
        })
        .collect()
}

fn drive(circuit: CircuitDefinition<u64>, deltas: &[Vec<(u64, i64)>]) -> Vec<Vec<(u64, i64)>> {
    let mut runtime = Runtime::new(circuit, RuntimeConfig::default()).unwrap();
    runtime.start().unwrap();
    let input = runtime.input_handle("src").unwrap();
    let totals = runtime.output_handle("total").unwrap();
    let odds = runtime.output_handle("odds").unwrap();

    let mut observed = Vec::new();
    for delta in deltas {
        input.send(ZSet::from_pairs(delta.clone())).unwrap();
        runtime.step().unwrap();
        let mut snapshot = totals.current_value().unwrap().pairs();
        snapshot.extend(odds.current_value().unwrap().pairs().into_iter().map(|(k, w)| (k + 1000, w)));
        observed.push(snapshot);
    }
    observed
}

#[test]
fn optimization_preserves_every_output() {
    let deltas = random_deltas(7, 25);

    let baseline = drive(pipeline(), &deltas);

    let (optimized, errors) = Optimizer::with_standard_rules().optimize(pipeline());
    assert!(errors.is_empty());
    // The dead pair is gone and the map/filter pair fused.
    assert!(optimized.operator_count() < pipeline().operator_count());
    let rewritten = drive(optimized, &deltas);

    assert_eq!(baseline, rewritten);
}

#[test]
fn parallel_runtime_agrees_with_sequential() {
    let deltas = random_deltas(11, 15);
    let baseline = drive(pipeline(), &deltas);

    let mut runtime = ParallelRuntime::new(
        pipeline(),
        RuntimeConfig { worker_threads: 4, ..RuntimeConfig::default() },
    )
    .unwrap();
    runtime.start().unwrap();
    let input = runtime.input_handle("src").unwrap();
    let totals = runtime.output_handle("total").unwrap();
    let odds = runtime.output_handle("odds").unwrap();

    let mut observed = Vec::new();
    for delta in deltas.iter() {
        input.send(ZSet::from_pairs(delta.clone())).unwrap();
        runtime.step().unwrap();
        let mut snapshot = totals.current_value().unwrap().pairs();
        snapshot.extend(odds.current_value().unwrap().pairs().into_iter().map(|(k, w)| (k + 1000, w)));
        observed.push(snapshot);
    }
    assert_eq!(baseline, observed);
}

#[test]
fn integrate_of_deltas_tracks_materialized_state() {
    // The defining property of incremental view maintenance: integrating a
    // stream of deltas equals recomputing the set from all inputs so far.
    let deltas = random_deltas(23, 40);

    let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
    let input = builder.add_input("src").unwrap();
    let total = builder.integrate(&input, "total").unwrap();
    builder.add_output(&total, "state").unwrap();
    let mut runtime = Runtime::new(builder.build().unwrap(), RuntimeConfig::default()).unwrap();
    runtime.start().unwrap();
    let handle = runtime.input_handle("src").unwrap();
    let output = runtime.output_handle("state").unwrap();

    let mut reference: ZSet<u64> = ZSet::new();
    for delta in deltas {
        reference.extend(delta.clone());
        handle.send(ZSet::from_pairs(delta)).unwrap();
        runtime.step().unwrap();
        assert_eq!(output.current_value().unwrap().pairs(), reference.pairs());
    }
}
