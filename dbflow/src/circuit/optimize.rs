//! Rule-based rewriting of circuit definitions.
//!
//! Rules are small, named rewrites with a cheap applicability check. The
//! optimizer runs each registered rule at most once per pass; a rule that
//! fails is skipped — the circuit is left as it was — and the failure is
//! surfaced as a validation error next to the optimized circuit.
//!
//! The standard rules: dead-code elimination (a node is live iff a named
//! output references it or any data edge leaves it; named inputs are pinned),
//! and fusion of adjacent filter/map pairs into single fused operators, which
//! the tagged [`OperatorKind`] representation makes a pattern match.

use std::collections::BTreeSet;

use crate::circuit::{CircuitDefinition, EdgeKind, NodeId, OperatorKind};
use crate::error::{Error, Result};
use crate::Data;

/// A named rewrite of a circuit.
pub trait Rule<T: Data> {
    /// The rule's name, for diagnostics.
    fn name(&self) -> &str;

    /// True when applying the rule would change `circuit`.
    fn can_apply(&self, circuit: &CircuitDefinition<T>) -> bool;

    /// Rewrites `circuit`. Must preserve the semantics of every named output.
    fn apply(&self, circuit: CircuitDefinition<T>) -> Result<CircuitDefinition<T>>;
}

/// Applies a set of rules, one pass, each rule at most once.
pub struct Optimizer<T: Data> {
    rules: Vec<Box<dyn Rule<T>>>,
}

impl<T: Data> Default for Optimizer<T> {
    fn default() -> Self {
        Optimizer::with_standard_rules()
    }
}

impl<T: Data> Optimizer<T> {
    /// An optimizer with no rules registered.
    pub fn new() -> Self {
        Optimizer { rules: Vec::new() }
    }

    /// An optimizer with the standard rule set.
    pub fn with_standard_rules() -> Self {
        let mut optimizer = Optimizer::new();
        optimizer.register(Box::new(DeadCodeElimination));
        optimizer.register(Box::new(FilterThenMapFusion));
        optimizer.register(Box::new(MapThenFilterFusion));
        optimizer
    }

    /// Adds a rule to the pass.
    pub fn register(&mut self, rule: Box<dyn Rule<T>>) {
        self.rules.push(rule);
    }

    /// Runs one pass. Failing rules are skipped and their errors returned.
    pub fn optimize(&self, mut circuit: CircuitDefinition<T>) -> (CircuitDefinition<T>, Vec<Error>) {
        let mut skipped = Vec::new();
        for rule in self.rules.iter() {
            if !rule.can_apply(&circuit) {
                continue;
            }
            let fallback = circuit.clone();
            match rule.apply(circuit) {
                Ok(rewritten) => {
                    tracing::debug!(rule = rule.name(), "optimizer rule applied");
                    circuit = rewritten;
                }
                Err(error) => {
                    tracing::warn!(rule = rule.name(), %error, "optimizer rule failed; skipped");
                    skipped.push(Error::Validation(format!("rule '{}': {error}", rule.name())));
                    circuit = fallback;
                }
            }
        }
        (circuit, skipped)
    }
}

fn rebuild<T: Data>(circuit: CircuitDefinition<T>) -> Result<CircuitDefinition<T>> {
    CircuitDefinition::from_parts(
        circuit.id,
        circuit.operators,
        circuit.edges,
        circuit.inputs,
        circuit.outputs,
    )
    .map_err(|e| Error::Validation(e.to_string()))
}

/// Removes operators that no output handle or downstream consumer observes.
pub struct DeadCodeElimination;

impl DeadCodeElimination {
    fn dead_nodes<T: Data>(circuit: &CircuitDefinition<T>) -> Vec<NodeId> {
        let mut live: BTreeSet<NodeId> = circuit.outputs.values().copied().collect();
        live.extend(circuit.inputs.values().copied());
        live.extend(
            circuit
                .edges
                .iter()
                .filter(|e| e.kind == EdgeKind::Data)
                .map(|e| e.from),
        );
        circuit.operators.keys().copied().filter(|n| !live.contains(n)).collect()
    }
}

impl<T: Data> Rule<T> for DeadCodeElimination {
    fn name(&self) -> &str {
        "dead-code-elimination"
    }

    fn can_apply(&self, circuit: &CircuitDefinition<T>) -> bool {
        !Self::dead_nodes(circuit).is_empty()
    }

    fn apply(&self, mut circuit: CircuitDefinition<T>) -> Result<CircuitDefinition<T>> {
        // Removing a node can orphan its producers; iterate to a fixed point.
        loop {
            let dead = Self::dead_nodes(&circuit);
            if dead.is_empty() {
                break;
            }
            tracing::trace!(?dead, "removing dead operators");
            for node in dead.iter() {
                circuit.operators.remove(node);
            }
            circuit
                .edges
                .retain(|e| !dead.contains(&e.from) && !dead.contains(&e.to));
        }
        rebuild(circuit)
    }
}

/// Where `first`'s sole consumer is `second`, rewrites `second` into a fused
/// operator and splices `first` out of the graph.
fn fuse<T: Data>(
    circuit: &mut CircuitDefinition<T>,
    first: NodeId,
    second: NodeId,
    fused: OperatorKind<T>,
) {
    let first_inputs = circuit.operators[&first].inputs.clone();
    let record = circuit.operators.get_mut(&second).expect("fusion target exists");
    record.kind = fused;
    record.inputs = first_inputs;

    circuit.edges.retain(|e| !(e.from == first && e.to == second));
    for edge in circuit.edges.iter_mut() {
        if edge.to == first {
            edge.to = second;
        }
    }
    circuit.operators.remove(&first);
}

/// True when `node` feeds exactly `consumer` and nothing else observes it.
fn sole_consumer<T: Data>(circuit: &CircuitDefinition<T>, node: NodeId) -> Option<NodeId> {
    if circuit.outputs.values().any(|&n| n == node) {
        return None;
    }
    let mut consumers = circuit
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Data && e.from == node)
        .map(|e| e.to);
    match (consumers.next(), consumers.next()) {
        (Some(consumer), None) => Some(consumer),
        _ => None,
    }
}

/// Fuses `filter` feeding a `map` into a single `filter_map`.
pub struct FilterThenMapFusion;

impl FilterThenMapFusion {
    fn candidate<T: Data>(circuit: &CircuitDefinition<T>) -> Option<(NodeId, NodeId)> {
        for record in circuit.operators.values() {
            if let OperatorKind::Filter(_) = record.kind {
                if let Some(consumer) = sole_consumer(circuit, record.id) {
                    if matches!(circuit.operators[&consumer].kind, OperatorKind::Map(_)) {
                        return Some((record.id, consumer));
                    }
                }
            }
        }
        None
    }
}

impl<T: Data> Rule<T> for FilterThenMapFusion {
    fn name(&self) -> &str {
        "filter-then-map-fusion"
    }

    fn can_apply(&self, circuit: &CircuitDefinition<T>) -> bool {
        Self::candidate(circuit).is_some()
    }

    fn apply(&self, mut circuit: CircuitDefinition<T>) -> Result<CircuitDefinition<T>> {
        while let Some((filter, map)) = Self::candidate(&circuit) {
            let predicate = match &circuit.operators[&filter].kind {
                OperatorKind::Filter(p) => p.clone(),
                _ => unreachable!("candidate is a filter"),
            };
            let transform = match &circuit.operators[&map].kind {
                OperatorKind::Map(f) => f.clone(),
                _ => unreachable!("candidate consumer is a map"),
            };
            tracing::trace!(%filter, %map, "fusing filter into map");
            fuse(&mut circuit, filter, map, OperatorKind::FilterMap { predicate, transform });
        }
        rebuild(circuit)
    }
}

/// Fuses a `map` feeding a `filter` into a single `map_filter`.
pub struct MapThenFilterFusion;

impl MapThenFilterFusion {
    fn candidate<T: Data>(circuit: &CircuitDefinition<T>) -> Option<(NodeId, NodeId)> {
        for record in circuit.operators.values() {
            if let OperatorKind::Map(_) = record.kind {
                if let Some(consumer) = sole_consumer(circuit, record.id) {
                    if matches!(circuit.operators[&consumer].kind, OperatorKind::Filter(_)) {
                        return Some((record.id, consumer));
                    }
                }
            }
        }
        None
    }
}

impl<T: Data> Rule<T> for MapThenFilterFusion {
    fn name(&self) -> &str {
        "map-then-filter-fusion"
    }

    fn can_apply(&self, circuit: &CircuitDefinition<T>) -> bool {
        Self::candidate(circuit).is_some()
    }

    fn apply(&self, mut circuit: CircuitDefinition<T>) -> Result<CircuitDefinition<T>> {
        while let Some((map, filter)) = Self::candidate(&circuit) {
            let transform = match &circuit.operators[&map].kind {
                OperatorKind::Map(f) => f.clone(),
                _ => unreachable!("candidate is a map"),
            };
            let predicate = match &circuit.operators[&filter].kind {
                OperatorKind::Filter(p) => p.clone(),
                _ => unreachable!("candidate consumer is a filter"),
            };
            tracing::trace!(%map, %filter, "fusing map into filter");
            fuse(&mut circuit, map, filter, OperatorKind::MapFilter { transform, predicate });
        }
        rebuild(circuit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBuilder;

    #[test]
    fn dead_code_removed_to_fixed_point() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let kept = builder.map(&input, "kept", |x| x + 1).unwrap();
        builder.add_output(&kept, "out").unwrap();
        // A two-deep chain nothing consumes.
        let dead1 = builder.map(&input, "dead1", |x| x + 2).unwrap();
        let _dead2 = builder.map(&dead1, "dead2", |x| x + 3).unwrap();
        let circuit = builder.build().unwrap();
        assert_eq!(circuit.operator_count(), 4);

        let (optimized, errors) = Optimizer::with_standard_rules().optimize(circuit);
        assert!(errors.is_empty());
        assert_eq!(optimized.operator_count(), 2);
        assert!(optimized.operator(kept.node()).is_some());
    }

    #[test]
    fn unconsumed_inputs_survive_dce() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let _spare = builder.add_input("spare").unwrap();
        let input = builder.add_input("src").unwrap();
        builder.add_output(&input, "out").unwrap();
        let circuit = builder.build().unwrap();
        let (optimized, errors) = Optimizer::with_standard_rules().optimize(circuit);
        assert!(errors.is_empty());
        assert_eq!(optimized.operator_count(), 2);
    }

    #[test]
    fn filter_then_map_fuses() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let evens = builder.filter(&input, "evens", |x| x % 2 == 0).unwrap();
        let doubled = builder.map(&evens, "double", |x| x * 2).unwrap();
        builder.add_output(&doubled, "out").unwrap();
        let circuit = builder.build().unwrap();

        let (optimized, errors) = Optimizer::with_standard_rules().optimize(circuit);
        assert!(errors.is_empty());
        assert_eq!(optimized.operator_count(), 2);
        let fused = optimized.operator(doubled.node()).unwrap();
        assert_eq!(fused.kind.type_name(), "filter_map");
        assert_eq!(fused.inputs, vec![input.node()]);
        // The input now feeds the fused node directly.
        assert_eq!(optimized.dependencies(doubled.node()), &[input.node()]);
    }

    #[test]
    fn map_then_filter_fuses() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let doubled = builder.map(&input, "double", |x| x * 2).unwrap();
        let small = builder.filter(&doubled, "small", |x| *x < 100).unwrap();
        builder.add_output(&small, "out").unwrap();
        let circuit = builder.build().unwrap();

        let (optimized, errors) = Optimizer::with_standard_rules().optimize(circuit);
        assert!(errors.is_empty());
        assert_eq!(optimized.operator_count(), 2);
        assert_eq!(optimized.operator(small.node()).unwrap().kind.type_name(), "map_filter");
    }

    #[test]
    fn fusion_skips_shared_filters() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let evens = builder.filter(&input, "evens", |x| x % 2 == 0).unwrap();
        let doubled = builder.map(&evens, "double", |x| x * 2).unwrap();
        let tripled = builder.map(&evens, "triple", |x| x * 3).unwrap();
        builder.add_output(&doubled, "doubled").unwrap();
        builder.add_output(&tripled, "tripled").unwrap();
        let circuit = builder.build().unwrap();

        let (optimized, errors) = Optimizer::with_standard_rules().optimize(circuit);
        assert!(errors.is_empty());
        // Two consumers: the filter must survive unfused.
        assert_eq!(optimized.operator(evens.node()).unwrap().kind.type_name(), "filter");
        assert_eq!(optimized.operator_count(), 4);
    }

    #[test]
    fn fusion_skips_output_filters() {
        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        let evens = builder.filter(&input, "evens", |x| x % 2 == 0).unwrap();
        let doubled = builder.map(&evens, "double", |x| x * 2).unwrap();
        builder.add_output(&evens, "evens").unwrap();
        builder.add_output(&doubled, "doubled").unwrap();
        let circuit = builder.build().unwrap();

        let (optimized, errors) = Optimizer::with_standard_rules().optimize(circuit);
        assert!(errors.is_empty());
        assert_eq!(optimized.operator(evens.node()).unwrap().kind.type_name(), "filter");
    }

    #[test]
    fn failing_rules_are_skipped_and_surfaced() {
        struct Broken;
        impl<T: Data> Rule<T> for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn can_apply(&self, _circuit: &CircuitDefinition<T>) -> bool {
                true
            }
            fn apply(&self, _circuit: CircuitDefinition<T>) -> Result<CircuitDefinition<T>> {
                Err(Error::Validation("malformed".into()))
            }
        }

        let mut builder: CircuitBuilder<u64> = CircuitBuilder::new();
        let input = builder.add_input("src").unwrap();
        builder.add_output(&input, "out").unwrap();
        let circuit = builder.build().unwrap();

        let mut optimizer: Optimizer<u64> = Optimizer::new();
        optimizer.register(Box::new(Broken));
        let (optimized, errors) = optimizer.optimize(circuit);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::Validation(_)));
        assert_eq!(optimized.operator_count(), 2);
    }
}
