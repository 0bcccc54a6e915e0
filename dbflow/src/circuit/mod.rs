//! The static dataflow graph: operators, edges, handles, and the builder.
//!
//! A circuit is built once, through [`CircuitBuilder`], and then frozen into
//! an immutable [`CircuitDefinition`] that the runtime executes. Operators
//! carry their computation as a tagged [`OperatorKind`] variant rather than
//! behind a wide virtual interface, so the optimizer can pattern-match on
//! operator shapes (filter feeding map, and so on) when rewriting the graph.
//!
//! Edges come in two kinds. Data edges constrain scheduling within a step.
//! Feedback edges mark where a stateful operator's output at step `n` feeds
//! a computation at step `n + 1`; the scheduler ignores them, which is what
//! makes recursive shapes like `integrate` schedulable.

pub mod handle;
pub mod optimize;
pub mod schedule;

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::zset::ZSet;
use crate::Data;

/// Identifies an operator within one circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifies a circuit within the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CircuitId(pub u64);

/// Identifies an operator across circuits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalNodeId {
    /// The owning circuit.
    pub circuit: CircuitId,
    /// The operator within it.
    pub node: NodeId,
}

static NEXT_CIRCUIT_ID: AtomicU64 = AtomicU64::new(0);

/// How an edge participates in scheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    /// An intra-step dataflow dependency.
    Data,
    /// A cross-step dependency; invisible to the scheduler.
    Feedback,
}

/// A directed connection between two operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Producing node.
    pub from: NodeId,
    /// Consuming node.
    pub to: NodeId,
    /// Scheduling behavior.
    pub kind: EdgeKind,
}

/// The computation an operator performs, as a matchable tag.
pub enum OperatorKind<T> {
    /// External feed; its carrier is filled from an input handle.
    Input,
    /// Per-key transform.
    Map(Arc<dyn Fn(&T) -> T + Send + Sync>),
    /// Per-key predicate.
    Filter(Arc<dyn Fn(&T) -> bool + Send + Sync>),
    /// Fused filter-then-map.
    FilterMap {
        /// Applied first.
        predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
        /// Applied to survivors.
        transform: Arc<dyn Fn(&T) -> T + Send + Sync>,
    },
    /// Fused map-then-filter.
    MapFilter {
        /// Applied first.
        transform: Arc<dyn Fn(&T) -> T + Send + Sync>,
        /// Applied to transformed keys.
        predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    },
    /// Weight negation.
    Negate,
    /// Running sum of its input deltas; stateful.
    Integrate,
    /// Emits the previous step's input; stateful.
    Delay,
    /// Whole-Z-set unary function.
    Apply(Arc<dyn Fn(&ZSet<T>) -> ZSet<T> + Send + Sync>),
    /// Whole-Z-set binary function; joins are expressed this way.
    Apply2(Arc<dyn Fn(&ZSet<T>, &ZSet<T>) -> ZSet<T> + Send + Sync>),
    /// Observes the carrier without changing it; receives the clock.
    Inspect(Arc<dyn Fn(i64, &ZSet<T>) + Send + Sync>),
}

impl<T> OperatorKind<T> {
    /// A short tag naming the operator shape.
    pub fn type_name(&self) -> &'static str {
        match self {
            OperatorKind::Input => "input",
            OperatorKind::Map(_) => "map",
            OperatorKind::Filter(_) => "filter",
            OperatorKind::FilterMap { .. } => "filter_map",
            OperatorKind::MapFilter { .. } => "map_filter",
            OperatorKind::Negate => "negate",
            OperatorKind::Integrate => "integrate",
            OperatorKind::Delay => "delay",
            OperatorKind::Apply(_) => "apply",
            OperatorKind::Apply2(_) => "apply2",
            OperatorKind::Inspect(_) => "inspect",
        }
    }

    /// True for operators that carry state across steps.
    pub fn is_stateful(&self) -> bool {
        matches!(self, OperatorKind::Integrate | OperatorKind::Delay)
    }

    /// The number of declared inputs the operator expects.
    pub fn arity(&self) -> usize {
        match self {
            OperatorKind::Input => 0,
            OperatorKind::Apply2(_) => 2,
            _ => 1,
        }
    }
}

impl<T> Clone for OperatorKind<T> {
    fn clone(&self) -> Self {
        match self {
            OperatorKind::Input => OperatorKind::Input,
            OperatorKind::Map(f) => OperatorKind::Map(Arc::clone(f)),
            OperatorKind::Filter(p) => OperatorKind::Filter(Arc::clone(p)),
            OperatorKind::FilterMap { predicate, transform } => OperatorKind::FilterMap {
                predicate: Arc::clone(predicate),
                transform: Arc::clone(transform),
            },
            OperatorKind::MapFilter { transform, predicate } => OperatorKind::MapFilter {
                transform: Arc::clone(transform),
                predicate: Arc::clone(predicate),
            },
            OperatorKind::Negate => OperatorKind::Negate,
            OperatorKind::Integrate => OperatorKind::Integrate,
            OperatorKind::Delay => OperatorKind::Delay,
            OperatorKind::Apply(f) => OperatorKind::Apply(Arc::clone(f)),
            OperatorKind::Apply2(f) => OperatorKind::Apply2(Arc::clone(f)),
            OperatorKind::Inspect(f) => OperatorKind::Inspect(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for OperatorKind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// An operator and its metadata.
#[derive(Clone, Debug)]
pub struct OperatorRecord<T> {
    /// The operator's id within the circuit.
    pub id: NodeId,
    /// A caller-supplied name.
    pub name: String,
    /// The computation.
    pub kind: OperatorKind<T>,
    /// Where the operator was declared, when captured.
    pub location: Option<String>,
    /// The producing nodes this operator reads, in argument order.
    pub inputs: Vec<NodeId>,
}

/// A typed reference to the value carried out of one operator.
pub struct StreamHandle<T> {
    node: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StreamHandle<T> {
    fn new(node: NodeId) -> Self {
        StreamHandle { node, _marker: PhantomData }
    }

    /// The node whose output this handle names.
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl<T> Clone for StreamHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StreamHandle<T> {}

impl<T> fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamHandle({})", self.node)
    }
}

/// Accumulates operators and edges, then freezes a [`CircuitDefinition`].
pub struct CircuitBuilder<T> {
    id: CircuitId,
    next_node: u64,
    operators: BTreeMap<NodeId, OperatorRecord<T>>,
    edges: Vec<Edge>,
    inputs: BTreeMap<String, NodeId>,
    outputs: BTreeMap<String, NodeId>,
}

impl<T: Data> Default for CircuitBuilder<T> {
    fn default() -> Self {
        CircuitBuilder::new()
    }
}

impl<T: Data> CircuitBuilder<T> {
    /// An empty builder with a fresh circuit id.
    pub fn new() -> Self {
        CircuitBuilder {
            id: CircuitId(NEXT_CIRCUIT_ID.fetch_add(1, Ordering::Relaxed)),
            next_node: 0,
            operators: BTreeMap::new(),
            edges: Vec::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// The id the built circuit will carry.
    pub fn circuit_id(&self) -> CircuitId {
        self.id
    }

    fn fresh_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    #[track_caller]
    fn add_node(
        &mut self,
        name: &str,
        kind: OperatorKind<T>,
        inputs: Vec<NodeId>,
    ) -> Result<StreamHandle<T>> {
        if inputs.len() != kind.arity() {
            return Err(Error::Construction(format!(
                "operator '{name}' ({}) declares {} inputs, expected {}",
                kind.type_name(),
                inputs.len(),
                kind.arity()
            )));
        }
        for input in inputs.iter() {
            if !self.operators.contains_key(input) {
                return Err(Error::Construction(format!(
                    "operator '{name}' reads unknown node {input}"
                )));
            }
        }
        let id = self.fresh_node();
        let location = Some(std::panic::Location::caller().to_string());
        for &input in inputs.iter() {
            self.edges.push(Edge { from: input, to: id, kind: EdgeKind::Data });
        }
        if kind.is_stateful() {
            // State written at step n is read back at step n + 1.
            self.edges.push(Edge { from: id, to: id, kind: EdgeKind::Feedback });
        }
        self.operators
            .insert(id, OperatorRecord { id, name: name.to_string(), kind, location, inputs });
        Ok(StreamHandle::new(id))
    }

    /// Declares a named external input.
    #[track_caller]
    pub fn add_input(&mut self, name: &str) -> Result<StreamHandle<T>> {
        if self.inputs.contains_key(name) {
            return Err(Error::Construction(format!("duplicate input handle '{name}'")));
        }
        let handle = self.add_node(name, OperatorKind::Input, Vec::new())?;
        self.inputs.insert(name.to_string(), handle.node());
        Ok(handle)
    }

    /// Declares a named output fed by `source`.
    pub fn add_output(&mut self, source: &StreamHandle<T>, name: &str) -> Result<()> {
        if self.outputs.contains_key(name) {
            return Err(Error::Construction(format!("duplicate output handle '{name}'")));
        }
        if !self.operators.contains_key(&source.node()) {
            return Err(Error::Construction(format!(
                "output '{name}' references unknown node {}",
                source.node()
            )));
        }
        self.outputs.insert(name.to_string(), source.node());
        Ok(())
    }

    /// A per-key transform of `source`.
    #[track_caller]
    pub fn map<F>(&mut self, source: &StreamHandle<T>, name: &str, transform: F) -> Result<StreamHandle<T>>
    where
        F: Fn(&T) -> T + Send + Sync + 'static,
    {
        self.add_node(name, OperatorKind::Map(Arc::new(transform)), vec![source.node()])
    }

    /// A per-key restriction of `source`.
    #[track_caller]
    pub fn filter<P>(&mut self, source: &StreamHandle<T>, name: &str, predicate: P) -> Result<StreamHandle<T>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.add_node(name, OperatorKind::Filter(Arc::new(predicate)), vec![source.node()])
    }

    /// Negates the weights of `source`.
    #[track_caller]
    pub fn negate(&mut self, source: &StreamHandle<T>, name: &str) -> Result<StreamHandle<T>> {
        self.add_node(name, OperatorKind::Negate, vec![source.node()])
    }

    /// The running sum of `source` across steps.
    #[track_caller]
    pub fn integrate(&mut self, source: &StreamHandle<T>, name: &str) -> Result<StreamHandle<T>> {
        self.add_node(name, OperatorKind::Integrate, vec![source.node()])
    }

    /// Emits the previous step's value of `source`.
    #[track_caller]
    pub fn delay(&mut self, source: &StreamHandle<T>, name: &str) -> Result<StreamHandle<T>> {
        self.add_node(name, OperatorKind::Delay, vec![source.node()])
    }

    /// An arbitrary unary Z-set function of `source`.
    #[track_caller]
    pub fn apply<F>(&mut self, source: &StreamHandle<T>, name: &str, function: F) -> Result<StreamHandle<T>>
    where
        F: Fn(&ZSet<T>) -> ZSet<T> + Send + Sync + 'static,
    {
        self.add_node(name, OperatorKind::Apply(Arc::new(function)), vec![source.node()])
    }

    /// An arbitrary binary Z-set function of `left` and `right`.
    #[track_caller]
    pub fn apply2<F>(
        &mut self,
        left: &StreamHandle<T>,
        right: &StreamHandle<T>,
        name: &str,
        function: F,
    ) -> Result<StreamHandle<T>>
    where
        F: Fn(&ZSet<T>, &ZSet<T>) -> ZSet<T> + Send + Sync + 'static,
    {
        self.add_node(
            name,
            OperatorKind::Apply2(Arc::new(function)),
            vec![left.node(), right.node()],
        )
    }

    /// An inner join of `left` and `right` on an extracted key.
    ///
    /// Each side is grouped by its key extractor; matching keys produce
    /// `merge(key, left_value, right_value)` with the product of the two
    /// weights, exactly the indexed Z-set join lifted into the circuit.
    #[track_caller]
    pub fn join_with<IK, IV, IV2, FL, FR, FM>(
        &mut self,
        left: &StreamHandle<T>,
        right: &StreamHandle<T>,
        name: &str,
        split_left: FL,
        split_right: FR,
        merge: FM,
    ) -> Result<StreamHandle<T>>
    where
        IK: Data,
        IV: Data,
        IV2: Data,
        FL: Fn(&T) -> (IK, IV) + Send + Sync + 'static,
        FR: Fn(&T) -> (IK, IV2) + Send + Sync + 'static,
        FM: Fn(&IK, &IV, &IV2) -> T + Send + Sync + 'static,
    {
        use crate::indexed::IndexedZSet;
        self.apply2(left, right, name, move |lhs, rhs| {
            let left_indexed = IndexedZSet::group_by(lhs, &split_left);
            let right_indexed = IndexedZSet::group_by(rhs, &split_right);
            let mut output = ZSet::new();
            for (key, products) in left_indexed.join(&right_indexed).iter() {
                for ((lv, rv), weight) in products.pairs() {
                    output.insert_with_weight(merge(key, &lv, &rv), weight);
                }
            }
            output
        })
    }

    /// Observes the carrier of `source` each step without changing it.
    #[track_caller]
    pub fn inspect<F>(&mut self, source: &StreamHandle<T>, name: &str, callback: F) -> Result<StreamHandle<T>>
    where
        F: Fn(i64, &ZSet<T>) + Send + Sync + 'static,
    {
        self.add_node(name, OperatorKind::Inspect(Arc::new(callback)), vec![source.node()])
    }

    /// Freezes the graph into an executable definition.
    pub fn build(self) -> Result<CircuitDefinition<T>> {
        CircuitDefinition::from_parts(self.id, self.operators, self.edges, self.inputs, self.outputs)
    }
}

/// An immutable, schedulable circuit.
#[derive(Clone, Debug)]
pub struct CircuitDefinition<T> {
    pub(crate) id: CircuitId,
    pub(crate) operators: BTreeMap<NodeId, OperatorRecord<T>>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) inputs: BTreeMap<String, NodeId>,
    pub(crate) outputs: BTreeMap<String, NodeId>,
    pub(crate) dependencies: BTreeMap<NodeId, Vec<NodeId>>,
    pub(crate) order: Vec<NodeId>,
    pub(crate) scopes: usize,
}

impl<T: Data> CircuitDefinition<T> {
    /// Validates parts and derives the dependency map and schedule.
    pub(crate) fn from_parts(
        id: CircuitId,
        operators: BTreeMap<NodeId, OperatorRecord<T>>,
        edges: Vec<Edge>,
        inputs: BTreeMap<String, NodeId>,
        outputs: BTreeMap<String, NodeId>,
    ) -> Result<Self> {
        for edge in edges.iter() {
            if !operators.contains_key(&edge.from) || !operators.contains_key(&edge.to) {
                return Err(Error::Construction(format!(
                    "edge {} -> {} references an unknown node",
                    edge.from, edge.to
                )));
            }
        }
        for (name, node) in inputs.iter().chain(outputs.iter()) {
            if !operators.contains_key(node) {
                return Err(Error::Construction(format!(
                    "handle '{name}' references unknown node {node}"
                )));
            }
        }

        // Dependency adjacency is the transpose of the data edges.
        let mut dependencies: BTreeMap<NodeId, Vec<NodeId>> =
            operators.keys().map(|&n| (n, Vec::new())).collect();
        for edge in edges.iter().filter(|e| e.kind == EdgeKind::Data) {
            dependencies.get_mut(&edge.to).expect("validated above").push(edge.from);
        }

        let nodes: Vec<NodeId> = operators.keys().copied().collect();
        let order = schedule::topological_order(&nodes, &edges)?;

        Ok(CircuitDefinition {
            id,
            operators,
            edges,
            inputs,
            outputs,
            dependencies,
            order,
            scopes: 1,
        })
    }

    /// The circuit id.
    pub fn id(&self) -> CircuitId {
        self.id
    }

    /// The globally unique id of `node`.
    pub fn global_id(&self, node: NodeId) -> GlobalNodeId {
        GlobalNodeId { circuit: self.id, node }
    }

    /// The operator record for `node`, if present.
    pub fn operator(&self, node: NodeId) -> Option<&OperatorRecord<T>> {
        self.operators.get(&node)
    }

    /// Iterates operator records in id order.
    pub fn operators(&self) -> impl Iterator<Item = &OperatorRecord<T>> {
        self.operators.values()
    }

    /// The number of operators.
    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// All edges, data and feedback alike.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Named input handles and the nodes that back them.
    pub fn inputs(&self) -> &BTreeMap<String, NodeId> {
        &self.inputs
    }

    /// Named output handles and the nodes that feed them.
    pub fn outputs(&self) -> &BTreeMap<String, NodeId> {
        &self.outputs
    }

    /// The nodes `node` reads from, per the data edges.
    pub fn dependencies(&self, node: NodeId) -> &[NodeId] {
        self.dependencies.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Executable operator ids in dependency order.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// The number of clock scopes.
    pub fn scopes(&self) -> usize {
        self.scopes
    }

    /// How many data edges leave `node`.
    pub fn consumer_count(&self, node: NodeId) -> usize {
        self.edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Data && e.from == node)
            .count()
    }

    /// Stateful operators, in id order.
    pub fn stateful_nodes(&self) -> Vec<NodeId> {
        self.operators
            .values()
            .filter(|record| record.kind.is_stateful())
            .map(|record| record.id)
            .collect()
    }
}
