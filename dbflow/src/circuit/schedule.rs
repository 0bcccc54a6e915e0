//! Topological scheduling of circuit operators.
//!
//! Kahn's algorithm over the data edges: seed with zero-in-degree nodes,
//! repeatedly emit the smallest ready node and decrement its successors.
//! Node ids are assigned monotonically by the builder, so smallest-id-first
//! tie-breaking is insertion-order tie-breaking, and the schedule is
//! deterministic. Feedback edges are excluded: they carry state across steps,
//! not within one, and are exactly what lets cyclic shapes schedule.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::circuit::{Edge, EdgeKind, NodeId};
use crate::error::{Error, Result};

/// Orders `nodes` so that every data edge points forward.
///
/// `nodes` must be the full set of operator ids, in any order. Returns a
/// `Construction` error naming the offending nodes when a data-edge cycle
/// remains.
pub fn topological_order(nodes: &[NodeId], edges: &[Edge]) -> Result<Vec<NodeId>> {
    let mut in_degree: HashMap<NodeId, usize> = nodes.iter().map(|&n| (n, 0)).collect();
    let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

    for edge in edges.iter().filter(|e| e.kind == EdgeKind::Data) {
        *in_degree
            .get_mut(&edge.to)
            .ok_or_else(|| Error::Construction(format!("edge to unknown node {:?}", edge.to)))?
            += 1;
        if !in_degree.contains_key(&edge.from) {
            return Err(Error::Construction(format!("edge from unknown node {:?}", edge.from)));
        }
        successors.entry(edge.from).or_default().push(edge.to);
    }

    let mut ready: BinaryHeap<Reverse<NodeId>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(&node, _)| Reverse(node))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        if let Some(successors) = successors.get(&node) {
            for &successor in successors {
                let degree = in_degree.get_mut(&successor).expect("successor is a known node");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(successor));
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let mut cyclic: Vec<NodeId> =
            nodes.iter().copied().filter(|n| !order.contains(n)).collect();
        cyclic.sort();
        return Err(Error::Construction(format!("cycle among nodes {cyclic:?}")));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Edge, EdgeKind, NodeId};

    fn data_edge(from: u64, to: u64) -> Edge {
        Edge { from: NodeId(from), to: NodeId(to), kind: EdgeKind::Data }
    }

    #[test]
    fn orders_chain() {
        let nodes = vec![NodeId(2), NodeId(0), NodeId(1)];
        let edges = vec![data_edge(0, 1), data_edge(1, 2)];
        let order = topological_order(&nodes, &edges).unwrap();
        assert_eq!(order, vec![NodeId(0), NodeId(1), NodeId(2)]);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let nodes = vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)];
        let edges = vec![data_edge(0, 3), data_edge(1, 3), data_edge(2, 3)];
        let order = topological_order(&nodes, &edges).unwrap();
        assert_eq!(order, vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
    }

    #[test]
    fn reports_cycles() {
        let nodes = vec![NodeId(0), NodeId(1)];
        let edges = vec![data_edge(0, 1), data_edge(1, 0)];
        let result = topological_order(&nodes, &edges);
        assert!(matches!(result, Err(Error::Construction(_))));
    }

    #[test]
    fn feedback_edges_break_cycles() {
        let nodes = vec![NodeId(0), NodeId(1)];
        let edges = vec![
            data_edge(0, 1),
            Edge { from: NodeId(1), to: NodeId(0), kind: EdgeKind::Feedback },
        ];
        let order = topological_order(&nodes, &edges).unwrap();
        assert_eq!(order, vec![NodeId(0), NodeId(1)]);
    }
}
