//! Multi-target shortest path over the directed grid view
//! (sink → port → grid edge → port → sink). The search stops at the first
//! target popped; ties break deterministically on insertion order. A
//! Chebyshev lower bound scaled by the cheapest hop keeps it goal-directed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::grid::{GridEdgeIx, GridGraph, GridNodeIx};

/// A found route to the first-popped target.
#[derive(Debug, Clone)]
pub struct PathResult {
    pub target: GridNodeIx,
    pub cost: f64,
    /// Directed edges from source sink to target sink, including the sink
    /// and bend edges traversed on the way.
    pub edges: Vec<GridEdgeIx>,
}

#[derive(Debug)]
struct SmallestHolder {
    estimate: OrderedFloat<f64>,
    seq: u64,
    node: GridNodeIx,
}

impl PartialEq for SmallestHolder {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.estimate == other.estimate && self.seq == other.seq
    }
}

impl Eq for SmallestHolder {}

impl PartialOrd for SmallestHolder {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SmallestHolder {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap, we pop the smallest estimate,
        // oldest insertion first
        other
            .estimate
            .cmp(&self.estimate)
            .then(other.seq.cmp(&self.seq))
    }
}

/// Runs the search from the sink `from` to the first reachable sink in
/// `targets`. `edge_extra` adds a per-edge surcharge (geo penalties) on top
/// of the current grid costs.
pub fn shortest_path<F>(
    gg: &GridGraph,
    from: GridNodeIx,
    targets: &FxHashSet<GridNodeIx>,
    edge_extra: F,
) -> Option<PathResult>
where
    F: Fn(GridEdgeIx) -> f64,
{
    let target_cells: Vec<(i64, i64)> = targets
        .iter()
        .map(|&t| {
            let nd = gg.node(t);
            (nd.x as i64, nd.y as i64)
        })
        .collect();
    let lower_bound = |n: GridNodeIx| -> f64 {
        let nd = gg.node(n);
        let (x, y) = (nd.x as i64, nd.y as i64);
        let cheb = target_cells
            .iter()
            .map(|&(tx, ty)| (tx - x).abs().max((ty - y).abs()))
            .min()
            .unwrap_or(0);
        cheb as f64 * gg.min_hop_cost()
    };

    let mut dist: FxHashMap<GridNodeIx, f64> = FxHashMap::default();
    let mut parent: FxHashMap<GridNodeIx, GridEdgeIx> = FxHashMap::default();
    let mut done: FxHashSet<GridNodeIx> = FxHashSet::default();
    let mut heap: BinaryHeap<SmallestHolder> = BinaryHeap::with_capacity(256);
    let mut seq = 0u64;

    dist.insert(from, 0.0);
    heap.push(SmallestHolder {
        estimate: OrderedFloat(lower_bound(from)),
        seq,
        node: from,
    });

    while let Some(SmallestHolder { node, .. }) = heap.pop() {
        if !done.insert(node) {
            continue;
        }
        let node_cost = dist[&node];

        if targets.contains(&node) {
            return Some(PathResult {
                target: node,
                cost: node_cost,
                edges: rebuild(gg, from, node, &parent),
            });
        }

        // sinks are terminal: a path may start or end at one, never pass
        // through
        if node != from && gg.is_sink(node) {
            continue;
        }

        for &e in gg.out_edges(node) {
            let edge = gg.edge(e);
            if !edge.usable() {
                continue;
            }
            let move_cost = edge.cost() + edge_extra(e);
            if !move_cost.is_finite() {
                continue;
            }
            let next = edge.to_nd();
            if done.contains(&next) {
                continue;
            }
            let next_cost = node_cost + move_cost;
            let better = dist.get(&next).map_or(true, |&old| next_cost < old);
            if better {
                dist.insert(next, next_cost);
                parent.insert(next, e);
                seq += 1;
                heap.push(SmallestHolder {
                    estimate: OrderedFloat(next_cost + lower_bound(next)),
                    seq,
                    node: next,
                });
            }
        }
    }

    None
}

fn rebuild(
    gg: &GridGraph,
    from: GridNodeIx,
    target: GridNodeIx,
    parent: &FxHashMap<GridNodeIx, GridEdgeIx>,
) -> Vec<GridEdgeIx> {
    let mut edges = Vec::new();
    let mut cur = target;
    while cur != from {
        let e = parent[&cur];
        edges.push(e);
        cur = gg.edge(e).from_nd();
    }
    edges.reverse();
    edges
}
