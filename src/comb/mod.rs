//! The combination graph: the line graph with every maximal chain of
//! plain degree-2 nodes contracted into a single edge, leaving only decision
//! nodes (stations, branchings, and points where a line ends or turns over).
//! This is the unit the embedders route on the grid.

#[cfg(test)]
mod test;

use geo::{Coord, LineString, Point};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableUnGraph};
use petgraph::visit::EdgeRef;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::{LineEdgeIx, LineGraph, LineIx, LineNodeIx};

pub type CombNodeIx = NodeIndex;
pub type CombEdgeIx = EdgeIndex;

/// A decision node, wrapping one line graph node.
#[derive(Debug, Clone)]
pub struct CombNodePl {
    pub parent: LineNodeIx,
    pub geom: Point<f64>,
    /// Incident comb edges in circular (counterclockwise) order.
    pub ordering: Vec<CombEdgeIx>,
}

/// A chain of line edges between two decision nodes.
#[derive(Debug, Clone)]
pub struct CombEdgePl {
    /// The underlying line edges, ordered from the `from` endpoint.
    pub chain: Vec<LineEdgeIx>,
    /// Interior chain nodes, ordered alongside `chain`.
    pub via: Vec<LineNodeIx>,
    /// Union of the lines over the chain, in first-seen order.
    pub lines: Vec<LineIx>,
    /// Concatenated geographic course of the chain.
    pub geom: LineString<f64>,
}

/// Contraction of a [`LineGraph`] to its decision nodes.
///
/// Immutable once built; the embedders only read it.
#[derive(Debug, Clone, Default)]
pub struct CombGraph {
    pub(crate) g: StableUnGraph<CombNodePl, CombEdgePl>,
    by_parent: FxHashMap<LineNodeIx, CombNodeIx>,
}

impl CombGraph {
    /// Builds the combination graph. With `deg2_heur`, degree-2 nodes whose
    /// incident edges bend by 45° or more are kept as decision nodes so
    /// sharp geographic corners survive into the routing.
    pub fn new(lg: &LineGraph, deg2_heur: bool) -> Self {
        let mut cg = CombGraph::default();

        let mut decision: FxHashSet<LineNodeIx> = lg
            .nodes()
            .filter(|&n| is_decision(lg, n, deg2_heur))
            .collect();

        // a component may be a pure ring of chain nodes; anchor it on its
        // two lowest-index nodes so no self-loop comb edge arises
        let mut consumed: FxHashSet<LineEdgeIx> = FxHashSet::default();
        let mut anchors: Vec<LineNodeIx> = Vec::new();
        for e in lg.edges() {
            let (a, b) = lg.endpoints(e);
            if decision.contains(&a) || decision.contains(&b) {
                continue;
            }
            // walk the ring this edge belongs to and check it is closed
            let mut ring: Vec<LineNodeIx> = vec![a, b];
            let mut prev_e = e;
            let mut cur = b;
            let closed = loop {
                let Some(next_e) = lg.incident(cur).into_iter().find(|&x| x != prev_e) else {
                    break false;
                };
                let nxt = lg.other_nd(next_e, cur);
                if decision.contains(&nxt) {
                    break false;
                }
                if nxt == a {
                    break true;
                }
                ring.push(nxt);
                prev_e = next_e;
                cur = nxt;
            };
            if closed {
                ring.sort();
                if !decision.contains(&ring[0]) {
                    anchors.push(ring[0]);
                    anchors.push(ring[1]);
                }
            }
        }
        decision.extend(anchors);

        let mut decision_sorted: Vec<LineNodeIx> = decision.iter().copied().collect();
        decision_sorted.sort();
        for &n in &decision_sorted {
            let ix = cg.g.add_node(CombNodePl {
                parent: n,
                geom: lg.node(n).geom,
                ordering: Vec::new(),
            });
            cg.by_parent.insert(n, ix);
        }

        // walk every chain out of every decision node once
        for &start in &decision_sorted {
            for first in lg.incident(start) {
                if consumed.contains(&first) {
                    continue;
                }
                let mut chain = vec![first];
                let mut via = Vec::new();
                let mut cur = lg.other_nd(first, start);
                let mut cur_e = first;
                while !decision.contains(&cur) {
                    via.push(cur);
                    let next_e = lg
                        .incident(cur)
                        .into_iter()
                        .find(|&x| x != cur_e)
                        .expect("chain node of degree 2");
                    chain.push(next_e);
                    cur_e = next_e;
                    cur = lg.other_nd(next_e, cur);
                }
                for &e in &chain {
                    consumed.insert(e);
                }

                if cur == start {
                    // a petal: the chain loops back to its own decision
                    // node. promote the middle chain node so the comb graph
                    // stays free of self-loops
                    let cut = via.len() / 2;
                    let mid = via[cut];
                    let mid_ix = cg.g.add_node(CombNodePl {
                        parent: mid,
                        geom: lg.node(mid).geom,
                        ordering: Vec::new(),
                    });
                    cg.by_parent.insert(mid, mid_ix);

                    let from = cg.by_parent[&start];
                    let first_half = chain_pl(lg, start, &chain[..=cut], &via[..cut]);
                    cg.g.add_edge(from, mid_ix, first_half);
                    let second_half = chain_pl(lg, mid, &chain[cut + 1..], &via[cut + 1..]);
                    cg.g.add_edge(mid_ix, from, second_half);
                    continue;
                }

                let from = cg.by_parent[&start];
                let to = cg.by_parent[&cur];
                let pl = chain_pl(lg, start, &chain, &via);
                cg.g.add_edge(from, to, pl);
            }
        }

        // circular orderings from the geographic angle of each chain's first
        // segment; ties break on edge index
        for n in cg.g.node_indices().collect::<Vec<_>>() {
            let parent = cg.g[n].parent;
            let mut edges: Vec<(f64, CombEdgeIx)> = cg
                .g
                .edges(n)
                .map(|r| {
                    let pl = r.weight();
                    let line_e = if cg.g.edge_endpoints(r.id()).expect("live edge").0 == n {
                        pl.chain[0]
                    } else {
                        *pl.chain.last().expect("nonempty chain")
                    };
                    (lg.edge_angle_at(line_e, parent), r.id())
                })
                .collect();
            edges.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
            cg.g[n].ordering = edges.into_iter().map(|(_, e)| e).collect();
        }

        cg
    }

    pub fn nodes(&self) -> impl Iterator<Item = CombNodeIx> + '_ {
        self.g.node_indices()
    }

    pub fn edges(&self) -> impl Iterator<Item = CombEdgeIx> + '_ {
        self.g.edge_indices()
    }

    pub fn node(&self, n: CombNodeIx) -> &CombNodePl {
        &self.g[n]
    }

    pub fn edge(&self, e: CombEdgeIx) -> &CombEdgePl {
        &self.g[e]
    }

    pub fn endpoints(&self, e: CombEdgeIx) -> (CombNodeIx, CombNodeIx) {
        self.g.edge_endpoints(e).expect("live edge")
    }

    pub fn other_nd(&self, e: CombEdgeIx, n: CombNodeIx) -> CombNodeIx {
        let (a, b) = self.endpoints(e);
        if a == n {
            b
        } else {
            a
        }
    }

    pub fn deg(&self, n: CombNodeIx) -> usize {
        self.g.edges(n).count()
    }

    pub fn num_nds(&self) -> usize {
        self.g.node_count()
    }

    pub fn num_edgs(&self) -> usize {
        self.g.edge_count()
    }

    pub fn by_parent(&self, n: LineNodeIx) -> Option<CombNodeIx> {
        self.by_parent.get(&n).copied()
    }

    /// Incident comb edges of `n` in ascending index order.
    pub fn incident(&self, n: CombNodeIx) -> Vec<CombEdgeIx> {
        let mut out: Vec<_> = self.g.edges(n).map(|r| r.id()).collect();
        out.sort();
        out
    }

    pub fn shares_line(&self, a: CombEdgeIx, b: CombEdgeIx) -> bool {
        self.g[a].lines.iter().any(|l| self.g[b].lines.contains(l))
    }
}

fn is_decision(lg: &LineGraph, n: LineNodeIx, deg2_heur: bool) -> bool {
    let deg = lg.deg(n);
    if deg != 2 || !lg.node(n).stops.is_empty() {
        return true;
    }
    let inc = lg.incident(n);
    let (ea, eb) = (inc[0], inc[1]);

    // a chain node must carry every line across
    let all_continue = lg.edge(ea).lines.iter().all(|o| lg.line_continues(o.line, n, ea, eb))
        && lg.edge(eb).lines.iter().all(|o| lg.line_continues(o.line, n, ea, eb));
    if !all_continue {
        return true;
    }

    if deg2_heur {
        // retain sharp geographic corners as decision nodes
        let da = lg.edge_angle_at(ea, n);
        let db = lg.edge_angle_at(eb, n);
        let diff = (da - db).rem_euclid(std::f64::consts::TAU);
        let dev = (std::f64::consts::PI - diff).abs();
        if dev >= std::f64::consts::FRAC_PI_4 {
            return true;
        }
    }
    false
}

/// Builds the payload of one comb edge from its chain walked from `start`.
fn chain_pl(lg: &LineGraph, start: LineNodeIx, chain: &[LineEdgeIx], via: &[LineNodeIx]) -> CombEdgePl {
    let mut lines = Vec::new();
    for &e in chain {
        for occ in &lg.edge(e).lines {
            if !lines.contains(&occ.line) {
                lines.push(occ.line);
            }
        }
    }
    CombEdgePl {
        chain: chain.to_vec(),
        via: via.to_vec(),
        lines,
        geom: concat_chain_geom(lg, start, chain),
    }
}

fn concat_chain_geom(lg: &LineGraph, start: LineNodeIx, chain: &[LineEdgeIx]) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = Vec::new();
    let mut cur = start;
    for &e in chain {
        let part = lg.geom_from(e, cur);
        if coords.is_empty() {
            coords.extend(part.iter().copied());
        } else {
            coords.extend(part.iter().skip(1).copied());
        }
        cur = lg.other_nd(e, cur);
    }
    coords.into()
}
