use geo::Point;
use petgraph::stable_graph::EdgeIndex;
use rustc_hash::FxHashSet;

use crate::graph::line::LineIx;

/// A station sharing a graph node. Several stops may collapse onto one node
/// after contraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub label: String,
    pub geom: Point<f64>,
}

/// Payload of a line graph node.
#[derive(Debug, Clone)]
pub struct LineNodePl {
    pub geom: Point<f64>,
    pub stops: Vec<Stop>,
    /// Triples `(line, edge_a, edge_b)`: the line does not continue between
    /// the two edges at this node. Edge pairs are stored normalized
    /// (`edge_a <= edge_b`).
    pub excluded_conns: FxHashSet<(LineIx, EdgeIndex, EdgeIndex)>,
    /// Lines passing this node without serving it.
    pub not_served: FxHashSet<LineIx>,
}

impl LineNodePl {
    pub fn at(geom: Point<f64>) -> Self {
        LineNodePl {
            geom,
            stops: Vec::new(),
            excluded_conns: FxHashSet::default(),
            not_served: FxHashSet::default(),
        }
    }

    /// Records that `line` must not continue between `a` and `b` here.
    pub fn exclude_conn(&mut self, line: LineIx, a: EdgeIndex, b: EdgeIndex) {
        let key = if a <= b { (line, a, b) } else { (line, b, a) };
        self.excluded_conns.insert(key);
    }

    pub fn conn_excluded(&self, line: LineIx, a: EdgeIndex, b: EdgeIndex) -> bool {
        let key = if a <= b { (line, a, b) } else { (line, b, a) };
        self.excluded_conns.contains(&key)
    }

    /// Drops every exception referring to a vanished edge.
    pub(crate) fn purge_edge_from_conns(&mut self, gone: EdgeIndex) {
        self.excluded_conns.retain(|(_, a, b)| *a != gone && *b != gone);
    }

    /// Rewrites every exception referring to edge `old` to refer to `new`.
    pub(crate) fn replace_edge_in_conns(&mut self, old: EdgeIndex, new: EdgeIndex) {
        if self.excluded_conns.is_empty() {
            return;
        }
        let hits: Vec<_> = self
            .excluded_conns
            .iter()
            .filter(|(_, a, b)| *a == old || *b == old)
            .copied()
            .collect();
        for key in hits {
            self.excluded_conns.remove(&key);
            let (l, a, b) = key;
            let a = if a == old { new } else { a };
            let b = if b == old { new } else { b };
            self.exclude_conn(l, a, b);
        }
    }
}
