//! The geographic input graph: an undirected multigraph of stations and
//! line-bundled track segments, backed by a stable-index arena so node and
//! edge handles survive the planarize/contract/split transforms.

pub mod edge;
pub mod line;
pub mod node;
pub mod transform;

#[cfg(test)]
mod test;

#[doc(inline)]
pub use edge::*;
#[doc(inline)]
pub use line::*;
#[doc(inline)]
pub use node::*;

use geo::{Coord, Distance, Euclidean, Point, Rect};
use indexmap::IndexMap;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableUnGraph};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashSet;

/// Node handle into a [`LineGraph`].
pub type LineNodeIx = NodeIndex;
/// Edge handle into a [`LineGraph`].
pub type LineEdgeIx = EdgeIndex;

/// Undirected multigraph of stations and line-bearing edges.
///
/// Lines are interned once in a registry and referenced from edge payloads
/// by [`LineIx`].
#[derive(Debug, Clone, Default)]
pub struct LineGraph {
    pub(crate) g: StableUnGraph<LineNodePl, LineEdgePl>,
    lines: IndexMap<String, Line>,
}

impl LineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `line`, returning the index of the already-registered line
    /// with the same id if there is one.
    pub fn add_line(&mut self, line: Line) -> LineIx {
        let entry = self.lines.entry(line.id.clone());
        let ix = LineIx(entry.index() as u32);
        entry.or_insert(line);
        ix
    }

    pub fn line(&self, ix: LineIx) -> &Line {
        &self.lines[ix.0 as usize]
    }

    pub fn line_by_id(&self, id: &str) -> Option<LineIx> {
        self.lines.get_index_of(id).map(|i| LineIx(i as u32))
    }

    pub fn line_indices(&self) -> impl Iterator<Item = LineIx> {
        (0..self.lines.len() as u32).map(LineIx)
    }

    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn add_node(&mut self, pl: LineNodePl) -> LineNodeIx {
        self.g.add_node(pl)
    }

    /// Adds an edge. Self-loops are rejected; parallel edges are allowed
    /// here and removed by the contraction step before embedding.
    pub fn add_edge(&mut self, a: LineNodeIx, b: LineNodeIx, pl: LineEdgePl) -> LineEdgeIx {
        debug_assert_ne!(a, b, "line graphs carry no self-loops");
        self.g.add_edge(a, b, pl)
    }

    pub fn node(&self, n: LineNodeIx) -> &LineNodePl {
        &self.g[n]
    }

    pub fn node_mut(&mut self, n: LineNodeIx) -> &mut LineNodePl {
        &mut self.g[n]
    }

    pub fn edge(&self, e: LineEdgeIx) -> &LineEdgePl {
        &self.g[e]
    }

    pub fn edge_mut(&mut self, e: LineEdgeIx) -> &mut LineEdgePl {
        &mut self.g[e]
    }

    pub fn endpoints(&self, e: LineEdgeIx) -> (LineNodeIx, LineNodeIx) {
        self.g.edge_endpoints(e).expect("live edge")
    }

    pub fn other_nd(&self, e: LineEdgeIx, n: LineNodeIx) -> LineNodeIx {
        let (a, b) = self.endpoints(e);
        if a == n {
            b
        } else {
            a
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = LineNodeIx> + '_ {
        self.g.node_indices()
    }

    pub fn edges(&self) -> impl Iterator<Item = LineEdgeIx> + '_ {
        self.g.edge_indices()
    }

    /// Incident edges of `n`, in ascending edge-index (insertion) order.
    pub fn incident(&self, n: LineNodeIx) -> Vec<LineEdgeIx> {
        let mut out: Vec<_> = self.g.edges(n).map(|r| r.id()).collect();
        out.sort();
        out
    }

    pub fn deg(&self, n: LineNodeIx) -> usize {
        self.g.edges(n).count()
    }

    pub fn num_nds(&self) -> usize {
        self.g.node_count()
    }

    pub fn num_edgs(&self) -> usize {
        self.g.edge_count()
    }

    pub fn max_deg(&self) -> usize {
        self.nodes().map(|n| self.deg(n)).max().unwrap_or(0)
    }

    /// Axis-aligned bounding box over node positions and edge geometries.
    pub fn bbox(&self) -> Rect<f64> {
        let mut min = Coord {
            x: f64::INFINITY,
            y: f64::INFINITY,
        };
        let mut max = Coord {
            x: f64::NEG_INFINITY,
            y: f64::NEG_INFINITY,
        };
        let mut grow = |c: Coord<f64>| {
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
        };
        for n in self.g.node_indices() {
            grow(self.g[n].geom.0);
        }
        for e in self.g.edge_indices() {
            for c in &self.g[e].geom.0 {
                grow(*c);
            }
        }
        if self.g.node_count() == 0 {
            return Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 });
        }
        Rect::new(min, max)
    }

    /// Mean distance between adjacent nodes, used to resolve relative grid
    /// sizes.
    pub fn avg_adjacent_distance(&self) -> f64 {
        let mut avg = 0.0;
        let mut count = 0usize;
        for n in self.g.node_indices() {
            let deg = self.deg(n);
            if deg == 0 {
                continue;
            }
            count += 1;
            let mut loc = 0.0;
            for e in self.g.edges(n) {
                let other = self.other_nd(e.id(), n);
                loc += Euclidean::distance(self.g[n].geom, self.g[other].geom);
            }
            avg += loc / deg as f64;
        }
        if count == 0 {
            return 0.0;
        }
        avg / count as f64
    }

    /// The geometry of `e` oriented so it leaves `n` first.
    pub fn geom_from(&self, e: LineEdgeIx, n: LineNodeIx) -> Vec<Coord<f64>> {
        let (a, _) = self.endpoints(e);
        let mut coords = self.g[e].geom.0.clone();
        if a != n {
            coords.reverse();
        }
        coords
    }

    /// The direction of `e` at `n`, as the angle of the first non-degenerate
    /// segment of the polyline leaving `n`.
    pub fn edge_angle_at(&self, e: LineEdgeIx, n: LineNodeIx) -> f64 {
        let coords = self.geom_from(e, n);
        let origin = coords[0];
        for c in &coords[1..] {
            let dx = c.x - origin.x;
            let dy = c.y - origin.y;
            if dx.abs() > f64::EPSILON || dy.abs() > f64::EPSILON {
                return dy.atan2(dx);
            }
        }
        // degenerate geometry, fall back to the straight connection
        let other = self.other_nd(e, n);
        let o = self.g[other].geom;
        let s = self.g[n].geom;
        (o.y() - s.y()).atan2(o.x() - s.x())
    }

    /// Circular (counterclockwise) ordering of the incident edges of `n`,
    /// by geometric angle; ties break on insertion order.
    pub fn edge_ordering(&self, n: LineNodeIx) -> Vec<LineEdgeIx> {
        let mut edges: Vec<(f64, LineEdgeIx)> = self
            .incident(n)
            .into_iter()
            .map(|e| (self.edge_angle_at(e, n), e))
            .collect();
        edges.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));
        edges.into_iter().map(|(_, e)| e).collect()
    }

    /// Whether `line` continues between `ea` and `eb` at `n`, honoring
    /// one-way directions and connection exceptions.
    pub fn line_continues(&self, line: LineIx, n: LineNodeIx, ea: LineEdgeIx, eb: LineEdgeIx) -> bool {
        let (Some(oa), Some(ob)) = (self.g[ea].line_occ(line), self.g[eb].line_occ(line)) else {
            return false;
        };
        if self.g[n].conn_excluded(line, ea, eb) {
            return false;
        }
        let toward = |occ: &LineOcc, e: LineEdgeIx| match occ.direction {
            Direction::Both => true,
            Direction::Toward(t) => {
                debug_assert!(t == n || t == self.other_nd(e, n));
                t == n
            }
        };
        let away = |occ: &LineOcc, e: LineEdgeIx| match occ.direction {
            Direction::Both => true,
            Direction::Toward(t) => t == self.other_nd(e, n),
        };
        (toward(oa, ea) && away(ob, eb)) || (toward(ob, eb) && away(oa, ea))
    }

    /// Lines served at `n`: every line on an incident edge minus the
    /// not-served set.
    pub fn served_lines(&self, n: LineNodeIx) -> FxHashSet<LineIx> {
        let mut out = FxHashSet::default();
        for e in self.g.edges(n) {
            for occ in &e.weight().lines {
                if !self.g[n].not_served.contains(&occ.line) {
                    out.insert(occ.line);
                }
            }
        }
        out
    }

    pub fn shared_lines(&self, a: LineEdgeIx, b: LineEdgeIx) -> Vec<LineIx> {
        self.g[a]
            .lines
            .iter()
            .filter(|o| self.g[b].has_line(o.line))
            .map(|o| o.line)
            .collect()
    }

    /// Merges `gone` into `keep`: reconnects edges, folds parallels, drops
    /// self-loops, carries stops and exceptions over. The kept node moves to
    /// the midpoint of the two merged positions.
    ///
    /// Returns `keep`.
    pub fn merge_nds(&mut self, keep: LineNodeIx, gone: LineNodeIx) -> LineNodeIx {
        debug_assert_ne!(keep, gone);

        let keep_pos = self.g[keep].geom;
        let gone_pos = self.g[gone].geom;

        // detach every edge of the vanishing node
        let old_edges: Vec<LineEdgeIx> = self.incident(gone);
        for old_e in old_edges {
            let other = self.other_nd(old_e, gone);
            let mut coords = self.geom_from(old_e, gone);
            let mut pl = self.g.remove_edge(old_e).expect("live edge");

            if other == keep {
                // collapses to a self-loop, drop it
                self.g[keep].purge_edge_from_conns(old_e);
                self.g[gone].purge_edge_from_conns(old_e);
                continue;
            }
            self.g[other].replace_edge_in_conns(old_e, LineEdgeIx::end());

            pl.replace_direction_node(gone, keep);
            coords[0] = keep_pos.0;
            pl.geom = coords.into();

            let new_e = match self.find_edge(keep, other) {
                Some(existing) => {
                    for occ in std::mem::take(&mut pl.lines) {
                        self.g[existing].add_line(occ);
                    }
                    existing
                }
                None => self.g.add_edge(keep, other, pl),
            };
            self.g[other].replace_edge_in_conns(LineEdgeIx::end(), new_e);
            self.g[gone].replace_edge_in_conns(old_e, new_e);
        }

        // carry node state over
        let gone_pl = self.g.remove_node(gone).expect("live node");
        let keep_pl = &mut self.g[keep];
        keep_pl.stops.extend(gone_pl.stops);
        keep_pl.not_served = keep_pl
            .not_served
            .intersection(&gone_pl.not_served)
            .copied()
            .collect();
        for key in gone_pl.excluded_conns {
            keep_pl.excluded_conns.insert(key);
        }
        keep_pl.geom = Point::new(
            (keep_pos.x() + gone_pos.x()) / 2.0,
            (keep_pos.y() + gone_pos.y()) / 2.0,
        );

        keep
    }

    pub fn find_edge(&self, a: LineNodeIx, b: LineNodeIx) -> Option<LineEdgeIx> {
        self.g.find_edge(a, b)
    }

    /// Total count of connection exceptions over all nodes.
    pub fn num_conn_excs(&self) -> usize {
        self.nodes().map(|n| self.g[n].excluded_conns.len()).sum()
    }
}
