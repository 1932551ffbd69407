//! The current embedding: which sink every comb node settled on, which grid
//! edges every comb edge routed over, and the score ledger of the drawing.


use geo::{Coord, LineInterpolatePoint, LineLocatePoint, LineString, Point};
use log::debug;
use rustc_hash::FxHashMap;

use crate::comb::{CombEdgeIx, CombGraph, CombNodeIx};
use crate::graph::{Direction, LineEdgePl, LineGraph, LineNodePl, LineOcc};
use crate::grid::{GridEdgeIx, GridEdgeKind, GridGraph, GridNodeIx};

/// Score of a drawing, split the way the statistics output reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Score {
    pub hop: f64,
    pub bend: f64,
    pub mv: f64,
    pub density: f64,
    pub violations: usize,
}

impl Score {
    pub fn full(&self) -> f64 {
        self.hop + self.bend + self.mv + self.density
    }
}

/// One routed comb edge: the directed grid edges from the endpoint the
/// router started at, plus the cost split recorded at routing time.
#[derive(Debug, Clone)]
pub struct RoutedPath {
    pub edges: Vec<GridEdgeIx>,
    /// Whether the router ran from the comb edge's `to` endpoint.
    pub reversed: bool,
    pub hop: f64,
    pub bend: f64,
    pub mv: f64,
    pub density: f64,
}

impl RoutedPath {
    pub fn cost(&self) -> f64 {
        self.hop + self.bend + self.mv + self.density
    }
}

/// A (partial) embedding of a comb graph into a grid graph.
#[derive(Debug, Clone, Default)]
pub struct Drawing {
    nds: FxHashMap<CombNodeIx, GridNodeIx>,
    paths: FxHashMap<CombEdgeIx, RoutedPath>,
    /// Move cost accounted outside the paths (the ILP prices station
    /// displacement on the assignment variables, not on sink edges).
    extra_mv: f64,
}

impl Drawing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the routed path of `ce`. `edges` run from the router's start
    /// sink; `reversed` marks that the router started at the comb edge's
    /// `to` endpoint. Costs are read off the grid as currently penalized,
    /// so the ledger matches what the search paid.
    pub fn draw(&mut self, ce: CombEdgeIx, edges: Vec<GridEdgeIx>, reversed: bool, gg: &GridGraph) {
        let mut path = RoutedPath {
            edges,
            reversed,
            hop: 0.0,
            bend: 0.0,
            mv: 0.0,
            density: 0.0,
        };
        for &e in &path.edges {
            let edge = gg.edge(e);
            match edge.kind() {
                GridEdgeKind::Primary { .. } => {
                    path.hop += edge.base_cost();
                    path.density += edge.cost() - edge.base_cost();
                }
                GridEdgeKind::Bend => path.bend += edge.cost(),
                GridEdgeKind::SinkOut { .. } | GridEdgeKind::SinkIn { .. } => {
                    path.mv += edge.cost();
                }
            }
        }
        self.paths.insert(ce, path);
    }

    pub fn settle(&mut self, cn: CombNodeIx, gn: GridNodeIx) {
        self.nds.insert(cn, gn);
    }

    pub fn erase_edge(&mut self, ce: CombEdgeIx) {
        self.paths.remove(&ce);
    }

    pub fn erase_node(&mut self, cn: CombNodeIx) {
        self.nds.remove(&cn);
    }

    pub fn drawn(&self, ce: CombEdgeIx) -> bool {
        self.paths.contains_key(&ce)
    }

    pub fn gr_nd(&self, cn: CombNodeIx) -> Option<GridNodeIx> {
        self.nds.get(&cn).copied()
    }

    pub fn path(&self, ce: CombEdgeIx) -> Option<&RoutedPath> {
        self.paths.get(&ce)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (CombNodeIx, GridNodeIx)> + '_ {
        self.nds.iter().map(|(&c, &g)| (c, g))
    }

    pub fn edges(&self) -> impl Iterator<Item = (CombEdgeIx, &RoutedPath)> + '_ {
        self.paths.iter().map(|(&c, p)| (c, p))
    }

    /// Sum of the recorded path costs; the cheap scalar the local search
    /// compares.
    pub fn score(&self) -> f64 {
        self.extra_mv + self.paths.values().map(|p| p.cost()).sum::<f64>()
    }

    pub fn set_extra_move_cost(&mut self, mv: f64) {
        self.extra_mv = mv;
    }

    /// Full score breakdown, with the circular-order violations recounted
    /// from the drawing.
    pub fn full_score(&self, cg: &CombGraph, gg: &GridGraph) -> Score {
        let mut sc = Score::default();
        sc.mv = self.extra_mv;
        for p in self.paths.values() {
            sc.hop += p.hop;
            sc.bend += p.bend;
            sc.mv += p.mv;
            sc.density += p.density;
        }
        sc.violations = self.count_violations(cg, gg);
        sc
    }

    /// Counts circular-order violations over all comb nodes of degree ≥ 3.
    pub fn count_violations(&self, cg: &CombGraph, gg: &GridGraph) -> usize {
        let mut total = 0usize;
        for cn in cg.nodes() {
            let ordering = &cg.node(cn).ordering;
            if ordering.len() < 3 {
                continue;
            }
            let mut seq: Vec<(usize, u8)> = Vec::new();
            for (pos, &ce) in ordering.iter().enumerate() {
                let Some(d) = self.edge_dir_at_node(ce, cn, cg, gg) else {
                    continue;
                };
                seq.push((pos, d));
            }
            if seq.len() < 3 {
                continue;
            }
            let wraps = seq
                .iter()
                .zip(seq.iter().cycle().skip(1))
                .filter(|((_, a), (_, b))| b < a)
                .count();
            total += wraps.saturating_sub(1);
        }
        total
    }

    /// Port direction at which the drawn `ce` leaves the sink of `cn`.
    pub fn edge_dir_at_node(
        &self,
        ce: CombEdgeIx,
        cn: CombNodeIx,
        cg: &CombGraph,
        gg: &GridGraph,
    ) -> Option<u8> {
        let path = self.paths.get(&ce)?;
        let (from_cn, _) = cg.endpoints(ce);
        let at_from = from_cn == cn;
        let at_start = at_from != path.reversed;
        if at_start {
            match gg.edge(*path.edges.first()?).kind() {
                GridEdgeKind::SinkOut { dir } => Some(dir),
                _ => None,
            }
        } else {
            match gg.edge(*path.edges.last()?).kind() {
                GridEdgeKind::SinkIn { dir } => Some(dir),
                _ => None,
            }
        }
    }

    /// Writes the drawing's state into the grid: settles every assigned
    /// sink and marks every routed primary edge used.
    pub fn apply_to_grid(&self, gg: &mut GridGraph) {
        for (&cn, &gn) in &self.nds {
            gg.settle_nd(gn, cn);
        }
        let mut ces: Vec<CombEdgeIx> = self.paths.keys().copied().collect();
        ces.sort();
        for ce in ces {
            self.apply_edge_to_grid(ce, gg);
        }
    }

    /// Inverse of [`Drawing::apply_to_grid`]; the grid returns to its
    /// pristine cost map.
    pub fn erase_from_grid(&self, gg: &mut GridGraph) {
        let mut ces: Vec<CombEdgeIx> = self.paths.keys().copied().collect();
        ces.sort();
        for ce in ces {
            self.erase_edge_from_grid(ce, gg);
        }
        for &cn in self.nds.keys() {
            gg.un_settle_nd(cn);
        }
    }

    pub fn apply_edge_to_grid(&self, ce: CombEdgeIx, gg: &mut GridGraph) {
        let Some(path) = self.paths.get(&ce) else {
            return;
        };
        for &e in &path.edges {
            match gg.edge(e).kind() {
                GridEdgeKind::Primary { .. } => {
                    let a = gg.parent_sink(gg.edge(e).from_nd());
                    let b = gg.parent_sink(gg.edge(e).to_nd());
                    gg.settle_edg(a, b, ce);
                }
                GridEdgeKind::Bend => {
                    gg.close_pass_through(gg.parent_sink(gg.edge(e).from_nd()), ce);
                }
                _ => {}
            }
        }
    }

    pub fn erase_edge_from_grid(&self, ce: CombEdgeIx, gg: &mut GridGraph) {
        let Some(path) = self.paths.get(&ce) else {
            return;
        };
        for &e in &path.edges {
            match gg.edge(e).kind() {
                GridEdgeKind::Primary { .. } => {
                    let a = gg.parent_sink(gg.edge(e).from_nd());
                    let b = gg.parent_sink(gg.edge(e).to_nd());
                    gg.un_settle_edg(a, b);
                }
                GridEdgeKind::Bend => {
                    gg.open_pass_through(gg.parent_sink(gg.edge(e).from_nd()));
                }
                _ => {}
            }
        }
    }

    /// The routed polyline of `ce` in `from → to` orientation, through the
    /// sink positions it traverses.
    pub fn polyline(&self, ce: CombEdgeIx, gg: &GridGraph) -> Option<LineString<f64>> {
        let path = self.paths.get(&ce)?;
        let mut coords: Vec<Coord<f64>> = Vec::new();
        for &e in &path.edges {
            if !gg.edge(e).kind().is_primary() {
                continue;
            }
            let a = gg.parent_sink(gg.edge(e).from_nd());
            let b = gg.parent_sink(gg.edge(e).to_nd());
            if coords.is_empty() {
                coords.push(gg.node(a).pos.0);
            }
            coords.push(gg.node(b).pos.0);
        }
        if path.reversed {
            coords.reverse();
        }
        Some(coords.into())
    }

    /// Emits the embedded line graph: one node per settled comb node at its
    /// sink position, the interior chain nodes re-distributed along the
    /// routed polyline at their original arc-length fractions.
    pub fn to_line_graph(&self, cg: &CombGraph, lg: &LineGraph, gg: &GridGraph) -> LineGraph {
        let mut out = LineGraph::new();
        for ix in lg.line_indices() {
            out.add_line(lg.line(ix).clone());
        }

        let mut node_map: FxHashMap<CombNodeIx, crate::graph::LineNodeIx> = FxHashMap::default();
        let mut cns: Vec<CombNodeIx> = self.nds.keys().copied().collect();
        cns.sort();
        for cn in cns {
            let gn = self.nds[&cn];
            let parent = cg.node(cn).parent;
            let mut pl = lg.node(parent).clone();
            pl.geom = gg.node(gn).pos;
            pl.excluded_conns.clear();
            node_map.insert(cn, out.add_node(pl));
        }

        let mut ces: Vec<CombEdgeIx> = self.paths.keys().copied().collect();
        ces.sort();
        for ce in ces {
            let Some(geom) = self.polyline(ce, gg) else {
                continue;
            };
            let (from_cn, to_cn) = cg.endpoints(ce);
            let (Some(&from_nd), Some(&to_nd)) = (node_map.get(&from_cn), node_map.get(&to_cn))
            else {
                debug!("skipping comb edge {ce:?} with unsettled endpoint");
                continue;
            };
            let pl = cg.edge(ce);

            // arc-length fractions of the interior chain nodes on the
            // geographic course, re-used on the routed polyline
            let fractions = via_fractions(lg, pl);
            let mut cut_at = vec![0.0];
            cut_at.extend(fractions);
            cut_at.push(1.0);

            let mut prev_nd = from_nd;
            for (i, pair) in cut_at.windows(2).enumerate() {
                let part = substring(&geom, pair[0], pair[1]);
                let last = i + 2 == cut_at.len();
                let next_nd = if last {
                    to_nd
                } else {
                    let pos = *part.0.last().expect("nonempty part");
                    out.add_node(LineNodePl::at(pos.into()))
                };
                let mut edge_pl = LineEdgePl::new(part);
                for &line in &pl.lines {
                    let occ = chain_occ(lg, pl, line, cg.node(from_cn).parent);
                    let direction = match occ {
                        ChainFlow::Both => Direction::Both,
                        ChainFlow::Forward => Direction::Toward(next_nd),
                        ChainFlow::Backward => Direction::Toward(prev_nd),
                    };
                    edge_pl.add_line(LineOcc {
                        line,
                        direction,
                        style: None,
                        outline_style: None,
                    });
                }
                out.add_edge(prev_nd, next_nd, edge_pl);
                prev_nd = next_nd;
            }
        }
        out
    }
}

enum ChainFlow {
    Both,
    Forward,
    Backward,
}

/// Flow of `line` along the chain of `pl` (walked from `from_parent`),
/// read off the first chain edge that carries it.
fn chain_occ(
    lg: &LineGraph,
    pl: &crate::comb::CombEdgePl,
    line: crate::graph::LineIx,
    from_parent: crate::graph::LineNodeIx,
) -> ChainFlow {
    let mut cur = from_parent;
    for &e in &pl.chain {
        let next = lg.other_nd(e, cur);
        if let Some(occ) = lg.edge(e).line_occ(line) {
            return match occ.direction {
                Direction::Both => ChainFlow::Both,
                Direction::Toward(t) if t == next => ChainFlow::Forward,
                Direction::Toward(_) => ChainFlow::Backward,
            };
        }
        cur = next;
    }
    ChainFlow::Both
}

const FRACTION_EPS: f64 = 1e-9;

/// Arc-length fractions of the interior chain nodes along the comb edge's
/// geographic course. Fractions are monotonic since the via nodes sit on
/// the course in chain order.
fn via_fractions(lg: &LineGraph, pl: &crate::comb::CombEdgePl) -> Vec<f64> {
    let mut out = Vec::with_capacity(pl.via.len());
    let mut last = 0.0f64;
    for &via in &pl.via {
        let Some(f) = pl.geom.line_locate_point(&lg.node(via).geom) else {
            continue;
        };
        let f = f.clamp(last, 1.0);
        last = f;
        out.push(f);
    }
    out
}

/// The sub-polyline of `ls` between the arc-length fractions `f0 <= f1`:
/// interpolated cut points at the window ends, the original vertices
/// strictly inside it.
fn substring(ls: &LineString<f64>, f0: f64, f1: f64) -> LineString<f64> {
    let (Some(start), Some(end)) = (ls.line_interpolate_point(f0), ls.line_interpolate_point(f1))
    else {
        return ls.clone();
    };
    let mut out: Vec<Coord<f64>> = vec![start.0];
    for &c in &ls.0 {
        let Some(f) = ls.line_locate_point(&Point::from(c)) else {
            continue;
        };
        if f > f0 + FRACTION_EPS && f < f1 - FRACTION_EPS {
            out.push(c);
        }
    }
    if out.len() == 1 || end.0 != *out.last().expect("nonempty") {
        out.push(end.0);
    }
    out.into()
}
