//! The heuristic embedder: route comb edges one by one along shortest
//! paths on the penalized grid, retry with shuffled orderings, then improve
//! by local node-displacement search.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;

use geo::{EuclideanDistance, Point};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::comb::{CombEdgeIx, CombGraph, CombNodeIx};
use crate::drawing::Drawing;
use crate::embed::{EmbedError, Embedder, EmbedderContext};
use crate::grid::{shortest_path, CostVectorUndo, GridEdgeIx, GridGraph, GridNodeIx};

/// Shuffled-ordering attempts after the initial one.
const ORDERING_RETRIES: usize = 10;
/// Upper bound on local-search sweeps.
const LOC_SEARCH_ITERS: usize = 100;
/// Stop the local search once a full sweep improves less than this.
const LOC_SEARCH_MIN_IMP: f64 = 0.05;

/// Forced cell positions during local-search re-routing.
type SettledPos = FxHashMap<CombNodeIx, (i64, i64)>;

enum RouteFail {
    /// The current ordering produced no routable edge; retryable.
    NoRoute,
    /// The cooperative deadline fired mid-attempt.
    Deadline,
}

pub struct HeuristicEmbedder<'a> {
    ctx: &'a EmbedderContext,
}

impl<'a> HeuristicEmbedder<'a> {
    pub fn new(ctx: &'a EmbedderContext) -> Self {
        HeuristicEmbedder { ctx }
    }

    /// Comb-edge ordering: breadth-first from a priority queue of comb
    /// nodes, pushing each popped node's incident edges in a shuffled copy
    /// of its circular ordering. The shuffle is what gives the retry loop
    /// its entropy.
    pub fn ordering(&self, cg: &CombGraph, rng: &mut StdRng) -> Vec<CombEdgeIx> {
        let mut order = Vec::with_capacity(cg.num_edgs());
        let mut done: FxHashSet<CombEdgeIx> = FxHashSet::default();
        let mut settled: FxHashSet<CombNodeIx> = FxHashSet::default();

        let mut global: Vec<CombNodeIx> = cg.nodes().collect();
        global.sort_by_key(|&n| (std::cmp::Reverse(cg.deg(n)), n));

        for &start in &global {
            if settled.contains(&start) {
                continue;
            }
            let mut dangling: BinaryHeap<NodePri> = BinaryHeap::new();
            dangling.push(NodePri {
                deg: cg.deg(start),
                node: start,
            });
            while let Some(NodePri { node, .. }) = dangling.pop() {
                if !settled.insert(node) {
                    continue;
                }
                let mut od = cg.node(node).ordering.clone();
                od.shuffle(rng);
                for ce in od {
                    if !done.insert(ce) {
                        continue;
                    }
                    let other = cg.other_nd(ce, node);
                    dangling.push(NodePri {
                        deg: cg.deg(other),
                        node: other,
                    });
                    order.push(ce);
                }
            }
        }
        order
    }

    /// Routes every edge of `order` in sequence, settling as it goes.
    /// `settled_pos` forces cell positions for nodes the caller displaced.
    fn draw_edges(
        &self,
        order: &[CombEdgeIx],
        settled_pos: &SettledPos,
        cg: &CombGraph,
        gg: &mut GridGraph,
        drawing: &mut Drawing,
    ) -> Result<(), RouteFail> {
        for &ce in order {
            if self.ctx.expired() {
                return Err(RouteFail::Deadline);
            }
            self.route_edge(ce, settled_pos, cg, gg, drawing)?;
        }
        Ok(())
    }

    fn route_edge(
        &self,
        ce: CombEdgeIx,
        settled_pos: &SettledPos,
        cg: &CombGraph,
        gg: &mut GridGraph,
        drawing: &mut Drawing,
    ) -> Result<(), RouteFail> {
        let (mut fr, mut to) = cg.endpoints(ce);
        let mut reversed = false;
        if !gg.is_settled(fr) && gg.is_settled(to) {
            std::mem::swap(&mut fr, &mut to);
            reversed = true;
        }

        // STEP 1: resolve the source sink and the target candidate set
        let fr_gn = if let Some(gn) = gg.settled(fr) {
            gn
        } else if let Some(&(cx, cy)) = settled_pos.get(&fr) {
            match gg.sink_at(cx, cy) {
                Some(s) if gg.settled_comb_of(s).is_none() && gg.pass_through_of(s).is_none() => s,
                _ => return Err(RouteFail::NoRoute),
            }
        } else {
            match gg.grid_node_from(cg.node(fr).geom, gg.cell_size() * 1.7, None) {
                Some(s) => s,
                None => return Err(RouteFail::NoRoute),
            }
        };

        let to_gns: Vec<GridNodeIx> = if let Some(gn) = gg.settled(to) {
            if gn == fr_gn {
                return Err(RouteFail::NoRoute);
            }
            vec![gn]
        } else if let Some(&(cx, cy)) = settled_pos.get(&to) {
            match gg.sink_at(cx, cy) {
                Some(s)
                    if s != fr_gn
                        && gg.settled_comb_of(s).is_none()
                        && gg.pass_through_of(s).is_none() =>
                {
                    vec![s]
                }
                _ => return Err(RouteFail::NoRoute),
            }
        } else {
            let mut max_dis = gg.cell_size() * 3.0;
            let mut cands = gg.grid_nodes_to(cg.node(to).geom, max_dis, Some(fr_gn));
            let (cols, rows) = gg.dims();
            let diameter = gg.cell_size() * (cols + rows) as f64;
            while cands.is_empty() && max_dis < diameter {
                max_dis *= 2.0;
                cands = gg.grid_nodes_to(cg.node(to).geom, max_dis, Some(fr_gn));
            }
            cands
        };

        if to_gns.is_empty() {
            return Err(RouteFail::NoRoute);
        }

        // STEP 2: open the sinks; displacement is only charged the first
        // time a node settles
        let pen_per_grid = gg.pens().move_pen_per_grid();
        for &t in &to_gns {
            if gg.is_settled(to) {
                gg.open_node_sink(t, 0.0);
            } else {
                gg.open_node_sink(t, grid_dist(gg, t, cg.node(to).geom) * pen_per_grid);
            }
        }
        if gg.is_settled(fr) {
            gg.open_node_sink(fr_gn, 0.0);
        } else {
            gg.open_node_sink(fr_gn, grid_dist(gg, fr_gn, cg.node(fr).geom) * pen_per_grid);
        }

        // STEP 3: penalize orderings and bad angles at settled endpoints
        let mut undos: Vec<CostVectorUndo> = Vec::new();
        if gg.is_settled(fr) {
            undos.push(self.write_nd_costs(fr_gn, fr, ce, cg, gg));
        }
        if to_gns.len() == 1 && gg.is_settled(to) {
            // with more than one candidate the arrival node is unknown, so
            // no per-direction costs can be written
            undos.push(self.write_nd_costs(to_gns[0], to, ce, cg, gg));
        }

        let targets: FxHashSet<GridNodeIx> = to_gns.iter().copied().collect();
        let res = if self.ctx.enforce_geo_pen > 0.0 {
            let course = &cg.edge(ce).geom;
            let w = self.ctx.enforce_geo_pen;
            let cell = gg.cell_size();
            shortest_path(gg, fr_gn, &targets, |e: GridEdgeIx| {
                let edge = gg.edge(e);
                if !edge.kind().is_primary() {
                    return 0.0;
                }
                let a = gg.node(edge.from_nd()).pos;
                let b = gg.node(edge.to_nd()).pos;
                let mid = Point::new((a.x() + b.x()) / 2.0, (a.y() + b.y()) / 2.0);
                w * mid.euclidean_distance(course) / cell
            })
        } else {
            shortest_path(gg, fr_gn, &targets, |_| 0.0)
        };

        let outcome = match res {
            Some(path) => {
                // record before the overlays and sink openings are undone,
                // so the ledger matches what the search paid
                drawing.draw(ce, path.edges.clone(), reversed, gg);
                drawing.settle(fr, fr_gn);
                drawing.settle(to, path.target);
                Some(path)
            }
            None => None,
        };

        for undo in undos {
            gg.remove_cost_vector(undo);
        }
        for &t in &to_gns {
            gg.close_node_sink(t);
        }
        gg.close_node_sink(fr_gn);

        let Some(path) = outcome else {
            return Err(RouteFail::NoRoute);
        };

        // STEP 4: settle the result
        if !gg.is_settled(fr) {
            gg.settle_nd(fr_gn, fr);
        }
        if !gg.is_settled(to) {
            gg.settle_nd(path.target, to);
        }
        for &e in &path.edges {
            match gg.edge(e).kind() {
                crate::grid::GridEdgeKind::Primary { .. } => {
                    let a = gg.parent_sink(gg.edge(e).from_nd());
                    let b = gg.parent_sink(gg.edge(e).to_nd());
                    gg.settle_edg(a, b, ce);
                }
                crate::grid::GridEdgeKind::Bend => {
                    // the traversed sinks carry this routing and nothing else
                    gg.close_pass_through(gg.parent_sink(gg.edge(e).from_nd()), ce);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn write_nd_costs(
        &self,
        gn: GridNodeIx,
        cn: CombNodeIx,
        ce: CombEdgeIx,
        cg: &CombGraph,
        gg: &mut GridGraph,
    ) -> CostVectorUndo {
        let ordering = &cg.node(cn).ordering;
        let c = gg.topo_block_penalty(gn, ordering, ce)
            + gg.node_bend_penalty(gn, ce, |f| cg.shares_line(f, ce));
        gg.add_cost_vector(gn, c)
    }

    /// One local-search sweep over all comb nodes; returns the best drawing
    /// found and leaves the grid carrying `drawing` unchanged.
    fn local_search_sweep(&self, drawing: &Drawing, cg: &CombGraph, gg: &mut GridGraph) -> Drawing {
        let mut best = drawing.clone();

        let mut nodes: Vec<CombNodeIx> = cg.nodes().collect();
        nodes.sort();
        for a in nodes {
            if cg.deg(a) == 0 || self.ctx.expired() {
                continue;
            }
            let Some(orig_gn) = drawing.gr_nd(a) else {
                continue;
            };
            let (ox, oy) = {
                let nd = gg.node(orig_gn);
                (nd.x as i64, nd.y as i64)
            };
            let incident = cg.incident(a);

            // lift the node and its edges off the grid
            let mut lifted = drawing.clone();
            for &ce in &incident {
                lifted.erase_edge_from_grid(ce, gg);
                lifted.erase_edge(ce);
            }
            lifted.erase_node(a);
            gg.un_settle_nd(a);

            for pos in 0..9 {
                let (cx, cy) = displacement(pos, ox, oy);
                if let Some(r) = self.ctx.restrict_loc_search {
                    let Some(s) = gg.sink_at(cx, cy) else { continue };
                    let d = gg.node(s).pos.euclidean_distance(&cg.node(a).geom);
                    if d > r * gg.cell_size() {
                        continue;
                    }
                }
                let mut run = lifted.clone();
                let forced: SettledPos = [(a, (cx, cy))].into_iter().collect();

                let found = self
                    .draw_edges(&incident, &forced, cg, gg, &mut run)
                    .is_ok();
                if found && run.score() < best.score() {
                    best = run.clone();
                }

                // roll the grid back for the next candidate
                for &ce in &incident {
                    run.erase_edge_from_grid(ce, gg);
                }
                if gg.is_settled(a) {
                    gg.un_settle_nd(a);
                }
            }

            // restore the node as currently drawn
            gg.settle_nd(orig_gn, a);
            for &ce in &incident {
                drawing.apply_edge_to_grid(ce, gg);
            }
        }
        best
    }
}

fn displacement(pos: usize, x: i64, y: i64) -> (i64, i64) {
    match pos {
        0 => (x, y + 1),
        1 => (x + 1, y + 1),
        2 => (x + 1, y),
        3 => (x + 1, y - 1),
        4 => (x, y - 1),
        5 => (x - 1, y - 1),
        6 => (x - 1, y),
        7 => (x - 1, y + 1),
        _ => (x, y),
    }
}

/// Distance from the sink to the geographic position, in grid cells.
fn grid_dist(gg: &GridGraph, n: GridNodeIx, p: Point<f64>) -> f64 {
    let sp = gg.node(n).pos;
    sp.euclidean_distance(&p).floor() / gg.cell_size()
}

impl Embedder for HeuristicEmbedder<'_> {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    fn embed(&self, cg: &CombGraph, gg: &mut GridGraph) -> crate::Result<Drawing> {
        let mut rng = StdRng::seed_from_u64(self.ctx.seed);

        // initial ordering plus shuffled retries; keep the best by score
        let mut best: Option<Drawing> = None;
        for attempt in 0..=ORDERING_RETRIES {
            if self.ctx.expired() {
                break;
            }
            let order = self.ordering(cg, &mut rng);
            let mut drawing = Drawing::new();
            match self.draw_edges(&order, &SettledPos::default(), cg, gg, &mut drawing) {
                Ok(()) => {
                    let score = drawing.score();
                    let better = best.as_ref().is_none_or(|b| score < b.score());
                    debug!(
                        "attempt {attempt}: score {score:.3}{}",
                        if better { " (best so far)" } else { "" }
                    );
                    drawing.erase_from_grid(gg);
                    if better {
                        best = Some(drawing);
                    }
                }
                Err(_) => {
                    debug!("attempt {attempt}: no embedding with this ordering");
                    drawing.erase_from_grid(gg);
                }
            }
        }

        let mut drawing = match best {
            Some(d) => d,
            None if self.ctx.expired() => return Err(EmbedError::Timeout.into()),
            None => return Err(EmbedError::NoEmbeddingFound.into()),
        };
        drawing.apply_to_grid(gg);

        // local search: move one node at a time to one of its nine
        // neighboring cells and re-route its edges
        for iter in 0..LOC_SEARCH_ITERS {
            if self.ctx.expired() {
                break;
            }
            let best_from_iter = self.local_search_sweep(&drawing, cg, gg);
            let imp = drawing.score() - best_from_iter.score();
            info!(
                "local search iter {iter}: {:.3} -> {:.3} ({}{:.3})",
                drawing.score(),
                best_from_iter.score(),
                if imp >= 0.0 { "+" } else { "" },
                imp
            );
            if imp < LOC_SEARCH_MIN_IMP {
                break;
            }
            drawing.erase_from_grid(gg);
            best_from_iter.apply_to_grid(gg);
            drawing = best_from_iter;
        }

        Ok(drawing)
    }
}

#[derive(Debug, PartialEq, Eq)]
struct NodePri {
    deg: usize,
    node: CombNodeIx,
}

impl PartialOrd for NodePri {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodePri {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // highest degree first, lowest index on ties
        self.deg
            .cmp(&other.deg)
            .then_with(|| other.node.cmp(&self.node))
    }
}
