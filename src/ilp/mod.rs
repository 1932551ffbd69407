//! The exact embedder: a mixed-integer program over the grid whose optimal
//! assignment *is* the drawing. Binary variables pick station sinks and the
//! directed grid edges every comb edge routes over; linear constraints
//! enforce flow, uniqueness, planarity and the circular orderings. The
//! heuristic drawing warm-starts the solver.

pub mod model;
pub mod mps;
pub mod solve;

#[cfg(test)]
mod test;

#[doc(inline)]
pub use model::{LpModel, RowSense, VarKind};
#[doc(inline)]
pub use solve::{SolStatus, SolverError, TempFiles};

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;

use geo::{EuclideanDistance, Point};
use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::comb::{CombEdgeIx, CombGraph, CombNodeIx};
use crate::drawing::Drawing;
use crate::embed::{EmbedError, Embedder, EmbedderContext, HeuristicEmbedder};
use crate::grid::{GridEdgeIx, GridEdgeKind, GridGraph, GridNodeIx, NUM_DIRS};
use crate::ilp::model::VarIx;

/// Big-M of the circular-order constraint: one full turn of port steps.
const ORDER_M: f64 = 8.0;

#[derive(Debug, Clone)]
pub struct IlpOptions {
    /// External solver binary; `gurobi*` gets the gurobi_cl surface,
    /// anything else the cbc one.
    pub solver: Option<PathBuf>,
    /// Emit the MPS (and MST) only, skip solving.
    pub no_solve: bool,
    pub time_limit: Option<u64>,
    /// Base path of the persisted `.mps` / `.mst` / `.sol` files.
    pub path: PathBuf,
}

impl Default for IlpOptions {
    fn default() -> Self {
        IlpOptions {
            solver: None,
            no_solve: false,
            time_limit: None,
            path: std::env::temp_dir().join(format!("octograph-{}", std::process::id())),
        }
    }
}

pub struct IlpEmbedder<'a> {
    ctx: &'a EmbedderContext,
    opts: IlpOptions,
}

/// The heuristic state captured before the grid is reset for the ILP.
struct WarmStart {
    settled: FxHashMap<CombNodeIx, GridNodeIx>,
    /// Directed grid edges per comb edge, oriented from the comb `from`.
    used: FxHashMap<CombEdgeIx, Vec<GridEdgeIx>>,
}

/// Station candidate sinks per comb node, plus their union.
struct Candidates {
    of: FxHashMap<CombNodeIx, Vec<GridNodeIx>>,
    sets: FxHashMap<CombNodeIx, FxHashSet<GridNodeIx>>,
    union: FxHashSet<GridNodeIx>,
}

impl<'a> IlpEmbedder<'a> {
    pub fn new(ctx: &'a EmbedderContext, opts: IlpOptions) -> Self {
        IlpEmbedder { ctx, opts }
    }

    fn candidates(&self, cg: &CombGraph, gg: &GridGraph) -> Candidates {
        let radius = self.ctx.max_grid_dist * gg.cell_size();
        let mut of = FxHashMap::default();
        let mut sets: FxHashMap<CombNodeIx, FxHashSet<GridNodeIx>> = FxHashMap::default();
        let mut union = FxHashSet::default();
        for cn in cg.nodes() {
            if cg.deg(cn) == 0 {
                continue;
            }
            let sinks = gg.sinks_within(cg.node(cn).geom, radius);
            union.extend(sinks.iter().copied());
            sets.insert(cn, sinks.iter().copied().collect());
            of.insert(cn, sinks);
        }
        Candidates { of, sets, union }
    }

    /// The modeled cost of the directed edge `e` for routing `ce`, or
    /// `None` when the edge takes no part in that routing.
    fn y_cost(
        &self,
        gg: &GridGraph,
        cg: &CombGraph,
        cands: &Candidates,
        ce: CombEdgeIx,
        e: GridEdgeIx,
    ) -> Option<f64> {
        let edge = gg.edge(e);
        let (fr_cn, to_cn) = cg.endpoints(ce);
        match edge.kind() {
            GridEdgeKind::Primary { .. } => {
                if !edge.usable() {
                    return None;
                }
                let mut c = edge.base_cost();
                if self.ctx.enforce_geo_pen > 0.0 {
                    let a = gg.node(edge.from_nd()).pos;
                    let b = gg.node(edge.to_nd()).pos;
                    let mid = Point::new((a.x() + b.x()) / 2.0, (a.y() + b.y()) / 2.0);
                    c += self.ctx.enforce_geo_pen * mid.euclidean_distance(&cg.edge(ce).geom)
                        / gg.cell_size();
                }
                Some(c)
            }
            GridEdgeKind::Bend => Some(edge.base_cost()),
            GridEdgeKind::SinkOut { .. } => {
                let s = gg.parent_sink(edge.from_nd());
                cands.sets.get(&fr_cn)?.contains(&s).then_some(0.0)
            }
            GridEdgeKind::SinkIn { .. } => {
                let s = gg.parent_sink(edge.to_nd());
                cands.sets.get(&to_cn)?.contains(&s).then_some(0.0)
            }
        }
    }

    /// Builds the full MIP. Returns the model plus the variable maps the
    /// warm start and the extraction re-use.
    #[allow(clippy::type_complexity)]
    fn build_model(
        &self,
        cg: &CombGraph,
        gg: &GridGraph,
        cands: &Candidates,
    ) -> (
        LpModel,
        FxHashMap<(GridNodeIx, CombNodeIx), VarIx>,
        FxHashMap<(GridEdgeIx, CombEdgeIx), VarIx>,
    ) {
        let mut lp = LpModel::new("griddrawing");
        let mut x_vars: FxHashMap<(GridNodeIx, CombNodeIx), VarIx> = FxHashMap::default();
        let mut y_vars: FxHashMap<(GridEdgeIx, CombEdgeIx), VarIx> = FxHashMap::default();

        let mut cns: Vec<CombNodeIx> = cg.nodes().filter(|&n| cg.deg(n) > 0).collect();
        cns.sort();
        let mut ces: Vec<CombEdgeIx> = cg.edges().collect();
        ces.sort();

        // assignment: every comb node sits on exactly one candidate sink
        for &cn in &cns {
            let row = lp.add_row(format!("oneass_{}", cn.index()), RowSense::Eq(1.0));
            for &s in &cands.of[&cn] {
                let var = lp.add_var(
                    format!("x_{}_{}", s.0, cn.index()),
                    VarKind::Binary,
                    gg.nd_move_pen(cg.node(cn).geom, s),
                );
                x_vars.insert((s, cn), var);
                lp.add_coeff(row, var, 1.0);
            }
        }

        // edge use variables
        for &ce in &ces {
            for e in gg.edge_indices() {
                if let Some(cost) = self.y_cost(gg, cg, cands, ce, e) {
                    let var = lp.add_var(
                        format!("e_{}_{}", e.0, ce.index()),
                        VarKind::Binary,
                        cost,
                    );
                    y_vars.insert((e, ce), var);
                }
            }
        }

        // a primary grid edge carries at most one comb edge, in one direction
        for e in gg.edge_indices() {
            let edge = gg.edge(e);
            if !edge.kind().is_primary() || edge.twin() < e {
                continue;
            }
            let row = lp.add_row(format!("uniq_{}", e.0), RowSense::Le(1.0));
            for &ce in &ces {
                if let Some(&v) = y_vars.get(&(e, ce)) {
                    lp.add_coeff(row, v, 1.0);
                }
                if let Some(&v) = y_vars.get(&(edge.twin(), ce)) {
                    lp.add_coeff(row, v, 1.0);
                }
            }
        }

        // flow: incoming and outgoing uses balance at every node; the
        // endpoints act as source and sink through their assignment vars.
        // an outgoing edge at a sink counts twice, so a sink can only pay
        // for it by being the (subtracted twice) start station
        for n in (0..gg.num_nodes() as u32).map(GridNodeIx) {
            let is_sink = gg.is_sink(n);
            if is_sink && !cands.union.contains(&n) {
                continue;
            }
            for &ce in &ces {
                let (fr_cn, to_cn) = cg.endpoints(ce);
                let row = lp.add_row(
                    format!("adjsum_{}_{}", n.0, ce.index()),
                    RowSense::Le(0.0),
                );
                let out_cost = if is_sink { 2.0 } else { 1.0 };
                if is_sink {
                    if let Some(&x) = x_vars.get(&(n, fr_cn)) {
                        lp.add_coeff(row, x, -2.0);
                    }
                    if let Some(&x) = x_vars.get(&(n, to_cn)) {
                        lp.add_coeff(row, x, 1.0);
                    }
                }
                for &e in gg.out_edges(n) {
                    if let Some(&v) = y_vars.get(&(e, ce)) {
                        lp.add_coeff(row, v, out_cost);
                    }
                    let inn = gg.edge(e).twin();
                    if let Some(&v) = y_vars.get(&(inn, ce)) {
                        lp.add_coeff(row, v, -1.0);
                    }
                }
            }
        }

        // redundant but accelerating: per (sink, comb edge) the sink edges
        // activate exactly with the assignment
        for &s in sorted(&cands.union) {
            for &ce in &ces {
                let (fr_cn, to_cn) = cg.endpoints(ce);
                let row = lp.add_row(
                    format!("singlesink_{}_{}", s.0, ce.index()),
                    RowSense::Eq(0.0),
                );
                if let Some(&x) = x_vars.get(&(s, fr_cn)) {
                    lp.add_coeff(row, x, -1.0);
                }
                if let Some(&x) = x_vars.get(&(s, to_cn)) {
                    lp.add_coeff(row, x, -1.0);
                }
                for p in 0..NUM_DIRS {
                    let (out, inn) = gg.sink_edge_pair(s, p);
                    for e in [out, inn] {
                        if let Some(&v) = y_vars.get(&(e, ce)) {
                            lp.add_coeff(row, v, 1.0);
                        }
                    }
                }
            }
        }

        // a sink is a station for one comb node, or one pass-through, or
        // unused
        for s in gg.sinks() {
            let row = lp.add_row(format!("inneruse_{}", s.0), RowSense::Le(1.0));
            for &cn in &cns {
                if let Some(&x) = x_vars.get(&(s, cn)) {
                    lp.add_coeff(row, x, 1.0);
                }
            }
            for e in gg.bend_edges_of(s) {
                for &ce in &ces {
                    if let Some(&v) = y_vars.get(&(e, ce)) {
                        lp.add_coeff(row, v, 1.0);
                    }
                }
            }
        }

        // crossing diagonals of one cell square exclude each other
        for s in gg.sinks() {
            let nd = gg.node(s);
            let (x, y) = (nd.x as i64, nd.y as i64);
            let (Some(ne), Some(east), Some(north)) =
                (gg.sink_at(x + 1, y + 1), gg.sink_at(x + 1, y), gg.sink_at(x, y + 1))
            else {
                continue;
            };
            let diag = [
                gg.primary_between(s, ne),
                gg.primary_between(ne, s),
                gg.primary_between(east, north),
                gg.primary_between(north, east),
            ];
            if diag.iter().any(|d| d.is_none()) {
                continue;
            }
            let row = lp.add_row(format!("nocross_{}", s.0), RowSense::Le(1.0));
            for e in diag.into_iter().flatten() {
                for &ce in &ces {
                    if let Some(&v) = y_vars.get(&(e, ce)) {
                        lp.add_coeff(row, v, 1.0);
                    }
                }
            }
        }

        // the port direction every comb edge takes at its endpoints
        let mut d_vars: FxHashMap<(CombNodeIx, CombEdgeIx), VarIx> = FxHashMap::default();
        for &cn in &cns {
            if cg.deg(cn) < 2 {
                continue;
            }
            for ce in cg.incident(cn) {
                let var = lp.add_var(
                    format!("d_{}_{}", cn.index(), ce.index()),
                    VarKind::Integer { lo: 0, hi: 7 },
                    0.0,
                );
                d_vars.insert((cn, ce), var);

                let row = lp.add_row(
                    format!("dirconst_{}_{}", cn.index(), ce.index()),
                    RowSense::Eq(0.0),
                );
                lp.add_coeff(row, var, -1.0);
                let leaving = cg.endpoints(ce).0 == cn;
                for &s in &cands.of[&cn] {
                    // port 0 contributes nothing and is skipped
                    for p in 1..NUM_DIRS {
                        let (out, inn) = gg.sink_edge_pair(s, p);
                        let e = if leaving { out } else { inn };
                        if let Some(&v) = y_vars.get(&(e, ce)) {
                            lp.add_coeff(row, v, p as f64);
                        }
                    }
                }
            }
        }

        // the circular ordering of the drawing must match the input; one
        // wrap of the cyclic sequence is allowed
        for &cn in &cns {
            if cg.deg(cn) < 3 {
                continue;
            }
            let ordering = &cg.node(cn).ordering;
            let vuln_row = lp.add_row(format!("vulnconst_{}", cn.index()), RowSense::Eq(1.0));
            let mut vulns = Vec::with_capacity(ordering.len());
            for i in 0..ordering.len() {
                let v = lp.add_var(
                    format!("vuln_{}_{}", cn.index(), i),
                    VarKind::Binary,
                    0.0,
                );
                lp.add_coeff(vuln_row, v, 1.0);
                vulns.push(v);
            }
            for i in 0..ordering.len() {
                let prev = if i == 0 {
                    ordering[ordering.len() - 1]
                } else {
                    ordering[i - 1]
                };
                let cur = ordering[i];
                let row = lp.add_row(
                    format!("orderconst_{}_{}", cn.index(), i),
                    RowSense::Ge(1.0),
                );
                lp.add_coeff(row, d_vars[&(cn, cur)], 1.0);
                lp.add_coeff(row, d_vars[&(cn, prev)], -1.0);
                lp.add_coeff(row, vulns[i], ORDER_M);
            }
        }

        // angle indicators per incident pair sharing a line; their
        // objective coefficients price the angles at stations
        for &cn in &cns {
            let inc = cg.incident(cn);
            for (i, &ea) in inc.iter().enumerate() {
                for &eb in &inc[i + 1..] {
                    if !cg.shares_line(ea, eb) {
                        continue;
                    }
                    let (Some(&da), Some(&db)) = (d_vars.get(&(cn, ea)), d_vars.get(&(cn, eb)))
                    else {
                        continue;
                    };
                    let tag = format!("{}_{}_{}", cn.index(), ea.index(), eb.index());
                    let neg = lp.add_var(format!("neg_{tag}"), VarKind::Binary, 0.0);

                    // 0 <= d_a - d_b + 8*neg <= 7
                    let lo = lp.add_row(format!("neglo_{tag}"), RowSense::Ge(0.0));
                    lp.add_coeff(lo, da, 1.0);
                    lp.add_coeff(lo, db, -1.0);
                    lp.add_coeff(lo, neg, ORDER_M);
                    let hi = lp.add_row(format!("neghi_{tag}"), RowSense::Le(7.0));
                    lp.add_coeff(hi, da, 1.0);
                    lp.add_coeff(hi, db, -1.0);
                    lp.add_coeff(hi, neg, ORDER_M);

                    // d_a - d_b + 8*neg - sum k*ind_k = 0, at most one ind
                    let ang = lp.add_row(format!("angconst_{tag}"), RowSense::Eq(0.0));
                    lp.add_coeff(ang, da, 1.0);
                    lp.add_coeff(ang, db, -1.0);
                    lp.add_coeff(ang, neg, ORDER_M);
                    let sum = lp.add_row(format!("angsum_{tag}"), RowSense::Le(1.0));
                    for k in 1..8u8 {
                        let ind = lp.add_var(
                            format!("ang{}_{tag}", k as u16 * 45),
                            VarKind::Binary,
                            gg.pens().node_angle_cost(k),
                        );
                        lp.add_coeff(ang, ind, -(k as f64));
                        lp.add_coeff(sum, ind, 1.0);
                    }
                }
            }
        }

        debug!(
            "ILP model: {} columns, {} rows",
            lp.num_vars(),
            lp.num_rows()
        );
        (lp, x_vars, y_vars)
    }

    /// Writes the warm-start MST: the heuristic drawing as a (partial)
    /// variable assignment, restricted to variables the model knows.
    fn write_warm_start(
        &self,
        lp: &LpModel,
        cg: &CombGraph,
        gg: &GridGraph,
        cands: &Candidates,
        warm: &WarmStart,
        path: &std::path::Path,
    ) -> std::io::Result<()> {
        let mut out = Vec::new();

        let mut used_edges: FxHashSet<(GridEdgeIx, CombEdgeIx)> = FxHashSet::default();
        for (&ce, edges) in &warm.used {
            for &e in edges {
                used_edges.insert((e, ce));
            }
        }

        let mut put = |name: String, val: u8, out: &mut Vec<u8>| {
            if lp.var_by_name(&name).is_some() {
                let _ = writeln!(out, "{name}\t{val}");
            }
        };

        let mut cns: Vec<CombNodeIx> = cg.nodes().filter(|&n| cg.deg(n) > 0).collect();
        cns.sort();
        for &cn in &cns {
            let settled = warm.settled.get(&cn);
            for &s in &cands.of[&cn] {
                let name = format!("x_{}_{}", s.0, cn.index());
                if Some(&s) == settled {
                    put(name, 1, &mut out);
                    // a settled sink is no pass-through: its bend edges idle
                    for e in gg.bend_edges_of(s) {
                        for ce in cg.incident(cn) {
                            if !used_edges.contains(&(e, ce)) {
                                put(format!("e_{}_{}", e.0, ce.index()), 0, &mut out);
                            }
                        }
                    }
                } else {
                    put(name, 0, &mut out);
                    // unsettled candidates use no sink edges
                    for p in 0..NUM_DIRS {
                        let (o, i) = gg.sink_edge_pair(s, p);
                        for ce in cg.incident(cn) {
                            for e in [o, i] {
                                if !used_edges.contains(&(e, ce)) {
                                    put(format!("e_{}_{}", e.0, ce.index()), 0, &mut out);
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut ces: Vec<CombEdgeIx> = cg.edges().collect();
        ces.sort();
        for e in gg.edge_indices() {
            for &ce in &ces {
                let name = format!("e_{}_{}", e.0, ce.index());
                if used_edges.contains(&(e, ce)) {
                    put(name, 1, &mut out);
                } else if gg.edge(e).kind().is_primary() {
                    put(name, 0, &mut out);
                }
            }
        }

        fs::write(path, out)
    }

    /// Reads the drawing out of a solved variable assignment.
    fn extract(
        &self,
        values: &FxHashMap<String, f64>,
        cg: &CombGraph,
        gg: &mut GridGraph,
        x_vars: &FxHashMap<(GridNodeIx, CombNodeIx), VarIx>,
        y_vars: &FxHashMap<(GridEdgeIx, CombEdgeIx), VarIx>,
        lp: &LpModel,
    ) -> Result<Drawing, EmbedError> {
        let val = |v: VarIx| values.get(&lp.var(v).name).copied().unwrap_or(0.0);

        let mut drawing = Drawing::new();
        let mut settled: FxHashMap<CombNodeIx, GridNodeIx> = FxHashMap::default();
        for (&(s, cn), &v) in x_vars {
            if val(v) > 0.5 {
                settled.insert(cn, s);
            }
        }

        let mut used: FxHashMap<CombEdgeIx, FxHashMap<GridNodeIx, GridEdgeIx>> =
            FxHashMap::default();
        for (&(e, ce), &v) in y_vars {
            if val(v) > 0.5 {
                used.entry(ce).or_default().insert(gg.edge(e).from_nd(), e);
            }
        }

        let mut extra_mv = 0.0;
        let mut ces: Vec<CombEdgeIx> = cg.edges().collect();
        ces.sort();
        for ce in ces {
            let (fr_cn, to_cn) = cg.endpoints(ce);
            let (Some(&fr), Some(&to)) = (settled.get(&fr_cn), settled.get(&to_cn)) else {
                warn!("solution leaves comb edge {} unplaced", ce.index());
                return Err(EmbedError::NoEmbeddingFound);
            };
            let by_from = used.remove(&ce).unwrap_or_default();

            // the flow constraints guarantee a simple directed walk
            let mut edges = Vec::new();
            let mut cur = fr;
            let max_steps = by_from.len() + 1;
            for _ in 0..max_steps {
                if cur == to && !edges.is_empty() {
                    break;
                }
                let Some(&e) = by_from.get(&cur) else { break };
                edges.push(e);
                cur = gg.edge(e).to_nd();
            }
            if cur != to || edges.is_empty() {
                warn!("could not reassemble the path of comb edge {}", ce.index());
                return Err(EmbedError::NoEmbeddingFound);
            }

            // record costs against the pristine grid
            gg.open_node_sink(fr, 0.0);
            gg.open_node_sink(to, 0.0);
            drawing.draw(ce, edges, false, gg);
            gg.close_node_sink(fr);
            gg.close_node_sink(to);
        }

        for (&cn, &s) in &settled {
            drawing.settle(cn, s);
            extra_mv += gg.nd_move_pen(cg.node(cn).geom, s);
            gg.settle_nd(s, cn);
        }
        let mut drawn: Vec<CombEdgeIx> = cg.edges().filter(|&ce| drawing.drawn(ce)).collect();
        drawn.sort();
        for ce in drawn {
            drawing.apply_edge_to_grid(ce, gg);
        }
        drawing.set_extra_move_cost(extra_mv);
        Ok(drawing)
    }
}

impl Embedder for IlpEmbedder<'_> {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    fn embed(&self, cg: &CombGraph, gg: &mut GridGraph) -> crate::Result<Drawing> {
        // warm start from the heuristic; a failure only loses the warm start
        let warm_drawing = match HeuristicEmbedder::new(self.ctx).embed(cg, gg) {
            Ok(d) => Some(d),
            Err(err) => {
                warn!("heuristic warm start failed: {err}");
                None
            }
        };
        let warm = warm_drawing.as_ref().map(|d| WarmStart {
            settled: d.nodes().collect(),
            used: d
                .edges()
                .map(|(ce, path)| {
                    let edges = if path.reversed {
                        path.edges.iter().rev().map(|&e| gg.edge(e).twin()).collect()
                    } else {
                        path.edges.clone()
                    };
                    (ce, edges)
                })
                .collect(),
        });

        gg.reset();

        let cands = self.candidates(cg, gg);
        let (lp, x_vars, y_vars) = self.build_model(cg, gg, &cands);

        let mut files = TempFiles::at(&self.opts.path);
        let io_err = |path: &std::path::Path| {
            let path = path.to_path_buf();
            move |source| SolverError::Io { path, source }
        };
        {
            let mut buf = Vec::new();
            mps::write_mps(&lp, &mut buf).map_err(io_err(&files.mps))?;
            fs::write(&files.mps, buf).map_err(io_err(&files.mps))?;
        }
        if let Some(w) = &warm {
            self.write_warm_start(&lp, cg, gg, &cands, w, &files.mst)
                .map_err(io_err(&files.mst))?;
        }

        if self.opts.no_solve {
            files.keep = true;
            info!("wrote {} (--ilp-no-solve)", files.mps.display());
            return match warm_drawing {
                Some(d) => {
                    d.apply_to_grid(gg);
                    Ok(d)
                }
                None => Err(EmbedError::NoEmbeddingFound.into()),
            };
        }

        let solver = self
            .opts
            .solver
            .as_deref()
            .ok_or(SolverError::NotConfigured)?;
        solve::run_solver(
            solver,
            &files.mps,
            warm.as_ref().map(|_| files.mst.as_path()),
            &files.sol,
            self.opts.time_limit,
        )?;

        match solve::parse_solution(&files.sol)? {
            SolStatus::Infeasible => Err(EmbedError::NoEmbeddingFound.into()),
            SolStatus::Solved(values) => {
                let drawing = self.extract(&values, cg, gg, &x_vars, &y_vars, &lp)?;
                info!("ILP drawing extracted, score {:.3}", drawing.score());
                Ok(drawing)
            }
        }
    }
}

fn sorted(set: &FxHashSet<GridNodeIx>) -> impl Iterator<Item = &GridNodeIx> {
    let mut v: Vec<&GridNodeIx> = set.iter().collect();
    v.sort();
    v.into_iter()
}
