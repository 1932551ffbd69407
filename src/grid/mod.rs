//! The octilinear search space: a lattice of *sink* nodes (candidate
//! station positions), each owning eight *port* nodes wired to the
//! neighboring sinks. Routings run sink → port → grid edge → port → sink;
//! bend edges inside a cell price direction changes, sink edges gate
//! entering and leaving a station.

pub mod cost;
pub mod dijkstra;
pub mod penalties;


#[doc(inline)]
pub use cost::{fold_steps, NodeCost};
#[doc(inline)]
pub use dijkstra::{shortest_path, PathResult};
#[doc(inline)]
pub use penalties::Penalties;

use geo::{Coord, Intersects, Line, Point, Polygon, Rect};
use log::debug;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use rstar::{primitives::GeomWithData, RTree};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::comb::{CombEdgeIx, CombNodeIx};

/// Cost added per circular-order violation a port choice would introduce.
pub const TOPO_BLOCK_PEN: f64 = 500.0;

/// Cell offsets per direction, 0 = east, counterclockwise.
pub const DIRS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

pub const NUM_DIRS: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridNodeIx(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridEdgeIx(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridEdgeKind {
    /// Port → opposite port of the neighbor in direction `dir`. The only
    /// kind that covers ground.
    Primary { dir: u8 },
    /// Port → port within one cell, priced by the implied turn.
    Bend,
    /// Sink → port: leaving a station in direction `dir`.
    SinkOut { dir: u8 },
    /// Port → sink: entering a station from direction `dir`.
    SinkIn { dir: u8 },
}

impl GridEdgeKind {
    pub fn is_primary(&self) -> bool {
        matches!(self, GridEdgeKind::Primary { .. })
    }

    pub fn is_secondary(&self) -> bool {
        !self.is_primary()
    }
}

#[derive(Debug, Clone)]
pub struct GridNode {
    pub x: u32,
    pub y: u32,
    /// `None` for the sink itself, `Some(dir)` for its ports.
    pub port: Option<u8>,
    pub pos: Point<f64>,
    out: SmallVec<[GridEdgeIx; 9]>,
}

#[derive(Debug, Clone)]
pub struct GridEdge {
    from: GridNodeIx,
    to: GridNodeIx,
    kind: GridEdgeKind,
    base_cost: f64,
    cost: f64,
    closed: bool,
    obstacle: bool,
    used_by: Option<CombEdgeIx>,
    twin: GridEdgeIx,
}

impl GridEdge {
    pub fn from_nd(&self) -> GridNodeIx {
        self.from
    }

    pub fn to_nd(&self) -> GridNodeIx {
        self.to
    }

    pub fn kind(&self) -> GridEdgeKind {
        self.kind
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn base_cost(&self) -> f64 {
        self.base_cost
    }

    pub fn used_by(&self) -> Option<CombEdgeIx> {
        self.used_by
    }

    pub fn twin(&self) -> GridEdgeIx {
        self.twin
    }

    /// Whether a routing may traverse this edge right now.
    pub fn usable(&self) -> bool {
        !self.closed && !self.obstacle && self.used_by.is_none() && self.cost.is_finite()
    }
}

/// The grid graph. Mutable cost state makes it the single shared resource
/// of a run: every routed comb edge changes what later routings see.
#[derive(Debug, Clone)]
pub struct GridGraph {
    nodes: Vec<GridNode>,
    edges: Vec<GridEdge>,
    cols: u32,
    rows: u32,
    cell_size: f64,
    origin: Coord<f64>,
    pens: Penalties,
    min_hop_cost: f64,
    settled_nd: FxHashMap<GridNodeIx, CombNodeIx>,
    settled_comb: FxHashMap<CombNodeIx, GridNodeIx>,
    pass_through: FxHashMap<GridNodeIx, CombEdgeIx>,
    sink_index: RTree<GeomWithData<[f64; 2], u32>>,
}

impl GridGraph {
    /// Lays out the lattice over `bbox` (already padded by the caller) at
    /// stride `cell_size`.
    pub fn new(bbox: Rect<f64>, cell_size: f64, pens: Penalties) -> Self {
        assert!(cell_size > 0.0, "grid cell size must be positive");
        let cols = (bbox.width() / cell_size).ceil() as u32 + 1;
        let rows = (bbox.height() / cell_size).ceil() as u32 + 1;
        let origin = bbox.min();

        let num_cells = (cols as usize) * (rows as usize);
        let mut nodes = Vec::with_capacity(num_cells * 9);
        for y in 0..rows {
            for x in 0..cols {
                let pos = Point::new(
                    origin.x + x as f64 * cell_size,
                    origin.y + y as f64 * cell_size,
                );
                nodes.push(GridNode {
                    x,
                    y,
                    port: None,
                    pos,
                    out: SmallVec::new(),
                });
                for p in 0..NUM_DIRS {
                    nodes.push(GridNode {
                        x,
                        y,
                        port: Some(p),
                        pos,
                        out: SmallVec::new(),
                    });
                }
            }
        }

        let mut gg = GridGraph {
            nodes,
            edges: Vec::new(),
            cols,
            rows,
            cell_size,
            origin,
            pens,
            min_hop_cost: (0..NUM_DIRS).map(|d| OrderedFloat(pens.dir_cost(d))).min().map(|c| c.0).unwrap_or(0.0),
            settled_nd: FxHashMap::default(),
            settled_comb: FxHashMap::default(),
            pass_through: FxHashMap::default(),
            sink_index: RTree::new(),
        };

        for y in 0..rows {
            for x in 0..cols {
                gg.wire_cell(x, y);
            }
        }

        let sinks: Vec<GeomWithData<[f64; 2], u32>> = (0..cols * rows)
            .map(|c| {
                let p = gg.nodes[gg.sink_ix_of_cell(c).0 as usize].pos;
                GeomWithData::new([p.x(), p.y()], c)
            })
            .collect();
        gg.sink_index = RTree::bulk_load(sinks);

        debug!(
            "grid graph with {}x{} cells, {} nodes, {} directed edges",
            cols,
            rows,
            gg.nodes.len(),
            gg.edges.len()
        );
        gg
    }

    fn wire_cell(&mut self, x: u32, y: u32) {
        let cell = y * self.cols + x;
        let sink = self.sink_ix_of_cell(cell);

        // sink edges, closed (infinite) until a sink is opened as candidate
        for p in 0..NUM_DIRS {
            let port = self.port_ix_of_cell(cell, p);
            let out = self.push_edge(sink, port, GridEdgeKind::SinkOut { dir: p }, f64::INFINITY);
            let inn = self.push_edge(port, sink, GridEdgeKind::SinkIn { dir: p }, f64::INFINITY);
            self.twin_up(out, inn);
        }

        // bend edges between every port pair, priced by the implied turn
        for i in 0..NUM_DIRS {
            for j in i + 1..NUM_DIRS {
                let heading_in = (i + 4) % 8;
                let c = self.pens.turn_cost(fold_steps(heading_in, j));
                let pi = self.port_ix_of_cell(cell, i);
                let pj = self.port_ix_of_cell(cell, j);
                let fwd = self.push_edge(pi, pj, GridEdgeKind::Bend, c);
                let bwd = self.push_edge(pj, pi, GridEdgeKind::Bend, c);
                self.twin_up(fwd, bwd);
            }
        }

        // primary edges to the four already-reachable directions; the
        // remaining four are each created by the respective neighbor
        for dir in 0..4u8 {
            let Some(ncell) = self.neighbor_cell(x, y, dir) else {
                continue;
            };
            let c = self.pens.dir_cost(dir);
            let fr = self.port_ix_of_cell(cell, dir);
            let to = self.port_ix_of_cell(ncell, (dir + 4) % 8);
            let fwd = self.push_edge(fr, to, GridEdgeKind::Primary { dir }, c);
            let bwd = self.push_edge(to, fr, GridEdgeKind::Primary { dir: (dir + 4) % 8 }, c);
            self.twin_up(fwd, bwd);
        }
    }

    fn push_edge(&mut self, from: GridNodeIx, to: GridNodeIx, kind: GridEdgeKind, cost: f64) -> GridEdgeIx {
        let ix = GridEdgeIx(self.edges.len() as u32);
        self.edges.push(GridEdge {
            from,
            to,
            kind,
            base_cost: cost,
            cost,
            closed: false,
            obstacle: false,
            used_by: None,
            twin: ix,
        });
        self.nodes[from.0 as usize].out.push(ix);
        ix
    }

    fn twin_up(&mut self, a: GridEdgeIx, b: GridEdgeIx) {
        self.edges[a.0 as usize].twin = b;
        self.edges[b.0 as usize].twin = a;
    }

    // ---- addressing --------------------------------------------------

    fn sink_ix_of_cell(&self, cell: u32) -> GridNodeIx {
        GridNodeIx(cell * 9)
    }

    fn port_ix_of_cell(&self, cell: u32, p: u8) -> GridNodeIx {
        GridNodeIx(cell * 9 + 1 + p as u32)
    }

    fn neighbor_cell(&self, x: u32, y: u32, dir: u8) -> Option<u32> {
        let (dx, dy) = DIRS[dir as usize];
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        if nx < 0 || ny < 0 || nx >= self.cols as i64 || ny >= self.rows as i64 {
            return None;
        }
        Some(ny as u32 * self.cols + nx as u32)
    }

    /// The sink at cell coordinates `(x, y)`, if inside the lattice.
    pub fn sink_at(&self, x: i64, y: i64) -> Option<GridNodeIx> {
        if x < 0 || y < 0 || x >= self.cols as i64 || y >= self.rows as i64 {
            return None;
        }
        Some(self.sink_ix_of_cell(y as u32 * self.cols + x as u32))
    }

    pub fn node(&self, n: GridNodeIx) -> &GridNode {
        &self.nodes[n.0 as usize]
    }

    pub fn edge(&self, e: GridEdgeIx) -> &GridEdge {
        &self.edges[e.0 as usize]
    }

    pub fn is_sink(&self, n: GridNodeIx) -> bool {
        self.node(n).port.is_none()
    }

    /// The sink owning `n` (identity for sinks).
    pub fn parent_sink(&self, n: GridNodeIx) -> GridNodeIx {
        GridNodeIx(n.0 / 9 * 9)
    }

    pub fn port_of(&self, sink: GridNodeIx, dir: u8) -> GridNodeIx {
        debug_assert!(self.is_sink(sink));
        GridNodeIx(sink.0 + 1 + dir as u32)
    }

    pub fn out_edges(&self, n: GridNodeIx) -> &[GridEdgeIx] {
        &self.nodes[n.0 as usize].out
    }

    pub fn sinks(&self) -> impl Iterator<Item = GridNodeIx> + '_ {
        (0..self.cols * self.rows).map(|c| self.sink_ix_of_cell(c))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_indices(&self) -> impl Iterator<Item = GridEdgeIx> {
        (0..self.edges.len() as u32).map(GridEdgeIx)
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn pens(&self) -> &Penalties {
        &self.pens
    }

    pub fn min_hop_cost(&self) -> f64 {
        self.min_hop_cost
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.cols, self.rows)
    }

    /// Maximum routable degree of a grid node: one routing per port.
    pub fn max_node_deg(&self) -> usize {
        NUM_DIRS as usize
    }

    // ---- sink state --------------------------------------------------

    /// Opens all sixteen directed sink edges of `n` at cost `extra`.
    pub fn open_node_sink(&mut self, n: GridNodeIx, extra: f64) {
        for p in 0..NUM_DIRS {
            let (out, inn) = self.sink_edge_pair(n, p);
            self.edges[out.0 as usize].cost = extra;
            self.edges[inn.0 as usize].cost = extra;
        }
    }

    /// Closes all sink edges of `n` again (infinite cost).
    pub fn close_node_sink(&mut self, n: GridNodeIx) {
        for p in 0..NUM_DIRS {
            let (out, inn) = self.sink_edge_pair(n, p);
            self.edges[out.0 as usize].cost = f64::INFINITY;
            self.edges[inn.0 as usize].cost = f64::INFINITY;
        }
    }

    /// Opens only the leaving (sink → port) edges.
    pub fn open_node_sink_fr(&mut self, n: GridNodeIx, extra: f64) {
        for p in 0..NUM_DIRS {
            let (out, _) = self.sink_edge_pair(n, p);
            self.edges[out.0 as usize].cost = extra;
        }
    }

    /// Opens only the entering (port → sink) edges.
    pub fn open_node_sink_to(&mut self, n: GridNodeIx, extra: f64) {
        for p in 0..NUM_DIRS {
            let (_, inn) = self.sink_edge_pair(n, p);
            self.edges[inn.0 as usize].cost = extra;
        }
    }

    pub fn close_node_sink_fr(&mut self, n: GridNodeIx) {
        for p in 0..NUM_DIRS {
            let (out, _) = self.sink_edge_pair(n, p);
            self.edges[out.0 as usize].cost = f64::INFINITY;
        }
    }

    pub fn close_node_sink_to(&mut self, n: GridNodeIx) {
        for p in 0..NUM_DIRS {
            let (_, inn) = self.sink_edge_pair(n, p);
            self.edges[inn.0 as usize].cost = f64::INFINITY;
        }
    }

    /// Reopens the bend edges of `n` (used by the ILP reset).
    pub fn open_node_turns(&mut self, n: GridNodeIx) {
        for e in self.bend_edges_of(n) {
            self.edges[e.0 as usize].closed = false;
        }
    }

    /// The (sink→port, port→sink) edge pair of `n` in direction `p`.
    pub fn sink_edge_pair(&self, n: GridNodeIx, p: u8) -> (GridEdgeIx, GridEdgeIx) {
        debug_assert!(self.is_sink(n));
        let port = self.port_of(n, p);
        let mut out_e = None;
        for &e in self.out_edges(n) {
            if self.edges[e.0 as usize].to == port {
                out_e = Some(e);
                break;
            }
        }
        let out_e = out_e.expect("sink edge exists");
        (out_e, self.edges[out_e.0 as usize].twin)
    }

    /// All directed bend edges inside the cell of `sink`.
    pub fn bend_edges_of(&self, sink: GridNodeIx) -> Vec<GridEdgeIx> {
        let mut out = Vec::with_capacity(56);
        for p in 0..NUM_DIRS {
            let port = self.port_of(sink, p);
            for &e in self.out_edges(port) {
                if self.edges[e.0 as usize].kind == GridEdgeKind::Bend {
                    out.push(e);
                }
            }
        }
        out
    }

    // ---- settling ----------------------------------------------------

    /// Marks `gn` as the station position of `cn` and closes it against
    /// pass-through routings.
    pub fn settle_nd(&mut self, gn: GridNodeIx, cn: CombNodeIx) {
        debug_assert!(self.is_sink(gn));
        debug_assert!(!self.settled_nd.contains_key(&gn), "sink settled twice");
        self.settled_nd.insert(gn, cn);
        self.settled_comb.insert(cn, gn);
        for e in self.bend_edges_of(gn) {
            self.edges[e.0 as usize].closed = true;
        }
    }

    pub fn un_settle_nd(&mut self, cn: CombNodeIx) {
        let Some(gn) = self.settled_comb.remove(&cn) else {
            return;
        };
        self.settled_nd.remove(&gn);
        for e in self.bend_edges_of(gn) {
            self.edges[e.0 as usize].closed = false;
        }
    }

    pub fn settled(&self, cn: CombNodeIx) -> Option<GridNodeIx> {
        self.settled_comb.get(&cn).copied()
    }

    pub fn settled_comb_of(&self, gn: GridNodeIx) -> Option<CombNodeIx> {
        self.settled_nd.get(&gn).copied()
    }

    pub fn is_settled(&self, cn: CombNodeIx) -> bool {
        self.settled_comb.contains_key(&cn)
    }

    /// Closes `sink` as a pass-through of `ce`: no other routing may cross
    /// it and it stops being a station candidate.
    pub fn close_pass_through(&mut self, sink: GridNodeIx, ce: CombEdgeIx) {
        if self.pass_through.insert(sink, ce).is_none() {
            for e in self.bend_edges_of(sink) {
                self.edges[e.0 as usize].closed = true;
            }
        }
    }

    pub fn open_pass_through(&mut self, sink: GridNodeIx) {
        if self.pass_through.remove(&sink).is_some() {
            for e in self.bend_edges_of(sink) {
                self.edges[e.0 as usize].closed = false;
            }
        }
    }

    pub fn pass_through_of(&self, sink: GridNodeIx) -> Option<CombEdgeIx> {
        self.pass_through.get(&sink).copied()
    }

    /// Marks the primary edge between the adjacent sinks `a` and `b` as
    /// used by `ce`, blocks its antiparallel twin and the crossing diagonal,
    /// and pushes the density penalty onto the parallel neighbors.
    pub fn settle_edg(&mut self, a: GridNodeIx, b: GridNodeIx, ce: CombEdgeIx) {
        let dir = self.dir_between(a, b).expect("adjacent sinks");
        let e = self.primary_between(a, b).expect("primary edge");
        let twin = self.edges[e.0 as usize].twin;
        self.edges[e.0 as usize].used_by = Some(ce);
        self.edges[twin.0 as usize].used_by = Some(ce);

        self.set_crossing_closed(a, dir, true);
        self.shift_parallel_density(a, dir, self.pens.density_pen);
    }

    /// Inverse of [`GridGraph::settle_edg`].
    pub fn un_settle_edg(&mut self, a: GridNodeIx, b: GridNodeIx) {
        let dir = self.dir_between(a, b).expect("adjacent sinks");
        let e = self.primary_between(a, b).expect("primary edge");
        let twin = self.edges[e.0 as usize].twin;
        self.edges[e.0 as usize].used_by = None;
        self.edges[twin.0 as usize].used_by = None;

        self.set_crossing_closed(a, dir, false);
        self.shift_parallel_density(a, dir, -self.pens.density_pen);
    }

    /// Diagonals through the same cell exclude one another.
    fn set_crossing_closed(&mut self, a: GridNodeIx, dir: u8, closed: bool) {
        if dir % 2 == 0 {
            return;
        }
        let (ax, ay) = (self.node(a).x, self.node(a).y);
        let na = self.neighbor_cell(ax, ay, (dir + 7) % 8);
        let nb = self.neighbor_cell(ax, ay, (dir + 1) % 8);
        if let (Some(na), Some(nb)) = (na, nb) {
            let sa = self.sink_ix_of_cell(na);
            let sb = self.sink_ix_of_cell(nb);
            if let Some(x) = self.primary_between(sa, sb) {
                let twin = self.edges[x.0 as usize].twin;
                self.edges[x.0 as usize].closed = closed;
                self.edges[twin.0 as usize].closed = closed;
            }
        }
    }

    fn shift_parallel_density(&mut self, a: GridNodeIx, dir: u8, delta: f64) {
        let (ax, ay) = (self.node(a).x, self.node(a).y);
        for perp in [(dir + 2) % 8, (dir + 6) % 8] {
            let Some(ncell) = self.neighbor_cell(ax, ay, perp) else {
                continue;
            };
            let sa = self.sink_ix_of_cell(ncell);
            let Some(sb) = self
                .neighbor_cell(self.node(sa).x, self.node(sa).y, dir)
                .map(|c| self.sink_ix_of_cell(c))
            else {
                continue;
            };
            if let Some(e) = self.primary_between(sa, sb) {
                let twin = self.edges[e.0 as usize].twin;
                self.edges[e.0 as usize].cost += delta;
                self.edges[twin.0 as usize].cost += delta;
            }
        }
    }

    /// Direction from sink `a` to the adjacent sink `b`.
    pub fn dir_between(&self, a: GridNodeIx, b: GridNodeIx) -> Option<u8> {
        let (ax, ay) = (self.node(a).x as i64, self.node(a).y as i64);
        let (bx, by) = (self.node(b).x as i64, self.node(b).y as i64);
        DIRS.iter()
            .position(|&(dx, dy)| (ax + dx, ay + dy) == (bx, by))
            .map(|d| d as u8)
    }

    /// The directed primary edge from sink `a` toward the adjacent sink `b`.
    pub fn primary_between(&self, a: GridNodeIx, b: GridNodeIx) -> Option<GridEdgeIx> {
        let dir = self.dir_between(a, b)?;
        let fr_port = self.port_of(a, dir);
        let to_port = self.port_of(b, (dir + 4) % 8);
        self.out_edges(fr_port)
            .iter()
            .copied()
            .find(|&e| self.edges[e.0 as usize].to == to_port && self.edges[e.0 as usize].kind.is_primary())
    }

    // ---- cost vectors ------------------------------------------------

    /// Adds `c` onto the directed sink edges of `n`, returning the undo
    /// token to remove it after the shortest-path run.
    pub fn add_cost_vector(&mut self, n: GridNodeIx, c: NodeCost) -> CostVectorUndo {
        for p in 0..NUM_DIRS {
            let (out, inn) = self.sink_edge_pair(n, p);
            self.edges[out.0 as usize].cost += c[p];
            self.edges[inn.0 as usize].cost += c[p];
        }
        CostVectorUndo { node: n, added: c }
    }

    pub fn remove_cost_vector(&mut self, undo: CostVectorUndo) {
        for p in 0..NUM_DIRS {
            let (out, inn) = self.sink_edge_pair(undo.node, p);
            self.edges[out.0 as usize].cost -= undo.added[p];
            self.edges[inn.0 as usize].cost -= undo.added[p];
        }
    }

    /// Directions of already-routed comb edges incident to the sink `n`,
    /// read off the used primary edges at its ports.
    pub fn settled_dirs_at(&self, n: GridNodeIx) -> Vec<(CombEdgeIx, u8)> {
        let mut out = Vec::new();
        for p in 0..NUM_DIRS {
            let port = self.port_of(n, p);
            for &e in self.out_edges(port) {
                let edge = &self.edges[e.0 as usize];
                if edge.kind.is_primary() {
                    if let Some(ce) = edge.used_by {
                        out.push((ce, p));
                    }
                }
            }
        }
        out
    }

    /// Per-direction penalty for routing `e` out of `n` in a way that
    /// violates the circular ordering of the already-settled incident comb
    /// edges. `ordering` is the full circular ordering of the comb node
    /// settled at `n`.
    pub fn topo_block_penalty(&self, n: GridNodeIx, ordering: &[CombEdgeIx], e: CombEdgeIx) -> NodeCost {
        let mut c = NodeCost::zero();
        let settled: Vec<(CombEdgeIx, u8)> = self
            .settled_dirs_at(n)
            .into_iter()
            .filter(|(f, _)| *f != e && ordering.contains(f))
            .collect();
        if settled.is_empty() {
            return c;
        }
        let pos = |f: CombEdgeIx| ordering.iter().position(|&x| x == f).unwrap_or(usize::MAX);
        let e_pos = pos(e);

        for d in 0..NUM_DIRS {
            if settled.iter().any(|&(_, sd)| sd == d) {
                continue;
            }
            let mut seq: Vec<(usize, u8)> = settled.iter().map(|&(f, sd)| (pos(f), sd)).collect();
            seq.push((e_pos, d));
            seq.sort();
            let wraps = seq
                .iter()
                .zip(seq.iter().cycle().skip(1))
                .filter(|((_, a), (_, b))| b < a)
                .count();
            c[d] = wraps.saturating_sub(1) as f64 * TOPO_BLOCK_PEN;
        }
        c
    }

    /// Per-direction turn penalty of routing `e` out of `n` against the
    /// already-settled incident edges sharing a line with it.
    pub fn node_bend_penalty<F>(&self, n: GridNodeIx, e: CombEdgeIx, shares_line: F) -> NodeCost
    where
        F: Fn(CombEdgeIx) -> bool,
    {
        let mut c = NodeCost::zero();
        for (f, df) in self.settled_dirs_at(n) {
            if f == e || !shares_line(f) {
                continue;
            }
            for d in 0..NUM_DIRS {
                c[d] += self.pens.turn_cost(4 - fold_steps(d, df));
            }
        }
        c
    }

    // ---- candidate lookup --------------------------------------------

    /// The closest open, unsettled sink within `radius` of `p`.
    pub fn grid_node_from(&self, p: Point<f64>, radius: f64, forbid: Option<GridNodeIx>) -> Option<GridNodeIx> {
        self.grid_nodes_to(p, radius, forbid).into_iter().next()
    }

    /// All open, unsettled sinks within `radius` of `p`, closest first
    /// (ties by cell index).
    pub fn grid_nodes_to(&self, p: Point<f64>, radius: f64, forbid: Option<GridNodeIx>) -> Vec<GridNodeIx> {
        let mut cands: Vec<(OrderedFloat<f64>, u32)> = self
            .sink_index
            .locate_within_distance([p.x(), p.y()], radius * radius)
            .map(|g| {
                let [x, y] = *g.geom();
                let d2 = (x - p.x()).powi(2) + (y - p.y()).powi(2);
                (OrderedFloat(d2), g.data)
            })
            .collect();
        cands.sort();
        cands
            .into_iter()
            .map(|(_, c)| self.sink_ix_of_cell(c))
            .filter(|&s| {
                Some(s) != forbid
                    && !self.settled_nd.contains_key(&s)
                    && !self.pass_through.contains_key(&s)
            })
            .collect()
    }

    /// All sinks within `radius` of `p` regardless of settle state,
    /// closest first. The ILP candidate sets are purely geometric.
    pub fn sinks_within(&self, p: Point<f64>, radius: f64) -> Vec<GridNodeIx> {
        let mut cands: Vec<(OrderedFloat<f64>, u32)> = self
            .sink_index
            .locate_within_distance([p.x(), p.y()], radius * radius)
            .map(|g| {
                let [x, y] = *g.geom();
                let d2 = (x - p.x()).powi(2) + (y - p.y()).powi(2);
                (OrderedFloat(d2), g.data)
            })
            .collect();
        cands.sort();
        cands.into_iter().map(|(_, c)| self.sink_ix_of_cell(c)).collect()
    }

    /// Displacement cost of placing a comb node (at geographic position
    /// `p`) on the sink `n`: increasing in the euclidean distance, in units
    /// of grid cells.
    pub fn nd_move_pen(&self, p: Point<f64>, n: GridNodeIx) -> f64 {
        let sp = self.node(n).pos;
        let dist = ((sp.x() - p.x()).powi(2) + (sp.y() - p.y()).powi(2)).sqrt();
        dist.floor() / self.cell_size * self.pens.move_pen_per_grid()
    }

    // ---- obstacles ---------------------------------------------------

    /// Blocks every primary edge whose segment intersects one of the
    /// obstacle polygons. The sweep is read-only and runs in parallel; the
    /// result is applied sequentially.
    pub fn block_obstacles(&mut self, obstacles: &[Polygon<f64>]) {
        if obstacles.is_empty() {
            return;
        }
        let blocked: Vec<u32> = (0..self.edges.len() as u32)
            .into_par_iter()
            .filter(|&i| {
                let e = &self.edges[i as usize];
                if !e.kind.is_primary() {
                    return false;
                }
                let seg = Line::new(
                    self.nodes[e.from.0 as usize].pos.0,
                    self.nodes[e.to.0 as usize].pos.0,
                );
                obstacles.iter().any(|o| o.intersects(&seg))
            })
            .collect();
        debug!("{} primary grid edges blocked by obstacles", blocked.len());
        for i in blocked {
            self.edges[i as usize].obstacle = true;
        }
    }

    // ---- lifecycle ---------------------------------------------------

    /// Restores the pristine cost map: every edge back at its base cost,
    /// nothing settled, nothing used. Obstacle blockings survive.
    pub fn reset(&mut self) {
        for e in &mut self.edges {
            e.cost = e.base_cost;
            e.closed = false;
            e.used_by = None;
        }
        self.settled_nd.clear();
        self.settled_comb.clear();
        self.pass_through.clear();
    }
}

/// Token for removing a previously added [`NodeCost`] overlay.
#[derive(Debug, Clone, Copy)]
pub struct CostVectorUndo {
    node: GridNodeIx,
    added: NodeCost,
}
