//! Structural transforms run before embedding: planarization of crossing
//! edges, contraction of short edges, splitting of high-degree nodes.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Coord, EuclideanDistance, EuclideanLength, Line, Point};
use log::{debug, warn};

use crate::graph::{Direction, LineEdgeIx, LineEdgePl, LineGraph, LineNodeIx, LineNodePl, LineOcc};
use crate::io::InputError;

impl LineGraph {
    /// Inserts a node at every proper crossing of two edge polylines and
    /// re-splits both edges there, so the graph becomes planar.
    ///
    /// Terminates because every inserted node removes one crossing and the
    /// fragments meeting at it can no longer cross each other.
    pub fn topologize_isects(&mut self) {
        let mut isects = 0usize;
        while let Some((ea, eb, pt)) = self.next_intersection() {
            let nd = self.add_node(LineNodePl::at(pt));
            self.split_edge_at(ea, nd, pt);
            self.split_edge_at(eb, nd, pt);
            isects += 1;
        }
        if isects > 0 {
            debug!("planarized {isects} edge crossings");
        }
    }

    /// First proper crossing between two non-adjacent edges, by edge index.
    fn next_intersection(&self) -> Option<(LineEdgeIx, LineEdgeIx, Point<f64>)> {
        let edges: Vec<LineEdgeIx> = self.edges().collect();
        for (i, &ea) in edges.iter().enumerate() {
            let (a1, a2) = self.endpoints(ea);
            for &eb in &edges[i + 1..] {
                let (b1, b2) = self.endpoints(eb);
                if a1 == b1 || a1 == b2 || a2 == b1 || a2 == b2 {
                    continue;
                }
                for sa in self.edge(ea).geom.lines() {
                    for sb in self.edge(eb).geom.lines() {
                        if let Some(LineIntersection::SinglePoint {
                            intersection,
                            is_proper: true,
                        }) = line_intersection(sa, sb)
                        {
                            return Some((ea, eb, Point(intersection)));
                        }
                    }
                }
            }
        }
        None
    }

    /// Splits `e` at `pt` into two fragments joined by `nd`. Both fragments
    /// are rewired the same way (the endpoints keep their exceptions, the
    /// line directions stay consistent with the flow).
    fn split_edge_at(&mut self, e: LineEdgeIx, nd: LineNodeIx, pt: Point<f64>) {
        let (a, b) = self.endpoints(e);
        let pl = self.g.remove_edge(e).expect("live edge");
        let (head, tail) = split_coords_at(&pl.geom.0, pt.0);

        let mut head_pl = LineEdgePl {
            geom: head.into(),
            lines: pl.lines.clone(),
            dont_contract: pl.dont_contract,
        };
        head_pl.replace_direction_node(b, nd);
        let mut tail_pl = LineEdgePl {
            geom: tail.into(),
            lines: pl.lines,
            dont_contract: pl.dont_contract,
        };
        tail_pl.replace_direction_node(a, nd);

        let head_e = self.g.add_edge(a, nd, head_pl);
        let tail_e = self.g.add_edge(nd, b, tail_pl);
        self.g[a].replace_edge_in_conns(e, head_e);
        self.g[b].replace_edge_in_conns(e, tail_e);
    }

    /// Merges away edges shorter than `threshold` whose endpoints both keep
    /// further neighbors and of which at most one carries stops.
    ///
    /// Runs as a `while changed` sweep; terminates because every applied
    /// contraction removes at least one edge.
    pub fn contract_edges(&mut self, threshold: f64) {
        let mut changed = true;
        while changed {
            changed = false;
            let edges: Vec<LineEdgeIx> = self.edges().collect();
            for e in edges {
                if self.g.edge_weight(e).is_none() {
                    continue;
                }
                let pl = self.edge(e);
                if pl.dont_contract || pl.geom.euclidean_length() >= threshold {
                    continue;
                }
                let (a, b) = self.endpoints(e);
                if self.deg(a) <= 1 || self.deg(b) <= 1 {
                    continue;
                }
                let a_station = !self.node(a).stops.is_empty();
                let b_station = !self.node(b).stops.is_empty();
                if a_station && b_station {
                    continue;
                }
                let (keep, gone) = if b_station { (b, a) } else { (a, b) };
                self.merge_nds(keep, gone);
                changed = true;
                break;
            }
        }
    }

    /// Splits every node of degree above `max_deg` by peeling a contiguous
    /// angular fan of incident edges onto a helper node, joined back by a
    /// connector edge carrying the union of the peeled lines.
    pub fn split_nodes(&mut self, max_deg: usize) -> Result<(), InputError> {
        if max_deg < 3 {
            return Err(InputError::UnsatisfiableDegree {
                deg: self.max_deg(),
                max: max_deg,
            });
        }

        let mut work: Vec<LineNodeIx> = self.nodes().collect();
        while let Some(n) = work.pop() {
            if self.g.node_weight(n).is_none() || self.deg(n) <= max_deg {
                continue;
            }
            debug!("splitting node {:?} of degree {}", n, self.deg(n));

            let ordering = self.edge_ordering(n);
            let peel: Vec<LineEdgeIx> = ordering[max_deg - 1..].to_vec();

            // place the helper a hair along the mean peel direction so the
            // connector keeps a well-defined angle at both endpoints
            let mean = {
                let (mut sx, mut sy) = (0.0f64, 0.0f64);
                for &e in &peel {
                    let ang = self.edge_angle_at(e, n);
                    sx += ang.cos();
                    sy += ang.sin();
                }
                sy.atan2(sx)
            };
            let base = self.node(n).geom;
            let helper_pos = Point::new(base.x() + mean.cos() * 1e-6, base.y() + mean.sin() * 1e-6);
            let helper = self.add_node(LineNodePl::at(helper_pos));

            let mut union: Vec<LineOcc> = Vec::new();
            for &e in &peel {
                let other = self.other_nd(e, n);
                let mut coords = self.geom_from(e, n);
                let mut pl = self.g.remove_edge(e).expect("live edge");
                pl.replace_direction_node(n, helper);

                for occ in &pl.lines {
                    let direction = match occ.direction {
                        Direction::Both => Direction::Both,
                        // flows toward the peeled side: continues to the old node
                        Direction::Toward(t) if t == helper => Direction::Toward(n),
                        // flows away from the old node: continues onto the helper
                        Direction::Toward(_) => Direction::Toward(helper),
                    };
                    let mut conn_occ = occ.clone();
                    conn_occ.direction = direction;
                    match union.iter_mut().find(|o| o.line == conn_occ.line) {
                        None => union.push(conn_occ),
                        Some(present) if present.direction != conn_occ.direction => {
                            present.direction = Direction::Both;
                        }
                        Some(_) => {}
                    }
                }

                coords[0] = helper_pos.0;
                pl.geom = coords.into();
                let new_e = self.g.add_edge(helper, other, pl);
                self.g[other].replace_edge_in_conns(e, new_e);
                if self.node(n).excluded_conns.iter().any(|(_, x, y)| *x == e || *y == e) {
                    warn!("dropping connection exceptions of split node {n:?} referencing a peeled edge");
                    self.g[n].purge_edge_from_conns(e);
                }
            }

            let connector_pl = LineEdgePl {
                geom: vec![base.0, helper_pos.0].into(),
                lines: union,
                dont_contract: true,
            };
            self.add_edge(n, helper, connector_pl);

            if self.deg(helper) > max_deg {
                work.push(helper);
            }
        }
        Ok(())
    }
}

/// Splits a coordinate chain at `pt`, which lies on (or next to) one of its
/// segments. Both halves contain `pt` as the shared endpoint.
fn split_coords_at(coords: &[Coord<f64>], pt: Coord<f64>) -> (Vec<Coord<f64>>, Vec<Coord<f64>>) {
    let p = Point(pt);
    let mut best = (0usize, f64::INFINITY);
    for i in 0..coords.len() - 1 {
        let seg = Line::new(coords[i], coords[i + 1]);
        let d = p.euclidean_distance(&seg);
        if d < best.1 {
            best = (i, d);
        }
    }
    let cut = best.0;
    let mut head: Vec<Coord<f64>> = coords[..=cut].to_vec();
    head.push(pt);
    let mut tail: Vec<Coord<f64>> = vec![pt];
    tail.extend_from_slice(&coords[cut + 1..]);
    (head, tail)
}
