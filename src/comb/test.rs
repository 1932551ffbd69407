use geo::Point;

use crate::comb::CombGraph;
use crate::graph::{Line, LineEdgePl, LineGraph, LineNodePl, LineOcc, Stop};

fn station(g: &mut LineGraph, x: f64, y: f64, id: &str) -> crate::graph::LineNodeIx {
    let mut pl = LineNodePl::at(Point::new(x, y));
    pl.stops.push(Stop {
        id: id.into(),
        label: id.into(),
        geom: Point::new(x, y),
    });
    g.add_node(pl)
}

fn plain(g: &mut LineGraph, x: f64, y: f64) -> crate::graph::LineNodeIx {
    g.add_node(LineNodePl::at(Point::new(x, y)))
}

#[test]
fn chains_contract_to_single_comb_edges() {
    let mut g = LineGraph::new();
    let a = station(&mut g, 0.0, 0.0, "A");
    let m1 = plain(&mut g, 10.0, 0.0);
    let m2 = plain(&mut g, 20.0, 0.0);
    let b = station(&mut g, 30.0, 0.0, "B");
    let l = g.add_line(Line::new("u1"));
    for (f, t) in [(a, m1), (m1, m2), (m2, b)] {
        let mut pl = LineEdgePl::straight(g.node(f).geom, g.node(t).geom);
        pl.add_line(LineOcc::new(l));
        g.add_edge(f, t, pl);
    }

    let cg = CombGraph::new(&g, false);

    assert_eq!(cg.num_nds(), 2);
    assert_eq!(cg.num_edgs(), 1);
    let ce = cg.edges().next().expect("one comb edge");
    assert_eq!(cg.edge(ce).chain.len(), 3);
    assert_eq!(cg.edge(ce).via.len(), 2);
    assert_eq!(cg.edge(ce).lines, vec![l]);
    assert_eq!(cg.edge(ce).geom.0.len(), 4);
}

#[test]
fn line_breaks_keep_degree_two_nodes() {
    let mut g = LineGraph::new();
    let a = station(&mut g, 0.0, 0.0, "A");
    let m = plain(&mut g, 10.0, 0.0);
    let b = station(&mut g, 20.0, 0.0, "B");
    let l1 = g.add_line(Line::new("u1"));
    let l2 = g.add_line(Line::new("u2"));

    let mut pl = LineEdgePl::straight(g.node(a).geom, g.node(m).geom);
    pl.add_line(LineOcc::new(l1));
    g.add_edge(a, m, pl);
    // the second leg carries a different line: m is a decision node
    let mut pl = LineEdgePl::straight(g.node(m).geom, g.node(b).geom);
    pl.add_line(LineOcc::new(l2));
    g.add_edge(m, b, pl);

    let cg = CombGraph::new(&g, false);

    assert_eq!(cg.num_nds(), 3);
    assert_eq!(cg.num_edgs(), 2);
}

#[test]
fn ordering_matches_geography() {
    let mut g = LineGraph::new();
    let c = station(&mut g, 0.0, 0.0, "C");
    let l = g.add_line(Line::new("u1"));
    let mut spokes = Vec::new();
    for (x, y) in [(10.0, 0.0), (0.0, 10.0), (-10.0, 0.0), (0.0, -10.0)] {
        let n = station(&mut g, x, y, "S");
        let mut pl = LineEdgePl::straight(g.node(c).geom, g.node(n).geom);
        pl.add_line(LineOcc::new(l));
        spokes.push(g.add_edge(c, n, pl));
    }

    let cg = CombGraph::new(&g, false);
    let hub = cg
        .nodes()
        .find(|&n| cg.deg(n) == 4)
        .expect("hub comb node");

    let ordering = &cg.node(hub).ordering;
    assert_eq!(ordering.len(), 4);
    // counterclockwise: angles ascending from -pi (south, east, north, west)
    let angles: Vec<f64> = ordering
        .iter()
        .map(|&ce| {
            let pl = cg.edge(ce);
            let (fr, _) = cg.endpoints(ce);
            let c0 = if fr == hub {
                pl.geom.0[0]
            } else {
                *pl.geom.0.last().expect("nonempty")
            };
            let c1 = if fr == hub {
                pl.geom.0[1]
            } else {
                pl.geom.0[pl.geom.0.len() - 2]
            };
            (c1.y - c0.y).atan2(c1.x - c0.x)
        })
        .collect();
    for w in angles.windows(2) {
        assert!(w[0] < w[1], "ordering not counterclockwise: {angles:?}");
    }
}

#[test]
fn deg2_heuristic_keeps_sharp_corners() {
    let mut g = LineGraph::new();
    let a = station(&mut g, 0.0, 0.0, "A");
    let corner = plain(&mut g, 10.0, 0.0);
    let b = station(&mut g, 10.0, 10.0, "B");
    let l = g.add_line(Line::new("u1"));
    for (f, t) in [(a, corner), (corner, b)] {
        let mut pl = LineEdgePl::straight(g.node(f).geom, g.node(t).geom);
        pl.add_line(LineOcc::new(l));
        g.add_edge(f, t, pl);
    }

    let without = CombGraph::new(&g, false);
    assert_eq!(without.num_nds(), 2);

    let with = CombGraph::new(&g, true);
    assert_eq!(with.num_nds(), 3, "the right-angle corner must survive");
}

#[test]
fn petals_promote_a_chain_node() {
    // a branch node with a loop of plain nodes hanging off it
    let mut g = LineGraph::new();
    let hub = station(&mut g, 0.0, 0.0, "H");
    let tail = station(&mut g, -10.0, 0.0, "T");
    let x = plain(&mut g, 10.0, 5.0);
    let y = plain(&mut g, 10.0, -5.0);
    let l = g.add_line(Line::new("u1"));
    for (f, t) in [(hub, tail), (hub, x), (x, y), (y, hub)] {
        let mut pl = LineEdgePl::straight(g.node(f).geom, g.node(t).geom);
        pl.add_line(LineOcc::new(l));
        g.add_edge(f, t, pl);
    }

    let cg = CombGraph::new(&g, false);

    for e in cg.edges() {
        let (a, b) = cg.endpoints(e);
        assert_ne!(a, b, "no self-loop comb edges");
    }
    // hub, tail, and the promoted loop node
    assert_eq!(cg.num_nds(), 3);
    assert_eq!(cg.num_edgs(), 3);
}

#[test]
fn pure_rings_are_anchored() {
    let mut g = LineGraph::new();
    let l = g.add_line(Line::new("u1"));
    let nds: Vec<_> = (0..4)
        .map(|i| {
            let ang = i as f64 * std::f64::consts::FRAC_PI_2;
            plain(&mut g, ang.cos() * 10.0, ang.sin() * 10.0)
        })
        .collect();
    for i in 0..4 {
        let (f, t) = (nds[i], nds[(i + 1) % 4]);
        let mut pl = LineEdgePl::straight(g.node(f).geom, g.node(t).geom);
        pl.add_line(LineOcc::new(l));
        g.add_edge(f, t, pl);
    }

    let cg = CombGraph::new(&g, false);

    // two anchors, two parallel comb edges, no self-loops
    assert_eq!(cg.num_nds(), 2);
    assert_eq!(cg.num_edgs(), 2);
    for e in cg.edges() {
        let (a, b) = cg.endpoints(e);
        assert_ne!(a, b);
    }
}
