use geo::Point;

use crate::graph::{Direction, Line, LineEdgePl, LineGraph, LineNodePl, LineOcc};

fn node(g: &mut LineGraph, x: f64, y: f64) -> crate::graph::LineNodeIx {
    g.add_node(LineNodePl::at(Point::new(x, y)))
}

#[test]
fn edge_ordering_is_counterclockwise() {
    let mut g = LineGraph::new();
    let c = node(&mut g, 0.0, 0.0);
    let e = node(&mut g, 10.0, 0.0);
    let n = node(&mut g, 0.0, 10.0);
    let w = node(&mut g, -10.0, 0.0);
    let s = node(&mut g, 0.0, -10.0);

    let to_e = g.add_edge(c, e, LineEdgePl::straight(g.node(c).geom, g.node(e).geom));
    let to_n = g.add_edge(c, n, LineEdgePl::straight(g.node(c).geom, g.node(n).geom));
    let to_w = g.add_edge(c, w, LineEdgePl::straight(g.node(c).geom, g.node(w).geom));
    let to_s = g.add_edge(c, s, LineEdgePl::straight(g.node(c).geom, g.node(s).geom));

    // ascending angle from -pi: south, east, north, west
    assert_eq!(g.edge_ordering(c), vec![to_s, to_e, to_n, to_w]);
}

#[test]
fn line_continuity_respects_directions_and_exceptions() {
    let mut g = LineGraph::new();
    let a = node(&mut g, -10.0, 0.0);
    let m = node(&mut g, 0.0, 0.0);
    let b = node(&mut g, 10.0, 0.0);
    let l1 = g.add_line(Line::new("u1"));
    let l2 = g.add_line(Line::new("u2"));

    let mut pl_am = LineEdgePl::straight(g.node(a).geom, g.node(m).geom);
    pl_am.add_line(LineOcc::directed(l1, m)); // one-way toward m
    pl_am.add_line(LineOcc::new(l2));
    let e_am = g.add_edge(a, m, pl_am);

    let mut pl_mb = LineEdgePl::straight(g.node(m).geom, g.node(b).geom);
    pl_mb.add_line(LineOcc::directed(l1, b)); // continues toward b
    pl_mb.add_line(LineOcc::new(l2));
    let e_mb = g.add_edge(m, b, pl_mb);

    assert!(g.line_continues(l1, m, e_am, e_mb));
    assert!(g.line_continues(l2, m, e_am, e_mb));

    // flip the second occurrence against the flow
    g.edge_mut(e_mb).lines[0].direction = Direction::Toward(m);
    assert!(!g.line_continues(l1, m, e_am, e_mb));

    // exceptions cut the undirected line too
    g.node_mut(m).exclude_conn(l2, e_am, e_mb);
    assert!(!g.line_continues(l2, m, e_am, e_mb));
}

#[test]
fn contract_edges_merges_short_segments() {
    let mut g = LineGraph::new();
    let a = node(&mut g, 0.0, 0.0);
    let m1 = node(&mut g, 10.0, 0.0);
    let m2 = node(&mut g, 10.5, 0.0);
    let b = node(&mut g, 20.0, 0.0);
    g.node_mut(m1).stops.push(crate::graph::Stop {
        id: "s".into(),
        label: "Mid".into(),
        geom: Point::new(10.0, 0.0),
    });
    let l = g.add_line(Line::new("u1"));
    for (f, t) in [(a, m1), (m1, m2), (m2, b)] {
        let mut pl = LineEdgePl::straight(g.node(f).geom, g.node(t).geom);
        pl.add_line(LineOcc::new(l));
        g.add_edge(f, t, pl);
    }

    g.contract_edges(2.0);

    // the 0.5-long middle edge is gone, the stop-free node merged into the
    // station node
    assert_eq!(g.num_nds(), 3);
    assert_eq!(g.num_edgs(), 2);
    let station = g
        .nodes()
        .find(|&n| !g.node(n).stops.is_empty())
        .expect("station survives");
    assert_eq!(g.deg(station), 2);
}

#[test]
fn contract_edges_keeps_protected_edges() {
    let mut g = LineGraph::new();
    let a = node(&mut g, 0.0, 0.0);
    let m = node(&mut g, 1.0, 0.0);
    let b = node(&mut g, 2.0, 0.0);
    g.add_edge(a, m, LineEdgePl::straight(g.node(a).geom, g.node(m).geom));
    let mut pl = LineEdgePl::straight(g.node(m).geom, g.node(b).geom);
    pl.dont_contract = true;
    g.add_edge(m, b, pl);

    g.contract_edges(10.0);

    // the protected edge stays; its neighbor cannot contract either since
    // both remaining endpoints are degree-1
    assert_eq!(g.num_edgs(), 2);
}

#[test]
fn split_nodes_caps_degree() {
    let mut g = LineGraph::new();
    let c = node(&mut g, 0.0, 0.0);
    let l = g.add_line(Line::new("u1"));
    for i in 0..10 {
        let ang = i as f64 * std::f64::consts::TAU / 10.0;
        let n = node(&mut g, ang.cos() * 100.0, ang.sin() * 100.0);
        let mut pl = LineEdgePl::straight(g.node(c).geom, g.node(n).geom);
        pl.add_line(LineOcc::new(l));
        g.add_edge(c, n, pl);
    }

    g.split_nodes(8).expect("splittable");

    assert!(g.max_deg() <= 8);
    // every leaf is still reachable from the (former) hub
    assert_eq!(g.num_edgs(), 11);
    let connector = g
        .edges()
        .find(|&e| g.edge(e).dont_contract)
        .expect("connector edge");
    assert!(g.edge(connector).has_line(l));
}

#[test]
fn split_nodes_rejects_tiny_max_degree() {
    let mut g = LineGraph::new();
    let a = node(&mut g, 0.0, 0.0);
    let b = node(&mut g, 1.0, 0.0);
    g.add_edge(a, b, LineEdgePl::straight(g.node(a).geom, g.node(b).geom));
    assert!(g.split_nodes(2).is_err());
}

#[test]
fn topologize_isects_inserts_crossing_node() {
    let mut g = LineGraph::new();
    let a = node(&mut g, -10.0, -10.0);
    let b = node(&mut g, 10.0, 10.0);
    let c = node(&mut g, -10.0, 10.0);
    let d = node(&mut g, 10.0, -10.0);
    let l1 = g.add_line(Line::new("u1"));
    let l2 = g.add_line(Line::new("u2"));
    let mut pl = LineEdgePl::straight(g.node(a).geom, g.node(b).geom);
    pl.add_line(LineOcc::new(l1));
    g.add_edge(a, b, pl);
    let mut pl = LineEdgePl::straight(g.node(c).geom, g.node(d).geom);
    pl.add_line(LineOcc::new(l2));
    g.add_edge(c, d, pl);

    g.topologize_isects();

    assert_eq!(g.num_nds(), 5);
    assert_eq!(g.num_edgs(), 4);
    let center = g
        .nodes()
        .find(|&n| g.deg(n) == 4)
        .expect("crossing node of degree 4");
    let p = g.node(center).geom;
    assert!(p.x().abs() < 1e-9 && p.y().abs() < 1e-9);
}

#[test]
fn merge_nds_moves_to_midpoint_and_folds_parallels() {
    let mut g = LineGraph::new();
    let a = node(&mut g, 0.0, 0.0);
    let b = node(&mut g, 2.0, 0.0);
    let c = node(&mut g, 4.0, 0.0);
    let l1 = g.add_line(Line::new("u1"));
    let l2 = g.add_line(Line::new("u2"));

    let mut pl = LineEdgePl::straight(g.node(a).geom, g.node(b).geom);
    pl.add_line(LineOcc::new(l1));
    g.add_edge(a, b, pl);
    let mut pl = LineEdgePl::straight(g.node(a).geom, g.node(c).geom);
    pl.add_line(LineOcc::new(l1));
    g.add_edge(a, c, pl);
    let mut pl = LineEdgePl::straight(g.node(b).geom, g.node(c).geom);
    pl.add_line(LineOcc::new(l2));
    g.add_edge(b, c, pl);

    g.merge_nds(a, b);

    assert_eq!(g.num_nds(), 2);
    // a-b collapsed, a-c and (former) b-c folded into one parallel edge
    assert_eq!(g.num_edgs(), 1);
    let e = g.edges().next().expect("folded edge");
    assert!(g.edge(e).has_line(l1) && g.edge(e).has_line(l2));
    assert_eq!(g.node(a).geom, Point::new(1.0, 0.0));
}
