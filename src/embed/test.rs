use std::time::Instant;

use geo::{Coord, Point, Polygon, Rect};
use rustc_hash::FxHashSet;

use crate::comb::CombGraph;
use crate::drawing::Drawing;
use crate::embed::{Embedder, EmbedderContext, HeuristicEmbedder};
use crate::graph::{Line, LineEdgePl, LineGraph, LineNodeIx, LineNodePl, LineOcc, Stop};
use crate::grid::{GridGraph, Penalties};

fn station(g: &mut LineGraph, x: f64, y: f64, id: &str) -> LineNodeIx {
    let mut pl = LineNodePl::at(Point::new(x, y));
    pl.stops.push(Stop {
        id: id.into(),
        label: id.into(),
        geom: Point::new(x, y),
    });
    g.add_node(pl)
}

fn link(g: &mut LineGraph, a: LineNodeIx, b: LineNodeIx, line: crate::graph::LineIx) {
    let mut pl = LineEdgePl::straight(g.node(a).geom, g.node(b).geom);
    pl.add_line(LineOcc::new(line));
    g.add_edge(a, b, pl);
}

fn pad(bbox: Rect<f64>, by: f64) -> Rect<f64> {
    Rect::new(
        Coord {
            x: bbox.min().x - by,
            y: bbox.min().y - by,
        },
        Coord {
            x: bbox.max().x + by,
            y: bbox.max().y + by,
        },
    )
}

fn embed(lg: &LineGraph, grid_size: f64, ctx: &mut EmbedderContext) -> (CombGraph, GridGraph, Drawing) {
    let cg = CombGraph::new(lg, false);
    let bbox = pad(lg.bbox(), grid_size + 1.0);
    let mut gg = GridGraph::new(bbox, grid_size, ctx.pens);
    gg.block_obstacles(&ctx.obstacles);
    let drawing = HeuristicEmbedder::new(ctx)
        .embed(&cg, &mut gg)
        .expect("embedding found");
    (cg, gg, drawing)
}

/// P2: no two comb edges share a primary grid edge, no two comb nodes a
/// sink.
fn assert_unique(drawing: &Drawing, gg: &GridGraph) {
    let mut seen_edges: FxHashSet<u32> = FxHashSet::default();
    for (_, path) in drawing.edges() {
        for &e in &path.edges {
            if gg.edge(e).kind().is_primary() {
                let canonical = e.min(gg.edge(e).twin());
                assert!(seen_edges.insert(canonical.0), "primary edge shared");
            }
        }
    }
    let mut seen_sinks: FxHashSet<u32> = FxHashSet::default();
    for (_, gn) in drawing.nodes() {
        assert!(seen_sinks.insert(gn.0), "sink settled for two comb nodes");
    }
}

/// P4: a path leaves through a sink edge, arrives through one, and crosses
/// every intermediate sink with exactly one bend edge.
fn assert_path_shape(drawing: &Drawing, gg: &GridGraph) {
    use crate::grid::GridEdgeKind;
    for (_, path) in drawing.edges() {
        let kinds: Vec<GridEdgeKind> = path.edges.iter().map(|&e| gg.edge(e).kind()).collect();
        assert!(matches!(kinds.first(), Some(GridEdgeKind::SinkOut { .. })));
        assert!(matches!(kinds.last(), Some(GridEdgeKind::SinkIn { .. })));
        let primaries = kinds.iter().filter(|k| k.is_primary()).count();
        let bends = kinds.iter().filter(|k| matches!(k, GridEdgeKind::Bend)).count();
        assert_eq!(bends, primaries - 1, "one bend per traversed sink");
    }
}

/// P1: every drawn segment runs along a compass direction.
fn assert_octilinear(drawing: &Drawing, cg: &CombGraph, gg: &GridGraph) {
    for ce in cg.edges() {
        let Some(ls) = drawing.polyline(ce, gg) else {
            panic!("comb edge not drawn");
        };
        for seg in ls.lines() {
            let ang = (seg.end.y - seg.start.y).atan2(seg.end.x - seg.start.x);
            let rem = (ang / std::f64::consts::FRAC_PI_4).fract();
            assert!(rem.abs() < 1e-9, "segment at angle {ang} not octilinear");
        }
    }
}

#[test]
fn triangle_embeds_without_violations() {
    let mut lg = LineGraph::new();
    let a = station(&mut lg, 0.0, 0.0, "A");
    let b = station(&mut lg, 10.0, 0.0, "B");
    let c = station(&mut lg, 5.0, 8.66, "C");
    let l = lg.add_line(Line::new("u1"));
    link(&mut lg, a, b, l);
    link(&mut lg, b, c, l);
    link(&mut lg, c, a, l);

    let mut ctx = EmbedderContext::new(5.0);
    let (cg, gg, drawing) = embed(&lg, 5.0, &mut ctx);

    assert_eq!(cg.num_edgs(), 3);
    for cn in cg.nodes() {
        assert!(drawing.gr_nd(cn).is_some(), "every station is placed");
    }
    assert_eq!(drawing.count_violations(&cg, &gg), 0);
    assert_unique(&drawing, &gg);
    assert_octilinear(&drawing, &cg, &gg);
    assert_path_shape(&drawing, &gg);
    assert!(drawing.score().is_finite());
}

#[test]
fn degree_eight_star_uses_one_hop_per_spoke() {
    let mut lg = LineGraph::new();
    let s = station(&mut lg, 0.0, 0.0, "S");
    let l = lg.add_line(Line::new("u1"));
    for i in 0..8 {
        let ang = i as f64 * std::f64::consts::FRAC_PI_4;
        let n = station(&mut lg, ang.cos(), ang.sin(), &format!("N{i}"));
        link(&mut lg, s, n, l);
    }

    let mut ctx = EmbedderContext::new(1.0);
    let (cg, gg, drawing) = embed(&lg, 1.0, &mut ctx);

    let primaries: usize = cg
        .edges()
        .map(|ce| {
            drawing
                .path(ce)
                .expect("drawn")
                .edges
                .iter()
                .filter(|&&e| gg.edge(e).kind().is_primary())
                .count()
        })
        .sum();
    assert_eq!(primaries, 8, "every spoke is a single grid hop");
    assert_eq!(drawing.count_violations(&cg, &gg), 0);
    assert_unique(&drawing, &gg);

    // the hub's neighbors sit on the eight surrounding sinks
    let hub = cg.nodes().find(|&n| cg.deg(n) == 8).expect("hub");
    let hub_nd = gg.node(drawing.gr_nd(hub).expect("placed"));
    for cn in cg.nodes() {
        if cn == hub {
            continue;
        }
        let nd = gg.node(drawing.gr_nd(cn).expect("placed"));
        let (dx, dy) = (
            nd.x as i64 - hub_nd.x as i64,
            nd.y as i64 - hub_nd.y as i64,
        );
        assert!(dx.abs() <= 1 && dy.abs() <= 1 && (dx, dy) != (0, 0));
    }
}

#[test]
fn conflicting_corridors_force_density_or_detour() {
    // A--B--C plus a direct A--C on a second line: the direct edge cannot
    // share the straight corridor already taken
    let mut lg = LineGraph::new();
    let a = station(&mut lg, 0.0, 0.0, "A");
    let b = station(&mut lg, 20.0, 0.0, "B");
    let c = station(&mut lg, 40.0, 0.0, "C");
    let l1 = lg.add_line(Line::new("u1"));
    let l2 = lg.add_line(Line::new("u2"));
    link(&mut lg, a, b, l1);
    link(&mut lg, b, c, l1);
    let mut pl = LineEdgePl::straight(lg.node(a).geom, lg.node(c).geom);
    pl.add_line(LineOcc::new(l2));
    lg.add_edge(a, c, pl);

    let mut ctx = EmbedderContext::new(10.0);
    let (cg, gg, drawing) = embed(&lg, 10.0, &mut ctx);

    assert_unique(&drawing, &gg);
    let sc = drawing.full_score(&cg, &gg);
    assert!(
        sc.bend > 0.0,
        "the direct edge must bend around the middle station: {sc:?}"
    );
    assert!(sc.density > 0.0, "the detour runs next to the taken corridor");
}

#[test]
fn obstacles_force_a_longer_route() {
    let mut lg = LineGraph::new();
    let a = station(&mut lg, 0.0, 0.0, "A");
    let b = station(&mut lg, 40.0, 0.0, "B");
    let l = lg.add_line(Line::new("u1"));
    link(&mut lg, a, b, l);

    let wall = Polygon::new(
        vec![
            (18.0, -15.0),
            (22.0, -15.0),
            (22.0, 5.0),
            (18.0, 5.0),
            (18.0, -15.0),
        ]
        .into(),
        vec![],
    );
    let mut ctx = EmbedderContext::new(10.0);
    ctx.obstacles = vec![wall.clone()];
    let (cg, gg, drawing) = embed(&lg, 10.0, &mut ctx);

    let ce = cg.edges().next().expect("edge");
    let primaries = drawing
        .path(ce)
        .expect("drawn")
        .edges
        .iter()
        .filter(|&&e| gg.edge(e).kind().is_primary())
        .count();
    assert!(primaries > 4, "the straight 4-hop corridor is walled off");

    use geo::Intersects;
    let ls = drawing.polyline(ce, &gg).expect("polyline");
    for seg in ls.lines() {
        assert!(!wall.intersects(&seg), "drawn segment crosses the obstacle");
    }
}

#[test]
fn same_seed_reproduces_the_drawing() {
    let mut build = || {
        let mut lg = LineGraph::new();
        let a = station(&mut lg, 0.0, 0.0, "A");
        let b = station(&mut lg, 17.0, 3.0, "B");
        let c = station(&mut lg, 9.0, 14.0, "C");
        let d = station(&mut lg, 25.0, 12.0, "D");
        let l1 = lg.add_line(Line::new("u1"));
        let l2 = lg.add_line(Line::new("u2"));
        link(&mut lg, a, b, l1);
        link(&mut lg, b, c, l1);
        link(&mut lg, b, d, l2);
        link(&mut lg, a, c, l2);
        lg
    };

    let run = |seed: u64| {
        let lg = build();
        let mut ctx = EmbedderContext::new(8.0);
        ctx.seed = seed;
        let (cg, gg, drawing) = embed(&lg, 8.0, &mut ctx);
        let mut nodes: Vec<(usize, u32)> = cg
            .nodes()
            .filter_map(|cn| drawing.gr_nd(cn).map(|g| (cn.index(), g.0)))
            .collect();
        nodes.sort();
        (drawing.score(), nodes)
    };

    assert_eq!(run(42), run(42));
}

#[test]
fn expired_deadline_times_out_without_a_drawing() {
    let mut lg = LineGraph::new();
    let a = station(&mut lg, 0.0, 0.0, "A");
    let b = station(&mut lg, 10.0, 0.0, "B");
    let l = lg.add_line(Line::new("u1"));
    link(&mut lg, a, b, l);

    let cg = CombGraph::new(&lg, false);
    let mut gg = GridGraph::new(pad(lg.bbox(), 6.0), 5.0, Penalties::default());
    let mut ctx = EmbedderContext::new(5.0);
    ctx.deadline = Some(Instant::now());

    let err = HeuristicEmbedder::new(&ctx)
        .embed(&cg, &mut gg)
        .expect_err("deadline already passed");
    assert!(matches!(
        err,
        crate::Error::Embed(crate::embed::EmbedError::Timeout)
    ));
}
