use geo::{Coord, Point, Rect};
use rustc_hash::FxHashMap;

use crate::comb::CombGraph;
use crate::embed::{Embedder, EmbedderContext, HeuristicEmbedder};
use crate::graph::{Line, LineEdgePl, LineGraph, LineNodePl, LineOcc, Stop};
use crate::grid::{GridGraph, Penalties};
use crate::ilp::model::{LpModel, RowSense, VarKind};
use crate::ilp::solve::{parse_solution, SolStatus, TempFiles};
use crate::ilp::{mps, IlpEmbedder, IlpOptions};

fn station(g: &mut LineGraph, x: f64, y: f64, id: &str) -> crate::graph::LineNodeIx {
    let mut pl = LineNodePl::at(Point::new(x, y));
    pl.stops.push(Stop {
        id: id.into(),
        label: id.into(),
        geom: Point::new(x, y),
    });
    g.add_node(pl)
}

/// A three-station path, small enough to eyeball the model.
fn path_graph() -> (LineGraph, CombGraph) {
    let mut lg = LineGraph::new();
    let a = station(&mut lg, 0.0, 0.0, "A");
    let b = station(&mut lg, 10.0, 0.0, "B");
    let c = station(&mut lg, 20.0, 10.0, "C");
    let l = lg.add_line(Line::new("u1"));
    for (f, t) in [(a, b), (b, c)] {
        let mut pl = LineEdgePl::straight(lg.node(f).geom, lg.node(t).geom);
        pl.add_line(LineOcc::new(l));
        lg.add_edge(f, t, pl);
    }
    let cg = CombGraph::new(&lg, false);
    (lg, cg)
}

fn small_grid(lg: &LineGraph) -> GridGraph {
    let bbox = lg.bbox();
    let padded = Rect::new(
        Coord {
            x: bbox.min().x - 11.0,
            y: bbox.min().y - 11.0,
        },
        Coord {
            x: bbox.max().x + 11.0,
            y: bbox.max().y + 11.0,
        },
    );
    GridGraph::new(padded, 10.0, Penalties::default())
}

#[test]
fn mps_writer_emits_all_sections() {
    let mut lp = LpModel::new("toy");
    let x = lp.add_var("x_a".into(), VarKind::Binary, 2.5);
    let d = lp.add_var("d_a".into(), VarKind::Integer { lo: 0, hi: 7 }, 0.0);
    let row = lp.add_row("r1".into(), RowSense::Le(1.0));
    lp.add_coeff(row, x, 1.0);
    let row = lp.add_row("r2".into(), RowSense::Eq(0.0));
    lp.add_coeff(row, x, -1.0);
    lp.add_coeff(row, d, 1.0);

    let mut buf = Vec::new();
    mps::write_mps(&lp, &mut buf).expect("serializes");
    let text = String::from_utf8(buf).expect("utf8");

    for needle in [
        "NAME", "ROWS", " N  COST", " L  r1", " E  r2", "COLUMNS", "'INTORG'", "RHS", "BOUNDS",
        " BV BND    x_a", " UI BND    d_a    7", "ENDATA",
    ] {
        assert!(text.contains(needle), "missing `{needle}` in:\n{text}");
    }
}

#[test]
fn model_covers_assignment_and_flow() {
    let (lg, cg) = path_graph();
    let gg = small_grid(&lg);
    let ctx = EmbedderContext::new(10.0);
    let emb = IlpEmbedder::new(&ctx, IlpOptions::default());

    let cands = emb.candidates(&cg, &gg);
    let (lp, x_vars, y_vars) = emb.build_model(&cg, &gg, &cands);

    // one assignment row per comb node
    let oneass = lp.rows().iter().filter(|r| r.name.starts_with("oneass")).count();
    assert_eq!(oneass, cg.num_nds());

    // every x var prices the displacement
    for (&(s, cn), &v) in &x_vars {
        let expect = gg.nd_move_pen(cg.node(cn).geom, s);
        assert_eq!(lp.var(v).obj, expect);
    }

    // flow rows exist for every port and candidate sink, per comb edge
    assert!(lp.rows().iter().any(|r| r.name.starts_with("adjsum")));
    // crossing constraints exist
    assert!(lp.rows().iter().any(|r| r.name.starts_with("nocross")));
    // the middle station has degree 2: direction variables exist for it
    assert!(lp.vars().iter().any(|v| v.name.starts_with("d_")));
    // no degree-3 node, so no circular-order machinery
    assert!(!lp.vars().iter().any(|v| v.name.starts_with("vuln_")));
    // the two comb edges share a line at the middle node: angle indicators
    assert!(lp.vars().iter().any(|v| v.name.starts_with("ang90_")));

    assert!(!y_vars.is_empty());
}

#[test]
fn warm_start_is_feasible_for_the_assignment_constraints() {
    let (lg, cg) = path_graph();
    let mut gg = small_grid(&lg);
    let ctx = EmbedderContext::new(10.0);

    // heuristic solution, captured the way the embedder does
    let heur = HeuristicEmbedder::new(&ctx)
        .embed(&cg, &mut gg)
        .expect("feasible");
    let emb = IlpEmbedder::new(&ctx, IlpOptions::default());
    let warm = super::WarmStart {
        settled: heur.nodes().collect(),
        used: heur
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
    };

    gg.reset();
    let cands = emb.candidates(&cg, &gg);
    let (lp, x_vars, y_vars) = emb.build_model(&cg, &gg, &cands);

    let dir = std::env::temp_dir().join(format!("octograph-test-{}", std::process::id()));
    let mst = dir.with_extension("mst");
    emb.write_warm_start(&lp, &cg, &gg, &cands, &warm, &mst)
        .expect("written");

    // every settled station appears as an assignment of 1
    let text = std::fs::read_to_string(&mst).expect("readable");
    let mut assignment: FxHashMap<usize, f64> = FxHashMap::default();
    for line in text.lines() {
        let (name, value) = line.split_once('\t').expect("name\\tvalue");
        let var = lp.var_by_name(name).expect("model variable");
        assignment.insert(var, value.trim().parse().expect("numeric"));
    }
    for (cn, gn) in heur.nodes() {
        let var = x_vars[&(gn, cn)];
        assert_eq!(assignment.get(&var), Some(&1.0), "station var set");
    }
    for (ce, edges) in &warm.used {
        for &e in edges {
            let var = y_vars[&(e, *ce)];
            assert_eq!(assignment.get(&var), Some(&1.0), "edge-use var set");
        }
    }

    // P7: every constraint over assignment/edge-use variables only holds
    // under the written warm start (absent variables are 0)
    let mut checked = 0usize;
    for row in lp.rows() {
        let pure = row.coeffs.iter().all(|&(v, _)| {
            let name = &lp.var(v).name;
            name.starts_with("x_") || name.starts_with("e_")
        });
        if !pure {
            continue;
        }
        checked += 1;
        assert!(
            lp.row_satisfied(row, &assignment),
            "warm start violates {}",
            row.name
        );
    }
    assert!(checked > 0);

    let _ = std::fs::remove_file(&mst);
}

#[test]
fn extraction_rebuilds_the_warm_start_drawing() {
    let (lg, cg) = path_graph();
    let mut gg = small_grid(&lg);
    let ctx = EmbedderContext::new(10.0);

    let heur = HeuristicEmbedder::new(&ctx)
        .embed(&cg, &mut gg)
        .expect("feasible");
    let emb = IlpEmbedder::new(&ctx, IlpOptions::default());
    let warm = super::WarmStart {
        settled: heur.nodes().collect(),
        used: heur
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
    };

    gg.reset();
    let cands = emb.candidates(&cg, &gg);
    let (lp, x_vars, y_vars) = emb.build_model(&cg, &gg, &cands);

    // feed the heuristic solution back as if a solver had returned it
    let mut values: FxHashMap<String, f64> = FxHashMap::default();
    for (cn, gn) in heur.nodes() {
        values.insert(lp.var(x_vars[&(gn, cn)]).name.clone(), 1.0);
    }
    for (ce, edges) in &warm.used {
        for &e in edges {
            values.insert(lp.var(y_vars[&(e, *ce)]).name.clone(), 1.0);
        }
    }

    let drawing = emb
        .extract(&values, &cg, &mut gg, &x_vars, &y_vars, &lp)
        .expect("extractable");

    for (cn, gn) in heur.nodes() {
        assert_eq!(drawing.gr_nd(cn), Some(gn));
    }
    for ce in cg.edges() {
        let a = heur.path(ce).expect("drawn").edges.len();
        let b = drawing.path(ce).expect("extracted").edges.len();
        assert_eq!(a, b, "same path length for comb edge {}", ce.index());
    }
}

#[test]
fn solution_parser_accepts_both_dialects() {
    let dir = std::env::temp_dir();
    let gurobi = dir.join(format!("octograph-gurobi-{}.sol", std::process::id()));
    std::fs::write(
        &gurobi,
        "# Objective value = 12.5\nx_1_0 1\ne_4_0 0.999999999\n",
    )
    .expect("written");
    match parse_solution(&gurobi).expect("parses") {
        SolStatus::Solved(values) => {
            assert_eq!(values.get("x_1_0"), Some(&1.0));
            assert_eq!(values.get("e_4_0"), Some(&1.0), "rounded like the original");
        }
        SolStatus::Infeasible => panic!("not infeasible"),
    }

    let cbc = dir.join(format!("octograph-cbc-{}.sol", std::process::id()));
    std::fs::write(
        &cbc,
        "Optimal - objective value 12.50000000\n      0 x_1_0                 1                  0\n      1 e_4_0                 0                  0\n",
    )
    .expect("written");
    match parse_solution(&cbc).expect("parses") {
        SolStatus::Solved(values) => {
            assert_eq!(values.get("x_1_0"), Some(&1.0));
            assert_eq!(values.get("e_4_0"), Some(&0.0));
        }
        SolStatus::Infeasible => panic!("not infeasible"),
    }

    let infeasible = dir.join(format!("octograph-inf-{}.sol", std::process::id()));
    std::fs::write(&infeasible, "Infeasible - objective value 0\n").expect("written");
    assert!(matches!(
        parse_solution(&infeasible).expect("parses"),
        SolStatus::Infeasible
    ));

    for f in [gurobi, cbc, infeasible] {
        let _ = std::fs::remove_file(f);
    }
}

#[test]
fn temp_files_are_cleaned_up_unless_kept() {
    let base = std::env::temp_dir().join(format!("octograph-guard-{}", std::process::id()));
    {
        let files = TempFiles::at(&base);
        std::fs::write(&files.mps, "x").expect("written");
        std::fs::write(&files.sol, "y").expect("written");
    }
    assert!(!base.with_extension("mps").exists());
    assert!(!base.with_extension("sol").exists());

    {
        let mut files = TempFiles::at(&base);
        std::fs::write(&files.mps, "x").expect("written");
        files.keep = true;
    }
    assert!(base.with_extension("mps").exists());
    let _ = std::fs::remove_file(base.with_extension("mps"));
}
