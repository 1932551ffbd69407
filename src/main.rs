use std::io::{stdin, stdout, BufWriter};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use log::{debug, error, info};

use octograph::embed::{Embedder, EmbedderContext};
use octograph::graph::LineGraph;
use octograph::grid::{GridGraph, Penalties};
use octograph::ilp::{IlpEmbedder, IlpOptions};
use octograph::io::stats::{statistics_json, RunInfo};
use octograph::io::{dot, geojson, obstacles, InputError};
use octograph::{comb::CombGraph, Error, HeuristicEmbedder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OptimMode {
    Heur,
    Ilp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PrintMode {
    Drawing,
    Gridgraph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BaseGraph {
    Octi,
    Orthoradial,
    PseudoOrthoradial,
}

/// Schematizes a transit line graph onto an octilinear grid.
/// Reads the input graph from stdin, writes GeoJSON to stdout.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Read DOT instead of GeoJSON from stdin
    #[arg(long)]
    from_dot: bool,

    /// Grid cell size, absolute or as a percentage of the average
    /// adjacent station distance (e.g. `75%`)
    #[arg(long, default_value = "100%")]
    grid_size: String,

    #[arg(long, value_enum, default_value_t = OptimMode::Heur)]
    optim_mode: OptimMode,

    /// Station candidate radius in grid cells
    #[arg(long, default_value_t = 3.0)]
    max_grid_dist: f64,

    /// Keep sharp degree-2 corners as decision nodes
    #[arg(long, default_value_t = false)]
    deg2_heur: bool,

    /// Extra padding around the input bounding box, in grid cells
    #[arg(long, default_value_t = 0.0)]
    border_rad: f64,

    /// Penalty for 45° angles between edges sharing a line
    #[arg(long, default_value_t = Penalties::default().p_45)]
    turn_pen_45: f64,

    /// Penalty for 90° angles
    #[arg(long, default_value_t = Penalties::default().p_90)]
    turn_pen_90: f64,

    /// Penalty for 135° angles
    #[arg(long, default_value_t = Penalties::default().p_135)]
    turn_pen_135: f64,

    /// Penalty for full turnarounds
    #[arg(long, default_value_t = Penalties::default().p_0)]
    turn_pen_180: f64,

    #[arg(long, default_value_t = Penalties::default().horizontal_pen)]
    hori_pen: f64,

    #[arg(long, default_value_t = Penalties::default().vertical_pen)]
    vert_pen: f64,

    #[arg(long, default_value_t = Penalties::default().diagonal_pen)]
    diag_pen: f64,

    #[arg(long, default_value_t = Penalties::default().density_pen)]
    density_pen: f64,

    /// Weight of the geographic-course penalty (0 disables)
    #[arg(long, default_value_t = 0.0)]
    enforce_geo: f64,

    /// Restrict local-search displacement to this many grid cells from
    /// the geographic position
    #[arg(long)]
    restrict_local_search: Option<f64>,

    /// External MIP solver binary (gurobi_cl or cbc style)
    #[arg(long)]
    ilp_solver: Option<PathBuf>,

    /// Solver time limit in seconds
    #[arg(long)]
    ilp_time_limit: Option<u64>,

    /// Write the MPS (and warm start) only, do not solve
    #[arg(long)]
    ilp_no_solve: bool,

    /// Base path of the persisted .mps/.mst/.sol files
    #[arg(long)]
    ilp_path: Option<PathBuf>,

    /// Obstacle polygon GeoJSON file
    #[arg(long)]
    obstacles: Option<PathBuf>,

    /// Abort after this many seconds, returning the best drawing so far
    #[arg(long)]
    abort_after: Option<u64>,

    #[arg(long, value_enum, default_value_t = PrintMode::Drawing)]
    print_mode: PrintMode,

    #[arg(long, value_enum, default_value_t = BaseGraph::Octi)]
    base_graph: BaseGraph,

    /// Seed of the ordering shuffle
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => {}
        Err(err) => {
            error!("{err}");
            std::process::exit(err.exit_code());
        }
    }
}

fn run(args: &Args) -> Result<(), Error> {
    if args.base_graph != BaseGraph::Octi {
        return Err(InputError::UnsupportedBaseGraph(
            format!("{:?}", args.base_graph).to_lowercase(),
        )
        .into());
    }

    info!("reading graph from stdin");
    let started = Instant::now();
    let mut lg: LineGraph = if args.from_dot {
        dot::read_line_graph(stdin().lock())?
    } else {
        geojson::read_line_graph(stdin().lock())?
    };
    debug!(
        "{} nodes, {} edges, {} lines read in {:?}",
        lg.num_nds(),
        lg.num_edgs(),
        lg.num_lines(),
        started.elapsed()
    );

    info!("planarizing");
    lg.topologize_isects();

    let avg_dist = lg.avg_adjacent_distance();
    let grid_size = parse_grid_size(&args.grid_size, avg_dist)?;
    info!("grid size {grid_size:.2} (avg. adjacent distance {avg_dist:.2})");

    lg.contract_edges(grid_size / 2.0);

    let bbox = lg.bbox();

    let pens = Penalties {
        p_0: args.turn_pen_180,
        p_45: args.turn_pen_45,
        p_90: args.turn_pen_90,
        p_135: args.turn_pen_135,
        horizontal_pen: args.hori_pen,
        vertical_pen: args.vert_pen,
        diagonal_pen: args.diag_pen,
        density_pen: args.density_pen,
    };

    let mut ctx = EmbedderContext::new(grid_size);
    ctx.pens = pens;
    ctx.seed = args.seed;
    ctx.max_grid_dist = args.max_grid_dist;
    ctx.restrict_loc_search = args.restrict_local_search;
    ctx.enforce_geo_pen = args.enforce_geo;
    ctx.deadline = args.abort_after.map(|s| Instant::now() + Duration::from_secs(s));
    if let Some(path) = &args.obstacles {
        let file = std::fs::File::open(path).map_err(|e| {
            InputError::malformed("cannot open obstacle file", format!("{}: {e}", path.display()))
        })?;
        ctx.obstacles = obstacles::read_obstacles(file)?;
    }

    // the grid supports at most one routing per port
    lg.split_nodes(8)?;

    let cg = CombGraph::new(&lg, args.deg2_heur);
    debug!(
        "comb graph: {} decision nodes, {} comb edges",
        cg.num_nds(),
        cg.num_edgs()
    );

    let grid_box = pad(bbox, grid_size + 1.0 + args.border_rad * grid_size);
    let mut gg = GridGraph::new(grid_box, grid_size, pens);
    debug_assert!(cg.nodes().all(|n| cg.deg(n) <= gg.max_node_deg()));
    gg.block_obstacles(&ctx.obstacles);

    let embed_started = Instant::now();
    let drawing = match args.optim_mode {
        OptimMode::Heur => HeuristicEmbedder::new(&ctx).embed(&cg, &mut gg)?,
        OptimMode::Ilp => {
            let opts = IlpOptions {
                solver: args.ilp_solver.clone(),
                no_solve: args.ilp_no_solve,
                time_limit: args.ilp_time_limit,
                path: args.ilp_path.clone().unwrap_or_else(|| IlpOptions::default().path),
            };
            IlpEmbedder::new(&ctx, opts).embed(&cg, &mut gg)?
        }
    };
    let time_ms = embed_started.elapsed().as_secs_f64() * 1000.0;

    let score = drawing.full_score(&cg, &gg);
    info!(
        "schematized in {time_ms:.0} ms, score {:.3}, {} violations",
        score.full(),
        score.violations
    );

    let stats = statistics_json(&RunInfo {
        score,
        pens: &pens,
        grid: &gg,
        method: match args.optim_mode {
            OptimMode::Heur => "heur",
            OptimMode::Ilp => "ilp",
        },
        deg2_heur: args.deg2_heur,
        max_grid_dist: args.max_grid_dist,
        time_ms,
        timed_out: ctx.expired(),
    });

    let out = stdout().lock();
    let mut out = BufWriter::new(out);
    match args.print_mode {
        PrintMode::Drawing => {
            let embedded = drawing.to_line_graph(&cg, &lg, &gg);
            geojson::write_line_graph(&embedded, stats, &mut out).map_err(io_output_err)?;
        }
        PrintMode::Gridgraph => {
            geojson::write_grid_graph(&gg, stats, &mut out).map_err(io_output_err)?;
        }
    }
    Ok(())
}

fn io_output_err(e: std::io::Error) -> Error {
    InputError::malformed("cannot write output", e.to_string()).into()
}

fn parse_grid_size(raw: &str, avg_dist: f64) -> Result<f64, InputError> {
    let raw = raw.trim();
    let size = if let Some(pct) = raw.strip_suffix('%') {
        let pct: f64 = pct
            .trim()
            .parse()
            .map_err(|_| InputError::malformed("invalid --grid-size", raw))?;
        avg_dist * pct / 100.0
    } else {
        raw.parse()
            .map_err(|_| InputError::malformed("invalid --grid-size", raw))?
    };
    if !(size.is_finite() && size > 0.0) {
        return Err(InputError::malformed("non-positive grid size", raw));
    }
    Ok(size)
}

fn pad(bbox: geo::Rect<f64>, by: f64) -> geo::Rect<f64> {
    geo::Rect::new(
        geo::Coord {
            x: bbox.min().x - by,
            y: bbox.min().y - by,
        },
        geo::Coord {
            x: bbox.max().x + by,
            y: bbox.max().y + by,
        },
    )
}
