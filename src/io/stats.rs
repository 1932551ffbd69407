//! The statistics block attached to the output document.

use serde_json::{json, Value};

use crate::drawing::Score;
use crate::grid::{GridGraph, Penalties};

pub struct RunInfo<'a> {
    pub score: Score,
    pub pens: &'a Penalties,
    pub grid: &'a GridGraph,
    pub method: &'a str,
    pub deg2_heur: bool,
    pub max_grid_dist: f64,
    pub time_ms: f64,
    pub timed_out: bool,
}

pub fn statistics_json(info: &RunInfo) -> Value {
    let (cols, rows) = info.grid.dims();
    let mut misc = json!({
        "method": info.method,
        "deg2heur": info.deg2_heur,
        "max-grid-dist": info.max_grid_dist,
    });
    if info.timed_out {
        misc["timeout"] = json!(true);
    }
    json!({
        "scores": {
            "total_score": info.score.full(),
            "topology_violations": info.score.violations,
            "density-score": info.score.density,
            "bend-score": info.score.bend,
            "hop-score": info.score.hop,
            "move-score": info.score.mv,
        },
        "pens": {
            "density-pen": info.pens.density_pen,
            "diag-pen": info.pens.diagonal_pen,
            "hori-pen": info.pens.horizontal_pen,
            "vert-pen": info.pens.vertical_pen,
            "180-turn-pen": info.pens.p_0,
            "135-turn-pen": info.pens.p_135,
            "90-turn-pen": info.pens.p_90,
            "45-turn-pen": info.pens.p_45,
        },
        "gridgraph-size": {
            "nodes": cols as u64 * rows as u64,
            "edges": info.grid.num_edges() / 2,
        },
        "misc": misc,
        "time_ms": info.time_ms,
        "procs": std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1),
        "peak_memory": readable_size(peak_rss_bytes()),
        "peak_memory_bytes": peak_rss_bytes(),
        "timestamp": unix_time(),
    })
}

/// Peak resident set size, read from procfs where available.
pub fn peak_rss_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmHWM:") {
                    let kb: u64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return kb * 1024;
                }
            }
        }
    }
    0
}

fn readable_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut v = bytes as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit + 1 < UNITS.len() {
        v /= 1024.0;
        unit += 1;
    }
    format!("{v:.1}{}", UNITS[unit])
}

fn unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
