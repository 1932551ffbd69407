//! External solver invocation and SOL-file parsing. The solver owns its
//! process; we only hand it the MPS and warm-start files and read the
//! solution back.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, warn};
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("ILP solver `{solver}` could not be run: {source}")]
    Unavailable {
        solver: String,
        source: std::io::Error,
    },

    #[error("ILP solver exited unsuccessfully ({status})")]
    Failed { status: String },

    #[error("solution file `{0}` missing or unreadable")]
    NoSolution(PathBuf),

    #[error("ILP mode needs an external solver (--ilp-solver)")]
    NotConfigured,

    #[error("could not write `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub enum SolStatus {
    /// Variable values by name; variables the solver left out are 0.
    Solved(FxHashMap<String, f64>),
    Infeasible,
}

/// Runs the external solver on `mps`, warm-started from `mst`, writing the
/// solution to `sol`. Solvers with `gurobi` in their name get the
/// `gurobi_cl` surface, everything else the cbc one.
pub fn run_solver(
    solver: &Path,
    mps: &Path,
    mst: Option<&Path>,
    sol: &Path,
    time_limit: Option<u64>,
) -> Result<(), SolverError> {
    let mut cmd = Command::new(solver);
    let gurobi = solver
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.contains("gurobi"));

    if gurobi {
        cmd.arg(format!("ResultFile={}", sol.display()));
        if let Some(mst) = mst {
            cmd.arg(format!("InputFile={}", mst.display()));
        }
        if let Some(limit) = time_limit {
            cmd.arg(format!("TimeLimit={limit}"));
        }
        cmd.arg(mps);
    } else {
        cmd.arg(mps);
        if let Some(mst) = mst {
            cmd.arg("mipstart").arg(mst);
        }
        if let Some(limit) = time_limit {
            cmd.arg("sec").arg(limit.to_string());
        }
        cmd.arg("solve").arg("solution").arg(sol);
    }

    debug!("invoking MIP solver: {cmd:?}");
    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| SolverError::Unavailable {
            solver: solver.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SolverError::Failed {
            status: output.status.to_string(),
        });
    }
    Ok(())
}

/// Parses a solution file. Both the gurobi (`name value`) and the cbc
/// (`index name value reduced-cost`, status header line) shapes are
/// accepted; non-integral values within tolerance are rounded the way the
/// original warm-start reader does.
pub fn parse_solution(sol: &Path) -> Result<SolStatus, SolverError> {
    let file = fs::File::open(sol).map_err(|_| SolverError::NoSolution(sol.to_path_buf()))?;
    let mut values = FxHashMap::default();

    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|_| SolverError::NoSolution(sol.to_path_buf()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if i == 0 {
            let lower = line.to_ascii_lowercase();
            if lower.contains("infeasible") {
                return Ok(SolStatus::Infeasible);
            }
            if lower.contains("objective") || lower.contains("optimal") || lower.contains("stopped")
            {
                // status header line
                continue;
            }
        }
        let toks: Vec<&str> = line.split_whitespace().collect();
        let parsed = match toks.as_slice() {
            [name, value] => value.parse::<f64>().ok().map(|v| (*name, v)),
            [index, name, value, ..] if index.parse::<i64>().is_ok() => {
                value.parse::<f64>().ok().map(|v| (*name, v))
            }
            [name, value, ..] => value.parse::<f64>().ok().map(|v| (*name, v)),
            _ => None,
        };
        match parsed {
            Some((name, v)) => {
                values.insert(name.to_string(), v.round());
            }
            None => warn!("unparseable solution line {}: `{line}`", i + 1),
        }
    }
    Ok(SolStatus::Solved(values))
}

/// Removes the persisted problem files on drop unless told to keep them.
#[derive(Debug)]
pub struct TempFiles {
    pub mps: PathBuf,
    pub mst: PathBuf,
    pub sol: PathBuf,
    pub keep: bool,
}

impl TempFiles {
    pub fn at(base: &Path) -> Self {
        TempFiles {
            mps: base.with_extension("mps"),
            mst: base.with_extension("mst"),
            sol: base.with_extension("sol"),
            keep: false,
        }
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for p in [&self.mps, &self.mst, &self.sol] {
            if p.exists() {
                let _ = fs::remove_file(p);
            }
        }
    }
}
