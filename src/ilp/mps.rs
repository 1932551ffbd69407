//! Free-format MPS serialization of an [`LpModel`], the interchange file
//! the external MIP solvers consume.

use std::io::{self, Write};

use crate::ilp::model::{LpModel, RowSense, VarKind};

pub const OBJ_ROW: &str = "COST";

/// Writes `model` as free MPS. Every variable sits inside one
/// `INTORG`/`INTEND` marker block since the model is purely integer.
pub fn write_mps<W: Write>(model: &LpModel, out: &mut W) -> io::Result<()> {
    writeln!(out, "NAME          {}", model.name)?;

    writeln!(out, "ROWS")?;
    writeln!(out, " N  {OBJ_ROW}")?;
    for row in model.rows() {
        let sense = match row.sense {
            RowSense::Le(_) => 'L',
            RowSense::Ge(_) => 'G',
            RowSense::Eq(_) => 'E',
        };
        writeln!(out, " {}  {}", sense, row.name)?;
    }

    // column-major view of the sparse matrix
    let mut columns: Vec<Vec<(&str, f64)>> = vec![Vec::new(); model.num_vars()];
    for row in model.rows() {
        for &(var, c) in &row.coeffs {
            columns[var].push((row.name.as_str(), c));
        }
    }

    writeln!(out, "COLUMNS")?;
    writeln!(out, "    MARKER    'MARKER'    'INTORG'")?;
    for (ix, var) in model.vars().iter().enumerate() {
        if var.obj != 0.0 {
            writeln!(out, "    {}    {}    {}", var.name, OBJ_ROW, fmt(var.obj))?;
        }
        for &(row, c) in &columns[ix] {
            writeln!(out, "    {}    {}    {}", var.name, row, fmt(c))?;
        }
        if var.obj == 0.0 && columns[ix].is_empty() {
            // a column must appear at least once to exist
            writeln!(out, "    {}    {}    0", var.name, OBJ_ROW)?;
        }
    }
    writeln!(out, "    MARKER    'MARKER'    'INTEND'")?;

    writeln!(out, "RHS")?;
    for row in model.rows() {
        let b = match row.sense {
            RowSense::Le(b) | RowSense::Ge(b) | RowSense::Eq(b) => b,
        };
        if b != 0.0 {
            writeln!(out, "    RHS    {}    {}", row.name, fmt(b))?;
        }
    }

    writeln!(out, "BOUNDS")?;
    for var in model.vars() {
        match var.kind {
            VarKind::Binary => writeln!(out, " BV BND    {}", var.name)?,
            VarKind::Integer { lo, hi } => {
                writeln!(out, " LI BND    {}    {}", var.name, lo)?;
                writeln!(out, " UI BND    {}    {}", var.name, hi)?;
            }
        }
    }

    writeln!(out, "ENDATA")
}

fn fmt(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
