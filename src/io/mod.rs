//! Thin adapters around the core: GeoJSON and DOT input, obstacle files,
//! GeoJSON output with the run statistics attached.

pub mod dot;
pub mod geojson;
pub mod obstacles;
pub mod stats;

#[cfg(test)]
mod test;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("malformed input: {what} ({context})")]
    Malformed { what: String, context: String },

    #[error("node of degree {deg} cannot be split to the grid maximum of {max}")]
    UnsatisfiableDegree { deg: usize, max: usize },

    #[error("base graph `{0}` is not supported")]
    UnsupportedBaseGraph(String),
}

impl InputError {
    pub fn malformed(what: impl Into<String>, context: impl Into<String>) -> Self {
        InputError::Malformed {
            what: what.into(),
            context: context.into(),
        }
    }
}
