//! Embedder front door: the shared run context (penalties, grid size,
//! seed, deadline) and the trait both embedders implement.

pub mod heur;

#[cfg(test)]
mod test;

#[doc(inline)]
pub use heur::HeuristicEmbedder;

use std::time::Instant;

use geo::Polygon;
use thiserror::Error;

use crate::comb::CombGraph;
use crate::drawing::Drawing;
use crate::grid::{GridGraph, Penalties};

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("could not find an embedding for the input graph")]
    NoEmbeddingFound,

    #[error("deadline exceeded before any drawing was found")]
    Timeout,
}

/// Everything one embedder run depends on. Randomness is confined to the
/// seeded generator derived from `seed`; there is no process-global state.
#[derive(Debug, Clone)]
pub struct EmbedderContext {
    pub pens: Penalties,
    pub grid_size: f64,
    pub seed: u64,
    pub deadline: Option<Instant>,
    /// Station candidate radius, in grid cells (ILP and scoring).
    pub max_grid_dist: f64,
    /// Maximum local-search displacement from the geographic position, in
    /// grid cells. `None` leaves the search unrestricted.
    pub restrict_loc_search: Option<f64>,
    /// Weight of the geo-course penalty; 0 disables it.
    pub enforce_geo_pen: f64,
    pub obstacles: Vec<Polygon<f64>>,
}

impl EmbedderContext {
    pub fn new(grid_size: f64) -> Self {
        EmbedderContext {
            pens: Penalties::default(),
            grid_size,
            seed: 0,
            deadline: None,
            max_grid_dist: 3.0,
            restrict_loc_search: None,
            enforce_geo_pen: 0.0,
            obstacles: Vec::new(),
        }
    }

    /// Whether the cooperative deadline has passed.
    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Maps a comb graph onto a grid graph.
pub trait Embedder {
    /// Produces a drawing on `gg`. On success the drawing is applied to the
    /// grid (sinks settled, edges used).
    fn embed(&self, cg: &CombGraph, gg: &mut GridGraph) -> crate::Result<Drawing>;
}
