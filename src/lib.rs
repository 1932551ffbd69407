//! Octilinear schematization of transit line graphs.
//!
//! Given a geographic line graph of stations and line-bundled track
//! segments, `octograph` computes a planar embedding on a regular grid in
//! which every edge runs along one of the eight compass directions, stations
//! sit on grid intersections and the circular order of edges around every
//! station matches the input.
//!
//! The pipeline reads a [`graph::LineGraph`], planarizes and simplifies it,
//! derives a [`comb::CombGraph`] of decision nodes, and maps that graph onto
//! a [`grid::GridGraph`] with one of two embedders: the shortest-path
//! [`embed::HeuristicEmbedder`] or the exact [`ilp::IlpEmbedder`].

pub mod comb;
pub mod drawing;
pub mod embed;
pub mod graph;
pub mod grid;
pub mod ilp;
pub mod io;

use thiserror::Error;

#[doc(inline)]
pub use comb::CombGraph;
#[doc(inline)]
pub use drawing::Drawing;
#[doc(inline)]
pub use embed::{Embedder, EmbedderContext, HeuristicEmbedder};
#[doc(inline)]
pub use graph::LineGraph;
#[doc(inline)]
pub use grid::{GridGraph, Penalties};
#[doc(inline)]
pub use ilp::IlpEmbedder;

/// Top-level error, aggregating the per-module error kinds.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Input(#[from] io::InputError),

    #[error(transparent)]
    Embed(#[from] embed::EmbedError),

    #[error(transparent)]
    Solver(#[from] ilp::SolverError),
}

impl Error {
    /// The process exit code associated with this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Input(_) => 2,
            Error::Embed(embed::EmbedError::NoEmbeddingFound) => 1,
            Error::Embed(embed::EmbedError::Timeout) => 4,
            Error::Solver(_) => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
