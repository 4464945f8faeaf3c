//! # dj-core
//!
//! Shared vocabulary for the dijet correlation shape pipeline.
//!
//! This crate defines the analysis bin space (slice and bin keys), the
//! closed set of correlation stages with their dependency graph, the closed
//! set of systematic uncertainty sources, and the error taxonomy used by
//! every other crate in the workspace.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod stage;
pub mod types;

pub use error::{Error, Result};
pub use stage::{CorrelationStage, StageGraph};
pub use types::{
    BinKey, BinSel, NormalizationPolicy, PairCategory, RadialAssignment, Representation,
    SliceKey, UncertaintySource, annulus_area,
};

/// Workspace version string recorded in output provenance.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
