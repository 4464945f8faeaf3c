//! # dj-pipeline
//!
//! Batch pipeline for dijet correlation shapes.
//!
//! A run loads a keyed dataset into a [`CorrelationStore`], derives every
//! reachable correlation stage per slice ([`derive`]), projects the
//! background-subtracted correlations into jet shapes and Δη profiles
//! ([`shape`]) after the configured corrections ([`correction`]), estimates
//! and combines the systematic uncertainties
//! ([`uncertainty`]) and writes JSON artifacts ([`output`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod correction;
pub mod derive;
pub mod io;
pub mod output;
pub mod run;
pub mod shape;
pub mod store;
pub mod summary;
pub mod uncertainty;

pub use config::{RunConfig, read_run_config};
pub use derive::{Deriver, SliceOutcome};
pub use run::{RunOutput, run};
pub use shape::{ShapeTransformer, SliceShape};
pub use store::{CorrelationStore, Lookup};
