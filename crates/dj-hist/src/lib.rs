//! # dj-hist
//!
//! Binned distributions for angular correlation analysis.
//!
//! Distributions are written once and read thereafter: every transform
//! (rebin, symmetrize, range projection, radial projection) returns a new
//! value and leaves its input untouched.
//!
//! ## Example
//!
//! ```
//! use dj_core::NormalizationPolicy;
//! use dj_hist::{BinEdges, BinnedDistribution2D, RadialProjector};
//!
//! let a = BinEdges::uniform(20, -1.0, 1.0).unwrap();
//! let b = BinEdges::uniform(20, -1.0, 1.0).unwrap();
//! let flat = BinnedDistribution2D::filled(a, b, 1.0, 0.1);
//!
//! let r = BinEdges::new(vec![0.0, 0.25, 0.5, 1.0]).unwrap();
//! let projector = RadialProjector::new(r, NormalizationPolicy::ByAnnulusArea).unwrap();
//! let profile = projector.project(&flat).unwrap();
//! assert_eq!(profile.shape.n_bins(), 3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod edges;
pub mod hist1d;
pub mod hist2d;
pub mod radial;

pub use edges::BinEdges;
pub use hist1d::BinnedDistribution1D;
pub use hist2d::{Axis, BinnedDistribution2D, FoldAxes, RangeProjection};
pub use radial::{RadialProfile, RadialProjector};
