//! Systematic uncertainties.
//!
//! Each enabled [`UncertaintySource`] produces one [`Estimate`] per slice:
//! an absolute uncertainty in the radial (jet shape) binning and one in the
//! near-side Δη binning. The [`aggregate::UncertaintyAggregator`] combines
//! the sources in quadrature into the total and into the groups of the
//! active grouping strategy.
//!
//! [`UncertaintySource`]: dj_core::UncertaintySource

pub mod aggregate;
pub mod estimators;
pub mod grouping;
pub mod smoothing;

use dj_core::{Error, Representation, Result};
use dj_hist::BinnedDistribution1D;
use serde::Serialize;

pub use aggregate::{GroupEstimate, SliceUncertainties, UncertaintyAggregator};
pub use estimators::{EstimationContext, estimate_source};
pub use grouping::Group;
pub use smoothing::SmoothingOverrides;

/// Absolute uncertainty in both representations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    /// Radial binning.
    pub r: BinnedDistribution1D,
    /// Near-side Δη binning.
    pub delta_eta: BinnedDistribution1D,
}

impl Estimate {
    /// Representation accessor.
    pub fn get(&self, rep: Representation) -> &BinnedDistribution1D {
        match rep {
            Representation::R => &self.r,
            Representation::DeltaEta => &self.delta_eta,
        }
    }

    /// All-zero estimate on the binning of `like`.
    pub fn zeros_like(like: &Estimate) -> Self {
        Self {
            r: BinnedDistribution1D::zeros(like.r.edges().clone()),
            delta_eta: BinnedDistribution1D::zeros(like.delta_eta.edges().clone()),
        }
    }

    /// Bin-wise `sqrt(Σ uᵢ²)`.
    pub fn quadrature<'a>(items: impl IntoIterator<Item = &'a Estimate>) -> Result<Option<Estimate>> {
        combine(items, |acc, u| acc.hypot(u))
    }

    /// Bin-wise `Σ uᵢ` (fully correlated).
    pub fn linear_sum<'a>(items: impl IntoIterator<Item = &'a Estimate>) -> Result<Option<Estimate>> {
        combine(items, |acc, u| acc + u)
    }
}

fn combine<'a>(
    items: impl IntoIterator<Item = &'a Estimate>,
    f: impl Fn(f64, f64) -> f64 + Copy,
) -> Result<Option<Estimate>> {
    let mut iter = items.into_iter();
    let Some(first) = iter.next() else {
        return Ok(None);
    };
    let mut acc = first.clone();
    for e in iter {
        acc = Estimate { r: fold(&acc.r, &e.r, f)?, delta_eta: fold(&acc.delta_eta, &e.delta_eta, f)? };
    }
    Ok(Some(acc))
}

fn fold(
    acc: &BinnedDistribution1D,
    u: &BinnedDistribution1D,
    f: impl Fn(f64, f64) -> f64,
) -> Result<BinnedDistribution1D> {
    if !acc.edges().matches(u.edges()) {
        return Err(Error::InvalidBinning(format!(
            "cannot combine uncertainties with {} and {} bins",
            acc.n_bins(),
            u.n_bins()
        )));
    }
    acc.with_values(acc.values().iter().zip(u.values()).map(|(&a, &b)| f(a, b)).collect())
}
