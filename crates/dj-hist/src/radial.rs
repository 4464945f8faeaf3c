//! Radial re-projection of (Δφ, Δη) distributions.
//!
//! `R = sqrt(Δφ² + Δη²)`. Each two-dimensional bin is accumulated into the
//! radial bin(s) it belongs to and the sums are divided by the bin
//! normalization chosen by [`NormalizationPolicy`].

use dj_core::{Error, NormalizationPolicy, RadialAssignment, Result, annulus_area};
use serde::Serialize;

use crate::edges::BinEdges;
use crate::hist1d::BinnedDistribution1D;
use crate::hist2d::BinnedDistribution2D;

/// Sub-grid resolution per axis for [`RadialAssignment::AreaWeighted`].
const SUBGRID: usize = 8;

/// Output of [`RadialProjector::project`].
#[derive(Debug, Clone, Serialize)]
pub struct RadialProfile {
    /// Normalized radial shape.
    pub shape: BinnedDistribution1D,
    /// Number of (Δφ, Δη) bins per radial bin (fractional for area weighting).
    pub counts: Vec<f64>,
    /// Radial bin index of every (Δφ, Δη) bin by centre radius, −1 outside.
    pub bin_map: BinnedDistribution2D,
    /// Normalization applied to `shape`.
    pub policy: NormalizationPolicy,
    /// How (Δφ, Δη) bins were assigned to radial bins.
    pub assignment: RadialAssignment,
}

/// Projects two-dimensional distributions onto radial bins.
#[derive(Debug, Clone)]
pub struct RadialProjector {
    edges: BinEdges,
    policy: NormalizationPolicy,
    assignment: RadialAssignment,
}

impl RadialProjector {
    /// Create a projector with [`RadialAssignment::BinCenter`].
    pub fn new(edges: BinEdges, policy: NormalizationPolicy) -> Result<Self> {
        if edges.low() < 0.0 {
            return Err(Error::InvalidBinning(format!(
                "radial edges must start at R >= 0, got {}",
                edges.low()
            )));
        }
        Ok(Self { edges, policy, assignment: RadialAssignment::BinCenter })
    }

    /// Select the bin assignment scheme.
    pub fn with_assignment(mut self, assignment: RadialAssignment) -> Self {
        self.assignment = assignment;
        self
    }

    /// Radial edges.
    pub fn edges(&self) -> &BinEdges {
        &self.edges
    }

    /// Normalization policy.
    pub fn policy(&self) -> NormalizationPolicy {
        self.policy
    }

    /// Assignment scheme.
    pub fn assignment(&self) -> RadialAssignment {
        self.assignment
    }

    fn denominator(&self, k: usize) -> f64 {
        self.policy.denominator(self.edges.lower(k), self.edges.upper(k))
    }

    /// Project `dist` onto the radial bins.
    pub fn project(&self, dist: &BinnedDistribution2D) -> Result<RadialProfile> {
        let n = self.edges.n_bins();
        let mut sum = vec![0.0; n];
        let mut sumsq = vec![0.0; n];
        let mut counts = vec![0.0; n];
        let mut map = Vec::with_capacity(dist.values().len());

        let (a, b) = (dist.a_edges(), dist.b_edges());
        for ia in 0..dist.n_a() {
            for ib in 0..dist.n_b() {
                let r = a.center(ia).hypot(b.center(ib));
                let centre_bin = self.edges.locate(r);
                map.push(centre_bin.map_or(-1.0, |k| k as f64));

                let (v, e) = (dist.value(ia, ib), dist.error(ia, ib));
                match self.assignment {
                    RadialAssignment::BinCenter => {
                        if let Some(k) = centre_bin {
                            sum[k] += v;
                            sumsq[k] += e * e;
                            counts[k] += 1.0;
                        }
                    }
                    RadialAssignment::AreaWeighted => {
                        for (k, w) in self.overlap(a, b, ia, ib) {
                            sum[k] += w * v;
                            sumsq[k] += (w * e).powi(2);
                            counts[k] += w;
                        }
                    }
                }
            }
        }

        let mut values = Vec::with_capacity(n);
        let mut errors = Vec::with_capacity(n);
        for k in 0..n {
            let d = self.denominator(k);
            values.push(sum[k] / d);
            errors.push(sumsq[k].sqrt() / d);
        }

        let zeros = vec![0.0; map.len()];
        Ok(RadialProfile {
            shape: BinnedDistribution1D::new(self.edges.clone(), values, errors)?,
            counts,
            bin_map: BinnedDistribution2D::new(a.clone(), b.clone(), map, zeros)?,
            policy: self.policy,
            assignment: self.assignment,
        })
    }

    /// Fraction of bin `(ia, ib)` falling in each radial bin, sampled on a
    /// regular sub-grid.
    fn overlap(&self, a: &BinEdges, b: &BinEdges, ia: usize, ib: usize) -> Vec<(usize, f64)> {
        let mut hits = vec![0usize; self.edges.n_bins()];
        let (da, db) = (a.width(ia) / SUBGRID as f64, b.width(ib) / SUBGRID as f64);
        for i in 0..SUBGRID {
            let x = a.lower(ia) + (i as f64 + 0.5) * da;
            for j in 0..SUBGRID {
                let y = b.lower(ib) + (j as f64 + 0.5) * db;
                if let Some(k) = self.edges.locate(x.hypot(y)) {
                    hits[k] += 1;
                }
            }
        }
        let total = (SUBGRID * SUBGRID) as f64;
        hits.into_iter()
            .enumerate()
            .filter(|&(_, h)| h > 0)
            .map(|(k, h)| (k, h as f64 / total))
            .collect()
    }

    /// Radial representation of a constant per-unit-area density.
    ///
    /// Bin `k` gets `density × π(outer² − inner²) / norm(k)`.
    pub fn propagate_flat(&self, density: f64) -> Result<BinnedDistribution1D> {
        let values = (0..self.edges.n_bins())
            .map(|k| density * annulus_area(self.edges.lower(k), self.edges.upper(k)) / self.denominator(k))
            .collect();
        BinnedDistribution1D::from_values(self.edges.clone(), values)
    }
}
