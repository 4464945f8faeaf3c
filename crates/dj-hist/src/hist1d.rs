//! One-dimensional binned distribution.

use dj_core::{Error, Result};
use serde::Serialize;

use crate::edges::BinEdges;

/// Bin edges plus per-bin value and symmetric uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinnedDistribution1D {
    edges: BinEdges,
    values: Vec<f64>,
    errors: Vec<f64>,
}

pub(crate) fn check_errors(errors: &[f64]) -> Result<()> {
    if let Some(e) = errors.iter().find(|e| !(e.is_finite() && **e >= 0.0)) {
        return Err(Error::Validation(format!("uncertainties must be finite and >= 0, got {e}")));
    }
    Ok(())
}

impl BinnedDistribution1D {
    /// Create a distribution, checking lengths and uncertainty signs.
    pub fn new(edges: BinEdges, values: Vec<f64>, errors: Vec<f64>) -> Result<Self> {
        let n = edges.n_bins();
        if values.len() != n || errors.len() != n {
            return Err(Error::Validation(format!(
                "1D distribution with {n} bins got {} values and {} errors",
                values.len(),
                errors.len()
            )));
        }
        check_errors(&errors)?;
        Ok(Self { edges, values, errors })
    }

    /// All-zero distribution.
    pub fn zeros(edges: BinEdges) -> Self {
        let n = edges.n_bins();
        Self { edges, values: vec![0.0; n], errors: vec![0.0; n] }
    }

    /// Distribution with the given values and zero uncertainty.
    pub fn from_values(edges: BinEdges, values: Vec<f64>) -> Result<Self> {
        let errors = vec![0.0; values.len()];
        Self::new(edges, values, errors)
    }

    /// Bin edges.
    pub fn edges(&self) -> &BinEdges {
        &self.edges
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.values.len()
    }

    /// Per-bin values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Per-bin uncertainties.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Value of bin `i`.
    pub fn value(&self, i: usize) -> f64 {
        self.values[i]
    }

    /// Uncertainty of bin `i`.
    pub fn error(&self, i: usize) -> f64 {
        self.errors[i]
    }

    fn ensure_same_binning(&self, other: &Self, op: &str) -> Result<()> {
        if !self.edges.matches(&other.edges) {
            return Err(Error::InvalidBinning(format!(
                "{op}: binning mismatch ({} vs {} bins on [{}, {}] / [{}, {}])",
                self.n_bins(),
                other.n_bins(),
                self.edges.low(),
                self.edges.high(),
                other.edges.low(),
                other.edges.high()
            )));
        }
        Ok(())
    }

    /// Merge bins into the aligned coarser `target` binning.
    ///
    /// Values add; uncertainties add in quadrature.
    pub fn rebin(&self, target: &BinEdges) -> Result<Self> {
        let map = self.edges.coarsening_map(target)?;
        let mut values = vec![0.0; target.n_bins()];
        let mut sumsq = vec![0.0; target.n_bins()];
        for (i, &j) in map.iter().enumerate() {
            values[j] += self.values[i];
            sumsq[j] += self.errors[i] * self.errors[i];
        }
        Ok(Self {
            edges: target.clone(),
            values,
            errors: sumsq.into_iter().map(f64::sqrt).collect(),
        })
    }

    /// Multiply every bin (and its uncertainty) by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            edges: self.edges.clone(),
            values: self.values.iter().map(|v| v * factor).collect(),
            errors: self.errors.iter().map(|e| e * factor.abs()).collect(),
        }
    }

    /// Bin-wise sum with quadrature uncertainties.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.ensure_same_binning(other, "add")?;
        Ok(self.combine(other, |a, b| a + b))
    }

    /// Bin-wise difference with quadrature uncertainties.
    pub fn subtract(&self, other: &Self) -> Result<Self> {
        self.ensure_same_binning(other, "subtract")?;
        Ok(self.combine(other, |a, b| a - b))
    }

    fn combine(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self {
            edges: self.edges.clone(),
            values: self.values.iter().zip(&other.values).map(|(&a, &b)| f(a, b)).collect(),
            errors: self.errors.iter().zip(&other.errors).map(|(a, b)| a.hypot(*b)).collect(),
        }
    }

    /// Replace the values, keeping edges, with zero uncertainty.
    pub fn with_values(&self, values: Vec<f64>) -> Result<Self> {
        Self::from_values(self.edges.clone(), values)
    }

    /// `Σ value × width` over the bins up to (and including) the one containing `upto`.
    pub fn integral_width(&self, upto: f64) -> f64 {
        let last = self.edges.find_bin(upto);
        (0..=last).map(|i| self.values[i] * self.edges.width(i)).sum()
    }
}
