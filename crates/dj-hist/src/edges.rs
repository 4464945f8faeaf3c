//! Validated bin-edge sequences and bin lookup.

use dj_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Relative tolerance used when comparing edges from different sources.
const EDGE_TOL: f64 = 1e-9;

fn edges_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= EDGE_TOL * a.abs().max(b.abs()).max(1.0)
}

/// Strictly increasing bin edges (`n_bins + 1` values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct BinEdges {
    edges: Vec<f64>,
}

impl BinEdges {
    /// Validate and wrap an edge sequence.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::InvalidBinning(format!(
                "need at least 2 edges, got {}",
                edges.len()
            )));
        }
        if let Some(bad) = edges.iter().find(|e| !e.is_finite()) {
            return Err(Error::InvalidBinning(format!("non-finite edge {bad}")));
        }
        if let Some(w) = edges.windows(2).find(|w| w[1] <= w[0]) {
            return Err(Error::InvalidBinning(format!(
                "edges must be strictly increasing ({} followed by {})",
                w[0], w[1]
            )));
        }
        Ok(Self { edges })
    }

    /// `n_bins` equal-width bins on `[low, high]`.
    pub fn uniform(n_bins: usize, low: f64, high: f64) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::InvalidBinning("uniform binning needs n_bins > 0".into()));
        }
        let step = (high - low) / n_bins as f64;
        let mut edges: Vec<f64> = (0..n_bins).map(|i| low + step * i as f64).collect();
        edges.push(high);
        Self::new(edges)
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Raw edge values.
    pub fn as_slice(&self) -> &[f64] {
        &self.edges
    }

    /// Lower edge of the first bin.
    pub fn low(&self) -> f64 {
        self.edges[0]
    }

    /// Upper edge of the last bin.
    pub fn high(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// Lower edge of bin `i`.
    pub fn lower(&self, i: usize) -> f64 {
        self.edges[i]
    }

    /// Upper edge of bin `i`.
    pub fn upper(&self, i: usize) -> f64 {
        self.edges[i + 1]
    }

    /// Width of bin `i`.
    pub fn width(&self, i: usize) -> f64 {
        self.edges[i + 1] - self.edges[i]
    }

    /// Centre of bin `i`.
    pub fn center(&self, i: usize) -> f64 {
        0.5 * (self.edges[i] + self.edges[i + 1])
    }

    /// Bin containing `x`, or `None` outside the range.
    ///
    /// Bins are closed below and open above, except the last bin which also
    /// contains the upper edge.
    pub fn locate(&self, x: f64) -> Option<usize> {
        if !(x >= self.low() && x <= self.high()) {
            return None;
        }
        let above = self.edges.partition_point(|&e| e <= x);
        Some(above.saturating_sub(1).min(self.n_bins() - 1))
    }

    /// Bin containing `x`, clamping out-of-range values to the boundary bin.
    ///
    /// Points just outside the range usually come from floating point jitter
    /// on computed window limits, so they are logged instead of rejected.
    pub fn find_bin(&self, x: f64) -> usize {
        if let Some(i) = self.locate(x) {
            return i;
        }
        let clamped = if x < self.low() { 0 } else { self.n_bins() - 1 };
        log::debug!(
            "bin lookup for {x} outside [{}, {}], clamped to bin {clamped}",
            self.low(),
            self.high()
        );
        clamped
    }

    /// True when both sequences describe the same bins.
    pub fn matches(&self, other: &BinEdges) -> bool {
        self.edges.len() == other.edges.len()
            && self.edges.iter().zip(&other.edges).all(|(&a, &b)| edges_match(a, b))
    }

    /// Map every source bin onto the `target` bin that contains it.
    ///
    /// `target` must be a coarsening of `self`: same outer edges and every
    /// target edge equal to one of the source edges.
    pub fn coarsening_map(&self, target: &BinEdges) -> Result<Vec<usize>> {
        if !edges_match(self.low(), target.low()) || !edges_match(self.high(), target.high()) {
            return Err(Error::InvalidBinning(format!(
                "rebin range [{}, {}] does not match source range [{}, {}]",
                target.low(),
                target.high(),
                self.low(),
                self.high()
            )));
        }

        let mut boundaries = Vec::with_capacity(target.edges.len());
        let mut from = 0;
        for &t in &target.edges {
            let pos = self.edges[from..].iter().position(|&s| edges_match(s, t)).ok_or_else(|| {
                Error::InvalidBinning(format!(
                    "rebin edge {t} falls inside a source bin; partial overlaps are not allowed"
                ))
            })?;
            from += pos;
            boundaries.push(from);
        }

        let mut map = Vec::with_capacity(self.n_bins());
        for (j, w) in boundaries.windows(2).enumerate() {
            map.extend(std::iter::repeat_n(j, w[1] - w[0]));
        }
        Ok(map)
    }

    /// Bin whose centre is the reflection `-center(i)`.
    pub fn mirror(&self, i: usize) -> Option<usize> {
        let c = self.center(i);
        let j = self.locate(-c)?;
        let tol = 1e-6 * self.width(i).min(self.width(j));
        ((self.center(j) + c).abs() <= tol).then_some(j)
    }
}

impl TryFrom<Vec<f64>> for BinEdges {
    type Error = Error;

    fn try_from(edges: Vec<f64>) -> Result<Self> {
        Self::new(edges)
    }
}

impl From<BinEdges> for Vec<f64> {
    fn from(e: BinEdges) -> Self {
        e.edges
    }
}
