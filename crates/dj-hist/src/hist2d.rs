//! Two-dimensional binned distribution over (Δφ, Δη).
//!
//! Axis A is Δφ and axis B is Δη. Storage is row-major with A as the outer
//! index: bin `(ia, ib)` lives at `ia * n_b + ib`.

use dj_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::edges::BinEdges;
use crate::hist1d::{BinnedDistribution1D, check_errors};

/// Axis of a two-dimensional distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Δφ.
    A,
    /// Δη.
    B,
}

/// Reflections used by [`BinnedDistribution2D::symmetrize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldAxes {
    /// Reflect A → −A.
    A,
    /// Reflect B → −B.
    B,
    /// Reflect both axes (four-fold).
    Both,
}

/// Result of averaging one axis over a window.
#[derive(Debug, Clone)]
pub struct RangeProjection {
    /// Profile along the kept axis: mean over the selected orthogonal bins.
    pub profile: BinnedDistribution1D,
    /// Number of orthogonal bins averaged.
    pub n_bins: usize,
    /// Total width of the averaged orthogonal bins.
    pub span: f64,
}

impl RangeProjection {
    /// Mean width of the averaged orthogonal bins.
    pub fn mean_width(&self) -> f64 {
        self.span / self.n_bins as f64
    }

    /// Unnormalized range sum (`profile × n_bins`).
    pub fn sum(&self) -> BinnedDistribution1D {
        self.profile.scaled(self.n_bins as f64)
    }
}

/// Two edge sequences plus value and uncertainty matrices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinnedDistribution2D {
    a: BinEdges,
    b: BinEdges,
    values: Vec<f64>,
    errors: Vec<f64>,
}

impl BinnedDistribution2D {
    /// Create a distribution from row-major value and uncertainty matrices.
    pub fn new(a: BinEdges, b: BinEdges, values: Vec<f64>, errors: Vec<f64>) -> Result<Self> {
        let n = a.n_bins() * b.n_bins();
        if values.len() != n || errors.len() != n {
            return Err(Error::Validation(format!(
                "2D distribution with {}x{} bins got {} values and {} errors",
                a.n_bins(),
                b.n_bins(),
                values.len(),
                errors.len()
            )));
        }
        check_errors(&errors)?;
        Ok(Self { a, b, values, errors })
    }

    /// Every bin set to `value ± error`.
    pub fn filled(a: BinEdges, b: BinEdges, value: f64, error: f64) -> Self {
        let n = a.n_bins() * b.n_bins();
        Self { a, b, values: vec![value; n], errors: vec![error.abs(); n] }
    }

    /// Build from a function of the bin centres returning `(value, error)`.
    pub fn from_fn(a: BinEdges, b: BinEdges, f: impl Fn(f64, f64) -> (f64, f64)) -> Result<Self> {
        let mut values = Vec::with_capacity(a.n_bins() * b.n_bins());
        let mut errors = Vec::with_capacity(values.capacity());
        for ia in 0..a.n_bins() {
            for ib in 0..b.n_bins() {
                let (v, e) = f(a.center(ia), b.center(ib));
                values.push(v);
                errors.push(e);
            }
        }
        Self::new(a, b, values, errors)
    }

    /// Axis A (Δφ) edges.
    pub fn a_edges(&self) -> &BinEdges {
        &self.a
    }

    /// Axis B (Δη) edges.
    pub fn b_edges(&self) -> &BinEdges {
        &self.b
    }

    /// Edges of the given axis.
    pub fn edges(&self, axis: Axis) -> &BinEdges {
        match axis {
            Axis::A => &self.a,
            Axis::B => &self.b,
        }
    }

    /// Number of A bins.
    pub fn n_a(&self) -> usize {
        self.a.n_bins()
    }

    /// Number of B bins.
    pub fn n_b(&self) -> usize {
        self.b.n_bins()
    }

    /// Row-major values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Row-major uncertainties.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Flat index of bin `(ia, ib)`.
    pub fn index(&self, ia: usize, ib: usize) -> usize {
        ia * self.n_b() + ib
    }

    /// Value of bin `(ia, ib)`.
    pub fn value(&self, ia: usize, ib: usize) -> f64 {
        self.values[self.index(ia, ib)]
    }

    /// Uncertainty of bin `(ia, ib)`.
    pub fn error(&self, ia: usize, ib: usize) -> f64 {
        self.errors[self.index(ia, ib)]
    }

    /// True when both axes match.
    pub fn same_binning(&self, other: &Self) -> bool {
        self.a.matches(&other.a) && self.b.matches(&other.b)
    }

    fn ensure_same_binning(&self, other: &Self, op: &str) -> Result<()> {
        if !self.same_binning(other) {
            return Err(Error::InvalidBinning(format!(
                "{op}: binning mismatch ({}x{} vs {}x{})",
                self.n_a(),
                self.n_b(),
                other.n_a(),
                other.n_b()
            )));
        }
        Ok(())
    }

    /// Bin-wise division.
    ///
    /// Uncertainties follow uncorrelated propagation,
    /// `σ² = (σa² b² + σb² a²) / b⁴`. Bins with a zero denominator are set to
    /// zero.
    pub fn divide(&self, denominator: &Self) -> Result<Self> {
        self.ensure_same_binning(denominator, "divide")?;
        let mut values = Vec::with_capacity(self.values.len());
        let mut errors = Vec::with_capacity(self.values.len());
        for i in 0..self.values.len() {
            let (a, ea) = (self.values[i], self.errors[i]);
            let (b, eb) = (denominator.values[i], denominator.errors[i]);
            if b == 0.0 {
                values.push(0.0);
                errors.push(0.0);
                continue;
            }
            let b2 = b * b;
            values.push(a / b);
            errors.push(((ea * ea * b2 + eb * eb * a * a) / (b2 * b2)).sqrt());
        }
        Ok(Self { a: self.a.clone(), b: self.b.clone(), values, errors })
    }

    /// Bin-wise difference, uncertainties in quadrature.
    pub fn subtract(&self, other: &Self) -> Result<Self> {
        self.ensure_same_binning(other, "subtract")?;
        Ok(self.combine(other, |x, y| x - y))
    }

    /// Bin-wise sum, uncertainties in quadrature.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.ensure_same_binning(other, "add")?;
        Ok(self.combine(other, |x, y| x + y))
    }

    fn combine(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self {
            a: self.a.clone(),
            b: self.b.clone(),
            values: self.values.iter().zip(&other.values).map(|(&x, &y)| f(x, y)).collect(),
            errors: self.errors.iter().zip(&other.errors).map(|(x, y)| x.hypot(*y)).collect(),
        }
    }

    /// Multiply every bin (and its uncertainty) by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            a: self.a.clone(),
            b: self.b.clone(),
            values: self.values.iter().map(|v| v * factor).collect(),
            errors: self.errors.iter().map(|e| e * factor.abs()).collect(),
        }
    }

    /// Keep bins whose centre satisfies `keep`, zeroing all others.
    pub fn masked(&self, keep: impl Fn(f64, f64) -> bool) -> Self {
        let mut out = self.clone();
        for ia in 0..self.n_a() {
            for ib in 0..self.n_b() {
                if !keep(self.a.center(ia), self.b.center(ib)) {
                    let i = self.index(ia, ib);
                    out.values[i] = 0.0;
                    out.errors[i] = 0.0;
                }
            }
        }
        out
    }

    /// Merge bins into the aligned coarser binning on both axes.
    pub fn rebin(&self, target_a: &BinEdges, target_b: &BinEdges) -> Result<Self> {
        let map_a = self.a.coarsening_map(target_a)?;
        let map_b = self.b.coarsening_map(target_b)?;
        let nb = target_b.n_bins();
        let n = target_a.n_bins() * nb;
        let mut values = vec![0.0; n];
        let mut sumsq = vec![0.0; n];
        for (ia, &ja) in map_a.iter().enumerate() {
            for (ib, &jb) in map_b.iter().enumerate() {
                let src = self.index(ia, ib);
                let dst = ja * nb + jb;
                values[dst] += self.values[src];
                sumsq[dst] += self.errors[src] * self.errors[src];
            }
        }
        Ok(Self {
            a: target_a.clone(),
            b: target_b.clone(),
            values,
            errors: sumsq.into_iter().map(f64::sqrt).collect(),
        })
    }

    /// Average reflection-related bins within `radius_cutoff` of the origin.
    ///
    /// Each orbit of mirror bins gets the mean content and the combined
    /// uncertainty `sqrt(Σσ²) / n`. Bins outside the cutoff are copied as is.
    pub fn symmetrize(&self, radius_cutoff: f64, fold: FoldAxes) -> Result<Self> {
        let mut out = self.clone();
        let mut done = vec![false; self.values.len()];

        for ia in 0..self.n_a() {
            for ib in 0..self.n_b() {
                let i = self.index(ia, ib);
                if done[i] || self.a.center(ia).hypot(self.b.center(ib)) > radius_cutoff {
                    continue;
                }

                let orbit = self.orbit(ia, ib, fold)?;
                let n = orbit.len() as f64;
                let mean = orbit.iter().map(|&k| self.values[k]).sum::<f64>() / n;
                let err = orbit.iter().map(|&k| self.errors[k].powi(2)).sum::<f64>().sqrt() / n;
                for &k in &orbit {
                    out.values[k] = mean;
                    out.errors[k] = err;
                    done[k] = true;
                }
            }
        }
        Ok(out)
    }

    fn orbit(&self, ia: usize, ib: usize, fold: FoldAxes) -> Result<Vec<usize>> {
        let mirror = |edges: &BinEdges, i: usize, axis: &str| {
            edges.mirror(i).ok_or_else(|| {
                Error::InvalidBinning(format!(
                    "no mirror bin on axis {axis} for centre {}; binning is not symmetric",
                    edges.center(i)
                ))
            })
        };
        let (fold_a, fold_b) = match fold {
            FoldAxes::A => (true, false),
            FoldAxes::B => (false, true),
            FoldAxes::Both => (true, true),
        };
        let ma = if fold_a { mirror(&self.a, ia, "A")? } else { ia };
        let mb = if fold_b { mirror(&self.b, ib, "B")? } else { ib };

        let mut orbit = vec![
            self.index(ia, ib),
            self.index(ma, ib),
            self.index(ia, mb),
            self.index(ma, mb),
        ];
        orbit.sort_unstable();
        orbit.dedup();
        Ok(orbit)
    }

    /// Average the axis orthogonal to `keep` over bins whose centre lies in `[low, high]`.
    pub fn project_range(&self, keep: Axis, low: f64, high: f64) -> Result<RangeProjection> {
        self.project_ranges(keep, &[(low, high)])
    }

    /// Like [`Self::project_range`] for a union of windows.
    pub fn project_ranges(&self, keep: Axis, windows: &[(f64, f64)]) -> Result<RangeProjection> {
        let (kept, other) = match keep {
            Axis::A => (&self.a, &self.b),
            Axis::B => (&self.b, &self.a),
        };
        let selected: Vec<usize> = (0..other.n_bins())
            .filter(|&j| {
                let c = other.center(j);
                windows.iter().any(|&(lo, hi)| c >= lo && c <= hi)
            })
            .collect();
        if selected.is_empty() {
            return Err(Error::InvalidBinning(format!(
                "projection windows {windows:?} select no bins on [{}, {}]",
                other.low(),
                other.high()
            )));
        }

        let n = selected.len() as f64;
        let mut values = Vec::with_capacity(kept.n_bins());
        let mut errors = Vec::with_capacity(kept.n_bins());
        for k in 0..kept.n_bins() {
            let (mut sum, mut sumsq) = (0.0, 0.0);
            for &j in &selected {
                let idx = match keep {
                    Axis::A => self.index(k, j),
                    Axis::B => self.index(j, k),
                };
                sum += self.values[idx];
                sumsq += self.errors[idx] * self.errors[idx];
            }
            values.push(sum / n);
            errors.push(sumsq.sqrt() / n);
        }

        Ok(RangeProjection {
            profile: BinnedDistribution1D::new(kept.clone(), values, errors)?,
            n_bins: selected.len(),
            span: selected.iter().map(|&j| other.width(j)).sum(),
        })
    }

    /// Mean content of bins whose centre lies inside the rectangle, and their count.
    pub fn window_mean(&self, a_range: (f64, f64), b_range: (f64, f64)) -> Result<(f64, usize)> {
        let inside = |c: f64, (lo, hi): (f64, f64)| c >= lo && c <= hi;
        let (mut sum, mut n) = (0.0, 0usize);
        for ia in (0..self.n_a()).filter(|&ia| inside(self.a.center(ia), a_range)) {
            for ib in (0..self.n_b()).filter(|&ib| inside(self.b.center(ib), b_range)) {
                sum += self.value(ia, ib);
                n += 1;
            }
        }
        if n == 0 {
            return Err(Error::InvalidBinning(format!(
                "window A{a_range:?} x B{b_range:?} contains no bin centres"
            )));
        }
        Ok((sum / n as f64, n))
    }
}
