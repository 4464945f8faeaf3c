//! Long-range background in Δφ.
//!
//! The acceptance-corrected correlation is averaged over the large-|Δη|
//! sidebands, where the jet peak does not contribute, and the resulting Δφ
//! profile is fitted with
//!
//! ```text
//! f(Δφ) = b0 + Σ_{n=1..N} b_n cos(n Δφ)
//! ```
//!
//! by χ² minimization. The fitted function is then evaluated over every
//! (Δφ, Δη) bin to form the background distribution.

use dj_core::{Error, Result};
use dj_hist::{Axis, BinnedDistribution1D, BinnedDistribution2D};
use serde::{Deserialize, Serialize};

use crate::optimizer::{LbfgsbMinimizer, MinimizerConfig, Objective};

fn default_harmonics() -> usize {
    4
}

fn default_sideband() -> (f64, f64) {
    (1.5, 2.5)
}

/// Background fit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Number of cosine harmonics `N`.
    #[serde(default = "default_harmonics")]
    pub harmonics: usize,
    /// `|Δη|` range of the sidebands, used on both sides.
    #[serde(default = "default_sideband")]
    pub sideband: (f64, f64),
    /// Minimizer settings.
    #[serde(default)]
    pub minimizer: MinimizerConfig,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self { harmonics: default_harmonics(), sideband: default_sideband(), minimizer: MinimizerConfig::default() }
    }
}

/// Fitted Fourier series in Δφ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FourierBackground {
    /// `[b0, b1, ..., bN]`.
    pub coefficients: Vec<f64>,
}

impl FourierBackground {
    /// Evaluate at `dphi`.
    pub fn eval(&self, dphi: f64) -> f64 {
        harmonic_sum(&self.coefficients, dphi)
    }
}

fn harmonic_sum(c: &[f64], x: f64) -> f64 {
    c.iter().enumerate().map(|(n, b)| b * basis(n, x)).sum()
}

fn basis(n: usize, x: f64) -> f64 {
    if n == 0 { 1.0 } else { (n as f64 * x).cos() }
}

/// Fit diagnostics recorded in run provenance.
#[derive(Debug, Clone, Serialize)]
pub struct FitReport {
    /// Minimizer convergence flag.
    pub converged: bool,
    /// Minimizer termination message.
    pub message: String,
    /// Best-fit `[b0, ..., bN]`.
    pub parameters: Vec<f64>,
    /// χ² at the minimum.
    pub chi2: f64,
    /// Degrees of freedom (points − parameters).
    pub ndf: i64,
    /// Minimizer iterations.
    pub n_iter: u64,
}

/// Result of [`BackgroundModel::fit`].
#[derive(Debug, Clone)]
pub struct BackgroundFit {
    /// Fitted function.
    pub model: FourierBackground,
    /// Diagnostics.
    pub report: FitReport,
    /// Sideband Δφ profile the fit was performed on.
    pub sideband_profile: BinnedDistribution1D,
}

/// χ² of a linear model `Σ_n p_n basis(n, x)` against a binned profile.
pub(crate) struct Chi2<'a> {
    x: Vec<f64>,
    y: &'a [f64],
    w: Vec<f64>,
    basis: fn(usize, f64) -> f64,
}

impl<'a> Chi2<'a> {
    pub(crate) fn new(profile: &'a BinnedDistribution1D, basis: fn(usize, f64) -> f64) -> Self {
        let edges = profile.edges();
        Self {
            x: (0..profile.n_bins()).map(|i| edges.center(i)).collect(),
            y: profile.values(),
            w: profile.errors().iter().map(|&e| if e > 0.0 { 1.0 / (e * e) } else { 1.0 }).collect(),
            basis,
        }
    }

    fn model(&self, params: &[f64], x: f64) -> f64 {
        params.iter().enumerate().map(|(n, p)| p * (self.basis)(n, x)).sum()
    }
}

impl Objective for Chi2<'_> {
    fn value(&self, params: &[f64]) -> Result<f64> {
        Ok(self
            .x
            .iter()
            .zip(self.y)
            .zip(&self.w)
            .map(|((&x, &y), &w)| w * (y - self.model(params, x)).powi(2))
            .sum())
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut g = vec![0.0; params.len()];
        for ((&x, &y), &w) in self.x.iter().zip(self.y).zip(&self.w) {
            let r = -2.0 * w * (y - self.model(params, x));
            for (n, gn) in g.iter_mut().enumerate() {
                *gn += r * (self.basis)(n, x);
            }
        }
        Ok(g)
    }
}

/// Fits and evaluates the long-range background.
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    config: BackgroundConfig,
}

impl BackgroundModel {
    /// Validate settings and build the model.
    pub fn new(config: BackgroundConfig) -> Result<Self> {
        let (lo, hi) = config.sideband;
        if !(lo >= 0.0 && lo < hi) {
            return Err(Error::Configuration(format!(
                "background sideband must satisfy 0 <= min < max, got ({lo}, {hi})"
            )));
        }
        Ok(Self { config })
    }

    /// Sideband `|Δη|` range.
    pub fn sideband(&self) -> (f64, f64) {
        self.config.sideband
    }

    /// True when a Δη value lies in either sideband.
    pub fn in_sideband(&self, deta: f64) -> bool {
        let (lo, hi) = self.config.sideband;
        deta.abs() >= lo && deta.abs() <= hi
    }

    /// Δφ profile of `corrected` averaged over both Δη sidebands.
    pub fn sideband_profile(&self, corrected: &BinnedDistribution2D) -> Result<BinnedDistribution1D> {
        let (lo, hi) = self.config.sideband;
        Ok(corrected.project_ranges(Axis::A, &[(-hi, -lo), (lo, hi)])?.profile)
    }

    /// Fit the sideband profile of `corrected`.
    ///
    /// Non-convergence is reported in [`FitReport::converged`], not as an error.
    pub fn fit(&self, corrected: &BinnedDistribution2D) -> Result<BackgroundFit> {
        let profile = self.sideband_profile(corrected)?;
        let n_par = self.config.harmonics + 1;
        if profile.n_bins() < n_par {
            return Err(Error::Computation(format!(
                "{} Δφ points cannot constrain {n_par} background parameters",
                profile.n_bins()
            )));
        }

        if let Some(level) = self.constant_sideband(corrected) {
            let mut parameters = vec![0.0; n_par];
            parameters[0] = level;
            let chi2 = Chi2::new(&profile, basis).value(&parameters)?;
            log::debug!("sideband is flat at {level}, background fit skipped");
            return Ok(BackgroundFit {
                model: FourierBackground { coefficients: parameters.clone() },
                report: FitReport {
                    converged: true,
                    message: "constant sideband".to_string(),
                    parameters,
                    chi2,
                    ndf: profile.n_bins() as i64 - n_par as i64,
                    n_iter: 0,
                },
                sideband_profile: profile,
            });
        }

        let mean = profile.values().iter().sum::<f64>() / profile.n_bins() as f64;
        let mut init = vec![0.0; n_par];
        init[0] = mean;
        let bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); n_par];

        let chi2 = Chi2::new(&profile, basis);
        let min = LbfgsbMinimizer::new(self.config.minimizer.clone()).minimize(&chi2, &init, &bounds)?;
        if !min.converged {
            log::warn!("background fit did not converge: {}", min.message);
        }

        Ok(BackgroundFit {
            model: FourierBackground { coefficients: min.parameters.clone() },
            report: FitReport {
                converged: min.converged,
                message: min.message,
                parameters: min.parameters,
                chi2: min.fval,
                ndf: profile.n_bins() as i64 - n_par as i64,
                n_iter: min.n_iter,
            },
            sideband_profile: profile,
        })
    }

    /// Common value of every sideband bin, when they are all bit-identical.
    fn constant_sideband(&self, corrected: &BinnedDistribution2D) -> Option<f64> {
        let mut level = None;
        for ib in 0..corrected.n_b() {
            if !self.in_sideband(corrected.b_edges().center(ib)) {
                continue;
            }
            for ia in 0..corrected.n_a() {
                let v = corrected.value(ia, ib);
                match level {
                    None => level = Some(v),
                    Some(l) if l.to_bits() != v.to_bits() => return None,
                    Some(_) => {}
                }
            }
        }
        level
    }

    /// Background distribution on the binning of `like`: the fitted function at
    /// each Δφ bin centre, constant in Δη, without uncertainty.
    pub fn evaluate(
        &self,
        model: &FourierBackground,
        like: &BinnedDistribution2D,
    ) -> Result<BinnedDistribution2D> {
        BinnedDistribution2D::from_fn(like.a_edges().clone(), like.b_edges().clone(), |dphi, _| {
            (model.eval(dphi), 0.0)
        })
    }

    /// `corrected − background`, restricted to the sidebands; zero elsewhere.
    pub fn overlap(
        &self,
        corrected: &BinnedDistribution2D,
        background: &BinnedDistribution2D,
    ) -> Result<BinnedDistribution2D> {
        Ok(corrected.subtract(background)?.masked(|_, deta| self.in_sideband(deta)))
    }
}

/// `corrected − background`, bin by bin.
pub fn subtract(
    corrected: &BinnedDistribution2D,
    background: &BinnedDistribution2D,
) -> Result<BinnedDistribution2D> {
    corrected.subtract(background)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dj_hist::BinEdges;
    use std::f64::consts::PI;

    fn axes() -> (BinEdges, BinEdges) {
        (BinEdges::uniform(24, -PI / 2.0, 3.0 * PI / 2.0).unwrap(), BinEdges::uniform(20, -2.5, 2.5).unwrap())
    }

    #[test]
    fn recovers_harmonics() {
        let (a, b) = axes();
        let truth = [10.0, 0.0, 0.8, -0.3];
        let corrected = BinnedDistribution2D::from_fn(a, b, |x, y| {
            let peak = 5.0 * (-(x * x + y * y) / 0.05).exp();
            (harmonic_sum(&truth, x) + peak, 0.1)
        })
        .unwrap();

        let model = BackgroundModel::new(BackgroundConfig { harmonics: 3, ..Default::default() }).unwrap();
        let fit = model.fit(&corrected).unwrap();
        assert!(fit.report.converged, "{}", fit.report.message);
        for (got, want) in fit.model.coefficients.iter().zip(truth) {
            assert_relative_eq!(*got, want, epsilon = 1e-4);
        }
        assert_eq!(fit.report.ndf, 24 - 4);
    }

    #[test]
    fn constant_background_subtracts_to_exact_zero() {
        let model = BackgroundModel::new(BackgroundConfig::default()).unwrap();
        for level in [0.1, 1.7, 7.25] {
            let (a, b) = axes();
            let corrected = BinnedDistribution2D::filled(a, b, level, 0.5);
            let fit = model.fit(&corrected).unwrap();
            assert!(fit.report.converged);
            assert_eq!(fit.model.coefficients, vec![level, 0.0, 0.0, 0.0, 0.0]);
            let bkg = model.evaluate(&fit.model, &corrected).unwrap();
            let sub = subtract(&corrected, &bkg).unwrap();
            assert!(sub.values().iter().all(|&v| v == 0.0), "level {level}");
        }
    }

    #[test]
    fn peak_outside_sidebands_keeps_flat_level() {
        let (a, b) = axes();
        let corrected = BinnedDistribution2D::from_fn(a, b, |x, y| {
            let peak = if y.abs() < 0.5 { 3.0 * (-x * x).exp() } else { 0.0 };
            (0.3 + peak, 0.1)
        })
        .unwrap();
        let model = BackgroundModel::new(BackgroundConfig::default()).unwrap();
        let fit = model.fit(&corrected).unwrap();
        assert_eq!(fit.report.n_iter, 0);
        let bkg = model.evaluate(&fit.model, &corrected).unwrap();
        let sub = subtract(&corrected, &bkg).unwrap();
        for ia in 0..sub.n_a() {
            for ib in 0..sub.n_b() {
                if model.in_sideband(sub.b_edges().center(ib)) {
                    assert_eq!(sub.value(ia, ib), 0.0);
                }
            }
        }
    }

    #[test]
    fn subtraction_is_exact() {
        let (a, b) = axes();
        let corrected = BinnedDistribution2D::from_fn(a, b, |x, y| (3.0 + x.cos() + y, 0.2)).unwrap();
        let model = BackgroundModel::new(BackgroundConfig::default()).unwrap();
        let fit = model.fit(&corrected).unwrap();
        let bkg = model.evaluate(&fit.model, &corrected).unwrap();
        let sub = subtract(&corrected, &bkg).unwrap();
        for i in 0..sub.values().len() {
            assert_eq!(sub.values()[i], corrected.values()[i] - bkg.values()[i]);
        }
    }

    #[test]
    fn overlap_is_zero_outside_sidebands() {
        let (a, b) = axes();
        let corrected = BinnedDistribution2D::from_fn(a, b, |x, _| (2.0 + x.cos(), 0.1)).unwrap();
        let model = BackgroundModel::new(BackgroundConfig::default()).unwrap();
        let fit = model.fit(&corrected).unwrap();
        let bkg = model.evaluate(&fit.model, &corrected).unwrap();
        let overlap = model.overlap(&corrected, &bkg).unwrap();
        for ia in 0..overlap.n_a() {
            for ib in 0..overlap.n_b() {
                let deta = overlap.b_edges().center(ib);
                if !model.in_sideband(deta) {
                    assert_eq!(overlap.value(ia, ib), 0.0);
                } else {
                    assert_relative_eq!(overlap.value(ia, ib), 0.0, epsilon = 1e-4);
                }
            }
        }
    }

    #[test]
    fn invalid_sideband_rejected() {
        let c = BackgroundConfig { sideband: (2.0, 1.0), ..Default::default() };
        assert!(matches!(BackgroundModel::new(c), Err(Error::Configuration(_))));
    }
}
