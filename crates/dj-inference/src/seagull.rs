//! Seagull correction of the acceptance-corrected correlation.
//!
//! Residual pair-acceptance effects leave a Δη-dependent pedestal under the
//! long-range background. The Δη profile over a background Δφ window is
//! fitted with
//!
//! ```text
//! q(Δη) = Σ_{k=0..K} c_k Δη^k
//! ```
//!
//! and every bin is scaled by `q(0) / q(Δη)`, which flattens the pedestal
//! while keeping its level at Δη = 0. A degree-0 polynomial leaves the
//! distribution unchanged.

use dj_core::{Error, Result};
use dj_hist::{Axis, BinnedDistribution1D, BinnedDistribution2D};
use serde::{Deserialize, Serialize};

use crate::background::{Chi2, FitReport};
use crate::optimizer::{LbfgsbMinimizer, MinimizerConfig};

fn default_degree() -> usize {
    2
}

/// Seagull fit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeagullConfig {
    /// Δφ window treated as background.
    pub background_delta_phi: (f64, f64),
    /// Polynomial degree in Δη.
    #[serde(default = "default_degree")]
    pub degree: usize,
    /// Minimizer settings.
    #[serde(default)]
    pub minimizer: MinimizerConfig,
}

fn power(k: usize, x: f64) -> f64 {
    x.powi(k as i32)
}

/// Fitted seagull polynomial and the profile it was fitted on.
#[derive(Debug, Clone)]
pub struct SeagullFit {
    /// `[c0, ..., cK]`.
    pub coefficients: Vec<f64>,
    /// Diagnostics.
    pub report: FitReport,
    /// Background Δη profile.
    pub profile: BinnedDistribution1D,
}

impl SeagullFit {
    /// `q(Δη)`.
    pub fn eval(&self, deta: f64) -> f64 {
        self.coefficients.iter().enumerate().map(|(k, c)| c * power(k, deta)).sum()
    }
}

/// Fits and removes the Δη pedestal.
#[derive(Debug, Clone)]
pub struct SeagullCorrection {
    config: SeagullConfig,
}

impl SeagullCorrection {
    /// Validate settings.
    pub fn new(config: SeagullConfig) -> Result<Self> {
        let (lo, hi) = config.background_delta_phi;
        if !(lo < hi) {
            return Err(Error::Configuration(format!(
                "seagull background Δφ window must satisfy min < max, got ({lo}, {hi})"
            )));
        }
        if config.degree > 4 {
            return Err(Error::Configuration(format!(
                "seagull polynomial degree must be <= 4, got {}",
                config.degree
            )));
        }
        Ok(Self { config })
    }

    /// Fit the background Δη profile of `corrected`.
    pub fn fit(&self, corrected: &BinnedDistribution2D) -> Result<SeagullFit> {
        let (lo, hi) = self.config.background_delta_phi;
        let profile = corrected.project_range(Axis::B, lo, hi)?.profile;
        let n_par = self.config.degree + 1;
        if profile.n_bins() < n_par {
            return Err(Error::Computation(format!(
                "{} Δη points cannot constrain a degree {} seagull polynomial",
                profile.n_bins(),
                self.config.degree
            )));
        }

        let mut init = vec![0.0; n_par];
        init[0] = profile.values().iter().sum::<f64>() / profile.n_bins() as f64;
        let bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); n_par];
        let chi2 = Chi2::new(&profile, power);
        let min = LbfgsbMinimizer::new(self.config.minimizer.clone()).minimize(&chi2, &init, &bounds)?;
        if !min.converged {
            log::warn!("seagull fit did not converge: {}", min.message);
        }

        Ok(SeagullFit {
            coefficients: min.parameters.clone(),
            report: FitReport {
                converged: min.converged,
                message: min.message,
                parameters: min.parameters,
                chi2: min.fval,
                ndf: profile.n_bins() as i64 - n_par as i64,
                n_iter: min.n_iter,
            },
            profile,
        })
    }

    /// Scale every Δη column of `corrected` by `q(0) / q(Δη)`.
    pub fn apply(&self, fit: &SeagullFit, corrected: &BinnedDistribution2D) -> Result<BinnedDistribution2D> {
        if self.config.degree == 0 {
            return Ok(corrected.clone());
        }
        let centre = fit.eval(0.0);
        let b = corrected.b_edges();
        let mut factors = Vec::with_capacity(corrected.n_b());
        for ib in 0..corrected.n_b() {
            let q = fit.eval(b.center(ib));
            if !(q > 0.0 && centre > 0.0) {
                return Err(Error::Computation(format!(
                    "seagull polynomial is not positive at Δη = {} (q = {q}, q(0) = {centre})",
                    b.center(ib)
                )));
            }
            factors.push(centre / q);
        }
        let mut values = Vec::with_capacity(corrected.values().len());
        let mut errors = Vec::with_capacity(corrected.values().len());
        for ia in 0..corrected.n_a() {
            for (ib, f) in factors.iter().enumerate() {
                values.push(corrected.value(ia, ib) * f);
                errors.push(corrected.error(ia, ib) * f);
            }
        }
        BinnedDistribution2D::new(corrected.a_edges().clone(), b.clone(), values, errors)
    }

    /// Fit and apply.
    pub fn correct(&self, corrected: &BinnedDistribution2D) -> Result<(BinnedDistribution2D, FitReport)> {
        let fit = self.fit(corrected)?;
        let out = self.apply(&fit, corrected)?;
        Ok((out, fit.report))
    }
}
