//! Mixed-event normalization and pair-acceptance correction.
//!
//! The mixed-event distribution measures the detector pair acceptance. It is
//! scaled so that its mean content inside an off-peak reference window equals
//! a configured reference level, and the same-event distribution is divided
//! by the scaled result.

use dj_core::{Error, Result};
use dj_hist::BinnedDistribution2D;
use serde::{Deserialize, Serialize};

/// Rectangular window in (Δφ, Δη), inclusive on bin centres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffPeakWindow {
    /// Δφ range.
    pub delta_phi: (f64, f64),
    /// Δη range.
    pub delta_eta: (f64, f64),
}

/// How the normalization scale of a slice is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixingMode {
    /// Scale from the slice's own mixed event.
    #[default]
    Single,
    /// Mean of the slice scale and the partner category's scale.
    Average,
}

/// Mixed-event normalization settings. `window` and `reference_level` have
/// no defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixingConfig {
    /// Reference window.
    pub window: OffPeakWindow,
    /// Target mean content inside the window.
    pub reference_level: f64,
    /// Scale selection.
    #[serde(default)]
    pub mode: MixingMode,
}

/// Normalized mixed event plus the factor that produced it.
#[derive(Debug, Clone)]
pub struct NormalizedMixedEvent {
    /// Scaled distribution.
    pub distribution: BinnedDistribution2D,
    /// Applied scale factor.
    pub scale: f64,
}

/// Applies [`MixingConfig`] to mixed-event distributions.
#[derive(Debug, Clone)]
pub struct MixedEventNormalizer {
    config: MixingConfig,
}

impl MixedEventNormalizer {
    /// Validate the configuration and build a normalizer.
    pub fn new(config: MixingConfig) -> Result<Self> {
        let w = config.window;
        if !(w.delta_phi.0 <= w.delta_phi.1 && w.delta_eta.0 <= w.delta_eta.1) {
            return Err(Error::Configuration(format!(
                "mixed-event window must have low <= high, got {w:?}"
            )));
        }
        if !(config.reference_level.is_finite() && config.reference_level > 0.0) {
            return Err(Error::Configuration(format!(
                "mixed-event reference level must be > 0, got {}",
                config.reference_level
            )));
        }
        Ok(Self { config })
    }

    /// Configured mode.
    pub fn mode(&self) -> MixingMode {
        self.config.mode
    }

    /// Factor that brings the window mean of `mixed` to the reference level.
    pub fn scale(&self, mixed: &BinnedDistribution2D) -> Result<f64> {
        let w = self.config.window;
        let (mean, _) = mixed.window_mean(w.delta_phi, w.delta_eta)?;
        if !(mean.is_finite() && mean > 0.0) {
            return Err(Error::Computation(format!(
                "mixed-event mean {mean} in the reference window cannot be normalized"
            )));
        }
        Ok(self.config.reference_level / mean)
    }

    /// Normalize `mixed`. In [`MixingMode::Average`] the partner category's
    /// mixed event, when given, contributes half of the scale.
    pub fn normalize(
        &self,
        mixed: &BinnedDistribution2D,
        partner: Option<&BinnedDistribution2D>,
    ) -> Result<NormalizedMixedEvent> {
        let own = self.scale(mixed)?;
        let scale = match (self.config.mode, partner) {
            (MixingMode::Average, Some(p)) => 0.5 * (own + self.scale(p)?),
            (MixingMode::Average, None) => {
                log::debug!("averaged mixing without partner mixed event; using own scale");
                own
            }
            (MixingMode::Single, _) => own,
        };
        Ok(NormalizedMixedEvent { distribution: mixed.scaled(scale), scale })
    }
}

/// Acceptance-corrected correlation: `same / normalized mixed`.
pub fn correct(
    same: &BinnedDistribution2D,
    normalized: &BinnedDistribution2D,
) -> Result<BinnedDistribution2D> {
    same.divide(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dj_hist::BinEdges;

    fn dist(value: f64) -> BinnedDistribution2D {
        let a = BinEdges::uniform(8, -1.5, 4.5).unwrap();
        let b = BinEdges::uniform(10, -2.5, 2.5).unwrap();
        BinnedDistribution2D::filled(a, b, value, value.sqrt())
    }

    fn config(mode: MixingMode) -> MixingConfig {
        MixingConfig {
            window: OffPeakWindow { delta_phi: (-1.5, 4.5), delta_eta: (-0.3, 0.3) },
            reference_level: 1.0,
            mode,
        }
    }

    #[test]
    fn hundred_over_fifty() {
        let norm = MixedEventNormalizer::new(config(MixingMode::Single)).unwrap();
        let mixed = norm.normalize(&dist(50.0), None).unwrap();
        assert_relative_eq!(mixed.scale, 0.02);
        assert!(mixed.distribution.values().iter().all(|&v| (v - 1.0).abs() < 1e-12));

        let corrected = correct(&dist(100.0), &mixed.distribution).unwrap();
        for &v in corrected.values() {
            assert_relative_eq!(v, 100.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn averaged_scale_uses_partner() {
        let norm = MixedEventNormalizer::new(config(MixingMode::Average)).unwrap();
        let n = norm.normalize(&dist(50.0), Some(&dist(25.0))).unwrap();
        assert_relative_eq!(n.scale, 0.5 * (0.02 + 0.04));
        let alone = norm.normalize(&dist(50.0), None).unwrap();
        assert_relative_eq!(alone.scale, 0.02);
    }

    #[test]
    fn empty_or_zero_window_fails() {
        let norm = MixedEventNormalizer::new(config(MixingMode::Single)).unwrap();
        assert!(matches!(norm.scale(&dist(0.0)), Err(Error::Computation(_))));

        let mut c = config(MixingMode::Single);
        c.window.delta_eta = (10.0, 11.0);
        let far = MixedEventNormalizer::new(c).unwrap();
        assert!(matches!(far.scale(&dist(1.0)), Err(Error::InvalidBinning(_))));
    }

    #[test]
    fn rejects_non_positive_reference() {
        let mut c = config(MixingMode::Single);
        c.reference_level = 0.0;
        assert!(matches!(MixedEventNormalizer::new(c), Err(Error::Configuration(_))));
    }
}
