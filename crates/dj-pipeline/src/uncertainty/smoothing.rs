//! Declarative smoothing overrides.
//!
//! Statistical fluctuations in a raw radial uncertainty estimate can be
//! damped by dividing selected bins by a factor ≥ 1. The factors live in a
//! data file (YAML or JSON) per source:
//!
//! ```yaml
//! entries:
//!   - { category: track_leading_jet, asymmetry: null, centrality: 0, momentum: 2, radial_bin: 11, divisor: 1.6 }
//! ```

use std::collections::HashMap;
use std::path::Path;

use dj_core::{BinSel, Error, PairCategory, Result, SliceKey};
use dj_hist::BinnedDistribution1D;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct OverrideFile {
    entries: Vec<OverrideEntry>,
}

#[derive(Debug, Deserialize)]
struct OverrideEntry {
    category: PairCategory,
    #[serde(default)]
    asymmetry: Option<usize>,
    centrality: usize,
    #[serde(default)]
    momentum: Option<usize>,
    radial_bin: usize,
    divisor: f64,
}

/// Divisors keyed by slice and radial bin.
#[derive(Debug, Clone, Default)]
pub struct SmoothingOverrides {
    divisors: HashMap<(SliceKey, usize), f64>,
}

impl SmoothingOverrides {
    /// Load an override file; `.json` is JSON, anything else YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
        let file: OverrideFile =
            if ext == "json" { serde_json::from_slice(&bytes)? } else { serde_yaml_ng::from_slice(&bytes)? };
        let mut out = Self::default();
        for e in file.entries {
            let slice = SliceKey::new(
                e.category,
                e.centrality,
                BinSel::from(e.momentum),
                BinSel::from(e.asymmetry),
            );
            out.insert(slice, e.radial_bin, e.divisor)?;
        }
        Ok(out)
    }

    /// Add one override. Divisors below 1 are rejected.
    pub fn insert(&mut self, slice: SliceKey, radial_bin: usize, divisor: f64) -> Result<()> {
        if !(divisor.is_finite() && divisor >= 1.0) {
            return Err(Error::Configuration(format!(
                "smoothing divisor for {slice} bin {radial_bin} must be >= 1, got {divisor}"
            )));
        }
        if self.divisors.insert((slice, radial_bin), divisor).is_some() {
            return Err(Error::Configuration(format!(
                "duplicate smoothing override for {slice} bin {radial_bin}"
            )));
        }
        Ok(())
    }

    /// Number of overrides.
    pub fn len(&self) -> usize {
        self.divisors.len()
    }

    /// True without overrides.
    pub fn is_empty(&self) -> bool {
        self.divisors.is_empty()
    }

    /// Divide the overridden bins of a radial estimate.
    pub fn apply(&self, slice: SliceKey, raw: &BinnedDistribution1D) -> Result<BinnedDistribution1D> {
        let values = raw
            .values()
            .iter()
            .enumerate()
            .map(|(k, &u)| u / self.divisors.get(&(slice, k)).copied().unwrap_or(1.0))
            .collect();
        raw.with_values(values)
    }
}
