//! Corrections applied to the background-subtracted result.
//!
//! Order, per slice:
//!
//! 1. the fragmentation-bias (JFF) map is subtracted,
//! 2. the spillover map is subtracted,
//! 3. the track-ΔR map multiplies the result, scaled by the slice's residual
//!    scale,
//! 4. after radial projection, listed radial bins are replaced by their
//!    cleaned values.
//!
//! Maps are read from correction files (JSON or YAML):
//!
//! ```yaml
//! maps:
//!   - { category: track_leading_jet, centrality: 0, momentum: 1, asymmetry: null,
//!       a_edges: [...], b_edges: [...], values: [...], scale: 1.02 }
//! ```
//!
//! A slice without its own map uses the asymmetry-integrated map of the same
//! category, centrality and momentum. Additive maps of a momentum-integrated
//! slice default to the sum over the momentum bins.
//!
//! Shape normalization divides the radial shape and every radial uncertainty
//! by the content of the momentum-summed shape up to a radius, so momentum
//! bins of one slice keep their relative size.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use dj_core::{BinSel, Error, NormalizationPolicy, PairCategory, Result, SliceKey};
use dj_hist::{BinEdges, BinnedDistribution1D, BinnedDistribution2D};
use serde::{Deserialize, Serialize};

use crate::config::CorrectionConfig;
use crate::shape::SliceShape;
use crate::uncertainty::SliceUncertainties;

fn read_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    if ext == "json" { Ok(serde_json::from_slice(&bytes)?) } else { Ok(serde_yaml_ng::from_slice(&bytes)?) }
}

#[derive(Debug, Deserialize)]
struct MapFile {
    maps: Vec<MapRecord>,
}

#[derive(Debug, Deserialize)]
struct MapRecord {
    category: PairCategory,
    centrality: usize,
    #[serde(default)]
    momentum: Option<usize>,
    #[serde(default)]
    asymmetry: Option<usize>,
    a_edges: BinEdges,
    b_edges: BinEdges,
    values: Vec<f64>,
    #[serde(default)]
    scale: Option<f64>,
}

/// How a map combines with the distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    /// Subtracted.
    Additive,
    /// Multiplied, together with the per-slice scale.
    Multiplicative,
}

/// Per-slice (Δφ, Δη) correction maps of one kind.
#[derive(Debug, Clone)]
pub struct CorrectionMaps {
    name: String,
    kind: MapKind,
    maps: HashMap<SliceKey, BinnedDistribution2D>,
    scales: HashMap<SliceKey, f64>,
}

impl CorrectionMaps {
    /// Empty set of maps.
    pub fn new(name: &str, kind: MapKind) -> Self {
        Self { name: name.to_string(), kind, maps: HashMap::new(), scales: HashMap::new() }
    }

    /// Load a correction file.
    pub fn load(name: &str, kind: MapKind, path: &Path) -> Result<Self> {
        let file: MapFile = read_file(path)?;
        let mut out = Self::new(name, kind);
        for m in file.maps {
            let slice = SliceKey::new(m.category, m.centrality, m.momentum.into(), m.asymmetry.into());
            let errors = vec![0.0; m.values.len()];
            let dist = BinnedDistribution2D::new(m.a_edges, m.b_edges, m.values, errors)
                .map_err(|e| e.context(format!("{name} correction for {slice}")))?;
            out.insert(slice, dist, m.scale)?;
        }
        log::debug!("{name}: {} correction maps from {}", out.len(), path.display());
        Ok(out)
    }

    /// Add the map of one slice.
    pub fn insert(&mut self, slice: SliceKey, map: BinnedDistribution2D, scale: Option<f64>) -> Result<()> {
        if self.maps.insert(slice, map).is_some() {
            return Err(Error::Configuration(format!("duplicate {} correction for {slice}", self.name)));
        }
        if let Some(s) = scale {
            if !(s.is_finite() && s > 0.0) {
                return Err(Error::Configuration(format!(
                    "{} residual scale for {slice} must be finite and > 0, got {s}",
                    self.name
                )));
            }
            self.scales.insert(slice, s);
        }
        Ok(())
    }

    /// Correction name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of maps.
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// True without maps.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Residual scale of `slice`, 1 when none was given.
    pub fn scale(&self, slice: SliceKey) -> f64 {
        let fallback = SliceKey { asymmetry: BinSel::Integrated, ..slice };
        self.scales.get(&slice).or_else(|| self.scales.get(&fallback)).copied().unwrap_or(1.0)
    }

    /// Map for `slice`, falling back as described in the module docs.
    pub fn lookup(&self, slice: SliceKey) -> Result<BinnedDistribution2D> {
        let fallback = SliceKey { asymmetry: BinSel::Integrated, ..slice };
        if let Some(m) = self.maps.get(&slice).or_else(|| self.maps.get(&fallback)) {
            return Ok(m.clone());
        }
        if self.kind == MapKind::Additive && slice.momentum == BinSel::Integrated {
            let mut parts: Vec<(&SliceKey, &BinnedDistribution2D)> = self
                .maps
                .iter()
                .filter(|(k, _)| matches!(k.momentum, BinSel::Bin(_)) && k.with_momentum(BinSel::Integrated) == slice)
                .collect();
            parts.sort_by_key(|(k, _)| **k);
            if let Some(((_, first), rest)) = parts.split_first() {
                return rest.iter().try_fold((*first).clone(), |acc, (_, m)| acc.add(m));
            }
        }
        Err(Error::Configuration(format!("no {} correction map for {slice}", self.name)))
    }

    /// Apply to `dist`.
    pub fn apply(&self, slice: SliceKey, dist: &BinnedDistribution2D) -> Result<BinnedDistribution2D> {
        let map = self.lookup(slice)?;
        match self.kind {
            MapKind::Additive => dist.subtract(&map),
            MapKind::Multiplicative => {
                if !map.same_binning(dist) {
                    return Err(Error::InvalidBinning(format!(
                        "correction binning does not match the distribution of {slice}"
                    )));
                }
                let scale = self.scale(slice);
                let values = dist.values().iter().zip(map.values()).map(|(v, f)| v * f * scale).collect();
                let errors = dist.errors().iter().zip(map.values()).map(|(e, f)| e * (f * scale).abs()).collect();
                BinnedDistribution2D::new(dist.a_edges().clone(), dist.b_edges().clone(), values, errors)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CleaningFile {
    entries: Vec<CleaningEntry>,
}

#[derive(Debug, Deserialize)]
struct CleaningEntry {
    category: PairCategory,
    #[serde(default)]
    asymmetry: Option<usize>,
    centrality: usize,
    #[serde(default)]
    momentum: Option<usize>,
    radial_bin: usize,
    value: f64,
}

/// Replacement values for fluctuating radial bins.
#[derive(Debug, Clone, Default)]
pub struct RadialCleaning {
    values: HashMap<(SliceKey, usize), f64>,
}

impl RadialCleaning {
    /// Load a cleaning file.
    pub fn load(path: &Path) -> Result<Self> {
        let file: CleaningFile = read_file(path)?;
        let mut out = Self::default();
        for e in file.entries {
            let slice = SliceKey::new(e.category, e.centrality, e.momentum.into(), e.asymmetry.into());
            out.insert(slice, e.radial_bin, e.value)?;
        }
        Ok(out)
    }

    /// Add one replacement.
    pub fn insert(&mut self, slice: SliceKey, radial_bin: usize, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::Configuration(format!(
                "cleaned value for {slice} bin {radial_bin} must be finite, got {value}"
            )));
        }
        if self.values.insert((slice, radial_bin), value).is_some() {
            return Err(Error::Configuration(format!("duplicate cleaning entry for {slice} bin {radial_bin}")));
        }
        Ok(())
    }

    /// Number of replacements.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True without replacements.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace listed bins of `shape`; uncertainties are kept.
    pub fn apply(&self, slice: SliceKey, shape: &BinnedDistribution1D) -> Result<BinnedDistribution1D> {
        let mut values = shape.values().to_vec();
        for (k, v) in values.iter_mut().enumerate() {
            if let Some(&clean) = self.values.get(&(slice, k)) {
                log::debug!("{slice}: radial bin {k} cleaned {v} -> {clean}");
                *v = clean;
            }
        }
        BinnedDistribution1D::new(shape.edges().clone(), values, shape.errors().to_vec())
    }
}

/// Corrections loaded for a run.
#[derive(Debug, Clone, Default)]
pub struct CorrectionChain {
    maps: Vec<CorrectionMaps>,
    cleaning: Option<RadialCleaning>,
}

impl CorrectionChain {
    /// Load every configured correction file.
    pub fn load(cfg: &CorrectionConfig) -> Result<Self> {
        let mut chain = Self::default();
        let files = [
            ("jff", MapKind::Additive, &cfg.jff),
            ("spillover", MapKind::Additive, &cfg.spillover),
            ("track_delta_r", MapKind::Multiplicative, &cfg.track_delta_r),
        ];
        for (name, kind, path) in files {
            if let Some(p) = path {
                chain = chain.with_maps(CorrectionMaps::load(name, kind, p)?);
            }
        }
        if let Some(p) = &cfg.cleaning {
            chain = chain.with_cleaning(RadialCleaning::load(p)?);
        }
        Ok(chain)
    }

    /// Append a set of maps; they apply in insertion order.
    pub fn with_maps(mut self, maps: CorrectionMaps) -> Self {
        self.maps.push(maps);
        self
    }

    /// Set the radial cleaning.
    pub fn with_cleaning(mut self, cleaning: RadialCleaning) -> Self {
        self.cleaning = Some(cleaning);
        self
    }

    /// True when nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty() && self.cleaning.is_none()
    }

    /// Apply the (Δφ, Δη) maps in order.
    pub fn apply_2d(&self, slice: SliceKey, dist: &BinnedDistribution2D) -> Result<BinnedDistribution2D> {
        let mut out = dist.clone();
        for m in &self.maps {
            out = m.apply(slice, &out).map_err(|e| e.context(m.name()))?;
        }
        Ok(out)
    }

    /// Apply the radial cleaning.
    pub fn apply_radial(&self, slice: SliceKey, shape: &BinnedDistribution1D) -> Result<BinnedDistribution1D> {
        match &self.cleaning {
            Some(c) => c.apply(slice, shape),
            None => Ok(shape.clone()),
        }
    }
}

/// Content of `shape` in the bins lying below `up_to`.
fn content(shape: &BinnedDistribution1D, policy: NormalizationPolicy, up_to: f64) -> f64 {
    let e = shape.edges();
    (0..shape.n_bins())
        .filter(|&k| e.upper(k) <= up_to * (1.0 + 1e-9))
        .map(|k| shape.value(k) * policy.denominator(e.lower(k), e.upper(k)))
        .sum()
}

/// Normalization factor of every slice in `shapes`.
///
/// Momentum bins share the content of their momentum sum; a slice without
/// momentum bins uses its own content.
pub fn normalization_factors(
    shapes: &BTreeMap<SliceKey, SliceShape>,
    policy: NormalizationPolicy,
    up_to: f64,
) -> BTreeMap<SliceKey, Result<f64>> {
    let mut sums: BTreeMap<SliceKey, f64> = BTreeMap::new();
    for (slice, shape) in shapes {
        if matches!(slice.momentum, BinSel::Bin(_)) {
            *sums.entry(slice.with_momentum(BinSel::Integrated)).or_default() += content(&shape.r, policy, up_to);
        }
    }
    shapes
        .iter()
        .map(|(slice, shape)| {
            let group = slice.with_momentum(BinSel::Integrated);
            let total = sums.get(&group).copied().unwrap_or_else(|| content(&shape.r, policy, up_to));
            let factor = if total.is_finite() && total != 0.0 {
                Ok(total)
            } else {
                Err(Error::Computation(format!("shape content of {group} up to R = {up_to} is {total}")))
            };
            (*slice, factor)
        })
        .collect()
}

/// Divide the radial shape and radial uncertainties of one slice by `factor`.
pub fn normalize_slice(shape: &mut SliceShape, uncertainties: Option<&mut SliceUncertainties>, factor: f64) {
    let inv = 1.0 / factor;
    shape.r = shape.r.scaled(inv);
    if let Some(u) = uncertainties {
        u.scale_radial(inv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn slice(momentum: BinSel) -> SliceKey {
        SliceKey::new(PairCategory::TrackLeadingJet, 0, momentum, BinSel::Bin(1))
    }

    fn grid(value: f64) -> BinnedDistribution2D {
        let e = BinEdges::uniform(4, -1.0, 1.0).unwrap();
        BinnedDistribution2D::filled(e.clone(), e, value, 0.1)
    }

    #[test]
    fn additive_maps_subtract_in_order() {
        let mut jff = CorrectionMaps::new("jff", MapKind::Additive);
        jff.insert(slice(BinSel::Bin(0)), grid(0.5), None).unwrap();
        let mut spill = CorrectionMaps::new("spillover", MapKind::Additive);
        spill.insert(slice(BinSel::Bin(0)), grid(0.25), None).unwrap();
        let chain = CorrectionChain::default().with_maps(jff).with_maps(spill);

        let out = chain.apply_2d(slice(BinSel::Bin(0)), &grid(2.0)).unwrap();
        assert!(out.values().iter().all(|&v| v == 1.25));
    }

    #[test]
    fn multiplicative_map_uses_residual_scale() {
        let mut track = CorrectionMaps::new("track_delta_r", MapKind::Multiplicative);
        track.insert(slice(BinSel::Bin(0)), grid(0.5), Some(2.0)).unwrap();
        let out = track.apply(slice(BinSel::Bin(0)), &grid(3.0)).unwrap();
        assert!(out.values().iter().all(|&v| v == 3.0));
        assert_relative_eq!(out.error(0, 0), 0.1);
    }

    #[test]
    fn lookup_falls_back_to_asymmetry_integrated() {
        let mut jff = CorrectionMaps::new("jff", MapKind::Additive);
        let integrated = SliceKey { asymmetry: BinSel::Integrated, ..slice(BinSel::Bin(0)) };
        jff.insert(integrated, grid(0.5), None).unwrap();
        assert_eq!(jff.lookup(slice(BinSel::Bin(0))).unwrap(), grid(0.5));
        assert!(matches!(jff.lookup(slice(BinSel::Bin(1))), Err(Error::Configuration(_))));
    }

    #[test]
    fn additive_lookup_sums_momentum_bins() {
        let mut spill = CorrectionMaps::new("spillover", MapKind::Additive);
        spill.insert(slice(BinSel::Bin(0)), grid(0.5), None).unwrap();
        spill.insert(slice(BinSel::Bin(1)), grid(0.25), None).unwrap();
        let sum = spill.lookup(slice(BinSel::Integrated)).unwrap();
        assert!(sum.values().iter().all(|&v| v == 0.75));

        let mut track = CorrectionMaps::new("track_delta_r", MapKind::Multiplicative);
        track.insert(slice(BinSel::Bin(0)), grid(1.1), None).unwrap();
        assert!(track.lookup(slice(BinSel::Integrated)).is_err());
    }

    #[test]
    fn mismatched_map_binning_is_rejected() {
        let mut jff = CorrectionMaps::new("jff", MapKind::Additive);
        let e = BinEdges::uniform(2, -1.0, 1.0).unwrap();
        jff.insert(slice(BinSel::Bin(0)), BinnedDistribution2D::filled(e.clone(), e, 1.0, 0.0), None).unwrap();
        let chain = CorrectionChain::default().with_maps(jff);
        let err = chain.apply_2d(slice(BinSel::Bin(0)), &grid(1.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidBinning(ref m) if m.starts_with("jff")), "{err}");
    }

    #[test]
    fn cleaning_replaces_listed_bins() {
        let mut c = RadialCleaning::default();
        c.insert(slice(BinSel::Bin(2)), 1, 4.5).unwrap();
        let shape = BinnedDistribution1D::new(
            BinEdges::uniform(3, 0.0, 0.6).unwrap(),
            vec![9.0, 30.0, 3.0],
            vec![0.3, 0.4, 0.5],
        )
        .unwrap();
        let out = c.apply(slice(BinSel::Bin(2)), &shape).unwrap();
        assert_eq!(out.values(), &[9.0, 4.5, 3.0]);
        assert_eq!(out.errors(), shape.errors());
        assert_eq!(c.apply(slice(BinSel::Bin(1)), &shape).unwrap(), shape);
    }

    #[test]
    fn parses_map_file() {
        let text = "maps:\n  - { category: track_leading_jet, centrality: 0, momentum: 1, a_edges: [0.0, 1.0], b_edges: [0.0, 1.0, 2.0], values: [0.1, 0.2], scale: 1.5 }\n";
        let file: MapFile = serde_yaml_ng::from_str(text).unwrap();
        assert_eq!(file.maps.len(), 1);
        assert_eq!(file.maps[0].asymmetry, None);
        assert_eq!(file.maps[0].scale, Some(1.5));
    }

    fn shape(slice: SliceKey, values: Vec<f64>) -> SliceShape {
        let r = BinEdges::new(vec![0.0, 0.5, 1.0]).unwrap();
        let eta = BinEdges::uniform(2, -1.0, 1.0).unwrap();
        SliceShape {
            slice,
            r: BinnedDistribution1D::from_values(r, values).unwrap(),
            counts: vec![1.0, 1.0],
            delta_eta: BinnedDistribution1D::zeros(eta),
        }
    }

    #[test]
    fn momentum_bins_share_one_normalization() {
        let shapes = BTreeMap::from([
            (slice(BinSel::Bin(0)), shape(slice(BinSel::Bin(0)), vec![2.0, 1.0])),
            (slice(BinSel::Bin(1)), shape(slice(BinSel::Bin(1)), vec![4.0, 1.0])),
            (slice(BinSel::Integrated), shape(slice(BinSel::Integrated), vec![6.0, 2.0])),
        ]);
        let factors = normalization_factors(&shapes, NormalizationPolicy::ByBinWidth, 1.0);
        // (2 + 1) × 0.5 + (4 + 1) × 0.5
        for f in factors.values() {
            assert_relative_eq!(*f.as_ref().unwrap(), 4.0);
        }

        let inner = normalization_factors(&shapes, NormalizationPolicy::ByBinWidth, 0.5);
        assert_relative_eq!(*inner[&slice(BinSel::Bin(0))].as_ref().unwrap(), 3.0);
    }

    #[test]
    fn zero_content_cannot_be_normalized() {
        let s = slice(BinSel::Integrated);
        let shapes = BTreeMap::from([(s, shape(s, vec![0.0, 0.0]))]);
        let factors = normalization_factors(&shapes, NormalizationPolicy::ByAnnulusArea, 1.0);
        assert!(matches!(factors[&s], Err(Error::Computation(_))));
    }
}
