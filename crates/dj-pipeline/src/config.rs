//! Run configuration.
//!
//! Read from YAML or JSON (chosen by file extension). Relative paths are
//! resolved against the directory of the configuration file. Semantic checks
//! run in [`RunConfig::validate`] before any dataset is touched.

use std::collections::BTreeMap;
use std::f64::consts::FRAC_PI_2;
use std::path::{Path, PathBuf};

use dj_core::{
    CorrelationStage, Error, NormalizationPolicy, PairCategory, RadialAssignment, Result, SliceKey,
    UncertaintySource,
};
use dj_hist::{BinEdges, FoldAxes};
use dj_inference::{BackgroundConfig, MixingConfig, SeagullConfig, SeagullCorrection};
use serde::{Deserialize, Serialize};

use crate::uncertainty::grouping;

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Nominal dataset.
    pub dataset: PathBuf,
    /// Named auxiliary datasets (corrections, systematic variations).
    #[serde(default)]
    pub auxiliary: BTreeMap<String, PathBuf>,
    /// Radial bin normalization. Recorded in every output.
    pub normalization: NormalizationPolicy,
    /// Radial bin assignment.
    #[serde(default)]
    pub radial_assignment: RadialAssignment,
    /// Radial bin edges.
    pub radial_edges: BinEdges,
    /// Mixed-event normalization.
    pub mixing: MixingConfig,
    /// Background fit.
    #[serde(default)]
    pub background: BackgroundConfig,
    /// Optional rebin / symmetrize before projection.
    #[serde(default)]
    pub transforms: TransformConfig,
    /// Δφ window of the near-side Δη profile.
    #[serde(default = "default_near_side")]
    pub near_side: (f64, f64),
    /// Corrections of the corrected and background-subtracted results.
    #[serde(default)]
    pub corrections: CorrectionConfig,
    /// Systematic uncertainty sources and grouping.
    #[serde(default)]
    pub uncertainties: UncertaintyConfig,
    /// Upper R of the integrated uncertainty summary.
    #[serde(default = "default_summary_radius")]
    pub summary_radius: f64,
    /// Also produce momentum-integrated slices.
    #[serde(default)]
    pub integrate_momentum: bool,
    /// Threads (0 = auto). Use 1 for deterministic scheduling.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_near_side() -> (f64, f64) {
    (-FRAC_PI_2, FRAC_PI_2)
}

fn default_summary_radius() -> f64 {
    0.99
}

fn default_threads() -> usize {
    0
}

/// Shape transforms applied to background-subtracted correlations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Coarser aligned binning.
    #[serde(default)]
    pub rebin: Option<RebinConfig>,
    /// Reflection averaging.
    #[serde(default)]
    pub symmetrize: Option<SymmetrizeConfig>,
}

/// Target edges for [`dj_hist::BinnedDistribution2D::rebin`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebinConfig {
    /// Δφ edges.
    pub delta_phi: BinEdges,
    /// Δη edges.
    pub delta_eta: BinEdges,
}

/// Arguments of [`dj_hist::BinnedDistribution2D::symmetrize`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetrizeConfig {
    /// Only bins with centre radius below this are averaged.
    pub radius: f64,
    /// Reflections.
    #[serde(default = "default_fold")]
    pub fold: FoldAxes,
}

fn default_fold() -> FoldAxes {
    FoldAxes::Both
}

/// Optional correction stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Δη pedestal removal after acceptance correction.
    #[serde(default)]
    pub seagull: Option<SeagullStep>,
    /// Additive fragmentation-bias maps.
    #[serde(default)]
    pub jff: Option<PathBuf>,
    /// Additive spillover maps.
    #[serde(default)]
    pub spillover: Option<PathBuf>,
    /// Multiplicative track-ΔR maps with residual scales.
    #[serde(default)]
    pub track_delta_r: Option<PathBuf>,
    /// Replacement values for fluctuating radial bins.
    #[serde(default)]
    pub cleaning: Option<PathBuf>,
    /// Jet-shape normalization.
    #[serde(default)]
    pub normalize_shape: Option<ShapeNormalization>,
}

impl CorrectionConfig {
    fn paths_mut(&mut self) -> impl Iterator<Item = &mut PathBuf> {
        [&mut self.jff, &mut self.spillover, &mut self.track_delta_r, &mut self.cleaning]
            .into_iter()
            .flatten()
    }
}

/// Seagull fit plus the slices it is skipped for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeagullStep {
    /// Fit settings.
    #[serde(flatten)]
    pub fit: SeagullConfig,
    /// Slices left uncorrected. An entry matches when all its given fields match.
    #[serde(default)]
    pub veto: Vec<SliceSelector>,
}

impl SeagullStep {
    /// True when `slice` is vetoed.
    pub fn vetoed(&self, slice: SliceKey) -> bool {
        self.veto.iter().any(|v| v.matches(slice))
    }
}

/// Partial slice pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceSelector {
    /// Pair category, any when absent.
    #[serde(default)]
    pub category: Option<PairCategory>,
    /// Centrality bin, any when absent.
    #[serde(default)]
    pub centrality: Option<usize>,
    /// Momentum bin, any when absent.
    #[serde(default)]
    pub momentum: Option<usize>,
    /// Asymmetry bin, any when absent.
    #[serde(default)]
    pub asymmetry: Option<usize>,
}

impl SliceSelector {
    /// True when every given field matches `slice`.
    pub fn matches(&self, slice: SliceKey) -> bool {
        self.category.is_none_or(|c| c == slice.category)
            && self.centrality.is_none_or(|c| c == slice.centrality)
            && self.momentum.is_none_or(|m| Some(m) == slice.momentum.index())
            && self.asymmetry.is_none_or(|a| Some(a) == slice.asymmetry.index())
    }
}

/// Divide the shapes by their momentum-summed content up to `up_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeNormalization {
    /// Upper R of the normalization integral.
    pub up_to: f64,
}

/// Uncertainty sources and the active grouping strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertaintyConfig {
    /// Enabled sources.
    #[serde(default)]
    pub sources: BTreeMap<UncertaintySource, SourceConfig>,
    /// Active grouping strategy.
    #[serde(default = "default_grouping")]
    pub grouping: String,
    /// Additional strategies, by name.
    #[serde(default)]
    pub strategies: BTreeMap<String, Vec<GroupConfig>>,
}

fn default_grouping() -> String {
    grouping::BY_SOURCE.to_string()
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self { sources: BTreeMap::new(), grouping: default_grouping(), strategies: BTreeMap::new() }
    }
}

/// One named group of sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group key.
    pub name: String,
    /// Human-readable label.
    #[serde(default)]
    pub display: Option<String>,
    /// Member sources.
    pub sources: Vec<UncertaintySource>,
}

/// Estimator and optional smoothing for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// How the raw uncertainty is estimated.
    pub estimator: EstimatorConfig,
    /// Declarative smoothing override file.
    #[serde(default)]
    pub smoothing: Option<PathBuf>,
}

/// Estimator kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatorConfig {
    /// `|input| × fraction`.
    Ratio {
        /// Input distribution.
        #[serde(default)]
        input: DatasetStage,
        /// Relative size.
        fraction: Fraction,
    },
    /// Spread of systematic variations around the nominal.
    Comparison {
        /// Auxiliary dataset names of the variations.
        variations: Vec<String>,
        /// Reduction over variations.
        #[serde(default)]
        reduction: Reduction,
    },
    /// Flat density estimated from the large-|Δη| tails.
    FlatTail {
        /// Input distribution.
        #[serde(default)]
        input: DatasetStage,
        /// `|Δη|` range of the tails.
        tail: (f64, f64),
        /// Tail statistic.
        #[serde(default)]
        method: TailMethod,
    },
}

/// A stage of the nominal or of a named auxiliary dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStage {
    /// Auxiliary dataset name; nominal when absent.
    #[serde(default)]
    pub dataset: Option<String>,
    /// Stage to read.
    #[serde(default = "default_input_stage")]
    pub stage: CorrelationStage,
}

fn default_input_stage() -> CorrelationStage {
    CorrelationStage::BackgroundSubtracted
}

impl Default for DatasetStage {
    fn default() -> Self {
        Self { dataset: None, stage: default_input_stage() }
    }
}

/// Constant fraction or lookup table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fraction {
    /// Same fraction everywhere.
    Constant(f64),
    /// Per-slice fractions with a fallback.
    Table(FractionTable),
}

/// Per-slice fractions. The first entry whose given fields all match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FractionTable {
    /// Fallback fraction.
    pub default: f64,
    /// Entries.
    #[serde(default)]
    pub entries: Vec<FractionEntry>,
}

/// One row of a [`FractionTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FractionEntry {
    /// Centrality bin, any when absent.
    #[serde(default)]
    pub centrality: Option<usize>,
    /// Pair category, any when absent.
    #[serde(default)]
    pub category: Option<PairCategory>,
    /// Momentum bin, any when absent.
    #[serde(default)]
    pub momentum: Option<usize>,
    /// Fraction.
    pub value: f64,
}

impl Fraction {
    /// Fraction for a slice.
    pub fn lookup(&self, category: PairCategory, centrality: usize, momentum: Option<usize>) -> f64 {
        match self {
            Fraction::Constant(v) => *v,
            Fraction::Table(t) => t
                .entries
                .iter()
                .find(|e| {
                    e.centrality.is_none_or(|c| c == centrality)
                        && e.category.is_none_or(|c| c == category)
                        && e.momentum.is_none_or(|m| Some(m) == momentum)
                })
                .map_or(t.default, |e| e.value),
        }
    }

    fn values(&self) -> Vec<f64> {
        match self {
            Fraction::Constant(v) => vec![*v],
            Fraction::Table(t) => {
                std::iter::once(t.default).chain(t.entries.iter().map(|e| e.value)).collect()
            }
        }
    }
}

/// Reduction over systematic variations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Largest deviation.
    #[default]
    Max,
    /// Mean deviation.
    Mean,
}

/// Statistic of the two Δη tails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailMethod {
    /// `|left − right|`.
    #[default]
    SideDifference,
    /// `max(|left|, |right|)`.
    MaxDeviation,
}

/// Read a run configuration; `.json` is JSON, anything else YAML.
pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let mut cfg: RunConfig =
        if ext == "json" { serde_json::from_slice(&bytes)? } else { serde_yaml_ng::from_slice(&bytes)? };
    if let Some(base) = path.parent() {
        cfg.resolve_paths(base);
    }
    Ok(cfg)
}

fn resolve(base: &Path, p: &mut PathBuf) {
    if p.is_relative() {
        *p = base.join(&*p);
    }
}

impl RunConfig {
    /// Make relative paths relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        resolve(base, &mut self.dataset);
        for p in self.auxiliary.values_mut() {
            resolve(base, p);
        }
        for s in self.uncertainties.sources.values_mut() {
            if let Some(p) = s.smoothing.as_mut() {
                resolve(base, p);
            }
        }
        for p in self.corrections.paths_mut() {
            resolve(base, p);
        }
    }

    /// Semantic checks that do not need any dataset.
    pub fn validate(&self) -> Result<()> {
        if self.radial_edges.low() < 0.0 {
            return Err(Error::Configuration("radial_edges must start at R >= 0".into()));
        }
        if !(self.summary_radius > 0.0) {
            return Err(Error::Configuration(format!(
                "summary_radius must be > 0, got {}",
                self.summary_radius
            )));
        }
        if !(self.near_side.0 < self.near_side.1) {
            return Err(Error::Configuration(format!(
                "near_side window must have low < high, got {:?}",
                self.near_side
            )));
        }
        if let Some(s) = &self.transforms.symmetrize
            && !(s.radius > 0.0)
        {
            return Err(Error::Configuration(format!(
                "symmetrize radius must be > 0, got {}",
                s.radius
            )));
        }

        if let Some(s) = &self.corrections.seagull {
            SeagullCorrection::new(s.fit.clone())?;
        }
        if let Some(n) = &self.corrections.normalize_shape
            && !(n.up_to > self.radial_edges.low())
        {
            return Err(Error::Configuration(format!(
                "normalize_shape up_to must exceed the first radial edge, got {}",
                n.up_to
            )));
        }

        for (source, cfg) in &self.uncertainties.sources {
            self.validate_source(*source, cfg)?;
        }

        let unc = &self.uncertainties;
        for (name, groups) in &unc.strategies {
            if grouping::is_builtin(name) {
                return Err(Error::Configuration(format!(
                    "grouping strategy '{name}' shadows a built-in strategy"
                )));
            }
            if groups.is_empty() {
                return Err(Error::Configuration(format!("grouping strategy '{name}' has no groups")));
            }
        }
        grouping::resolve(&unc.grouping, &unc.strategies)?;
        Ok(())
    }

    fn validate_source(&self, source: UncertaintySource, cfg: &SourceConfig) -> Result<()> {
        let bad = |msg: String| Err(Error::Configuration(format!("source {source}: {msg}")));
        if source == UncertaintySource::Total {
            return bad("total is computed, not configured".into());
        }
        let known = |name: &str| self.auxiliary.contains_key(name);
        match &cfg.estimator {
            EstimatorConfig::Ratio { input, fraction } => {
                if let Some(d) = &input.dataset
                    && !known(d)
                {
                    return bad(format!("unknown auxiliary dataset '{d}'"));
                }
                if fraction.values().iter().any(|f| !(f.is_finite() && *f >= 0.0)) {
                    return bad("fractions must be finite and >= 0".into());
                }
            }
            EstimatorConfig::Comparison { variations, .. } => {
                if variations.is_empty() {
                    return bad("comparison needs at least one variation".into());
                }
                if let Some(d) = variations.iter().find(|d| !known(d)) {
                    return bad(format!("unknown auxiliary dataset '{d}'"));
                }
            }
            EstimatorConfig::FlatTail { input, tail, .. } => {
                if let Some(d) = &input.dataset
                    && !known(d)
                {
                    return bad(format!("unknown auxiliary dataset '{d}'"));
                }
                if !(tail.0 >= 0.0 && tail.0 < tail.1) {
                    return bad(format!("tail must satisfy 0 <= min < max, got {tail:?}"));
                }
            }
        }
        Ok(())
    }
}
