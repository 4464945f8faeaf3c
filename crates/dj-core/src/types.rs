//! Common data types for the analysis bin space

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stage::CorrelationStage;

/// Selection along an optional bin axis: one bin or the integrated range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Option<usize>", into = "Option<usize>")]
pub enum BinSel {
    /// Single bin index.
    Bin(usize),
    /// Integrated over the whole axis.
    Integrated,
}

impl BinSel {
    /// Bin index, `None` for the integrated selection.
    pub fn index(self) -> Option<usize> {
        match self {
            BinSel::Bin(i) => Some(i),
            BinSel::Integrated => None,
        }
    }
}

impl From<Option<usize>> for BinSel {
    fn from(v: Option<usize>) -> Self {
        v.map_or(BinSel::Integrated, BinSel::Bin)
    }
}

impl From<BinSel> for Option<usize> {
    fn from(v: BinSel) -> Self {
        v.index()
    }
}

impl fmt::Display for BinSel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinSel::Bin(i) => write!(f, "{i}"),
            BinSel::Integrated => f.write_str("all"),
        }
    }
}

/// Jet-track pairing a correlation was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairCategory {
    /// Tracks paired with the leading jet.
    TrackLeadingJet,
    /// Tracks paired with the leading jet, no tracking efficiency correction.
    UncorrectedTrackLeadingJet,
    /// Track-pT weighted pairs with the leading jet.
    PtWeightedTrackLeadingJet,
    /// Tracks paired with the subleading jet.
    TrackSubleadingJet,
    /// Tracks paired with the subleading jet, no tracking efficiency correction.
    UncorrectedTrackSubleadingJet,
    /// Track-pT weighted pairs with the subleading jet.
    PtWeightedTrackSubleadingJet,
    /// Tracks paired with any jet.
    TrackInclusiveJet,
    /// Track-pT weighted pairs with any jet.
    PtWeightedTrackInclusiveJet,
}

impl PairCategory {
    /// Stable snake_case name.
    pub fn name(self) -> &'static str {
        use PairCategory::*;
        match self {
            TrackLeadingJet => "track_leading_jet",
            UncorrectedTrackLeadingJet => "uncorrected_track_leading_jet",
            PtWeightedTrackLeadingJet => "pt_weighted_track_leading_jet",
            TrackSubleadingJet => "track_subleading_jet",
            UncorrectedTrackSubleadingJet => "uncorrected_track_subleading_jet",
            PtWeightedTrackSubleadingJet => "pt_weighted_track_subleading_jet",
            TrackInclusiveJet => "track_inclusive_jet",
            PtWeightedTrackInclusiveJet => "pt_weighted_track_inclusive_jet",
        }
    }

    /// The matching category on the other jet of the dijet, if any.
    ///
    /// Inclusive-jet categories have no partner.
    pub fn partner(self) -> Option<PairCategory> {
        use PairCategory::*;
        match self {
            TrackLeadingJet => Some(TrackSubleadingJet),
            UncorrectedTrackLeadingJet => Some(UncorrectedTrackSubleadingJet),
            PtWeightedTrackLeadingJet => Some(PtWeightedTrackSubleadingJet),
            TrackSubleadingJet => Some(TrackLeadingJet),
            UncorrectedTrackSubleadingJet => Some(UncorrectedTrackLeadingJet),
            PtWeightedTrackSubleadingJet => Some(PtWeightedTrackLeadingJet),
            TrackInclusiveJet | PtWeightedTrackInclusiveJet => None,
        }
    }
}

impl fmt::Display for PairCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One slice of the bin space, independent of the correlation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SliceKey {
    /// Pair category.
    pub category: PairCategory,
    /// Centrality bin index.
    pub centrality: usize,
    /// Track momentum bin.
    pub momentum: BinSel,
    /// Dijet momentum-asymmetry bin.
    pub asymmetry: BinSel,
}

impl SliceKey {
    /// Create a new slice key.
    pub fn new(
        category: PairCategory,
        centrality: usize,
        momentum: BinSel,
        asymmetry: BinSel,
    ) -> Self {
        Self { category, centrality, momentum, asymmetry }
    }

    /// Same slice with the momentum axis replaced.
    pub fn with_momentum(self, momentum: BinSel) -> Self {
        Self { momentum, ..self }
    }

    /// Same slice for another pair category.
    pub fn with_category(self, category: PairCategory) -> Self {
        Self { category, ..self }
    }

    /// Key for this slice at the given stage.
    pub fn at(self, stage: CorrelationStage) -> BinKey {
        BinKey::new(stage, self)
    }
}

impl fmt::Display for SliceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/C{}/T{}/A{}", self.category, self.centrality, self.momentum, self.asymmetry)
    }
}

/// Unique address of one distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BinKey {
    /// Correlation stage.
    pub stage: CorrelationStage,
    /// Slice of the bin space.
    pub slice: SliceKey,
}

impl BinKey {
    /// Create a new key.
    pub fn new(stage: CorrelationStage, slice: SliceKey) -> Self {
        Self { stage, slice }
    }
}

impl fmt::Display for BinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stage, self.slice)
    }
}

/// Normalization applied to each radial bin of a jet shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// Divide by the radial bin width.
    ByBinWidth,
    /// Divide by the annulus area, π(outer² − inner²).
    ByAnnulusArea,
}

impl NormalizationPolicy {
    /// Normalization denominator for the radial bin `[inner, outer)`.
    pub fn denominator(self, inner: f64, outer: f64) -> f64 {
        match self {
            NormalizationPolicy::ByBinWidth => outer - inner,
            NormalizationPolicy::ByAnnulusArea => annulus_area(inner, outer),
        }
    }
}

/// Area of the annulus between `inner` and `outer`.
pub fn annulus_area(inner: f64, outer: f64) -> f64 {
    std::f64::consts::PI * (outer * outer - inner * inner)
}

/// How angular bins are assigned to radial bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadialAssignment {
    /// Whole bin goes to the radial bin containing its centre.
    #[default]
    BinCenter,
    /// Bin content is split by overlap area.
    AreaWeighted,
}

/// Representation an uncertainty is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    /// Radial jet-shape binning.
    R,
    /// Near-side Δη profile binning.
    DeltaEta,
}

/// Systematic uncertainty source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintySource {
    /// Residual background fluctuations (spillover).
    BackgroundFluctuation,
    /// Jet fragmentation bias correction.
    FragmentationBias,
    /// Jet energy scale.
    JetEnergyScale,
    /// Jet energy resolution.
    JetResolution,
    /// Tracking efficiency.
    TrackingEfficiency,
    /// Residual tracking efficiency.
    ResidualTracking,
    /// Tracking efficiency dependence on ΔR.
    TrackingDeltaR,
    /// Background subtraction.
    BackgroundSubtraction,
    /// Pair acceptance (mixed-event) correction.
    PairAcceptance,
    /// Trigger efficiency.
    TriggerEfficiency,
    /// Quadrature sum of all enabled sources.
    Total,
}

impl UncertaintySource {
    /// All individual sources (excluding [`UncertaintySource::Total`]).
    pub const SOURCES: [UncertaintySource; 10] = [
        UncertaintySource::BackgroundFluctuation,
        UncertaintySource::FragmentationBias,
        UncertaintySource::JetEnergyScale,
        UncertaintySource::JetResolution,
        UncertaintySource::TrackingEfficiency,
        UncertaintySource::ResidualTracking,
        UncertaintySource::TrackingDeltaR,
        UncertaintySource::BackgroundSubtraction,
        UncertaintySource::PairAcceptance,
        UncertaintySource::TriggerEfficiency,
    ];

    /// Stable snake_case name.
    pub fn name(self) -> &'static str {
        use UncertaintySource::*;
        match self {
            BackgroundFluctuation => "background_fluctuation",
            FragmentationBias => "fragmentation_bias",
            JetEnergyScale => "jet_energy_scale",
            JetResolution => "jet_resolution",
            TrackingEfficiency => "tracking_efficiency",
            ResidualTracking => "residual_tracking",
            TrackingDeltaR => "tracking_delta_r",
            BackgroundSubtraction => "background_subtraction",
            PairAcceptance => "pair_acceptance",
            TriggerEfficiency => "trigger_efficiency",
            Total => "total",
        }
    }
}

impl fmt::Display for UncertaintySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
