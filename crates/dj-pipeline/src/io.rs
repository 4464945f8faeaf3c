//! Dataset files.
//!
//! A dataset is a JSON document holding keyed two-dimensional distributions
//! with explicit edges:
//!
//! ```json
//! {
//!   "normalization": "by_annulus_area",
//!   "provides": ["same_event", "mixed_event"],
//!   "distributions": [
//!     { "stage": "same_event", "category": "track_leading_jet",
//!       "centrality": 0, "momentum": 2, "asymmetry": null,
//!       "a_edges": [...], "b_edges": [...], "values": [...], "errors": [...] }
//!   ]
//! }
//! ```
//!
//! `values` and `errors` are row-major with Δφ as the outer index. A `null`
//! (or absent) momentum or asymmetry selects the integrated bin. When
//! `provides` is absent the stages present in the file define the layout.

use std::collections::BTreeSet;
use std::path::Path;

use dj_core::{
    BinKey, CorrelationStage, Error, NormalizationPolicy, PairCategory, Result, SliceKey,
};
use dj_hist::{BinEdges, BinnedDistribution2D};
use serde::{Deserialize, Serialize};

use crate::store::CorrelationStore;

/// On-disk dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    /// Normalization policy the producer assumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<NormalizationPolicy>,
    /// Stages the dataset supplies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provides: Option<Vec<CorrelationStage>>,
    /// Distributions.
    pub distributions: Vec<DistributionRecord>,
}

/// One keyed distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionRecord {
    /// Stage.
    pub stage: CorrelationStage,
    /// Pair category.
    pub category: PairCategory,
    /// Centrality bin.
    pub centrality: usize,
    /// Momentum bin, integrated when absent.
    #[serde(default)]
    pub momentum: Option<usize>,
    /// Asymmetry bin, integrated when absent.
    #[serde(default)]
    pub asymmetry: Option<usize>,
    /// Δφ edges.
    pub a_edges: BinEdges,
    /// Δη edges.
    pub b_edges: BinEdges,
    /// Row-major contents.
    pub values: Vec<f64>,
    /// Row-major uncertainties; zero when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<f64>>,
}

impl DistributionRecord {
    /// Key of this record.
    pub fn key(&self) -> BinKey {
        SliceKey::new(self.category, self.centrality, self.momentum.into(), self.asymmetry.into())
            .at(self.stage)
    }

    /// Validate and convert into a distribution.
    pub fn into_distribution(self) -> Result<(BinKey, BinnedDistribution2D)> {
        let key = self.key();
        let errors = self.errors.unwrap_or_else(|| vec![0.0; self.values.len()]);
        let dist = BinnedDistribution2D::new(self.a_edges, self.b_edges, self.values, errors)
            .map_err(|e| e.in_key(key))?;
        Ok((key, dist))
    }

    /// Record for a stored distribution.
    pub fn from_distribution(key: BinKey, dist: &BinnedDistribution2D) -> Self {
        Self {
            stage: key.stage,
            category: key.slice.category,
            centrality: key.slice.centrality,
            momentum: key.slice.momentum.index(),
            asymmetry: key.slice.asymmetry.index(),
            a_edges: dist.a_edges().clone(),
            b_edges: dist.b_edges().clone(),
            values: dist.values().to_vec(),
            errors: Some(dist.errors().to_vec()),
        }
    }
}

/// Parse a dataset file.
pub fn read_dataset(path: &Path) -> Result<DatasetFile> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Build a store from a parsed dataset.
///
/// A dataset that declares a normalization policy different from `expected`
/// is rejected before anything is loaded.
pub fn into_store(file: DatasetFile, expected: NormalizationPolicy) -> Result<CorrelationStore> {
    if let Some(declared) = file.normalization
        && declared != expected
    {
        return Err(Error::Configuration(format!(
            "dataset was produced with {declared:?} normalization but the run uses {expected:?}"
        )));
    }

    let present: BTreeSet<CorrelationStage> = file.distributions.iter().map(|r| r.stage).collect();
    let provided: BTreeSet<CorrelationStage> = match file.provides {
        Some(list) => {
            let declared: BTreeSet<_> = list.into_iter().collect();
            if let Some(extra) = present.difference(&declared).next() {
                return Err(Error::Validation(format!(
                    "dataset contains {extra} distributions but does not list it in 'provides'"
                )));
            }
            declared
        }
        None => present,
    };

    let mut store = CorrelationStore::new(provided)?.with_normalization(file.normalization);
    for record in file.distributions {
        let (key, dist) = record.into_distribution()?;
        store.insert(key, dist)?;
    }
    log::debug!("loaded {} distributions, layout {:?}", store.len(), store.provided());
    Ok(store)
}

/// Read a dataset straight into a store.
pub fn load_store(path: &Path, expected: NormalizationPolicy) -> Result<CorrelationStore> {
    into_store(read_dataset(path)?, expected)
}

/// Serialize a store back into the dataset schema, keys in order.
pub fn store_to_file(store: &CorrelationStore) -> DatasetFile {
    let distributions = store
        .keys()
        .into_iter()
        .filter_map(|k| store.get(&k).map(|d| DistributionRecord::from_distribution(k, d)))
        .collect();
    DatasetFile {
        normalization: store.normalization(),
        provides: Some(store.provided().iter().copied().collect()),
        distributions,
    }
}

/// Write `value` as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dj_core::BinSel;

    fn record(stage: &str) -> String {
        format!(
            r#"{{"stage": "{stage}", "category": "track_leading_jet", "centrality": 1,
                "momentum": 0, "a_edges": [0, 1, 2], "b_edges": [-1, 1],
                "values": [1.0, 2.0]}}"#
        )
    }

    #[test]
    fn parses_records_and_infers_layout() {
        let json = format!(r#"{{"distributions": [{}, {}]}}"#, record("same_event"), record("mixed_event"));
        let file: DatasetFile = serde_json::from_str(&json).unwrap();
        let store = into_store(file, NormalizationPolicy::ByBinWidth).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.reachable().contains(&CorrelationStage::JetShapeBinMap));

        let key = SliceKey::new(PairCategory::TrackLeadingJet, 1, BinSel::Bin(0), BinSel::Integrated)
            .at(CorrelationStage::SameEvent);
        let d = store.get(&key).unwrap();
        assert_eq!(d.values(), &[1.0, 2.0]);
        assert_eq!(d.errors(), &[0.0, 0.0]);
    }

    #[test]
    fn conflicting_normalization_aborts() {
        let json = format!(r#"{{"normalization": "by_bin_width", "distributions": [{}]}}"#, record("corrected"));
        let file: DatasetFile = serde_json::from_str(&json).unwrap();
        let err = into_store(file, NormalizationPolicy::ByAnnulusArea).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn undeclared_stage_rejected() {
        let json = format!(r#"{{"provides": ["corrected"], "distributions": [{}]}}"#, record("same_event"));
        let file: DatasetFile = serde_json::from_str(&json).unwrap();
        assert!(into_store(file, NormalizationPolicy::ByBinWidth).is_err());
    }

    #[test]
    fn bad_shape_carries_key() {
        let json = r#"{"distributions": [{"stage": "corrected", "category": "track_inclusive_jet",
            "centrality": 0, "a_edges": [0, 1], "b_edges": [0, 1], "values": [1.0, 2.0]}]}"#;
        let file: DatasetFile = serde_json::from_str(json).unwrap();
        let err = into_store(file, NormalizationPolicy::ByBinWidth).unwrap_err();
        assert!(err.key().is_some());
    }

    #[test]
    fn store_round_trips_through_file() {
        let json = format!(r#"{{"distributions": [{}]}}"#, record("corrected"));
        let store = into_store(serde_json::from_str(&json).unwrap(), NormalizationPolicy::ByBinWidth).unwrap();
        let again = into_store(store_to_file(&store), NormalizationPolicy::ByBinWidth).unwrap();
        assert_eq!(again.keys(), store.keys());
        assert_eq!(again.provided(), store.provided());
    }
}
