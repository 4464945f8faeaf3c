//! Keyed, write-once storage of correlation distributions.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dj_core::{BinKey, CorrelationStage, Error, NormalizationPolicy, Result, SliceKey, StageGraph};
use dj_hist::BinnedDistribution2D;

/// Result of looking up a key.
#[derive(Debug, Clone)]
pub enum Lookup<'a> {
    /// Present.
    Available(&'a BinnedDistribution2D),
    /// The stage cannot exist for this dataset's layout.
    NotAvailable,
    /// The stage is reachable but this key was never populated.
    Missing,
}

/// Owns every distribution of one dataset, keyed by [`BinKey`].
///
/// Slots are populated once, by loading or derivation, and then only read.
#[derive(Debug, Clone)]
pub struct CorrelationStore {
    provided: BTreeSet<CorrelationStage>,
    reachable: BTreeSet<CorrelationStage>,
    normalization: Option<NormalizationPolicy>,
    entries: HashMap<BinKey, Arc<BinnedDistribution2D>>,
}

impl CorrelationStore {
    /// Empty store for a dataset that provides `provided` stages.
    pub fn new(provided: BTreeSet<CorrelationStage>) -> Result<Self> {
        let reachable = StageGraph::new()?.reachable(&provided);
        Ok(Self { provided, reachable, normalization: None, entries: HashMap::new() })
    }

    /// Record the normalization policy the dataset declares.
    pub fn with_normalization(mut self, policy: Option<NormalizationPolicy>) -> Self {
        self.normalization = policy;
        self
    }

    /// Declared normalization policy, if any.
    pub fn normalization(&self) -> Option<NormalizationPolicy> {
        self.normalization
    }

    /// Stages supplied by the dataset.
    pub fn provided(&self) -> &BTreeSet<CorrelationStage> {
        &self.provided
    }

    /// Stages that exist for this layout.
    pub fn reachable(&self) -> &BTreeSet<CorrelationStage> {
        &self.reachable
    }

    /// Populate an empty slot.
    pub fn insert(&mut self, key: BinKey, dist: BinnedDistribution2D) -> Result<()> {
        if !self.reachable.contains(&key.stage) {
            return Err(Error::Validation(format!(
                "{key}: stage {} is not available for this dataset layout",
                key.stage
            )));
        }
        if self.entries.contains_key(&key) {
            return Err(Error::Validation(format!("{key}: slot already populated")));
        }
        self.entries.insert(key, Arc::new(dist));
        Ok(())
    }

    /// Distribution at `key`, if present.
    pub fn get(&self, key: &BinKey) -> Option<&BinnedDistribution2D> {
        self.entries.get(key).map(Arc::as_ref)
    }

    /// Shared handle to the distribution at `key`.
    pub fn shared(&self, key: &BinKey) -> Option<Arc<BinnedDistribution2D>> {
        self.entries.get(key).cloned()
    }

    /// True when `key` is populated.
    pub fn contains(&self, key: &BinKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Distinguish present, missing and layout-unreachable keys.
    pub fn lookup(&self, key: &BinKey) -> Lookup<'_> {
        match self.get(key) {
            Some(d) => Lookup::Available(d),
            None if !self.reachable.contains(&key.stage) => Lookup::NotAvailable,
            None => Lookup::Missing,
        }
    }

    /// Distribution at `key` or an error naming why it is absent.
    pub fn require(&self, key: &BinKey) -> Result<&BinnedDistribution2D> {
        match self.lookup(key) {
            Lookup::Available(d) => Ok(d),
            Lookup::Missing => Err(Error::MissingInput { key: *key, requires: key.stage }),
            Lookup::NotAvailable => Err(Error::NotAvailable { key: *key, layout: self.layout() }),
        }
    }

    fn layout(&self) -> String {
        self.provided.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    }

    /// Every slice with at least one populated stage.
    pub fn slices(&self) -> BTreeSet<SliceKey> {
        self.entries.keys().map(|k| k.slice).collect()
    }

    /// Populated keys in order.
    pub fn keys(&self) -> Vec<BinKey> {
        let mut keys: Vec<BinKey> = self.entries.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is populated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
