//! Quadrature combination and grouping of per-source estimates.
//!
//! Definition:
//! - Total is `sqrt(Σ_s u_s²)` over every computed source, bin by bin and
//!   separately per representation.
//! - A group is the same sum restricted to its computed members. Groups
//!   without any computed member are absent.
//! - Across momentum bins sources are fully correlated: the uncertainty of
//!   an integrated slice is the linear sum of the per-bin uncertainties.

use std::collections::BTreeMap;

use dj_core::{BinSel, Error, Result, SliceKey, UncertaintySource};
use serde::Serialize;

use super::Estimate;
use super::grouping::{self, Group};
use crate::config::GroupConfig;

/// One group of the active strategy for one slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupEstimate {
    /// Label.
    pub display: String,
    /// Members that contributed.
    pub sources: Vec<UncertaintySource>,
    /// Quadrature sum of the members.
    pub estimate: Estimate,
}

/// Every uncertainty of one slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceUncertainties {
    /// Slice.
    pub slice: SliceKey,
    /// Per computed source.
    pub sources: BTreeMap<UncertaintySource, Estimate>,
    /// Quadrature sum of all computed sources.
    pub total: Option<Estimate>,
    /// Groups of the active strategy, by name.
    pub groups: BTreeMap<String, GroupEstimate>,
}

impl SliceUncertainties {
    /// Estimate of `source`; [`UncertaintySource::Total`] gives the total.
    pub fn source(&self, source: UncertaintySource) -> Result<&Estimate> {
        let found = match source {
            UncertaintySource::Total => self.total.as_ref(),
            s => self.sources.get(&s),
        };
        found.ok_or_else(|| {
            Error::Configuration(format!("source {source} was not computed for {}", self.slice))
        })
    }

    /// Multiply every radial estimate by `factor`; Δη is untouched.
    pub fn scale_radial(&mut self, factor: f64) {
        let groups = self.groups.values_mut().map(|g| &mut g.estimate);
        for e in self.sources.values_mut().chain(self.total.as_mut()).chain(groups) {
            e.r = e.r.scaled(factor);
        }
    }

    /// Group `name` of the active strategy.
    pub fn group(&self, name: &str) -> Result<&GroupEstimate> {
        self.groups.get(name).ok_or_else(|| {
            Error::Configuration(format!("group '{name}' is not available for {}", self.slice))
        })
    }
}

/// Combines the sources of a slice under one grouping strategy.
#[derive(Debug, Clone)]
pub struct UncertaintyAggregator {
    strategy: String,
    groups: Vec<Group>,
}

impl UncertaintyAggregator {
    /// Aggregator for a built-in or configured strategy.
    pub fn new(strategy: &str, configured: &BTreeMap<String, Vec<GroupConfig>>) -> Result<Self> {
        Ok(Self { strategy: strategy.to_string(), groups: grouping::resolve(strategy, configured)? })
    }

    /// Active strategy name.
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// Groups of the active strategy.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Total and groups from per-source estimates.
    pub fn combine(
        &self,
        slice: SliceKey,
        sources: BTreeMap<UncertaintySource, Estimate>,
    ) -> Result<SliceUncertainties> {
        if sources.contains_key(&UncertaintySource::Total) {
            return Err(Error::Configuration("total is computed, not estimated".into()));
        }
        let total = Estimate::quadrature(sources.values())?;

        let mut groups = BTreeMap::new();
        for g in &self.groups {
            let members: Vec<UncertaintySource> =
                g.sources.iter().copied().filter(|s| sources.contains_key(s)).collect();
            if let Some(estimate) = Estimate::quadrature(members.iter().map(|s| &sources[s]))? {
                groups.insert(
                    g.name.clone(),
                    GroupEstimate { display: g.display.clone(), sources: members, estimate },
                );
            }
        }
        Ok(SliceUncertainties { slice, sources, total, groups })
    }

    /// Momentum-integrated uncertainties from the per-momentum slices.
    ///
    /// A source missing from any part is left out of the integrated slice.
    pub fn integrate(&self, parts: &[&SliceUncertainties]) -> Result<SliceUncertainties> {
        let Some(first) = parts.first() else {
            return Err(Error::Validation("no momentum bins to integrate".into()));
        };
        let slice = first.slice.with_momentum(BinSel::Integrated);

        let mut sources = BTreeMap::new();
        for &s in first.sources.keys() {
            let per_bin: Option<Vec<&Estimate>> = parts.iter().map(|p| p.sources.get(&s)).collect();
            match per_bin {
                Some(items) => {
                    if let Some(sum) = Estimate::linear_sum(items)? {
                        sources.insert(s, sum);
                    }
                }
                None => log::warn!("{slice}: {s} is missing in some momentum bins, not integrated"),
            }
        }
        self.combine(slice, sources)
    }
}
