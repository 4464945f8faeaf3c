//! Integrated uncertainty summaries.
//!
//! For every slice, the radial uncertainty of each source, each group and
//! the total is integrated (`Σ u × ΔR`) up to the summary radius. The
//! relative figure divides by the same integral of the nominal jet shape.

use dj_core::{BinSel, PairCategory};
use serde::Serialize;

use crate::shape::SliceShape;
use crate::uncertainty::SliceUncertainties;

/// What a summary row integrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    /// A single source.
    Source,
    /// A group of the active strategy.
    Group,
    /// Quadrature sum of every source.
    Total,
}

/// One summary row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    /// Source, group or total.
    pub kind: RowKind,
    /// Source or group name.
    pub name: String,
    /// Pair category.
    pub category: PairCategory,
    /// Asymmetry bin.
    pub asymmetry: BinSel,
    /// Centrality bin.
    pub centrality: usize,
    /// Momentum bin.
    pub momentum: BinSel,
    /// Integrated absolute uncertainty.
    pub absolute: f64,
    /// `absolute` over the integrated nominal shape; absent when that is zero.
    pub relative: Option<f64>,
}

/// Rows for one slice: sources, then groups, then the total.
pub fn summarize(unc: &SliceUncertainties, nominal: Option<&SliceShape>, radius: f64) -> Vec<SummaryRow> {
    let reference = nominal.map(|s| s.r.integral_width(radius)).filter(|v| v.is_finite() && *v != 0.0);
    let s = unc.slice;
    let row = |kind, name: &str, absolute: f64| SummaryRow {
        kind,
        name: name.to_string(),
        category: s.category,
        asymmetry: s.asymmetry,
        centrality: s.centrality,
        momentum: s.momentum,
        absolute,
        relative: reference.map(|r| absolute / r.abs()),
    };

    let mut rows: Vec<SummaryRow> = unc
        .sources
        .iter()
        .map(|(source, e)| row(RowKind::Source, source.name(), e.r.integral_width(radius)))
        .collect();
    rows.extend(
        unc.groups
            .iter()
            .map(|(name, g)| row(RowKind::Group, name, g.estimate.r.integral_width(radius))),
    );
    if let Some(total) = &unc.total {
        rows.push(row(RowKind::Total, "total", total.r.integral_width(radius)));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dj_core::{SliceKey, UncertaintySource};
    use dj_hist::{BinEdges, BinnedDistribution1D};
    use std::collections::BTreeMap;

    use crate::uncertainty::{Estimate, UncertaintyAggregator};

    fn dist(values: Vec<f64>) -> BinnedDistribution1D {
        BinnedDistribution1D::from_values(BinEdges::new(vec![0.0, 0.5, 1.0, 1.5]).unwrap(), values).unwrap()
    }

    #[test]
    fn integrates_up_to_radius() {
        let slice = SliceKey::new(PairCategory::TrackLeadingJet, 1, BinSel::Bin(0), BinSel::Integrated);
        let e = Estimate { r: dist(vec![1.0, 2.0, 100.0]), delta_eta: dist(vec![0.0; 3]) };
        let agg = UncertaintyAggregator::new("by_source", &BTreeMap::new()).unwrap();
        let unc = agg.combine(slice, BTreeMap::from([(UncertaintySource::JetEnergyScale, e)])).unwrap();
        let nominal = SliceShape {
            slice,
            r: dist(vec![10.0, 20.0, 0.0]),
            counts: vec![1.0; 3],
            delta_eta: dist(vec![0.0; 3]),
        };

        let rows = summarize(&unc, Some(&nominal), 0.99);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].kind, RowKind::Source);
        assert_eq!(rows[2].kind, RowKind::Total);
        for r in &rows {
            assert_relative_eq!(r.absolute, 1.5);
            assert_relative_eq!(r.relative.unwrap(), 0.1);
        }
        assert!(summarize(&unc, None, 0.99).iter().all(|r| r.relative.is_none()));
    }
}
