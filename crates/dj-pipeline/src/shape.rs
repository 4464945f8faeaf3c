//! Jet shape and near-side Δη profile of a correlation.

use std::sync::Arc;

use dj_core::{Result, SliceKey};
use dj_hist::{Axis, BinnedDistribution1D, BinnedDistribution2D, RadialProjector, RangeProjection};
use serde::Serialize;

use crate::config::{RebinConfig, RunConfig, SymmetrizeConfig};
use crate::correction::CorrectionChain;

/// Radial and Δη representations of one slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceShape {
    /// Slice.
    pub slice: SliceKey,
    /// Normalized radial profile.
    pub r: BinnedDistribution1D,
    /// Angular bins per radial bin.
    pub counts: Vec<f64>,
    /// Near-side Δη profile (mean over the near-side Δφ bins).
    pub delta_eta: BinnedDistribution1D,
}

/// Optional rebin and symmetrize, then radial and Δη projection.
#[derive(Debug, Clone)]
pub struct ShapeTransformer {
    rebin: Option<RebinConfig>,
    symmetrize: Option<SymmetrizeConfig>,
    projector: RadialProjector,
    near_side: (f64, f64),
    corrections: Option<Arc<CorrectionChain>>,
}

impl ShapeTransformer {
    /// Assemble from parts.
    pub fn new(
        projector: RadialProjector,
        near_side: (f64, f64),
        rebin: Option<RebinConfig>,
        symmetrize: Option<SymmetrizeConfig>,
    ) -> Self {
        Self { rebin, symmetrize, projector, near_side, corrections: None }
    }

    /// Corrections applied by [`ShapeTransformer::result_shape`].
    pub fn with_corrections(mut self, chain: CorrectionChain) -> Self {
        self.corrections = (!chain.is_empty()).then(|| Arc::new(chain));
        self
    }

    /// Build from a run configuration, loading its correction files.
    pub fn from_config(cfg: &RunConfig) -> Result<Self> {
        let projector = RadialProjector::new(cfg.radial_edges.clone(), cfg.normalization)?
            .with_assignment(cfg.radial_assignment);
        let shapes = Self::new(
            projector,
            cfg.near_side,
            cfg.transforms.rebin.clone(),
            cfg.transforms.symmetrize.clone(),
        );
        Ok(shapes.with_corrections(CorrectionChain::load(&cfg.corrections)?))
    }

    /// Radial projector.
    pub fn projector(&self) -> &RadialProjector {
        &self.projector
    }

    /// Apply the configured rebin and symmetrize.
    pub fn prepare(&self, dist: &BinnedDistribution2D) -> Result<BinnedDistribution2D> {
        let mut out = match &self.rebin {
            Some(r) => dist.rebin(&r.delta_phi, &r.delta_eta)?,
            None => dist.clone(),
        };
        if let Some(s) = &self.symmetrize {
            out = out.symmetrize(s.radius, s.fold)?;
        }
        Ok(out)
    }

    /// Δη profile over the near-side Δφ window of an already prepared distribution.
    pub fn near_side(&self, prepared: &BinnedDistribution2D) -> Result<RangeProjection> {
        prepared.project_range(Axis::B, self.near_side.0, self.near_side.1)
    }

    /// Prepare and project.
    pub fn shape(&self, slice: SliceKey, dist: &BinnedDistribution2D) -> Result<SliceShape> {
        let prepared = self.prepare(dist)?;
        let radial = self.projector.project(&prepared)?;
        Ok(SliceShape {
            slice,
            r: radial.shape,
            counts: radial.counts,
            delta_eta: self.near_side(&prepared)?.profile,
        })
    }

    /// Shape of a background-subtracted result: correction maps, then
    /// [`ShapeTransformer::shape`], then radial cleaning.
    pub fn result_shape(&self, slice: SliceKey, subtracted: &BinnedDistribution2D) -> Result<SliceShape> {
        let Some(chain) = &self.corrections else {
            return self.shape(slice, subtracted);
        };
        let mut shape = self.shape(slice, &chain.apply_2d(slice, subtracted)?)?;
        shape.r = chain.apply_radial(slice, &shape.r)?;
        Ok(shape)
    }

    /// Radial bin map of the prepared distribution.
    pub fn bin_map(&self, dist: &BinnedDistribution2D) -> Result<BinnedDistribution2D> {
        Ok(self.projector.project(&self.prepare(dist)?)?.bin_map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dj_core::{BinSel, NormalizationPolicy, PairCategory};
    use dj_hist::{BinEdges, FoldAxes};

    fn slice() -> SliceKey {
        SliceKey::new(PairCategory::TrackInclusiveJet, 0, BinSel::Bin(0), BinSel::Integrated)
    }

    fn transformer(symmetrize: Option<SymmetrizeConfig>) -> ShapeTransformer {
        let r = BinEdges::new(vec![0.0, 0.5, 1.0]).unwrap();
        ShapeTransformer::new(
            RadialProjector::new(r, NormalizationPolicy::ByBinWidth).unwrap(),
            (-0.5, 0.5),
            None,
            symmetrize,
        )
    }

    #[test]
    fn shape_has_both_representations() {
        let e = BinEdges::uniform(4, -1.0, 1.0).unwrap();
        let d = BinnedDistribution2D::filled(e.clone(), e, 2.0, 0.0);
        let s = transformer(None).shape(slice(), &d).unwrap();
        assert_eq!(s.r.n_bins(), 2);
        assert_eq!(s.delta_eta.n_bins(), 4);
        assert_relative_eq!(s.delta_eta.value(0), 2.0);
        assert_eq!(s.counts, vec![4.0, 8.0]);
    }

    #[test]
    fn symmetrize_runs_before_projection() {
        let e = BinEdges::uniform(4, -1.0, 1.0).unwrap();
        let d = BinnedDistribution2D::from_fn(e.clone(), e, |x, _| (if x > 0.0 { 3.0 } else { 1.0 }, 0.0))
            .unwrap();
        let t = transformer(Some(SymmetrizeConfig { radius: 2.0, fold: FoldAxes::A }));
        let s = t.shape(slice(), &d).unwrap();
        for j in 0..s.delta_eta.n_bins() {
            assert_relative_eq!(s.delta_eta.value(j), 2.0);
        }
    }

    #[test]
    fn result_shape_applies_corrections() {
        use crate::correction::{CorrectionMaps, MapKind, RadialCleaning};

        let e = BinEdges::uniform(4, -1.0, 1.0).unwrap();
        let d = BinnedDistribution2D::filled(e.clone(), e.clone(), 2.0, 0.0);
        let mut jff = CorrectionMaps::new("jff", MapKind::Additive);
        jff.insert(slice(), BinnedDistribution2D::filled(e.clone(), e, 0.5, 0.0), None).unwrap();
        let mut cleaning = RadialCleaning::default();
        cleaning.insert(slice(), 1, 7.0).unwrap();
        let chain = CorrectionChain::default().with_maps(jff).with_cleaning(cleaning);

        let t = transformer(None).with_corrections(chain);
        let s = t.result_shape(slice(), &d).unwrap();
        assert_relative_eq!(s.delta_eta.value(0), 1.5);
        assert_eq!(s.r.value(1), 7.0);
        assert_eq!(t.shape(slice(), &d).unwrap(), transformer(None).shape(slice(), &d).unwrap());
    }
}
