//! Raw per-slice uncertainty estimators.

use std::collections::BTreeMap;

use dj_core::{CorrelationStage, Error, Result, SliceKey, UncertaintySource};
use dj_hist::{BinnedDistribution1D, RangeProjection};

use super::Estimate;
use super::smoothing::SmoothingOverrides;
use crate::config::{DatasetStage, EstimatorConfig, Fraction, Reduction, SourceConfig, TailMethod};
use crate::shape::{ShapeTransformer, SliceShape};
use crate::store::CorrelationStore;

/// Everything an estimator may read.
#[derive(Debug, Clone, Copy)]
pub struct EstimationContext<'a> {
    /// Nominal dataset after derivation.
    pub nominal: &'a CorrelationStore,
    /// Auxiliary datasets after derivation, by name.
    pub auxiliary: &'a BTreeMap<String, CorrelationStore>,
    /// Shape transforms of the run.
    pub shapes: &'a ShapeTransformer,
    /// Nominal shapes by slice.
    pub nominal_shapes: &'a BTreeMap<SliceKey, SliceShape>,
}

impl<'a> EstimationContext<'a> {
    fn store(&self, dataset: Option<&str>) -> Result<&'a CorrelationStore> {
        match dataset {
            None => Ok(self.nominal),
            Some(name) => self.auxiliary.get(name).ok_or_else(|| {
                Error::Configuration(format!("auxiliary dataset '{name}' is not loaded"))
            }),
        }
    }

    fn nominal_shape(&self, slice: SliceKey) -> Result<&'a SliceShape> {
        self.nominal_shapes.get(&slice).ok_or(Error::MissingInput {
            key: slice.at(CorrelationStage::BackgroundSubtracted),
            requires: CorrelationStage::BackgroundSubtracted,
        })
    }

    fn shape_of(&self, input: &DatasetStage, slice: SliceKey) -> Result<SliceShape> {
        let dist = self.store(input.dataset.as_deref())?.require(&slice.at(input.stage))?;
        match input.stage {
            CorrelationStage::BackgroundSubtracted => self.shapes.result_shape(slice, dist),
            _ => self.shapes.shape(slice, dist),
        }
    }
}

/// Estimate one source for one slice, then apply its smoothing overrides.
pub fn estimate_source(
    ctx: &EstimationContext<'_>,
    source: UncertaintySource,
    cfg: &SourceConfig,
    smoothing: Option<&SmoothingOverrides>,
    slice: SliceKey,
) -> Result<Estimate> {
    let raw = match &cfg.estimator {
        EstimatorConfig::Ratio { input, fraction } => ratio(ctx, input, fraction, slice),
        EstimatorConfig::Comparison { variations, reduction } => {
            comparison(ctx, variations, *reduction, slice)
        }
        EstimatorConfig::FlatTail { input, tail, method } => flat_tail(ctx, input, *tail, *method, slice),
    }
    .map_err(|e| e.context(source))?;

    match smoothing {
        Some(s) => Ok(Estimate { r: s.apply(slice, &raw.r)?, delta_eta: raw.delta_eta }),
        None => Ok(raw),
    }
}

fn abs_scaled(d: &BinnedDistribution1D, f: f64) -> Result<BinnedDistribution1D> {
    d.with_values(d.values().iter().map(|v| v.abs() * f).collect())
}

/// `|input| × fraction` in both representations.
pub fn ratio(
    ctx: &EstimationContext<'_>,
    input: &DatasetStage,
    fraction: &Fraction,
    slice: SliceKey,
) -> Result<Estimate> {
    let f = fraction.lookup(slice.category, slice.centrality, slice.momentum.index());
    let shape = ctx.shape_of(input, slice)?;
    Ok(Estimate { r: abs_scaled(&shape.r, f)?, delta_eta: abs_scaled(&shape.delta_eta, f)? })
}

fn deviation(nominal: &BinnedDistribution1D, varied: &BinnedDistribution1D) -> Result<Vec<f64>> {
    Ok(varied.subtract(nominal)?.values().iter().map(|d| d.abs()).collect())
}

fn reduce(deviations: &[Vec<f64>], reduction: Reduction) -> Vec<f64> {
    let n = deviations.first().map_or(0, Vec::len);
    (0..n)
        .map(|k| {
            let column = deviations.iter().map(|d| d[k]);
            match reduction {
                Reduction::Max => column.fold(0.0, f64::max),
                Reduction::Mean => column.sum::<f64>() / deviations.len() as f64,
            }
        })
        .collect()
}

/// Spread of the variations' shapes around the nominal shape.
pub fn comparison(
    ctx: &EstimationContext<'_>,
    variations: &[String],
    reduction: Reduction,
    slice: SliceKey,
) -> Result<Estimate> {
    let nominal = ctx.nominal_shape(slice)?;
    let mut dev_r = Vec::with_capacity(variations.len());
    let mut dev_eta = Vec::with_capacity(variations.len());
    for name in variations {
        let input = DatasetStage { dataset: Some(name.clone()), stage: CorrelationStage::BackgroundSubtracted };
        let varied = ctx.shape_of(&input, slice)?;
        dev_r.push(deviation(&nominal.r, &varied.r)?);
        dev_eta.push(deviation(&nominal.delta_eta, &varied.delta_eta)?);
    }
    Ok(Estimate {
        r: nominal.r.with_values(reduce(&dev_r, reduction))?,
        delta_eta: nominal.delta_eta.with_values(reduce(&dev_eta, reduction))?,
    })
}

/// Mean per-area density of the left and right `|Δη| ∈ [lo, hi]` tails.
pub fn tail_densities(proj: &RangeProjection, (lo, hi): (f64, f64)) -> Result<(f64, f64)> {
    let edges = proj.profile.edges();
    let cell = proj.mean_width();
    let side = |inside: &dyn Fn(f64) -> bool| -> Result<f64> {
        let densities: Vec<f64> = (0..edges.n_bins())
            .filter(|&j| inside(edges.center(j)))
            .map(|j| proj.profile.value(j) / (cell * edges.width(j)))
            .collect();
        if densities.is_empty() {
            return Err(Error::InvalidBinning(format!(
                "Δη tail [{lo}, {hi}] contains no bins on [{}, {}]",
                edges.low(),
                edges.high()
            )));
        }
        Ok(densities.iter().sum::<f64>() / densities.len() as f64)
    };
    let left = side(&|c: f64| c >= -hi && c <= -lo)?;
    let right = side(&|c: f64| c >= lo && c <= hi)?;
    Ok((left, right))
}

/// Flat density from the Δη tails, propagated to both representations.
pub fn flat_tail(
    ctx: &EstimationContext<'_>,
    input: &DatasetStage,
    tail: (f64, f64),
    method: TailMethod,
    slice: SliceKey,
) -> Result<Estimate> {
    let dist = ctx.store(input.dataset.as_deref())?.require(&slice.at(input.stage))?;
    let prepared = ctx.shapes.prepare(dist)?;
    let proj = ctx.shapes.near_side(&prepared)?;
    let (left, right) = tail_densities(&proj, tail)?;
    let density = match method {
        TailMethod::SideDifference => (left - right).abs(),
        TailMethod::MaxDeviation => left.abs().max(right.abs()),
    };

    let edges = proj.profile.edges();
    let cell = proj.mean_width();
    let eta = (0..edges.n_bins()).map(|j| density * cell * edges.width(j)).collect();
    Ok(Estimate {
        r: ctx.shapes.projector().propagate_flat(density)?,
        delta_eta: proj.profile.with_values(eta)?,
    })
}
