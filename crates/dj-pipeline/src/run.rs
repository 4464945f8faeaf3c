//! End-to-end run: load, derive, shape, estimate, summarize.
//!
//! Loading is sequential. Derivation, shape projection and uncertainty
//! estimation fan out per slice on the rayon pool sized by
//! [`RunConfig::threads`]. A failing slice is recorded and the batch
//! continues; only configuration problems abort the run.

use std::collections::BTreeMap;

use dj_core::{BinSel, CorrelationStage, Error, Result, SliceKey, UncertaintySource};
use dj_hist::BinnedDistribution2D;
use rayon::prelude::*;

use crate::config::RunConfig;
use crate::correction;
use crate::derive::{Deriver, SliceOutcome, with_pool};
use crate::io;
use crate::shape::SliceShape;
use crate::store::CorrelationStore;
use crate::summary::{self, SummaryRow};
use crate::uncertainty::{
    EstimationContext, SliceUncertainties, SmoothingOverrides, UncertaintyAggregator, estimate_source,
};

/// Everything a run produced.
#[derive(Debug)]
pub struct RunOutput {
    /// Nominal store after derivation (and momentum integration).
    pub store: CorrelationStore,
    /// Per-slice derivation outcomes of the nominal dataset.
    pub outcomes: Vec<SliceOutcome>,
    /// Per-slice derivation outcomes of each auxiliary dataset.
    pub auxiliary: BTreeMap<String, Vec<SliceOutcome>>,
    /// Slices created by momentum integration.
    pub integrated: Vec<SliceKey>,
    /// Nominal shapes.
    pub shapes: BTreeMap<SliceKey, SliceShape>,
    /// Uncertainties per slice.
    pub uncertainties: BTreeMap<SliceKey, SliceUncertainties>,
    /// Integrated summary rows.
    pub summary: Vec<SummaryRow>,
    /// Failures outside stage derivation (integration, shapes, estimators).
    pub failures: Vec<Error>,
}

impl RunOutput {
    /// Number of recorded failures, derivation included.
    pub fn n_failures(&self) -> usize {
        self.failures.len()
            + self.outcomes.iter().map(|o| o.failures.len()).sum::<usize>()
            + self.auxiliary.values().flatten().map(|o| o.failures.len()).sum::<usize>()
    }
}

/// Execute a validated run.
pub fn run(cfg: &RunConfig) -> Result<RunOutput> {
    cfg.validate()?;
    let deriver = Deriver::from_config(cfg)?;
    let aggregator = UncertaintyAggregator::new(&cfg.uncertainties.grouping, &cfg.uncertainties.strategies)?;
    let smoothing = load_smoothing(cfg)?;

    let mut store = io::load_store(&cfg.dataset, cfg.normalization)?;
    log::info!("nominal dataset: {} distributions in {} slices", store.len(), store.slices().len());
    let outcomes = deriver.derive_all(&mut store, cfg.threads)?;

    let mut failures = Vec::new();
    let integrated = if cfg.integrate_momentum {
        integrate_momentum(&mut store, &mut failures)?
    } else {
        Vec::new()
    };

    let mut shapes = build_shapes(&deriver, &store, cfg.threads, &mut failures)?;

    let mut auxiliary_stores = BTreeMap::new();
    let mut auxiliary = BTreeMap::new();
    for (name, path) in &cfg.auxiliary {
        let mut aux = io::load_store(path, cfg.normalization)?;
        log::info!("auxiliary dataset '{name}': {} distributions", aux.len());
        auxiliary.insert(name.clone(), deriver.derive_all(&mut aux, cfg.threads)?);
        auxiliary_stores.insert(name.clone(), aux);
    }

    let ctx = EstimationContext {
        nominal: &store,
        auxiliary: &auxiliary_stores,
        shapes: deriver.shapes(),
        nominal_shapes: &shapes,
    };
    let estimated: Vec<SliceKey> = shapes.keys().copied().filter(|s| !integrated.contains(s)).collect();
    let per_slice = with_pool(cfg.threads, || -> Vec<(SliceKey, Result<SliceUncertainties>, Vec<Error>)> {
        estimated
            .par_iter()
            .map(|&slice| {
                let (unc, errs) = estimate_slice(&ctx, cfg, &smoothing, &aggregator, slice);
                (slice, unc, errs)
            })
            .collect()
    })?;

    let mut uncertainties = BTreeMap::new();
    for (slice, unc, errs) in per_slice {
        failures.extend(errs);
        match unc {
            Ok(u) => {
                uncertainties.insert(slice, u);
            }
            Err(e) => failures.push(e.in_key(slice.at(CorrelationStage::BackgroundSubtracted))),
        }
    }
    for &slice in &integrated {
        let parts: Vec<&SliceUncertainties> = uncertainties
            .values()
            .filter(|u| u.slice.with_momentum(BinSel::Integrated) == slice)
            .collect();
        match aggregator.integrate(&parts) {
            Ok(u) => {
                uncertainties.insert(slice, u);
            }
            Err(e) => failures.push(e.in_key(slice.at(CorrelationStage::BackgroundSubtracted))),
        }
    }

    if let Some(n) = &cfg.corrections.normalize_shape {
        normalize_shapes(&mut shapes, &mut uncertainties, cfg, n.up_to, &mut failures);
    }

    let summary = uncertainties
        .values()
        .flat_map(|u| summary::summarize(u, shapes.get(&u.slice), cfg.summary_radius))
        .collect();

    for f in &failures {
        log::warn!("{f}");
    }
    Ok(RunOutput { store, outcomes, auxiliary, integrated, shapes, uncertainties, summary, failures })
}

/// Divide every shape and its radial uncertainties by the momentum-summed
/// content up to `up_to`. Slices that cannot be normalized are dropped.
fn normalize_shapes(
    shapes: &mut BTreeMap<SliceKey, SliceShape>,
    uncertainties: &mut BTreeMap<SliceKey, SliceUncertainties>,
    cfg: &RunConfig,
    up_to: f64,
    failures: &mut Vec<Error>,
) {
    for (slice, factor) in correction::normalization_factors(shapes, cfg.normalization, up_to) {
        let stage = slice.at(CorrelationStage::BackgroundSubtracted);
        match factor {
            Ok(f) => {
                if let Some(shape) = shapes.get_mut(&slice) {
                    correction::normalize_slice(shape, uncertainties.get_mut(&slice), f);
                }
            }
            Err(e) => {
                shapes.remove(&slice);
                uncertainties.remove(&slice);
                failures.push(e.context("shape normalization").in_key(stage));
            }
        }
    }
}

fn load_smoothing(cfg: &RunConfig) -> Result<BTreeMap<UncertaintySource, SmoothingOverrides>> {
    let mut out = BTreeMap::new();
    for (source, sc) in &cfg.uncertainties.sources {
        if let Some(path) = &sc.smoothing {
            let overrides = SmoothingOverrides::load(path)?;
            log::debug!("{source}: {} smoothing overrides from {}", overrides.len(), path.display());
            out.insert(*source, overrides);
        }
    }
    Ok(out)
}

fn estimate_slice(
    ctx: &EstimationContext<'_>,
    cfg: &RunConfig,
    smoothing: &BTreeMap<UncertaintySource, SmoothingOverrides>,
    aggregator: &UncertaintyAggregator,
    slice: SliceKey,
) -> (Result<SliceUncertainties>, Vec<Error>) {
    let mut sources = BTreeMap::new();
    let mut errors = Vec::new();
    for (&source, sc) in &cfg.uncertainties.sources {
        match estimate_source(ctx, source, sc, smoothing.get(&source), slice) {
            Ok(e) => {
                sources.insert(source, e);
            }
            Err(e) => errors.push(e.in_key(slice.at(CorrelationStage::BackgroundSubtracted))),
        }
    }
    (aggregator.combine(slice, sources), errors)
}

/// Sum each slice's per-momentum BackgroundSubtracted distributions into its
/// integrated momentum slice. Returns the slices created.
pub fn integrate_momentum(store: &mut CorrelationStore, failures: &mut Vec<Error>) -> Result<Vec<SliceKey>> {
    let stage = CorrelationStage::BackgroundSubtracted;
    let mut groups: BTreeMap<SliceKey, Vec<SliceKey>> = BTreeMap::new();
    for slice in store.slices() {
        if matches!(slice.momentum, BinSel::Bin(_)) && store.contains(&slice.at(stage)) {
            groups.entry(slice.with_momentum(BinSel::Integrated)).or_default().push(slice);
        }
    }

    let mut created = Vec::new();
    for (target, parts) in groups {
        let key = target.at(stage);
        if store.contains(&key) {
            log::debug!("{key}: already present, not integrating momentum");
            continue;
        }
        match sum_parts(store, &parts, stage) {
            Ok(sum) => {
                store.insert(key, sum)?;
                created.push(target);
            }
            Err(e) => failures.push(e.in_key(key)),
        }
    }
    Ok(created)
}

fn sum_parts(store: &CorrelationStore, parts: &[SliceKey], stage: CorrelationStage) -> Result<BinnedDistribution2D> {
    let mut iter = parts.iter();
    let Some(first) = iter.next() else {
        return Err(Error::Validation("no momentum bins to integrate".into()));
    };
    let mut sum = store.require(&first.at(stage))?.clone();
    for part in iter {
        sum = sum.add(store.require(&part.at(stage))?)?;
    }
    Ok(sum)
}

fn build_shapes(
    deriver: &Deriver,
    store: &CorrelationStore,
    threads: usize,
    failures: &mut Vec<Error>,
) -> Result<BTreeMap<SliceKey, SliceShape>> {
    let stage = CorrelationStage::BackgroundSubtracted;
    let slices: Vec<SliceKey> =
        store.slices().into_iter().filter(|s| store.contains(&s.at(stage))).collect();
    let results = with_pool(threads, || -> Vec<(SliceKey, Result<SliceShape>)> {
        slices
            .par_iter()
            .map(|&s| (s, store.require(&s.at(stage)).and_then(|d| deriver.shapes().result_shape(s, d))))
            .collect()
    })?;

    let mut shapes = BTreeMap::new();
    for (slice, r) in results {
        match r {
            Ok(shape) => {
                shapes.insert(slice, shape);
            }
            Err(e) => failures.push(e.in_key(slice.at(stage))),
        }
    }
    Ok(shapes)
}
