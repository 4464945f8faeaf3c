//! Per-slice stage derivation.
//!
//! Every slice is derived independently: stages are visited in dependency
//! order, each one computed from its inputs (already stored or derived
//! earlier for the same slice). A failure only affects the key that failed
//! and the stages depending on it. Stages the dataset layout cannot reach
//! are reported as not available instead of being filled with a default.

use std::collections::{BTreeMap, BTreeSet};

use dj_core::{BinKey, CorrelationStage, Error, Result, SliceKey, StageGraph};
use dj_hist::BinnedDistribution2D;
use dj_inference::background;
use dj_inference::mixing;
use dj_inference::{BackgroundModel, FitReport, MixedEventNormalizer, MixingMode, SeagullCorrection};
use rayon::prelude::*;

use crate::config::{RunConfig, SliceSelector};
use crate::shape::ShapeTransformer;
use crate::store::CorrelationStore;

/// What happened to one slice.
#[derive(Debug)]
pub struct SliceOutcome {
    /// Slice.
    pub slice: SliceKey,
    /// Stages derived for this slice.
    pub derived: Vec<CorrelationStage>,
    /// Derived distributions, moved into the store by [`Deriver::derive_all`].
    pub distributions: BTreeMap<CorrelationStage, BinnedDistribution2D>,
    /// Background fit diagnostics, when the background was fitted.
    pub fit: Option<FitReport>,
    /// Seagull fit diagnostics, when the correction ran.
    pub seagull: Option<FitReport>,
    /// Mixed-event scale factor, when the normalization ran.
    pub mixing_scale: Option<f64>,
    /// Per-key failures.
    pub failures: Vec<Error>,
    /// Stages this dataset's layout cannot produce.
    pub not_available: Vec<CorrelationStage>,
}

impl SliceOutcome {
    fn new(slice: SliceKey) -> Self {
        Self {
            slice,
            derived: Vec::new(),
            distributions: BTreeMap::new(),
            fit: None,
            seagull: None,
            mixing_scale: None,
            failures: Vec::new(),
            not_available: Vec::new(),
        }
    }
}

/// Run `work` in a dedicated pool of `threads` workers, or in the global
/// rayon pool when `threads == 0`.
pub(crate) fn with_pool<T: Send>(threads: usize, work: impl FnOnce() -> T + Send) -> Result<T> {
    if threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::Computation(format!("failed to create thread pool: {e}")))?;
        Ok(pool.install(work))
    } else {
        Ok(work())
    }
}

/// Computes derived stages.
#[derive(Debug, Clone)]
pub struct Deriver {
    graph: StageGraph,
    normalizer: MixedEventNormalizer,
    background: BackgroundModel,
    shapes: ShapeTransformer,
    seagull: Option<SeagullCorrection>,
    seagull_veto: Vec<SliceSelector>,
}

impl Deriver {
    /// Assemble from parts.
    pub fn new(
        graph: StageGraph,
        normalizer: MixedEventNormalizer,
        background: BackgroundModel,
        shapes: ShapeTransformer,
    ) -> Self {
        Self { graph, normalizer, background, shapes, seagull: None, seagull_veto: Vec::new() }
    }

    /// Apply `seagull` to every derived corrected stage except the vetoed slices.
    pub fn with_seagull(mut self, seagull: SeagullCorrection, veto: Vec<SliceSelector>) -> Self {
        self.seagull = Some(seagull);
        self.seagull_veto = veto;
        self
    }

    /// Build from a run configuration.
    pub fn from_config(cfg: &RunConfig) -> Result<Self> {
        let deriver = Self::new(
            StageGraph::new()?,
            MixedEventNormalizer::new(cfg.mixing.clone())?,
            BackgroundModel::new(cfg.background.clone())?,
            ShapeTransformer::from_config(cfg)?,
        );
        Ok(match &cfg.corrections.seagull {
            Some(step) => deriver.with_seagull(SeagullCorrection::new(step.fit.clone())?, step.veto.clone()),
            None => deriver,
        })
    }

    /// Shape transformer used for the bin map stage.
    pub fn shapes(&self) -> &ShapeTransformer {
        &self.shapes
    }

    /// Derive every missing stage of `slice`. Never fails as a whole.
    pub fn derive_slice(&self, store: &CorrelationStore, slice: SliceKey) -> SliceOutcome {
        let mut out = SliceOutcome::new(slice);
        let mut failed: BTreeSet<CorrelationStage> = BTreeSet::new();

        for stage in self.graph.derived() {
            let key = slice.at(stage);
            if store.contains(&key) {
                continue;
            }
            if !store.reachable().contains(&stage) {
                out.not_available.push(stage);
                continue;
            }

            if let Some(&input) = stage.inputs().iter().find(|&&i| failed.contains(&i)) {
                failed.insert(stage);
                out.failures.push(Error::MissingInput { key, requires: input });
                continue;
            }

            match self.derive_stage(store, &mut out, key) {
                Ok(dist) => {
                    out.derived.push(stage);
                    out.distributions.insert(stage, dist);
                }
                Err(e) => {
                    failed.insert(stage);
                    out.failures.push(e.in_key(key));
                }
            }
        }
        out
    }

    fn derive_stage(
        &self,
        store: &CorrelationStore,
        out: &mut SliceOutcome,
        key: BinKey,
    ) -> Result<BinnedDistribution2D> {
        use CorrelationStage::*;

        let slice = key.slice;
        let local = &out.distributions;
        let input = |stage: CorrelationStage| -> Result<&BinnedDistribution2D> {
            local
                .get(&stage)
                .or_else(|| store.get(&slice.at(stage)))
                .ok_or(Error::MissingInput { key, requires: stage })
        };

        match key.stage {
            MixedEventNormalized => {
                let partner = match self.normalizer.mode() {
                    MixingMode::Average => slice
                        .category
                        .partner()
                        .and_then(|p| store.get(&slice.with_category(p).at(MixedEvent))),
                    MixingMode::Single => None,
                };
                let normalized = self.normalizer.normalize(input(MixedEvent)?, partner)?;
                out.mixing_scale = Some(normalized.scale);
                Ok(normalized.distribution)
            }
            Corrected => {
                let corrected = mixing::correct(input(SameEvent)?, input(MixedEventNormalized)?)?;
                match &self.seagull {
                    Some(seagull) if !self.seagull_veto.iter().any(|v| v.matches(slice)) => {
                        let (dist, report) = seagull.correct(&corrected).map_err(|e| e.context("seagull"))?;
                        out.seagull = Some(report);
                        Ok(dist)
                    }
                    _ => Ok(corrected),
                }
            }
            Background => {
                let corrected = input(Corrected)?;
                let fit = self.background.fit(corrected)?;
                let dist = self.background.evaluate(&fit.model, corrected)?;
                if !fit.report.converged {
                    log::warn!("{key}: background fit did not converge ({})", fit.report.message);
                }
                out.fit = Some(fit.report);
                Ok(dist)
            }
            BackgroundSubtracted => background::subtract(input(Corrected)?, input(Background)?),
            BackgroundOverlap => self.background.overlap(input(Corrected)?, input(Background)?),
            JetShapeBinMap => self.shapes.bin_map(input(BackgroundSubtracted)?),
            SameEvent | MixedEvent => Err(Error::MissingInput { key, requires: key.stage }),
        }
    }

    /// Derive every slice of `store` and merge the results back into it.
    ///
    /// `threads == 0` uses the global rayon pool.
    pub fn derive_all(&self, store: &mut CorrelationStore, threads: usize) -> Result<Vec<SliceOutcome>> {
        let slices: Vec<SliceKey> = store.slices().into_iter().collect();
        let snapshot: &CorrelationStore = store;
        let mut outcomes = with_pool(threads, || -> Vec<SliceOutcome> {
            slices.par_iter().map(|&s| self.derive_slice(snapshot, s)).collect()
        })?;

        for outcome in &mut outcomes {
            for (stage, dist) in std::mem::take(&mut outcome.distributions) {
                store.insert(outcome.slice.at(stage), dist)?;
            }
            for failure in &outcome.failures {
                log::warn!("{failure}");
            }
        }
        Ok(outcomes)
    }
}
