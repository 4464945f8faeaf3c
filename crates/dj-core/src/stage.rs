//! Correlation stages and their dependency graph.
//!
//! Every two-dimensional correlation distribution sits at exactly one
//! stage. Input stages are loaded from disk; every other stage is a pure
//! function of the stages listed by [`CorrelationStage::inputs`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Pipeline phase reached by a two-dimensional correlation distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStage {
    /// Pairs from the same event.
    SameEvent,
    /// Pairs from mixed events (pair acceptance shape).
    MixedEvent,
    /// Mixed event scaled to the reference level.
    MixedEventNormalized,
    /// Same event divided by the normalized mixed event.
    Corrected,
    /// Corrected minus the fitted background.
    BackgroundSubtracted,
    /// Fitted periodic background over the full range.
    Background,
    /// Corrected minus background inside the fit region only.
    BackgroundOverlap,
    /// Radial bin index assigned to every angular bin.
    JetShapeBinMap,
}

impl CorrelationStage {
    /// All stages in declaration order.
    pub const ALL: [CorrelationStage; 8] = [
        CorrelationStage::SameEvent,
        CorrelationStage::MixedEvent,
        CorrelationStage::MixedEventNormalized,
        CorrelationStage::Corrected,
        CorrelationStage::BackgroundSubtracted,
        CorrelationStage::Background,
        CorrelationStage::BackgroundOverlap,
        CorrelationStage::JetShapeBinMap,
    ];

    /// Stages this stage is derived from. Empty for input stages.
    pub fn inputs(self) -> &'static [CorrelationStage] {
        use CorrelationStage::*;
        match self {
            SameEvent | MixedEvent => &[],
            MixedEventNormalized => &[MixedEvent],
            Corrected => &[SameEvent, MixedEventNormalized],
            Background => &[Corrected],
            BackgroundSubtracted => &[Corrected, Background],
            BackgroundOverlap => &[Corrected, Background],
            JetShapeBinMap => &[BackgroundSubtracted],
        }
    }

    /// True for stages that can only come from input files.
    pub fn is_input(self) -> bool {
        self.inputs().is_empty()
    }

    /// Stable snake_case name, used in file formats and log messages.
    pub fn name(self) -> &'static str {
        use CorrelationStage::*;
        match self {
            SameEvent => "same_event",
            MixedEvent => "mixed_event",
            MixedEventNormalized => "mixed_event_normalized",
            Corrected => "corrected",
            BackgroundSubtracted => "background_subtracted",
            Background => "background",
            BackgroundOverlap => "background_overlap",
            JetShapeBinMap => "jet_shape_bin_map",
        }
    }
}

impl fmt::Display for CorrelationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated stage dependency graph with a fixed derivation order.
#[derive(Debug, Clone)]
pub struct StageGraph {
    order: Vec<CorrelationStage>,
}

impl StageGraph {
    /// Build the graph from [`CorrelationStage::inputs`] and check it is acyclic.
    pub fn new() -> Result<Self> {
        Self::from_edges(CorrelationStage::ALL.iter().map(|&s| (s, s.inputs().to_vec())))
    }

    /// Build a graph from explicit `(stage, inputs)` pairs (Kahn's algorithm).
    pub fn from_edges(
        edges: impl IntoIterator<Item = (CorrelationStage, Vec<CorrelationStage>)>,
    ) -> Result<Self> {
        let mut indegree: BTreeMap<CorrelationStage, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<CorrelationStage, Vec<CorrelationStage>> = BTreeMap::new();
        for (stage, inputs) in edges {
            *indegree.entry(stage).or_insert(0) += inputs.len();
            for input in inputs {
                indegree.entry(input).or_insert(0);
                dependents.entry(input).or_default().push(stage);
            }
        }

        let mut queue: VecDeque<CorrelationStage> =
            indegree.iter().filter(|(_, d)| **d == 0).map(|(s, _)| *s).collect();
        let mut order = Vec::with_capacity(indegree.len());
        while let Some(stage) = queue.pop_front() {
            order.push(stage);
            for &next in dependents.get(&stage).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(d) = indegree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if order.len() != indegree.len() {
            let stuck: Vec<String> = indegree
                .iter()
                .filter(|(s, _)| !order.contains(s))
                .map(|(s, _)| s.to_string())
                .collect();
            return Err(Error::Configuration(format!(
                "stage graph has a cycle through: {}",
                stuck.join(", ")
            )));
        }
        Ok(Self { order })
    }

    /// Stages in dependency order (inputs before dependents).
    pub fn order(&self) -> &[CorrelationStage] {
        &self.order
    }

    /// Derived stages in dependency order.
    pub fn derived(&self) -> impl Iterator<Item = CorrelationStage> + '_ {
        self.order.iter().copied().filter(|s| !s.is_input())
    }

    /// Stages reachable from a set of provided stages.
    ///
    /// A stage is reachable when it is provided directly or when all of its
    /// inputs are reachable.
    pub fn reachable(&self, provided: &BTreeSet<CorrelationStage>) -> BTreeSet<CorrelationStage> {
        let mut out = BTreeSet::new();
        for &stage in &self.order {
            if provided.contains(&stage)
                || (!stage.is_input() && stage.inputs().iter().all(|i| out.contains(i)))
            {
                out.insert(stage);
            }
        }
        out
    }
}
