//! JSON artifacts of a run.
//!
//! Every artifact carries `schema_version` and a `meta` block naming the
//! tool and its version. Collections are written in key order, so apart
//! from the provenance timestamp two runs over the same inputs produce
//! identical files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use dj_core::{BinKey, CorrelationStage, Error, NormalizationPolicy, RadialAssignment, Result, SliceKey};
use dj_inference::FitReport;
use serde::Serialize;

use crate::config::RunConfig;
use crate::derive::SliceOutcome;
use crate::io::{self, DatasetFile};
use crate::run::RunOutput;
use crate::shape::SliceShape;
use crate::summary::SummaryRow;
use crate::uncertainty::SliceUncertainties;

/// Schema tag written into every artifact.
pub const SCHEMA_VERSION: &str = "dijetshape_v1";

/// Tool identification.
#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    /// Tool name.
    pub tool: String,
    /// Tool version.
    pub tool_version: String,
}

impl Meta {
    fn current() -> Self {
        Self { tool: "dijetshape".to_string(), tool_version: dj_core::VERSION.to_string() }
    }
}

#[derive(Debug, Serialize)]
struct Artifact<'a, T: Serialize> {
    schema_version: &'static str,
    meta: Meta,
    #[serde(flatten)]
    body: &'a T,
}

fn wrap<T: Serialize>(body: &T) -> Artifact<'_, T> {
    Artifact { schema_version: SCHEMA_VERSION, meta: Meta::current(), body }
}

#[derive(Debug, Serialize)]
struct ShapesBody<'a> {
    normalization: NormalizationPolicy,
    radial_assignment: RadialAssignment,
    near_side: (f64, f64),
    shapes: Vec<&'a SliceShape>,
}

#[derive(Debug, Serialize)]
struct UncertaintiesBody<'a> {
    grouping: &'a str,
    slices: Vec<&'a SliceUncertainties>,
}

#[derive(Debug, Serialize)]
struct SummaryBody<'a> {
    summary_radius: f64,
    rows: &'a [SummaryRow],
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    /// Key the failure is localized to.
    pub key: Option<BinKey>,
    /// Rendered error.
    pub message: String,
}

impl From<&Error> for FailureRecord {
    fn from(e: &Error) -> Self {
        Self { key: e.key().copied(), message: e.to_string() }
    }
}

/// Derivation record of one slice.
#[derive(Debug, Clone, Serialize)]
pub struct SliceRecord {
    /// Slice.
    pub slice: SliceKey,
    /// Stages derived.
    pub derived: Vec<CorrelationStage>,
    /// Stages this layout cannot produce.
    pub not_available: Vec<CorrelationStage>,
    /// Mixed-event scale factor.
    pub mixing_scale: Option<f64>,
    /// Background fit diagnostics.
    pub fit: Option<FitReport>,
    /// Seagull fit diagnostics.
    pub seagull: Option<FitReport>,
    /// Per-key failures.
    pub failures: Vec<FailureRecord>,
}

impl From<&SliceOutcome> for SliceRecord {
    fn from(o: &SliceOutcome) -> Self {
        Self {
            slice: o.slice,
            derived: o.derived.clone(),
            not_available: o.not_available.clone(),
            mixing_scale: o.mixing_scale,
            fit: o.fit.clone(),
            seagull: o.seagull.clone(),
            failures: o.failures.iter().map(FailureRecord::from).collect(),
        }
    }
}

/// Contents of `provenance.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    /// Creation time.
    pub created_unix_ms: u128,
    /// Radial normalization of every shape and uncertainty.
    pub normalization: NormalizationPolicy,
    /// Radial assignment.
    pub radial_assignment: RadialAssignment,
    /// Worker threads (0 = auto).
    pub threads: usize,
    /// Active grouping strategy.
    pub grouping: String,
    /// Nominal derivation, per slice.
    pub slices: Vec<SliceRecord>,
    /// Auxiliary derivation, per dataset and slice.
    pub auxiliary: BTreeMap<String, Vec<SliceRecord>>,
    /// Slices produced by momentum integration.
    pub integrated: Vec<SliceKey>,
    /// Failures outside stage derivation.
    pub failures: Vec<FailureRecord>,
}

fn now_unix_ms() -> Result<u128> {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Computation(format!("system time error: {e}")))?;
    Ok(d.as_millis())
}

fn records(outcomes: &[SliceOutcome]) -> Vec<SliceRecord> {
    let mut v: Vec<SliceRecord> = outcomes.iter().map(SliceRecord::from).collect();
    v.sort_by_key(|r| r.slice);
    v
}

/// Provenance of a run.
pub fn provenance(out: &RunOutput, cfg: &RunConfig) -> Result<Provenance> {
    Ok(Provenance {
        created_unix_ms: now_unix_ms()?,
        normalization: cfg.normalization,
        radial_assignment: cfg.radial_assignment,
        threads: cfg.threads,
        grouping: cfg.uncertainties.grouping.clone(),
        slices: records(&out.outcomes),
        auxiliary: out.auxiliary.iter().map(|(k, v)| (k.clone(), records(v))).collect(),
        integrated: out.integrated.clone(),
        failures: out.failures.iter().map(FailureRecord::from).collect(),
    })
}

/// Write every artifact into `dir` (created if needed). Returns the paths written.
pub fn write_all(out: &RunOutput, cfg: &RunConfig, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    let mut put = |name: &str, write: &dyn Fn(&Path) -> Result<()>| -> Result<()> {
        let path = dir.join(name);
        write(&path)?;
        log::debug!("wrote {}", path.display());
        written.push(path);
        Ok(())
    };

    let derived: DatasetFile = io::store_to_file(&out.store);
    put("derived.json", &|p: &Path| io::write_json(p, &wrap(&derived)))?;

    let shapes = ShapesBody {
        normalization: cfg.normalization,
        radial_assignment: cfg.radial_assignment,
        near_side: cfg.near_side,
        shapes: out.shapes.values().collect(),
    };
    put("shapes.json", &|p: &Path| io::write_json(p, &wrap(&shapes)))?;

    let unc = UncertaintiesBody {
        grouping: &cfg.uncertainties.grouping,
        slices: out.uncertainties.values().collect(),
    };
    put("uncertainties.json", &|p: &Path| io::write_json(p, &wrap(&unc)))?;

    let summary = SummaryBody { summary_radius: cfg.summary_radius, rows: &out.summary };
    put("summary.json", &|p: &Path| io::write_json(p, &wrap(&summary)))?;

    let prov = provenance(out, cfg)?;
    put("provenance.json", &|p: &Path| io::write_json(p, &wrap(&prov)))?;

    Ok(written)
}
