use std::collections::BTreeSet;
use std::f64::consts::{FRAC_PI_2, PI};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use approx::assert_relative_eq;
use dj_core::{BinSel, CorrelationStage, Error, NormalizationPolicy, PairCategory, SliceKey, UncertaintySource};
use dj_hist::{BinEdges, BinnedDistribution2D};
use dj_pipeline::io::{DatasetFile, DistributionRecord, write_json};
use dj_pipeline::{output, read_run_config, run};

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("dijetshape_pipeline_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn slice(momentum: usize) -> SliceKey {
    SliceKey::new(PairCategory::TrackLeadingJet, 0, BinSel::Bin(momentum), BinSel::Integrated)
}

fn grid(f: impl Fn(f64, f64) -> f64) -> BinnedDistribution2D {
    let a = BinEdges::uniform(16, -FRAC_PI_2, 1.5 * PI).unwrap();
    let b = BinEdges::uniform(12, -3.0, 3.0).unwrap();
    BinnedDistribution2D::from_fn(a, b, |x, y| (f(x, y), 0.1)).unwrap()
}

fn peak(height: f64) -> impl Fn(f64, f64) -> f64 {
    move |x, y| 2.0 + height * (-(x * x + y * y) / 0.1).exp()
}

fn write_dataset(
    path: &Path,
    normalization: Option<NormalizationPolicy>,
    provides: Option<Vec<CorrelationStage>>,
    items: Vec<(SliceKey, CorrelationStage, BinnedDistribution2D)>,
) {
    let file = DatasetFile {
        normalization,
        provides,
        distributions: items
            .into_iter()
            .map(|(s, stage, d)| DistributionRecord::from_distribution(s.at(stage), &d))
            .collect(),
    };
    write_json(path, &file).unwrap();
}

fn raw(slices: &[usize], height: f64) -> Vec<(SliceKey, CorrelationStage, BinnedDistribution2D)> {
    let mut items = Vec::new();
    for &m in slices {
        items.push((slice(m), CorrelationStage::SameEvent, grid(peak(height * (m + 1) as f64))));
        items.push((slice(m), CorrelationStage::MixedEvent, grid(|_, _| 4.0)));
    }
    items
}

const CONFIG: &str = r#"
dataset: nominal.json
auxiliary:
  jes_up: jes_up.json
normalization: by_annulus_area
radial_edges: [0.0, 0.2, 0.4, 0.6, 1.0]
mixing:
  window: { delta_phi: [-2.0, 5.0], delta_eta: [-0.5, 0.5] }
  reference_level: 1.0
integrate_momentum: true
threads: 1
uncertainties:
  grouping: combined
  sources:
    tracking_efficiency:
      estimator: { kind: ratio, fraction: 0.05 }
    jet_energy_scale:
      estimator: { kind: comparison, variations: [jes_up] }
    pair_acceptance:
      estimator: { kind: flat_tail, tail: [1.5, 3.0] }
"#;

fn setup(name: &str, nominal: Vec<(SliceKey, CorrelationStage, BinnedDistribution2D)>) -> PathBuf {
    setup_with(name, nominal, "")
}

fn setup_with(name: &str, nominal: Vec<(SliceKey, CorrelationStage, BinnedDistribution2D)>, extra: &str) -> PathBuf {
    let dir = tmp_dir(name);
    write_dataset(&dir.join("nominal.json"), Some(NormalizationPolicy::ByAnnulusArea), None, nominal);
    write_dataset(&dir.join("jes_up.json"), None, None, raw(&[0, 1], 3.3));
    let cfg = dir.join("run.yaml");
    std::fs::write(&cfg, format!("{CONFIG}{extra}")).unwrap();
    cfg
}

#[test]
fn end_to_end_with_momentum_integration() {
    let cfg_path = setup("e2e", raw(&[0, 1], 3.0));
    let cfg = read_run_config(&cfg_path).unwrap();
    let out = run(&cfg).unwrap();

    assert_eq!(out.n_failures(), 0, "{:?}", out.failures);
    let integrated = slice(0).with_momentum(BinSel::Integrated);
    assert_eq!(out.integrated, vec![integrated]);
    assert_eq!(out.shapes.len(), 3);

    let parts = [slice(0), slice(1)].map(|s| &out.uncertainties[&s]);
    let sum = &out.uncertainties[&integrated];
    let jes = |u: &dj_pipeline::uncertainty::SliceUncertainties| {
        u.source(UncertaintySource::JetEnergyScale).unwrap().r.value(0)
    };
    assert_relative_eq!(jes(sum), jes(parts[0]) + jes(parts[1]), max_relative = 1e-12);

    for u in out.uncertainties.values() {
        let total = u.source(UncertaintySource::Total).unwrap();
        for e in u.sources.values() {
            for (t, s) in total.r.values().iter().zip(e.r.values()) {
                assert!(t + 1e-15 >= *s);
            }
        }
        for g in ["background", "jet", "tracking"] {
            u.group(g).unwrap();
        }
    }

    let dir = cfg_path.parent().unwrap().join("out");
    let written = output::write_all(&out, &cfg, &dir).unwrap();
    assert_eq!(written.len(), 5);
    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["schema_version"], "dijetshape_v1");
    assert_eq!(summary["meta"]["tool"], "dijetshape");
    assert!(!summary["rows"].as_array().unwrap().is_empty());
    let prov: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.join("provenance.json")).unwrap()).unwrap();
    assert_eq!(prov["normalization"], "by_annulus_area");
    assert_eq!(prov["radial_assignment"], "bin_center");
}

#[test]
fn subtracted_is_exactly_corrected_minus_background() {
    let cfg = read_run_config(&setup("exact", raw(&[0], 3.0))).unwrap();
    let out = run(&cfg).unwrap();
    let at = |stage| out.store.get(&slice(0).at(stage)).unwrap();
    let expected = at(CorrelationStage::Corrected).subtract(at(CorrelationStage::Background)).unwrap();
    assert_eq!(at(CorrelationStage::BackgroundSubtracted).values(), expected.values());
}

#[test]
fn constant_background_gives_zero_shape() {
    let items = vec![
        (slice(0), CorrelationStage::SameEvent, grid(|_, _| 1.7)),
        (slice(0), CorrelationStage::MixedEvent, grid(|_, _| 4.0)),
    ];
    let cfg = read_run_config(&setup("constant", items)).unwrap();
    let out = run(&cfg).unwrap();
    let subtracted = out.store.get(&slice(0).at(CorrelationStage::BackgroundSubtracted)).unwrap();
    assert!(subtracted.values().iter().all(|&v| v == 0.0));
    let shape = &out.shapes[&slice(0)];
    assert!(shape.r.values().iter().all(|&v| v == 0.0), "{:?}", shape.r.values());
}

#[test]
fn jff_map_is_subtracted_before_projection() {
    let plain = run(&read_run_config(&setup("plain", raw(&[0, 1], 3.0))).unwrap()).unwrap();

    let cfg_path = setup_with("jff", raw(&[0, 1], 3.0), "corrections:\n  jff: jff.json\n");
    let edges = |n: usize, lo: f64, hi: f64| BinEdges::uniform(n, lo, hi).unwrap().as_slice().to_vec();
    let maps: Vec<serde_json::Value> = (0..2)
        .map(|m| {
            serde_json::json!({
                "category": "track_leading_jet",
                "centrality": 0,
                "momentum": m,
                "a_edges": edges(16, -FRAC_PI_2, 1.5 * PI),
                "b_edges": edges(12, -3.0, 3.0),
                "values": vec![0.5; 16 * 12],
            })
        })
        .collect();
    write_json(&cfg_path.parent().unwrap().join("jff.json"), &serde_json::json!({ "maps": maps })).unwrap();
    let out = run(&read_run_config(&cfg_path).unwrap()).unwrap();
    assert_eq!(out.n_failures(), 0, "{:?}", out.failures);

    let integrated = slice(0).with_momentum(BinSel::Integrated);
    for (s, offset) in [(slice(0), 0.5), (slice(1), 0.5), (integrated, 1.0)] {
        let (with, without) = (&out.shapes[&s].delta_eta, &plain.shapes[&s].delta_eta);
        for j in 0..with.n_bins() {
            assert_relative_eq!(with.value(j), without.value(j) - offset, epsilon = 1e-9);
        }
    }
    // The stored stage is the uncorrected subtraction.
    assert_eq!(
        out.store.get(&slice(0).at(CorrelationStage::BackgroundSubtracted)),
        plain.store.get(&slice(0).at(CorrelationStage::BackgroundSubtracted))
    );
}

#[test]
fn normalized_shapes_share_unit_momentum_sum() {
    let extra = "corrections:\n  normalize_shape: { up_to: 1.0 }\n";
    let cfg_path = setup_with("normalized", raw(&[0, 1], 3.0), extra);
    let cfg = read_run_config(&cfg_path).unwrap();
    let out = run(&cfg).unwrap();
    assert_eq!(out.n_failures(), 0, "{:?}", out.failures);

    let content = |s: SliceKey| {
        let r = &out.shapes[&s].r;
        (0..r.n_bins())
            .map(|k| {
                let area = NormalizationPolicy::ByAnnulusArea.denominator(r.edges().lower(k), r.edges().upper(k));
                r.value(k) * area
            })
            .sum::<f64>()
    };
    assert_relative_eq!(content(slice(0)) + content(slice(1)), 1.0, max_relative = 1e-9);
    assert_relative_eq!(content(slice(0).with_momentum(BinSel::Integrated)), 1.0, max_relative = 1e-9);

    for s in [slice(0), slice(1)] {
        let shape = &out.shapes[&s].r;
        let tracking = &out.uncertainties[&s].source(UncertaintySource::TrackingEfficiency).unwrap().r;
        for k in 0..shape.n_bins() {
            assert_relative_eq!(tracking.value(k), 0.05 * shape.value(k).abs(), max_relative = 1e-9);
        }
    }
}

#[test]
fn missing_mixed_event_fails_only_its_slice() {
    let mut items = raw(&[0, 1], 3.0);
    items.retain(|(s, stage, _)| !(*s == slice(1) && *stage == CorrelationStage::MixedEvent));
    let cfg = read_run_config(&setup("missing", items)).unwrap();
    let out = run(&cfg).unwrap();

    let broken = out.outcomes.iter().find(|o| o.slice == slice(1)).unwrap();
    assert!(matches!(
        broken.failures[0],
        Error::MissingInput { requires: CorrelationStage::MixedEvent, .. }
    ));
    assert!(out.shapes.contains_key(&slice(0)));
    assert!(!out.shapes.contains_key(&slice(1)));
    assert!(out.uncertainties.contains_key(&slice(0)));
}

#[test]
fn corrected_only_layout_marks_mixing_not_available() {
    let dir = tmp_dir("layout");
    let items = vec![(slice(0), CorrelationStage::Corrected, grid(peak(1.5)))];
    write_dataset(&dir.join("nominal.json"), None, Some(vec![CorrelationStage::Corrected]), items);
    write_dataset(&dir.join("jes_up.json"), None, None, raw(&[0], 3.3));
    std::fs::write(dir.join("run.yaml"), CONFIG).unwrap();

    let cfg = read_run_config(&dir.join("run.yaml")).unwrap();
    let out = run(&cfg).unwrap();
    let o = &out.outcomes[0];
    assert_eq!(o.not_available, vec![CorrelationStage::MixedEventNormalized]);
    assert!(o.failures.is_empty());
    assert!(out.shapes.contains_key(&slice(0)));
    assert!(matches!(
        out.store.require(&slice(0).at(CorrelationStage::MixedEventNormalized)),
        Err(Error::NotAvailable { .. })
    ));
    let provided: BTreeSet<_> = out.store.provided().iter().copied().collect();
    assert_eq!(provided, BTreeSet::from([CorrelationStage::Corrected]));
}

#[test]
fn conflicting_normalization_aborts() {
    let dir = tmp_dir("norm");
    write_dataset(&dir.join("nominal.json"), Some(NormalizationPolicy::ByBinWidth), None, raw(&[0], 1.0));
    write_dataset(&dir.join("jes_up.json"), None, None, raw(&[0], 1.0));
    std::fs::write(dir.join("run.yaml"), CONFIG).unwrap();
    let cfg = read_run_config(&dir.join("run.yaml")).unwrap();
    assert!(matches!(run(&cfg), Err(Error::Configuration(_))));
}
