use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use dj_core::{BinSel, CorrelationStage, NormalizationPolicy, PairCategory, SliceKey};
use dj_hist::{BinEdges, BinnedDistribution2D};
use dj_pipeline::io::{DatasetFile, DistributionRecord, write_json};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dijetshape"))
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("dijetshape_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn write_fixture(dir: &PathBuf, normalization: NormalizationPolicy) -> PathBuf {
    let a = BinEdges::uniform(16, -std::f64::consts::FRAC_PI_2, 1.5 * std::f64::consts::PI).unwrap();
    let b = BinEdges::uniform(12, -3.0, 3.0).unwrap();
    let same = BinnedDistribution2D::from_fn(a.clone(), b.clone(), |x, y| {
        (2.0 + 3.0 * (-(x * x + y * y) / 0.1).exp(), 0.1)
    })
    .unwrap();
    let mixed = BinnedDistribution2D::filled(a, b, 4.0, 0.0);
    let slice = SliceKey::new(PairCategory::TrackLeadingJet, 0, BinSel::Bin(0), BinSel::Integrated);
    let file = DatasetFile {
        normalization: Some(normalization),
        provides: None,
        distributions: vec![
            DistributionRecord::from_distribution(slice.at(CorrelationStage::SameEvent), &same),
            DistributionRecord::from_distribution(slice.at(CorrelationStage::MixedEvent), &mixed),
        ],
    };
    write_json(&dir.join("nominal.json"), &file).unwrap();

    let cfg = dir.join("run.yaml");
    std::fs::write(
        &cfg,
        r#"
dataset: nominal.json
normalization: by_annulus_area
radial_edges: [0.0, 0.2, 0.4, 0.6, 1.0]
mixing:
  window: { delta_phi: [-2.0, 5.0], delta_eta: [-0.5, 0.5] }
  reference_level: 1.0
uncertainties:
  sources:
    tracking_efficiency:
      estimator: { kind: ratio, fraction: 0.05 }
"#,
    )
    .unwrap();
    cfg
}

#[test]
fn run_writes_all_artifacts() {
    let dir = tmp_dir("run");
    let cfg = write_fixture(&dir, NormalizationPolicy::ByAnnulusArea);
    let out_dir = dir.join("out");

    let out = run(&["run", "--config", cfg.to_str().unwrap(), "--output", out_dir.to_str().unwrap(), "--threads", "1"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["failures"], 0);
    assert_eq!(report["slices"], 1);
    for name in ["derived.json", "shapes.json", "uncertainties.json", "summary.json", "provenance.json"] {
        let text = std::fs::read_to_string(out_dir.join(name)).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["schema_version"], "dijetshape_v1", "{name}");
    }
}

#[test]
fn validate_reports_layout() {
    let dir = tmp_dir("validate");
    let cfg = write_fixture(&dir, NormalizationPolicy::ByAnnulusArea);

    let out = run(&["validate", "--config", cfg.to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["valid"], true);
    assert_eq!(report["distributions"], 2);
    let reachable = report["reachable"].as_array().unwrap();
    assert!(reachable.iter().any(|s| s == "jet_shape_bin_map"));
}

#[test]
fn validate_rejects_normalization_mismatch() {
    let dir = tmp_dir("mismatch");
    let cfg = write_fixture(&dir, NormalizationPolicy::ByBinWidth);

    let out = run(&["validate", "--config", cfg.to_str().unwrap()]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("normalization"), "stderr: {stderr}");
}
