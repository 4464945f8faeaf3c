//! Structural properties of the binned-distribution transforms.

use approx::assert_relative_eq;
use dj_core::{NormalizationPolicy, RadialAssignment};
use dj_hist::{Axis, BinEdges, BinnedDistribution1D, BinnedDistribution2D, FoldAxes, RadialProjector};

fn bumpy(n: usize) -> BinnedDistribution2D {
    let e = BinEdges::uniform(n, -1.5, 1.5).unwrap();
    BinnedDistribution2D::from_fn(e.clone(), e, |x, y| {
        let v = 2.0 + x.sin() * y.cos() + 0.3 * (3.0 * x * y).cos();
        (v, 0.1 * v.abs())
    })
    .unwrap()
}

#[test]
fn identity_rebin_is_a_no_op() {
    let d = bumpy(12);
    assert_eq!(d.rebin(d.a_edges(), d.b_edges()).unwrap(), d);

    let h = BinnedDistribution1D::new(
        BinEdges::new(vec![0.0, 0.1, 0.3, 0.7]).unwrap(),
        vec![1.5, -2.0, 0.25],
        vec![0.3, 0.2, 0.1],
    )
    .unwrap();
    assert_eq!(h.rebin(h.edges()).unwrap(), h);
}

#[test]
fn symmetrize_is_idempotent_on_content() {
    let d = bumpy(12);
    for fold in [FoldAxes::A, FoldAxes::B, FoldAxes::Both] {
        let once = d.symmetrize(1.0, fold).unwrap();
        let twice = once.symmetrize(1.0, fold).unwrap();
        for (x, y) in once.values().iter().zip(twice.values()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-12);
        }
    }
}

#[test]
fn symmetrize_within_cutoff_leaves_outer_bins_untouched() {
    let d = bumpy(12);
    let cutoff = 0.8;
    for fold in [FoldAxes::A, FoldAxes::B, FoldAxes::Both] {
        let once = d.symmetrize(cutoff, fold).unwrap();
        let twice = once.symmetrize(cutoff, fold).unwrap();
        let mut untouched = 0;
        for ia in 0..d.n_a() {
            for ib in 0..d.n_b() {
                assert_relative_eq!(once.value(ia, ib), twice.value(ia, ib), max_relative = 1e-12);
                if d.a_edges().center(ia).hypot(d.b_edges().center(ib)) > cutoff {
                    assert_eq!(once.value(ia, ib), d.value(ia, ib));
                    assert_eq!(twice.value(ia, ib), d.value(ia, ib));
                    untouched += 1;
                }
            }
        }
        assert!(untouched > 0 && untouched < d.values().len());
    }
}

#[test]
fn flat_density_gives_flat_area_normalized_profile() {
    let h = 0.005;
    let density = 3.0;
    let e = BinEdges::uniform(400, -1.0, 1.0).unwrap();
    let flat = BinnedDistribution2D::filled(e.clone(), e, density * h * h, 0.0);

    let r = BinEdges::new(vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0]).unwrap();
    let projector = RadialProjector::new(r, NormalizationPolicy::ByAnnulusArea).unwrap();
    let profile = projector.project(&flat).unwrap();
    for k in 0..profile.shape.n_bins() {
        assert_relative_eq!(profile.shape.value(k), density, max_relative = 0.02);
    }

    let expected = projector.propagate_flat(density).unwrap();
    for k in 0..expected.n_bins() {
        assert_relative_eq!(profile.shape.value(k), expected.value(k), max_relative = 0.02);
    }
}

#[test]
fn flat_density_is_flat_under_area_weighting() {
    let h = 0.01;
    let density = 2.0;
    let e = BinEdges::uniform(200, -1.0, 1.0).unwrap();
    let flat = BinnedDistribution2D::filled(e.clone(), e, density * h * h, 0.0);

    let r = BinEdges::new(vec![0.0, 0.25, 0.5, 0.75, 1.0]).unwrap();
    let projector = RadialProjector::new(r, NormalizationPolicy::ByAnnulusArea)
        .unwrap()
        .with_assignment(RadialAssignment::AreaWeighted);
    let profile = projector.project(&flat).unwrap();
    for k in 0..profile.shape.n_bins() {
        assert_relative_eq!(profile.shape.value(k), density, max_relative = 0.01);
    }
}

#[test]
fn project_range_times_count_is_range_sum() {
    let d = bumpy(12);
    let proj = d.project_range(Axis::A, -0.5, 0.5).unwrap();
    let sum = proj.sum();
    let selected: Vec<usize> =
        (0..d.n_b()).filter(|&ib| d.b_edges().center(ib).abs() <= 0.5).collect();
    assert_eq!(proj.n_bins, selected.len());
    for ia in 0..d.n_a() {
        let manual: f64 = selected.iter().map(|&ib| d.value(ia, ib)).sum();
        assert_relative_eq!(sum.value(ia), manual, max_relative = 1e-12);
    }
}

#[test]
fn two_sided_windows_merge() {
    let d = bumpy(12);
    let left = d.project_range(Axis::A, -1.5, -1.0).unwrap();
    let right = d.project_range(Axis::A, 1.0, 1.5).unwrap();
    let both = d.project_ranges(Axis::A, &[(-1.5, -1.0), (1.0, 1.5)]).unwrap();
    assert_eq!(both.n_bins, left.n_bins + right.n_bins);
    for ia in 0..d.n_a() {
        let merged = (left.sum().value(ia) + right.sum().value(ia)) / both.n_bins as f64;
        assert_relative_eq!(both.profile.value(ia), merged, max_relative = 1e-12);
    }
}
