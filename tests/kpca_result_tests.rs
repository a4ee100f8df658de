// In tests/kpca_result_tests.rs

use approx::assert_abs_diff_eq;
use distributed_kpca::{
    DenseKernelSums, ExportConfig, KpcaError, KpcaResult, MeanVariancePairMatrix, NdarrayEigensolver,
};
use ndarray::{array, Array1, Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Helper for checking the ordering invariant of all three bound matrices.
fn assert_bounds_ordered(result: &KpcaResult, context: &str) {
    let (lower, center, upper) = (
        result.projection_lower(),
        result.projections(),
        result.projection_upper(),
    );
    assert_eq!(lower.dim(), center.dim(), "lower/center shape for {}", context);
    assert_eq!(upper.dim(), center.dim(), "upper/center shape for {}", context);
    for ((idx, &c), (&l, &u)) in center.indexed_iter().zip(lower.iter().zip(upper.iter())) {
        assert!(
            l <= c && c <= u,
            "Bound ordering violated at {:?} for {}: {} <= {} <= {}",
            idx,
            context,
            l,
            c,
            u
        );
    }
}

fn random_statistics(components: usize, query_points: usize, seed: u64) -> MeanVariancePairMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 2.0).unwrap();
    let mut stats = MeanVariancePairMatrix::new(components, query_points);
    for k in 0..components {
        for i in 0..query_points {
            let center = rng.gen_range(-10.0..10.0);
            for _ in 0..rng.gen_range(2..30) {
                stats.get_mut(k, i).push_point(center + noise.sample(&mut rng));
            }
        }
    }
    stats
}

#[test]
fn export_two_component_scenario() {
    init_logging();
    let means = array![[10.0], [20.0]];
    let variances = array![[4.0], [1.0]];
    let sums = DenseKernelSums::new(means.view(), variances.view()).unwrap();

    let mut result = KpcaResult::new();
    result.init(2, 0, 1).unwrap();
    result.export_with(2.0, 1.0, 0.0, &sums).unwrap();

    assert_eq!(result.projections(), &array![[10.0], [20.0]]);
    assert_eq!(result.projection_lower(), &array![[6.0], [18.0]]);
    assert_eq!(result.projection_upper(), &array![[14.0], [22.0]]);
}

#[test]
fn export_applies_correction_before_scaling() {
    let means = array![[5.0, 7.0]];
    let variances = array![[0.25, 0.0]];
    let sums = DenseKernelSums::new(means.view(), variances.view()).unwrap();

    let mut result = KpcaResult::new();
    result.init(1, 0, 2).unwrap();
    result
        .export(&ExportConfig::new(2.0, 3.0, 1.0), &sums)
        .unwrap();

    // (5 - 1) * 3 = 12, deviation = 2 * 0.5 = 1
    assert_abs_diff_eq!(result.projections()[[0, 0]], 12.0);
    assert_abs_diff_eq!(result.projection_lower()[[0, 0]], 9.0);
    assert_abs_diff_eq!(result.projection_upper()[[0, 0]], 15.0);
    // zero variance collapses the interval
    assert_abs_diff_eq!(result.projection_lower()[[0, 1]], 18.0);
    assert_abs_diff_eq!(result.projection_upper()[[0, 1]], 18.0);
}

#[test]
fn export_keeps_bounds_ordered_for_random_statistics() {
    init_logging();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for trial in 0..20 {
        let components = rng.gen_range(1..5);
        let query_points = rng.gen_range(0..8);
        let stats = random_statistics(components, query_points, trial);
        let config = ExportConfig::new(
            rng.gen_range(0.0..4.0),
            rng.gen_range(0.0..3.0),
            rng.gen_range(-2.0..2.0),
        );

        let mut result = KpcaResult::new();
        result.init(components, 0, query_points).unwrap();
        result.export(&config, &stats).unwrap();
        assert_bounds_ordered(&result, &format!("trial {} with {:?}", trial, config));
    }
}

#[test]
fn negative_multiplicative_constant_swaps_bounds() {
    let means = array![[10.0], [20.0]];
    let variances = array![[4.0], [1.0]];
    let sums = DenseKernelSums::new(means.view(), variances.view()).unwrap();

    let mut result = KpcaResult::new();
    result.init(2, 0, 1).unwrap();
    result.export_with(2.0, -1.0, 0.0, &sums).unwrap();

    assert_eq!(result.projections(), &array![[-10.0], [-20.0]]);
    assert_eq!(result.projection_lower(), &array![[-14.0], [-22.0]]);
    assert_eq!(result.projection_upper(), &array![[-6.0], [-18.0]]);
    assert_bounds_ordered(&result, "negative scale");
}

#[test]
fn export_with_zero_query_points_is_valid() {
    let stats = MeanVariancePairMatrix::new(3, 0);
    let mut result = KpcaResult::new();
    result.init(3, 4, 0).unwrap();
    result.export(&ExportConfig::default(), &stats).unwrap();
    assert_eq!(result.shape(), (3, 0));
}

#[test]
fn export_from_reduced_node_statistics() {
    // Two nodes sample the same kernel sums; the coordinator reduces then exports.
    let node_a = random_statistics(2, 3, 1);
    let node_b = random_statistics(2, 3, 2);
    let reduced = MeanVariancePairMatrix::reduce(vec![node_a.clone(), node_b.clone()]).unwrap();

    let mut result = KpcaResult::new();
    result.init(2, 0, 3).unwrap();
    result.export(&ExportConfig::new(1.0, 1.0, 0.0), &reduced).unwrap();

    for k in 0..2 {
        for i in 0..3 {
            let a = node_a.get(k, i);
            let b = node_b.get(k, i);
            let n = (a.num_samples() + b.num_samples()) as f64;
            let pooled_mean = (a.sample_mean() * a.num_samples() as f64
                + b.sample_mean() * b.num_samples() as f64)
                / n;
            assert_abs_diff_eq!(result.projections()[[k, i]], pooled_mean, epsilon = 1e-10);
        }
    }
    assert_bounds_ordered(&result, "reduced statistics");
}

#[test]
fn export_dimension_mismatch_is_reported() {
    let stats = MeanVariancePairMatrix::new(2, 5);
    let mut result = KpcaResult::new();
    result.init(2, 0, 4).unwrap();
    match result.export(&ExportConfig::default(), &stats) {
        Err(KpcaError::DimensionMismatch { expected, found, .. }) => {
            assert_eq!(expected, (2, 4));
            assert_eq!(found, (2, 5));
        }
        other => panic!("expected DimensionMismatch, got {:?}", other),
    }
}

#[test]
fn init_shape_and_zeroing() {
    let mut result = KpcaResult::new();
    result.init(4, 100, 7).unwrap();
    for m in [result.projection_lower(), result.projections(), result.projection_upper()] {
        assert_eq!(m.nrows(), 4);
        assert_eq!(m.ncols(), 7);
        assert!(m.iter().all(|&v| v == 0.0));
    }

    let stats = random_statistics(4, 7, 9);
    result.export(&ExportConfig::default(), &stats).unwrap();
    result.init(4, 100, 7).unwrap();
    assert!(result.projections().iter().all(|&v| v == 0.0));

    result.init(2, 100, 3).unwrap();
    assert_eq!(result.shape(), (2, 3));
}

#[test]
fn reorder_scenario_three_eigenpairs() {
    let values = array![3.0, 9.0, 1.0];
    let vectors = array![[0.1, 0.2, 0.3], [1.1, 1.2, 1.3], [2.1, 2.2, 2.3]];
    let mut result = KpcaResult::new();
    result.set_eigendecomposition_results(&values, &vectors).unwrap();

    assert_eq!(result.kernel_eigenvalues(), &array![9.0, 3.0, 1.0]);
    assert_eq!(
        result.covariance_eigenvectors(),
        &array![[0.2, 0.1, 0.3], [1.2, 1.1, 1.3], [2.2, 2.1, 2.3]]
    );
    // inputs untouched
    assert_eq!(values, array![3.0, 9.0, 1.0]);
}

#[test]
fn reorder_is_a_deterministic_permutation() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..25 {
        let n = rng.gen_range(0..12);
        let rows = rng.gen_range(1..6);
        // A small value pool makes ties frequent.
        let values = Array1::from_shape_fn(n, |_| rng.gen_range(0..4) as f64);
        let vectors = Array2::from_shape_fn((rows, n), |_| rng.gen_range(-1.0..1.0));

        let mut result = KpcaResult::new();
        result.set_eigendecomposition_results(&values, &vectors).unwrap();
        let sorted = result.kernel_eigenvalues();
        let sorted_vectors = result.covariance_eigenvectors();

        assert_eq!(sorted.len(), n);
        assert_eq!(sorted_vectors.dim(), (rows, n));
        for w in sorted.as_slice().unwrap().windows(2) {
            assert!(w[0] >= w[1], "not non-increasing: {:?}", sorted);
        }

        let mut expected_multiset = values.to_vec();
        let mut got_multiset = sorted.to_vec();
        expected_multiset.sort_by(|a, b| a.partial_cmp(b).unwrap());
        got_multiset.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(expected_multiset, got_multiset);

        // Recover the permutation independently: equal values in ascending original index.
        let mut used = vec![false; n];
        for j in 0..n {
            let original = (0..n)
                .filter(|&idx| !used[idx] && values[idx] == sorted[j])
                .min()
                .expect("sorted value must come from the input");
            used[original] = true;
            assert_eq!(sorted_vectors.column(j), vectors.column(original));
        }

        let mut again = KpcaResult::new();
        again.set_eigendecomposition_results(&values, &vectors).unwrap();
        assert_eq!(again.covariance_eigenvectors(), sorted_vectors);
    }
}

#[test]
fn decompose_covariance_keeps_leading_components() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let data = Array2::from_shape_fn((20, 5), |_| rng.gen_range(-1.0..1.0));
    let covariance = data.t().dot(&data) / 19.0;

    let mut full = KpcaResult::new();
    full.decompose_covariance(&NdarrayEigensolver, covariance.view(), None)
        .unwrap();
    let mut truncated = KpcaResult::new();
    truncated
        .decompose_covariance(&NdarrayEigensolver, covariance.view(), Some(2))
        .unwrap();

    assert_eq!(full.kernel_eigenvalues().len(), 5);
    assert_eq!(truncated.kernel_eigenvalues().len(), 2);
    assert_eq!(truncated.covariance_eigenvectors().dim(), (5, 2));
    for j in 0..2 {
        assert_abs_diff_eq!(truncated.kernel_eigenvalues()[j], full.kernel_eigenvalues()[j]);
        assert_eq!(
            truncated.covariance_eigenvectors().column(j),
            full.covariance_eigenvectors().column(j)
        );
    }
    assert_abs_diff_eq!(full.explained_variance_ratio().sum(), 1.0, epsilon = 1e-10);

    let mut oversized = KpcaResult::new();
    oversized
        .decompose_covariance(&NdarrayEigensolver, covariance.view(), Some(50))
        .unwrap();
    assert_eq!(oversized.kernel_eigenvalues().len(), 5);
}

fn populated_result() -> KpcaResult {
    let stats = random_statistics(3, 4, 5);
    let mut result = KpcaResult::new();
    result.init(3, 6, 4).unwrap();
    result
        .export(&ExportConfig::new(1.5, 0.75, 0.1), &stats)
        .unwrap();
    result
        .set_eigendecomposition_results(
            &array![0.5, 2.0, 1.25],
            &Array2::from_shape_fn((6, 3), |(r, c)| (r * 3 + c) as f64 * 0.1),
        )
        .unwrap();
    *result.reference_projections_mut() = Array2::ones((6, 6));
    *result.kpca_components_mut() = Array2::from_elem((4, 3), 2.0);
    result
}

fn assert_bit_identical(a: ArrayView2<f64>, b: ArrayView2<f64>, context: &str) {
    assert_eq!(a.dim(), b.dim(), "shape for {}", context);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.to_bits(), y.to_bits(), "bits differ for {}", context);
    }
}

#[test]
fn wire_round_trip_reproduces_transferable_fields() {
    init_logging();
    let original = populated_result();
    let bytes = original.to_bytes().unwrap();
    let decoded = KpcaResult::from_bytes(&bytes).unwrap();

    assert_bit_identical(decoded.projection_lower().view(), original.projection_lower().view(), "lower");
    assert_bit_identical(decoded.projections().view(), original.projections().view(), "center");
    assert_bit_identical(decoded.projection_upper().view(), original.projection_upper().view(), "upper");
    assert_eq!(decoded.kernel_eigenvalues(), original.kernel_eigenvalues());
    assert_bit_identical(
        decoded.covariance_eigenvectors().view(),
        original.covariance_eigenvectors().view(),
        "eigenvectors",
    );
    assert!(decoded.reference_projections().is_empty());
    assert!(decoded.kpca_components().is_empty());
}

#[test]
fn wire_round_trip_of_default_result() {
    let decoded = KpcaResult::from_bytes(&KpcaResult::new().to_bytes().unwrap()).unwrap();
    assert_eq!(decoded, KpcaResult::new());
}

#[test]
fn save_and_load_through_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kpca_result.bin");
    let original = populated_result();
    original.save(&path).unwrap();

    let loaded = KpcaResult::load(&path).unwrap();
    assert_eq!(loaded.projections(), original.projections());
    assert_eq!(loaded.projection_lower(), original.projection_lower());
    assert_eq!(loaded.projection_upper(), original.projection_upper());
    assert_eq!(loaded.kernel_eigenvalues(), &array![2.0, 1.25, 0.5]);
    assert_eq!(loaded.covariance_eigenvectors(), original.covariance_eigenvectors());
}

#[test]
fn load_missing_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.bin");
    match KpcaResult::load(&path) {
        Err(KpcaError::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected Io error, got {:?}", other),
    }
}
