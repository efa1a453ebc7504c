use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rustyrqa_rs::{
    build_cross_tensor, build_tensor, compute_probabilities, EmbeddingConfig, MicrostateConfig,
    RawSeries, RecurrenceCriterion, RqaError, SamplingMode, Settings,
};

fn sine_series(len: usize, period: f64) -> Vec<f64> {
    (0..len)
        .map(|t| (t as f64 * std::f64::consts::TAU / period).sin())
        .collect()
}

fn uniform_series(len: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen::<f64>()).collect()
}

fn probability_sum(dist: &rustyrqa_rs::Distribution) -> f64 {
    dist.entries().iter().map(|e| e.probability).sum()
}

// ============================================================================
// Calibrated sine scenario: periodic data, target rate, exhaustive counting
// ============================================================================

#[test]
fn test_sine_calibrated_exhaustive_distribution() {
    let data = sine_series(100, 20.0);
    let series = RawSeries::from_scalar(&data);
    let settings = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::TargetRate {
            rate: 0.1,
            tolerance: 0.01,
            max_iters: 60,
        },
        MicrostateConfig::exhaustive(2),
    )
    .expect("valid configuration");

    let cal = settings.calibration.expect("target rate was requested");
    assert!(cal.converged, "sine distances admit a step near 10%");
    assert!(
        (cal.achieved_rate - 0.1).abs() <= 0.01,
        "achieved rate {} should sit within tolerance of the target",
        cal.achieved_rate
    );

    let tensor = build_tensor(&series, &settings).unwrap();
    assert!(
        (tensor.recurrence_rate() - 0.1).abs() < 0.02,
        "tensor rate {} should track the calibrated rate",
        tensor.recurrence_rate()
    );

    let dist = compute_probabilities(&tensor, &settings).unwrap();
    assert!(dist.converged());
    assert!(
        dist.len() <= 16,
        "N = 2 admits at most 16 pattern codes, got {}",
        dist.len()
    );
    assert!(
        (probability_sum(&dist) - 1.0).abs() < 1e-9,
        "probabilities should sum to 1"
    );

    // At 10% recurrence density the empty pattern dominates.
    let max_entry = dist
        .entries()
        .iter()
        .max_by(|a, b| a.probability.total_cmp(&b.probability))
        .unwrap();
    assert_eq!(max_entry.code, 0, "all-zero pattern should carry most mass");
}

// ============================================================================
// Determinism: exhaustive runs are bit-identical across runs and threads
// ============================================================================

#[test]
fn test_exhaustive_deterministic() {
    let data = uniform_series(300, 9);
    let series = RawSeries::from_scalar(&data);
    let settings = Settings::validate(
        &series,
        EmbeddingConfig::new(2, 2),
        RecurrenceCriterion::Threshold(0.2),
        MicrostateConfig::exhaustive(3),
    )
    .unwrap();

    let tensor = build_tensor(&series, &settings).unwrap();
    let first = compute_probabilities(&tensor, &settings).unwrap();
    let second = compute_probabilities(&tensor, &settings).unwrap();
    assert_eq!(first, second, "identical input must replay identically");

    let single = compute_probabilities(&tensor, &settings.with_threads(1)).unwrap();
    let many = compute_probabilities(&tensor, &settings.with_threads(5)).unwrap();
    assert_eq!(
        single, many,
        "worker count must not change exhaustive results"
    );
}

// ============================================================================
// Saturated threshold: every valid microstate is the all-ones pattern
// ============================================================================

#[test]
fn test_saturated_threshold_single_pattern() {
    let data = sine_series(24, 7.0);
    let series = RawSeries::from_scalar(&data);
    let settings = Settings::validate(
        &series,
        EmbeddingConfig::new(2, 1),
        RecurrenceCriterion::Threshold(1e6),
        MicrostateConfig::exhaustive(3),
    )
    .unwrap();

    let tensor = build_tensor(&series, &settings).unwrap();
    let dist = compute_probabilities(&tensor, &settings).unwrap();

    assert_eq!(dist.len(), 1, "only the all-ones pattern can occur");
    let entry = dist.entries()[0];
    assert_eq!(entry.code, (1u64 << 9) - 1);
    assert_eq!(entry.probability, 1.0);
    assert_eq!(entry.count, dist.samples());
}

// ============================================================================
// Monte Carlo agreement with exhaustive enumeration
// ============================================================================

#[test]
fn test_monte_carlo_tracks_exhaustive() {
    let data = uniform_series(1000, 42);
    let series = RawSeries::from_scalar(&data);
    let exhaustive = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.05),
        MicrostateConfig::exhaustive(3),
    )
    .unwrap();
    let tensor = build_tensor(&series, &exhaustive).unwrap();
    let reference = compute_probabilities(&tensor, &exhaustive).unwrap();

    let mut mc_config = MicrostateConfig::monte_carlo(3, 20_000, 1e-4);
    if let SamplingMode::MonteCarlo { seed, .. } = &mut mc_config.mode {
        *seed = Some(1717);
    }
    let sampled = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.05),
        mc_config,
    )
    .unwrap();
    let estimate = compute_probabilities(&tensor, &sampled).unwrap();

    // Total variation distance over the union of observed codes.
    let mut codes: Vec<u64> = reference.entries().iter().map(|e| e.code).collect();
    codes.extend(estimate.entries().iter().map(|e| e.code));
    codes.sort_unstable();
    codes.dedup();
    let tv: f64 = 0.5
        * codes
            .iter()
            .map(|&c| (reference.probability(c) - estimate.probability(c)).abs())
            .sum::<f64>();
    assert!(
        tv < 0.05,
        "total variation {} between exhaustive and monte carlo too large",
        tv
    );
}

#[test]
fn test_monte_carlo_convergence_flag() {
    let data = uniform_series(400, 11);
    let series = RawSeries::from_scalar(&data);

    // Loose tolerance: the running distribution settles long before the
    // budget runs out.
    let mut loose = MicrostateConfig::monte_carlo(2, 500_000, 0.05);
    if let SamplingMode::MonteCarlo { seed, .. } = &mut loose.mode {
        *seed = Some(3);
    }
    let settings = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.1),
        loose,
    )
    .unwrap();
    let tensor = build_tensor(&series, &settings).unwrap();
    let dist = compute_probabilities(&tensor, &settings).unwrap();
    assert!(dist.converged());
    assert!(
        dist.samples() < 500_000,
        "loose tolerance should stop well short of the budget"
    );

    // Unreachable tolerance: the budget is exhausted and flagged.
    let mut tight = MicrostateConfig::monte_carlo(2, 5_000, 1e-12);
    if let SamplingMode::MonteCarlo { seed, .. } = &mut tight.mode {
        *seed = Some(3);
    }
    let settings = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.1),
        tight,
    )
    .unwrap();
    let dist = compute_probabilities(&tensor, &settings).unwrap();
    assert!(!dist.converged());
    assert_eq!(dist.samples(), 5_000);
    assert!((probability_sum(&dist) - 1.0).abs() < 1e-9);
}

#[test]
fn test_monte_carlo_seed_reproducible() {
    let data = uniform_series(500, 23);
    let series = RawSeries::from_scalar(&data);
    let mut cfg = MicrostateConfig::monte_carlo(2, 8_000, 1e-9);
    if let SamplingMode::MonteCarlo { seed, .. } = &mut cfg.mode {
        *seed = Some(99);
    }
    let settings = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.08),
        cfg,
    )
    .unwrap();
    let tensor = build_tensor(&series, &settings).unwrap();
    let a = compute_probabilities(&tensor, &settings).unwrap();
    let b = compute_probabilities(&tensor, &settings).unwrap();
    assert_eq!(a, b, "a pinned seed must replay the same distribution");
}

// ============================================================================
// Tensor symmetry and Theiler handling
// ============================================================================

#[test]
fn test_tensor_symmetric_for_symmetric_metric() {
    let data = uniform_series(120, 5);
    let series = RawSeries::from_scalar(&data);
    let mut embedding = EmbeddingConfig::new(3, 1);
    embedding.theiler = 2;
    let settings = Settings::validate(
        &series,
        embedding,
        RecurrenceCriterion::Threshold(0.4),
        MicrostateConfig::exhaustive(2),
    )
    .unwrap();
    let tensor = build_tensor(&series, &settings).unwrap();

    for i in 0..tensor.rows() {
        for j in 0..tensor.cols() {
            assert_eq!(
                tensor.get(i, j),
                tensor.get(j, i),
                "asymmetry at ({}, {})",
                i,
                j
            );
            if i.abs_diff(j) <= 2 {
                assert!(!tensor.get(i, j), "theiler cell ({}, {}) set", i, j);
            }
        }
    }
}

#[test]
fn test_cross_recurrence_of_self_differs_only_on_band() {
    let data = uniform_series(80, 31);
    let series = RawSeries::from_scalar(&data);
    let auto = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.15),
        MicrostateConfig::exhaustive(2),
    )
    .unwrap();
    let cross = Settings::validate_cross(
        &series,
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.15),
        MicrostateConfig::exhaustive(2),
    )
    .unwrap();

    let auto_tensor = build_tensor(&series, &auto).unwrap();
    let cross_tensor = build_cross_tensor(&series, &series, &cross).unwrap();

    for i in 0..auto_tensor.rows() {
        for j in 0..auto_tensor.cols() {
            if i == j {
                assert!(!auto_tensor.get(i, i), "auto diagonal must be excluded");
                assert!(cross_tensor.get(i, i), "cross diagonal recurs trivially");
            } else {
                assert_eq!(auto_tensor.get(i, j), cross_tensor.get(i, j));
            }
        }
    }

    let dist = compute_probabilities(&cross_tensor, &cross).unwrap();
    assert!((probability_sum(&dist) - 1.0).abs() < 1e-9);
}

#[test]
fn test_vector_valued_series() {
    // Points on a circle, embedded as-is.
    let flat: Vec<f64> = (0..60)
        .flat_map(|t| {
            let a = t as f64 * std::f64::consts::TAU / 30.0;
            [a.cos(), a.sin()]
        })
        .collect();
    let series = RawSeries::from_vectors(&flat, 2).unwrap();
    let settings = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.3),
        MicrostateConfig::exhaustive(2),
    )
    .unwrap();
    let tensor = build_tensor(&series, &settings).unwrap();

    assert_eq!(tensor.rows(), 60);
    // One full revolution: samples 30 apart revisit the same point.
    assert!(tensor.get(0, 30));
    let dist = compute_probabilities(&tensor, &settings).unwrap();
    assert!((probability_sum(&dist) - 1.0).abs() < 1e-9);
}

// ============================================================================
// Error paths
// ============================================================================

#[test]
fn test_short_series_is_dimension_mismatch() {
    // L = 5, m = 2, τ = 3 → L′ = 2, too short for N = 3.
    let data = [0.1, 0.2, 0.3, 0.4, 0.5];
    let series = RawSeries::from_scalar(&data);
    let err = Settings::validate(
        &series,
        EmbeddingConfig::new(2, 3),
        RecurrenceCriterion::Threshold(0.1),
        MicrostateConfig::exhaustive(3),
    )
    .unwrap_err();
    match err {
        RqaError::DimensionMismatch { needed, available } => {
            assert_eq!(needed, 6);
            assert_eq!(available, 5);
        }
        e => panic!("expected DimensionMismatch, got {:?}", e),
    }
}

#[test]
fn test_invalid_microstate_size_is_config_error() {
    let series = RawSeries::from_scalar(&[]);
    for size in [0, 1, 7] {
        let err = Settings::validate(
            &series,
            EmbeddingConfig::default(),
            RecurrenceCriterion::Threshold(0.1),
            MicrostateConfig::exhaustive(size),
        )
        .unwrap_err();
        assert!(
            matches!(err, RqaError::Config(_)),
            "size {} must fail before the series is touched, got {:?}",
            size,
            err
        );
    }
}

#[test]
fn test_non_finite_series_is_numerical_error() {
    let data = [0.1, 0.2, f64::INFINITY, 0.4, 0.5, 0.6, 0.7, 0.8];
    let series = RawSeries::from_scalar(&data);
    let settings = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.1),
        MicrostateConfig::exhaustive(2),
    )
    .unwrap();
    let err = build_tensor(&series, &settings).unwrap_err();
    assert!(matches!(err, RqaError::Numerical(_)));
}

// ============================================================================
// Distribution merging
// ============================================================================

#[test]
fn test_merge_renormalizes() {
    let data = uniform_series(200, 77);
    let series = RawSeries::from_scalar(&data);
    let settings = Settings::validate(
        &series,
        EmbeddingConfig::default(),
        RecurrenceCriterion::Threshold(0.1),
        MicrostateConfig::exhaustive(2),
    )
    .unwrap();
    let tensor = build_tensor(&series, &settings).unwrap();
    let dist = compute_probabilities(&tensor, &settings).unwrap();

    let merged = dist.merge(&dist).unwrap();
    assert_eq!(merged.samples(), 2 * dist.samples());
    assert_eq!(merged.len(), dist.len());
    assert!((probability_sum(&merged) - 1.0).abs() < 1e-9);
    for entry in dist.entries() {
        assert!(
            (merged.probability(entry.code) - entry.probability).abs() < 1e-15,
            "merging a run with itself must preserve probabilities"
        );
    }
}
