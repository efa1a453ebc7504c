//! Configuration records, validation, and threshold calibration.
//!
//! Every computation starts here: `Settings::validate` checks ranges,
//! verifies the series is long enough for the requested embedding and
//! microstate, and, when the caller asks for a target recurrence rate
//! instead of an absolute threshold, runs a monotone bisection search for
//! the ε that achieves it. Nothing downstream re-validates configuration
//! beyond cheap structural guards.

use rustyrqa_core::metric::Metric;
use rustyrqa_core::parallel::available_threads;
use serde::{Deserialize, Serialize};

use crate::error::RqaError;
use crate::tensor::{self, EmbeddedPoints};

/// Smallest supported microstate edge length.
pub const MIN_MICROSTATE: usize = 2;
/// Largest supported microstate edge length; the pattern space is 2^(N²),
/// so N = 6 already addresses 36 bits of code.
pub const MAX_MICROSTATE: usize = 6;

/// Dense count arrays above this many code bits would not fit per-worker
/// memory; sparse storage is required.
pub const MAX_DENSE_BITS: usize = 26;

/// Code-bit cutoff below which `CountStorage::Auto` picks dense arrays.
const AUTO_DENSE_BITS: usize = 16;

const DEFAULT_CALIBRATION_TOLERANCE: f64 = 1e-3;
const DEFAULT_CALIBRATION_MAX_ITERS: usize = 60;

// ---------------------------------------------------------------------------
// Input series
// ---------------------------------------------------------------------------

/// Borrowed view over an ordered series of samples.
///
/// Samples may be scalar or vector-valued; vector samples are stored flat,
/// row-major, `sample_dim` components each. The series is never mutated.
#[derive(Debug, Clone, Copy)]
pub struct RawSeries<'a> {
    data: &'a [f64],
    sample_dim: usize,
}

impl<'a> RawSeries<'a> {
    /// View a scalar series.
    pub fn from_scalar(data: &'a [f64]) -> Self {
        Self {
            data,
            sample_dim: 1,
        }
    }

    /// View a vector-valued series of flat row-major samples with
    /// `sample_dim` components each.
    pub fn from_vectors(data: &'a [f64], sample_dim: usize) -> Result<Self, RqaError> {
        if sample_dim == 0 {
            return Err(RqaError::Config(
                "sample dimension must be at least 1".into(),
            ));
        }
        if data.len() % sample_dim != 0 {
            return Err(RqaError::Config(format!(
                "series length {} is not a multiple of the sample dimension {}",
                data.len(),
                sample_dim
            )));
        }
        Ok(Self { data, sample_dim })
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.sample_dim
    }

    /// Whether the series holds no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Components per sample.
    #[inline]
    pub fn sample_dim(&self) -> usize {
        self.sample_dim
    }

    /// Sample `i` as a component slice.
    #[inline]
    pub fn sample(&self, i: usize) -> &'a [f64] {
        &self.data[i * self.sample_dim..(i + 1) * self.sample_dim]
    }

    pub(crate) fn data(&self) -> &'a [f64] {
        self.data
    }
}

// ---------------------------------------------------------------------------
// Configuration records
// ---------------------------------------------------------------------------

/// Phase-space embedding parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding dimension m ≥ 1. With m = 1 the series is used as-is.
    pub dim: usize,
    /// Time delay τ ≥ 1 between embedded coordinates.
    pub delay: usize,
    /// Distance metric. Custom metrics are function pointers and are not
    /// serialized; deserialization falls back to the default.
    #[serde(skip, default)]
    pub metric: Metric,
    /// Theiler window w ≥ 0: entries with |i − j| ≤ w are excluded.
    pub theiler: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dim: 1,
            delay: 1,
            metric: Metric::default(),
            theiler: 0,
        }
    }
}

impl EmbeddingConfig {
    /// Embedding with the given dimension and delay, default metric, no
    /// Theiler window.
    pub fn new(dim: usize, delay: usize) -> Self {
        Self {
            dim,
            delay,
            ..Self::default()
        }
    }

    /// Number of samples one embedded point spans.
    pub(crate) fn span(&self) -> usize {
        (self.dim.max(1) - 1) * self.delay + 1
    }
}

/// How the recurrence threshold ε is determined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum RecurrenceCriterion {
    /// Absolute distance threshold ε > 0.
    Threshold(f64),
    /// Calibrate ε so the recurrence rate reaches `rate`, by monotone
    /// bisection, stopping once |achieved − rate| ≤ `tolerance` or after
    /// `max_iters` halvings (then the best ε found is kept and the
    /// calibration report carries `converged: false`).
    TargetRate {
        rate: f64,
        tolerance: f64,
        max_iters: usize,
    },
}

impl RecurrenceCriterion {
    /// Target-rate criterion with default tolerance and iteration bound.
    pub fn target_rate(rate: f64) -> Self {
        Self::TargetRate {
            rate,
            tolerance: DEFAULT_CALIBRATION_TOLERANCE,
            max_iters: DEFAULT_CALIBRATION_MAX_ITERS,
        }
    }
}

/// How microstate anchors are visited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SamplingMode {
    /// Every valid anchor exactly once, row-major. Deterministic.
    Exhaustive,
    /// Uniform anchor draws with replacement, up to `budget` samples,
    /// stopping early once the running distribution moves less than
    /// `tolerance` between batches. `None` seeds from entropy.
    MonteCarlo {
        budget: usize,
        tolerance: f64,
        seed: Option<u64>,
    },
}

/// Per-worker pattern count container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountStorage {
    /// Dense array for small codes, hash map otherwise.
    #[default]
    Auto,
    /// Force a dense array indexed by code.
    Dense,
    /// Force a hash map.
    Sparse,
}

/// Microstate extraction parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MicrostateConfig {
    /// Pattern edge length N, 2 ≤ N ≤ 6.
    pub size: usize,
    /// Anchor visiting strategy.
    pub mode: SamplingMode,
    /// Count container selection.
    pub storage: CountStorage,
}

impl MicrostateConfig {
    /// Exhaustive enumeration of N×N microstates.
    pub fn exhaustive(size: usize) -> Self {
        Self {
            size,
            mode: SamplingMode::Exhaustive,
            storage: CountStorage::Auto,
        }
    }

    /// Monte Carlo sampling of N×N microstates.
    pub fn monte_carlo(size: usize, budget: usize, tolerance: f64) -> Self {
        Self {
            size,
            mode: SamplingMode::MonteCarlo {
                budget,
                tolerance,
                seed: None,
            },
            storage: CountStorage::Auto,
        }
    }

    /// Code bits for this microstate size.
    pub(crate) fn code_bits(&self) -> usize {
        self.size * self.size
    }

    /// Whether counting uses a dense array under the configured storage.
    pub(crate) fn use_dense(&self) -> bool {
        match self.storage {
            CountStorage::Dense => true,
            CountStorage::Sparse => false,
            CountStorage::Auto => self.code_bits() <= AUTO_DENSE_BITS,
        }
    }
}

/// Outcome of a target-rate calibration search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Calibration {
    /// The threshold the search settled on.
    pub epsilon: f64,
    /// Recurrence rate achieved at `epsilon`.
    pub achieved_rate: f64,
    /// Bisection iterations spent.
    pub iterations: usize,
    /// Whether |achieved − target| met the tolerance. When false, `epsilon`
    /// is the best value found within the iteration bound.
    pub converged: bool,
}

// ---------------------------------------------------------------------------
// Validated settings
// ---------------------------------------------------------------------------

/// Validated and calibrated configuration bundle.
///
/// Obtain through [`Settings::validate`] or [`Settings::validate_cross`];
/// the constructors are the only paths that check ranges and resolve the
/// threshold, so hand-mutated settings forfeit those guarantees.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub embedding: EmbeddingConfig,
    pub microstate: MicrostateConfig,
    /// Resolved recurrence threshold.
    pub epsilon: f64,
    /// Present when ε came from a target-rate calibration.
    pub calibration: Option<Calibration>,
    /// Worker threads; 0 means one per available core.
    pub threads: usize,
}

impl Settings {
    /// Validate configuration for auto-recurrence over `series` and resolve
    /// the threshold, calibrating when a target rate is requested.
    pub fn validate(
        series: &RawSeries,
        embedding: EmbeddingConfig,
        criterion: RecurrenceCriterion,
        microstate: MicrostateConfig,
    ) -> Result<Self, RqaError> {
        check_config(&embedding, &microstate)?;
        check_criterion(&criterion)?;

        let points_len = check_series(series, &embedding, &microstate)?;
        let min_len = 2 * microstate.size + embedding.theiler;
        if points_len < min_len {
            return Err(RqaError::Config(format!(
                "theiler window {} and microstate size {} leave no valid anchors \
                 over {} embedded points (need at least {})",
                embedding.theiler, microstate.size, points_len, min_len
            )));
        }

        let (epsilon, calibration) = match criterion {
            RecurrenceCriterion::Threshold(eps) => (eps, None),
            RecurrenceCriterion::TargetRate {
                rate,
                tolerance,
                max_iters,
            } => {
                let points = EmbeddedPoints::embed(series, &embedding)?;
                let cal = calibrate(
                    &points,
                    &points,
                    &embedding,
                    Some(embedding.theiler),
                    rate,
                    tolerance,
                    max_iters,
                )?;
                (cal.epsilon, Some(cal))
            }
        };

        Ok(Self {
            embedding,
            microstate,
            epsilon,
            calibration,
            threads: 0,
        })
    }

    /// Validate configuration for cross-recurrence between `x` and `y`.
    ///
    /// The Theiler window removes temporal self-correlation and has no
    /// meaning between two series, so it must be zero here.
    pub fn validate_cross(
        x: &RawSeries,
        y: &RawSeries,
        embedding: EmbeddingConfig,
        criterion: RecurrenceCriterion,
        microstate: MicrostateConfig,
    ) -> Result<Self, RqaError> {
        check_config(&embedding, &microstate)?;
        check_criterion(&criterion)?;
        if embedding.theiler != 0 {
            return Err(RqaError::Config(
                "the theiler window does not apply to cross-recurrence; set it to 0".into(),
            ));
        }
        if x.sample_dim() != y.sample_dim() {
            return Err(RqaError::Config(format!(
                "cross-recurrence series must share a sample dimension, got {} and {}",
                x.sample_dim(),
                y.sample_dim()
            )));
        }

        check_series(x, &embedding, &microstate)?;
        check_series(y, &embedding, &microstate)?;

        let (epsilon, calibration) = match criterion {
            RecurrenceCriterion::Threshold(eps) => (eps, None),
            RecurrenceCriterion::TargetRate {
                rate,
                tolerance,
                max_iters,
            } => {
                let px = EmbeddedPoints::embed(x, &embedding)?;
                let py = EmbeddedPoints::embed(y, &embedding)?;
                let cal = calibrate(&px, &py, &embedding, None, rate, tolerance, max_iters)?;
                (cal.epsilon, Some(cal))
            }
        };

        Ok(Self {
            embedding,
            microstate,
            epsilon,
            calibration,
            threads: 0,
        })
    }

    /// Pin the worker thread count (0 restores one-per-core).
    pub fn with_threads(mut self, threads: usize) -> Self {
        let hardware = available_threads();
        if threads > hardware {
            log::warn!(
                "configured thread count {} exceeds the {} available on this host; \
                 performance may degrade",
                threads,
                hardware
            );
        }
        self.threads = threads;
        self
    }

    /// Resolved worker count.
    pub(crate) fn worker_threads(&self) -> usize {
        if self.threads == 0 {
            available_threads()
        } else {
            self.threads
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn check_config(embedding: &EmbeddingConfig, microstate: &MicrostateConfig) -> Result<(), RqaError> {
    if embedding.dim < 1 {
        return Err(RqaError::Config(
            "embedding dimension must be at least 1".into(),
        ));
    }
    if embedding.delay < 1 {
        return Err(RqaError::Config("time delay must be at least 1".into()));
    }
    if microstate.size < MIN_MICROSTATE || microstate.size > MAX_MICROSTATE {
        return Err(RqaError::Config(format!(
            "microstate size must be in [{}, {}], got {}",
            MIN_MICROSTATE, MAX_MICROSTATE, microstate.size
        )));
    }
    if microstate.storage == CountStorage::Dense && microstate.code_bits() > MAX_DENSE_BITS {
        return Err(RqaError::Config(format!(
            "dense count storage addresses {} bits of code; the limit is {}",
            microstate.code_bits(),
            MAX_DENSE_BITS
        )));
    }
    if let SamplingMode::MonteCarlo { budget, tolerance, .. } = microstate.mode {
        if budget == 0 {
            return Err(RqaError::Config(
                "monte carlo sample budget must be positive".into(),
            ));
        }
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(RqaError::Config(
                "monte carlo convergence tolerance must be positive".into(),
            ));
        }
    }
    Ok(())
}

fn check_criterion(criterion: &RecurrenceCriterion) -> Result<(), RqaError> {
    match *criterion {
        RecurrenceCriterion::Threshold(eps) => {
            if !eps.is_finite() || eps <= 0.0 {
                return Err(RqaError::Config(format!(
                    "recurrence threshold must be positive and finite, got {}",
                    eps
                )));
            }
        }
        RecurrenceCriterion::TargetRate {
            rate,
            tolerance,
            max_iters,
        } => {
            if !rate.is_finite() || rate <= 0.0 || rate >= 1.0 {
                return Err(RqaError::Config(format!(
                    "target recurrence rate must lie in (0, 1), got {}",
                    rate
                )));
            }
            if !tolerance.is_finite() || tolerance <= 0.0 {
                return Err(RqaError::Config(
                    "calibration tolerance must be positive".into(),
                ));
            }
            if max_iters == 0 {
                return Err(RqaError::Config(
                    "calibration iteration bound must be positive".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Structural series checks; returns the embedded length L′.
fn check_series(
    series: &RawSeries,
    embedding: &EmbeddingConfig,
    microstate: &MicrostateConfig,
) -> Result<usize, RqaError> {
    let len = series.len();
    if len == 0 {
        return Err(RqaError::DimensionMismatch {
            needed: embedding.span() + microstate.size - 1,
            available: 0,
        });
    }
    let span = embedding.span();
    // L′ = L − (m−1)τ must fit at least one N×N block.
    let needed = span + microstate.size - 1;
    if len < needed {
        return Err(RqaError::DimensionMismatch {
            needed,
            available: len,
        });
    }
    Ok(len - (span - 1))
}

// ---------------------------------------------------------------------------
// Threshold calibration
// ---------------------------------------------------------------------------

/// Monotone bisection for the ε achieving the target recurrence rate.
///
/// Larger ε admits every pair a smaller ε admits, so the achieved rate is
/// nondecreasing in ε and bisection over [0, max pairwise distance] is
/// sound. The rate is a step function of ε; when no step lands within the
/// tolerance the search reports its best ε with `converged: false`.
fn calibrate(
    px: &EmbeddedPoints,
    py: &EmbeddedPoints,
    embedding: &EmbeddingConfig,
    band: Option<usize>,
    rate: f64,
    tolerance: f64,
    max_iters: usize,
) -> Result<Calibration, RqaError> {
    let threads = available_threads();
    let dmax = tensor::max_pair_distance(px, py, embedding.metric, band, threads);
    if !dmax.is_finite() {
        return Err(RqaError::Numerical(
            "non-finite pairwise distance during calibration".into(),
        ));
    }
    if dmax <= 0.0 {
        // All included pairs coincide: any positive ε yields rate 1.
        let achieved = 1.0;
        let converged = (achieved - rate).abs() <= tolerance;
        if !converged {
            log::warn!(
                "calibration degenerate: all pairwise distances are zero, achieved rate 1.0 \
                 against target {}",
                rate
            );
        }
        return Ok(Calibration {
            epsilon: f64::EPSILON,
            achieved_rate: achieved,
            iterations: 0,
            converged,
        });
    }

    let mut lo = 0.0f64;
    let mut hi = dmax;
    let mut best_eps = dmax;
    let mut best_rate = 1.0f64;
    for iteration in 1..=max_iters {
        let mid = 0.5 * (lo + hi);
        let achieved = tensor::rate_at(px, py, embedding.metric, band, mid, threads);
        if (achieved - rate).abs() < (best_rate - rate).abs() {
            best_eps = mid;
            best_rate = achieved;
        }
        if (achieved - rate).abs() <= tolerance {
            return Ok(Calibration {
                epsilon: mid,
                achieved_rate: achieved,
                iterations: iteration,
                converged: true,
            });
        }
        if achieved < rate {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    log::warn!(
        "calibration stopped after {} iterations at rate {:.6} against target {:.6} \
         (tolerance {}); keeping best-effort threshold {}",
        max_iters,
        best_rate,
        rate,
        tolerance,
        best_eps
    );
    Ok(Calibration {
        epsilon: best_eps,
        achieved_rate: best_rate,
        iterations: max_iters,
        converged: false,
    })
}
