//! Microstate probability estimation.
//!
//! Every valid N×N sub-block of the recurrence tensor is a microstate;
//! its canonical code is the row-major bit packing of the block. The engine
//! either enumerates all valid anchors (deterministic) or samples them
//! uniformly with replacement until a batch-to-batch convergence test or
//! the sample budget stops it. Counting is thread-local: each worker owns
//! a private dense array or hash map, merged once after the join, so the
//! hot loop takes no locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use rustyrqa_core::parallel::parallel_map_ranges;
use rustyrqa_core::rng::SplitMix64;

use crate::error::RqaError;
use crate::settings::{SamplingMode, Settings, MAX_MICROSTATE, MIN_MICROSTATE};
use crate::tensor::RecurrenceTensor;

/// Monte Carlo convergence is checked every this many samples. Fixed so a
/// given seed and thread count always replays the same run.
const BATCH_SAMPLES: usize = 1024;

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

/// One observed pattern class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistributionEntry {
    /// Canonical row-major pattern code.
    pub code: u64,
    /// Times the pattern was observed.
    pub count: u64,
    /// count / samples.
    pub probability: f64,
}

/// Normalized microstate distribution.
///
/// Holds only the patterns that were actually observed, sorted by code.
/// Probabilities sum to 1 within floating tolerance; counts sum to
/// `samples`.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    entries: Vec<DistributionEntry>,
    size: usize,
    samples: u64,
    converged: bool,
}

impl Distribution {
    /// Observed patterns, sorted by code.
    pub fn entries(&self) -> &[DistributionEntry] {
        &self.entries
    }

    /// Microstate edge length N the patterns were extracted with.
    pub fn microstate_size(&self) -> usize {
        self.size
    }

    /// Total anchors visited.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// False when Monte Carlo exhausted its budget (or was cancelled)
    /// before the convergence tolerance was met. Always true for
    /// exhaustive runs.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Number of distinct observed patterns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no patterns were observed (never true for a distribution
    /// returned by the engine).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Probability of `code`, 0 for patterns never observed.
    pub fn probability(&self, code: u64) -> f64 {
        self.entries
            .binary_search_by_key(&code, |e| e.code)
            .map(|idx| self.entries[idx].probability)
            .unwrap_or(0.0)
    }

    /// Combine two partial runs over the same tensor and microstate size by
    /// summing counts and renormalizing. The merge is converged only if
    /// both inputs were.
    pub fn merge(&self, other: &Distribution) -> Result<Distribution, RqaError> {
        if self.size != other.size {
            return Err(RqaError::Config(format!(
                "cannot merge distributions over microstate sizes {} and {}",
                self.size, other.size
            )));
        }
        let mut counts: BTreeMap<u64, u64> = BTreeMap::new();
        for entry in self.entries.iter().chain(other.entries.iter()) {
            *counts.entry(entry.code).or_insert(0) += entry.count;
        }
        let samples = self.samples + other.samples;
        let entries = counts
            .into_iter()
            .map(|(code, count)| DistributionEntry {
                code,
                count,
                probability: count as f64 / samples as f64,
            })
            .collect();
        Ok(Distribution {
            entries,
            size: self.size,
            samples,
            converged: self.converged && other.converged,
        })
    }
}

// ---------------------------------------------------------------------------
// Thread-local counting
// ---------------------------------------------------------------------------

/// Private per-worker pattern counter: a dense array indexed by code for
/// small patterns, a hash map for large ones.
enum CountStore {
    Dense(Vec<u64>),
    Sparse(HashMap<u64, u64>),
}

struct PatternCounts {
    size: usize,
    store: CountStore,
    samples: u64,
}

impl PatternCounts {
    fn new(size: usize, dense: bool) -> Self {
        let store = if dense {
            CountStore::Dense(vec![0u64; 1usize << (size * size)])
        } else {
            CountStore::Sparse(HashMap::new())
        };
        Self {
            size,
            store,
            samples: 0,
        }
    }

    #[inline]
    fn record(&mut self, code: u64) {
        match &mut self.store {
            CountStore::Dense(v) => v[code as usize] += 1,
            CountStore::Sparse(m) => *m.entry(code).or_insert(0) += 1,
        }
        self.samples += 1;
    }

    /// Fold another worker's counts into this one.
    fn absorb(&mut self, other: PatternCounts) {
        debug_assert_eq!(self.size, other.size);
        match (&mut self.store, other.store) {
            (CountStore::Dense(a), CountStore::Dense(b)) => {
                for (dst, src) in a.iter_mut().zip(b) {
                    *dst += src;
                }
            }
            (CountStore::Sparse(a), CountStore::Sparse(b)) => {
                for (code, count) in b {
                    *a.entry(code).or_insert(0) += count;
                }
            }
            _ => unreachable!("workers share one storage choice per run"),
        }
        self.samples += other.samples;
    }

    /// Running probabilities of the observed codes.
    fn snapshot(&self) -> HashMap<u64, f64> {
        let total = self.samples as f64;
        let mut out = HashMap::new();
        match &self.store {
            CountStore::Dense(v) => {
                for (code, &count) in v.iter().enumerate() {
                    if count > 0 {
                        out.insert(code as u64, count as f64 / total);
                    }
                }
            }
            CountStore::Sparse(m) => {
                for (&code, &count) in m {
                    out.insert(code, count as f64 / total);
                }
            }
        }
        out
    }

    fn into_distribution(self, converged: bool) -> Result<Distribution, RqaError> {
        if self.samples == 0 {
            return Err(RqaError::Numerical(
                "no valid microstate samples were drawn".into(),
            ));
        }
        let total = self.samples as f64;
        let mut entries: Vec<DistributionEntry> = match self.store {
            CountStore::Dense(v) => v
                .into_iter()
                .enumerate()
                .filter(|(_, count)| *count > 0)
                .map(|(code, count)| DistributionEntry {
                    code: code as u64,
                    count,
                    probability: count as f64 / total,
                })
                .collect(),
            CountStore::Sparse(m) => m
                .into_iter()
                .map(|(code, count)| DistributionEntry {
                    code,
                    count,
                    probability: count as f64 / total,
                })
                .collect(),
        };
        entries.sort_unstable_by_key(|e| e.code);
        Ok(Distribution {
            entries,
            size: self.size,
            samples: self.samples,
            converged,
        })
    }
}

// ---------------------------------------------------------------------------
// Anchor geometry
// ---------------------------------------------------------------------------

/// The valid-anchor set: all (i, j) whose N×N block stays inside the tensor
/// and, for auto-recurrence, clear of the Theiler band. A block contains a
/// banded cell exactly when |i − j| < w + N, so validity is pure index
/// arithmetic. Per-row prefix sums map a flat sample index back to an
/// anchor in O(log rows).
struct AnchorGrid {
    anchor_rows: usize,
    anchor_cols: usize,
    /// Minimum |i − j| for a clean block (auto-recurrence only).
    min_sep: Option<usize>,
    /// prefix[i] = valid anchors in rows before i; last entry is the total.
    prefix: Vec<u64>,
}

impl AnchorGrid {
    fn new(tensor: &RecurrenceTensor, n: usize) -> Self {
        let anchor_rows = tensor.rows() - n + 1;
        let anchor_cols = tensor.cols() - n + 1;
        let min_sep = tensor.theiler().map(|w| w + n);

        let mut prefix = Vec::with_capacity(anchor_rows + 1);
        prefix.push(0u64);
        let mut running = 0u64;
        for i in 0..anchor_rows {
            running += match min_sep {
                None => anchor_cols as u64,
                Some(sep) => {
                    let left = if i >= sep { i - sep + 1 } else { 0 };
                    let right = (anchor_cols).saturating_sub(i + sep);
                    (left + right) as u64
                }
            };
            prefix.push(running);
        }

        Self {
            anchor_rows,
            anchor_cols,
            min_sep,
            prefix,
        }
    }

    fn valid_count(&self) -> u64 {
        *self.prefix.last().unwrap_or(&0)
    }

    #[inline]
    fn is_valid(&self, i: usize, j: usize) -> bool {
        match self.min_sep {
            None => true,
            Some(sep) => i.abs_diff(j) >= sep,
        }
    }

    /// The k-th valid anchor in row-major order.
    fn anchor_at(&self, k: u64) -> (usize, usize) {
        debug_assert!(k < self.valid_count());
        let i = self.prefix.partition_point(|&p| p <= k) - 1;
        let offset = (k - self.prefix[i]) as usize;
        match self.min_sep {
            None => (i, offset),
            Some(sep) => {
                let left = if i >= sep { i - sep + 1 } else { 0 };
                if offset < left {
                    (i, offset)
                } else {
                    (i, i + sep + (offset - left))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Estimate the microstate distribution of `tensor` under `settings`.
pub(crate) fn estimate(
    tensor: &RecurrenceTensor,
    settings: &Settings,
    cancel: Option<&AtomicBool>,
) -> Result<Distribution, RqaError> {
    let n = settings.microstate.size;
    if !(MIN_MICROSTATE..=MAX_MICROSTATE).contains(&n) {
        return Err(RqaError::Config(format!(
            "microstate size must be in [{}, {}], got {}",
            MIN_MICROSTATE, MAX_MICROSTATE, n
        )));
    }
    if tensor.rows() < n || tensor.cols() < n {
        return Err(RqaError::DimensionMismatch {
            needed: n,
            available: tensor.rows().min(tensor.cols()),
        });
    }

    let grid = AnchorGrid::new(tensor, n);
    if grid.valid_count() == 0 {
        return Err(RqaError::Numerical(
            "every microstate anchor overlaps the excluded Theiler band".into(),
        ));
    }

    match settings.microstate.mode {
        SamplingMode::Exhaustive => exhaustive(tensor, settings, &grid),
        SamplingMode::MonteCarlo {
            budget,
            tolerance,
            seed,
        } => monte_carlo(tensor, settings, &grid, budget, tolerance, seed, cancel),
    }
}

fn exhaustive(
    tensor: &RecurrenceTensor,
    settings: &Settings,
    grid: &AnchorGrid,
) -> Result<Distribution, RqaError> {
    let n = settings.microstate.size;
    let dense = settings.microstate.use_dense();

    let parts = parallel_map_ranges(grid.anchor_rows, settings.worker_threads(), |_, range| {
        let mut counts = PatternCounts::new(n, dense);
        for i in range {
            for j in 0..grid.anchor_cols {
                if grid.is_valid(i, j) {
                    counts.record(tensor.encode_block(i, j, n));
                }
            }
        }
        counts
    });

    let mut total = PatternCounts::new(n, dense);
    for part in parts {
        total.absorb(part);
    }
    total.into_distribution(true)
}

#[allow(clippy::too_many_arguments)]
fn monte_carlo(
    tensor: &RecurrenceTensor,
    settings: &Settings,
    grid: &AnchorGrid,
    budget: usize,
    tolerance: f64,
    seed: Option<u64>,
    cancel: Option<&AtomicBool>,
) -> Result<Distribution, RqaError> {
    let n = settings.microstate.size;
    let dense = settings.microstate.use_dense();
    let threads = settings.worker_threads();
    let seed = seed.unwrap_or_else(rand::random);
    let valid = grid.valid_count();

    let mut counts = PatternCounts::new(n, dense);
    let mut previous: Option<HashMap<u64, f64>> = None;
    let mut drawn = 0usize;
    let mut converged = false;
    let mut cancelled = false;

    while drawn < budget {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
        }
        let batch = BATCH_SAMPLES.min(budget - drawn);
        let parts = parallel_map_ranges(batch, threads, |_, range| {
            // Each worker range gets its own stream, keyed by the absolute
            // sample offset so a given (seed, thread count) replays exactly.
            let mut rng = SplitMix64::new(seed).derive((drawn + range.start) as u64);
            let mut local = PatternCounts::new(n, dense);
            for _ in range {
                let (i, j) = grid.anchor_at(rng.next_below(valid));
                local.record(tensor.encode_block(i, j, n));
            }
            local
        });
        for part in parts {
            counts.absorb(part);
        }
        drawn += batch;

        let snapshot = counts.snapshot();
        if let Some(prev) = &previous {
            if max_probability_delta(prev, &snapshot) < tolerance {
                converged = true;
                break;
            }
        }
        previous = Some(snapshot);
    }

    if !converged && !cancelled {
        log::warn!(
            "monte carlo sampling exhausted its budget of {} without the distribution \
             settling below tolerance {}",
            budget,
            tolerance
        );
    }
    counts.into_distribution(converged)
}

/// Largest per-code probability change between two running distributions.
fn max_probability_delta(a: &HashMap<u64, f64>, b: &HashMap<u64, f64>) -> f64 {
    let mut max = 0.0f64;
    for (code, &p) in a {
        max = max.max((p - b.get(code).copied().unwrap_or(0.0)).abs());
    }
    for (code, &p) in b {
        if !a.contains_key(code) {
            max = max.max(p);
        }
    }
    max
}
