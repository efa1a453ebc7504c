//! Time-delay embedding and recurrence tensor construction.
//!
//! The embedded points live in one flat row-major arena; the recurrence
//! structure is a flat bit matrix. Construction is parallel across row
//! ranges: each worker owns a disjoint span of whole rows of the bit words,
//! so the threads need no synchronization and the tensor becomes visible
//! only after the join. Once built, a tensor is immutable and can back any
//! number of probability computations.

use rustyrqa_core::bitmat::BitMatrix;
use rustyrqa_core::metric::Metric;
use rustyrqa_core::parallel::{parallel_for_chunks, parallel_map_ranges};

use crate::error::RqaError;
use crate::settings::{EmbeddingConfig, RawSeries, Settings};

// ---------------------------------------------------------------------------
// Embedded points
// ---------------------------------------------------------------------------

/// Phase-space points from time-delay embedding, stored as one flat
/// row-major arena of `len` points with `dim` components each.
pub(crate) struct EmbeddedPoints {
    data: Vec<f64>,
    dim: usize,
    len: usize,
}

impl EmbeddedPoints {
    /// Embed `series`: point_i = (s_i, s_{i+τ}, …, s_{i+(m−1)τ}), with
    /// vector samples concatenated component-wise.
    pub(crate) fn embed(series: &RawSeries, cfg: &EmbeddingConfig) -> Result<Self, RqaError> {
        let len = series.len();
        if len == 0 {
            return Err(RqaError::DimensionMismatch {
                needed: cfg.span(),
                available: 0,
            });
        }
        if let Some(pos) = series.data().iter().position(|v| !v.is_finite()) {
            return Err(RqaError::Numerical(format!(
                "non-finite value in sample {}",
                pos / series.sample_dim()
            )));
        }
        let span = cfg.span();
        if len < span {
            return Err(RqaError::DimensionMismatch {
                needed: span,
                available: len,
            });
        }

        let embedded_len = len - (span - 1);
        let dim = cfg.dim * series.sample_dim();
        let mut data = Vec::with_capacity(embedded_len * dim);
        for i in 0..embedded_len {
            for k in 0..cfg.dim {
                data.extend_from_slice(series.sample(i + k * cfg.delay));
            }
        }
        Ok(Self {
            data,
            dim,
            len: embedded_len,
        })
    }

    /// Number of embedded points L′.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Point `i` as a component slice.
    #[inline]
    pub(crate) fn point(&self, i: usize) -> &[f64] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

// ---------------------------------------------------------------------------
// Pairwise scans (shared with calibration)
// ---------------------------------------------------------------------------

/// Number of matrix cells outside the Theiler band. `band` is `Some(w)` for
/// auto-recurrence, `None` for cross-recurrence.
pub(crate) fn included_pairs(rows: usize, cols: usize, band: Option<usize>) -> u64 {
    let total = rows as u64 * cols as u64;
    match band {
        None => total,
        Some(w) => {
            let n = rows.min(cols) as u64;
            let w = (w as u64).min(n.saturating_sub(1));
            // Cells with |i − j| ≤ w in an n×n square.
            let banded = n * (2 * w + 1) - w * (w + 1);
            total - banded
        }
    }
}

/// Largest pairwise distance outside the band.
pub(crate) fn max_pair_distance(
    px: &EmbeddedPoints,
    py: &EmbeddedPoints,
    metric: Metric,
    band: Option<usize>,
    threads: usize,
) -> f64 {
    let maxima = parallel_map_ranges(px.len(), threads, |_, range| {
        let mut max = 0.0f64;
        for i in range {
            let xi = px.point(i);
            for j in 0..py.len() {
                if let Some(w) = band {
                    if i.abs_diff(j) <= w {
                        continue;
                    }
                }
                let d = metric.dist(xi, py.point(j));
                if d > max {
                    max = d;
                }
            }
        }
        max
    });
    maxima.into_iter().fold(0.0, f64::max)
}

/// Recurrence rate a threshold of `eps` would achieve: the fraction of
/// non-banded pairs with distance ≤ eps.
pub(crate) fn rate_at(
    px: &EmbeddedPoints,
    py: &EmbeddedPoints,
    metric: Metric,
    band: Option<usize>,
    eps: f64,
    threads: usize,
) -> f64 {
    let included = included_pairs(px.len(), py.len(), band);
    if included == 0 {
        return 0.0;
    }
    let counts = parallel_map_ranges(px.len(), threads, |_, range| {
        let mut hits = 0u64;
        for i in range {
            let xi = px.point(i);
            for j in 0..py.len() {
                if let Some(w) = band {
                    if i.abs_diff(j) <= w {
                        continue;
                    }
                }
                if metric.dist(xi, py.point(j)) <= eps {
                    hits += 1;
                }
            }
        }
        hits
    });
    counts.into_iter().sum::<u64>() as f64 / included as f64
}

// ---------------------------------------------------------------------------
// Recurrence tensor
// ---------------------------------------------------------------------------

/// Boolean recurrence structure over embedded points.
///
/// Square (L′×L′) for auto-recurrence, rectangular for cross-recurrence.
/// Entry (i, j) is 1 iff the points are closer than ε and, for
/// auto-recurrence, |i − j| exceeds the Theiler window. Immutable once
/// built.
#[derive(Debug, Clone)]
pub struct RecurrenceTensor {
    bits: BitMatrix,
    /// `Some(w)`: auto-recurrence with Theiler window w. `None`: cross.
    theiler: Option<usize>,
    epsilon: f64,
}

impl RecurrenceTensor {
    pub(crate) fn build_auto(points: &EmbeddedPoints, settings: &Settings) -> Self {
        Self::build(
            points,
            points,
            settings.embedding.metric,
            settings.epsilon,
            Some(settings.embedding.theiler),
            settings.worker_threads(),
        )
    }

    pub(crate) fn build_cross(
        px: &EmbeddedPoints,
        py: &EmbeddedPoints,
        settings: &Settings,
    ) -> Self {
        Self::build(
            px,
            py,
            settings.embedding.metric,
            settings.epsilon,
            None,
            settings.worker_threads(),
        )
    }

    fn build(
        px: &EmbeddedPoints,
        py: &EmbeddedPoints,
        metric: Metric,
        eps: f64,
        band: Option<usize>,
        threads: usize,
    ) -> Self {
        let rows = px.len();
        let cols = py.len();
        let mut bits = BitMatrix::new(rows, cols);
        let wpr = bits.words_per_row();
        let rows_per_chunk = rows.div_ceil(threads.max(1)).max(1);

        parallel_for_chunks(bits.words_mut(), rows_per_chunk * wpr, |chunk_index, chunk| {
            let first_row = chunk_index * rows_per_chunk;
            let chunk_rows = chunk.len() / wpr;
            for r in 0..chunk_rows {
                let i = first_row + r;
                let row_words = &mut chunk[r * wpr..(r + 1) * wpr];
                let xi = px.point(i);
                for j in 0..cols {
                    if let Some(w) = band {
                        if i.abs_diff(j) <= w {
                            continue;
                        }
                    }
                    if metric.dist(xi, py.point(j)) <= eps {
                        BitMatrix::set_in_row(row_words, j);
                    }
                }
            }
        });

        Self {
            bits,
            theiler: band,
            epsilon: eps,
        }
    }

    /// Number of rows (embedded points of the first series).
    #[inline]
    pub fn rows(&self) -> usize {
        self.bits.rows()
    }

    /// Number of columns (embedded points of the second series; equals
    /// `rows()` for auto-recurrence).
    #[inline]
    pub fn cols(&self) -> usize {
        self.bits.cols()
    }

    /// The threshold this tensor was built with.
    #[inline]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Theiler window, `None` for cross-recurrence tensors.
    #[inline]
    pub fn theiler(&self) -> Option<usize> {
        self.theiler
    }

    /// Entry (i, j).
    ///
    /// # Panics
    /// Panics if the index is out of bounds; see [`Self::try_get`].
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> bool {
        self.bits.get(i, j)
    }

    /// Entry (i, j), or `None` out of bounds.
    #[inline]
    pub fn try_get(&self, i: usize, j: usize) -> Option<bool> {
        if i < self.rows() && j < self.cols() {
            Some(self.bits.get(i, j))
        } else {
            None
        }
    }

    /// Fraction of recurrent entries, with Theiler-banded cells excluded
    /// from the denominator as well as the count.
    pub fn recurrence_rate(&self) -> f64 {
        let included = included_pairs(self.rows(), self.cols(), self.theiler);
        if included == 0 {
            return 0.0;
        }
        self.bits.count_ones() as f64 / included as f64
    }

    /// The raw n×n boolean block anchored at (i, j), row-major.
    ///
    /// Anchors where `i + n > rows` or `j + n > cols` are rejected.
    pub fn block(&self, i: usize, j: usize, n: usize) -> Result<Vec<bool>, RqaError> {
        if n == 0 || i + n > self.rows() || j + n > self.cols() {
            return Err(RqaError::Config(format!(
                "block anchor ({}, {}) with size {} exceeds tensor bounds {}×{}",
                i,
                j,
                n,
                self.rows(),
                self.cols()
            )));
        }
        Ok((0..n * n)
            .map(|k| self.bits.get(i + k / n, j + k % n))
            .collect())
    }

    /// Canonical pattern code of the n×n block at (i, j): bit k of the code
    /// is the entry at row k/n, column k%n. Callers guarantee bounds.
    #[inline]
    pub(crate) fn encode_block(&self, i: usize, j: usize, n: usize) -> u64 {
        debug_assert!(i + n <= self.rows() && j + n <= self.cols());
        let mut code = 0u64;
        let mut bit = 0u32;
        for r in 0..n {
            for c in 0..n {
                if self.bits.get(i + r, j + c) {
                    code |= 1u64 << bit;
                }
                bit += 1;
            }
        }
        code
    }

    /// Tensor with the given rows, for in-crate tests.
    #[cfg(test)]
    pub(crate) fn from_rows(rows: &[&[bool]], theiler: Option<usize>, epsilon: f64) -> Self {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, |r| r.len());
        let mut bits = BitMatrix::new(n_rows, n_cols);
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v {
                    bits.set(i, j);
                }
            }
        }
        Self {
            bits,
            theiler,
            epsilon,
        }
    }
}
