//! Distance metrics over phase-space points.
//!
//! The recurrence criterion compares pairwise distances against a threshold.
//! Both standard recurrence-plot metrics are built in; anything else plugs
//! in as a plain function over two point slices.

/// Distance metric between two points of equal dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    /// L2 norm.
    Euclidean,
    /// L∞ norm (max-norm), the classic recurrence-plot choice.
    Chebyshev,
    /// Caller-supplied distance. Assumed symmetric; an asymmetric function
    /// produces an asymmetric recurrence structure.
    Custom(fn(&[f64], &[f64]) -> f64),
}

impl Default for Metric {
    fn default() -> Self {
        Self::Euclidean
    }
}

impl Metric {
    /// Distance between `x` and `y`.
    ///
    /// # Panics
    /// Panics if the points differ in dimension (built-in metrics only).
    #[inline]
    pub fn dist(&self, x: &[f64], y: &[f64]) -> f64 {
        match self {
            Metric::Euclidean => {
                debug_assert_eq!(x.len(), y.len());
                let mut acc = 0.0;
                for (a, b) in x.iter().zip(y.iter()) {
                    let d = a - b;
                    acc += d * d;
                }
                acc.sqrt()
            }
            Metric::Chebyshev => {
                debug_assert_eq!(x.len(), y.len());
                let mut max = 0.0f64;
                for (a, b) in x.iter().zip(y.iter()) {
                    max = max.max((a - b).abs());
                }
                max
            }
            Metric::Custom(f) => f(x, y),
        }
    }
}
