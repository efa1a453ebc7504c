//! Error taxonomy for the recurrence microstate engine.
//!
//! Configuration and dimension errors abort a call before any heavy
//! computation; numerical degeneracies are detected and reported instead of
//! leaking NaN probabilities. Convergence shortfalls are not errors: they
//! surface as `converged: false` on the result.

use std::fmt;

/// Errors from settings validation, tensor construction, and probability
/// estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RqaError {
    /// Invalid or out-of-range configuration.
    Config(String),
    /// Input series too short for the requested embedding or microstate.
    DimensionMismatch {
        /// Minimum number of samples the configuration needs.
        needed: usize,
        /// Number of samples actually available.
        available: usize,
    },
    /// Degenerate computation: no valid anchors, non-finite input.
    Numerical(String),
}

impl fmt::Display for RqaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RqaError::Config(e) => write!(f, "invalid configuration: {e}"),
            RqaError::DimensionMismatch { needed, available } => write!(
                f,
                "series too short: configuration needs at least {needed} samples, got {available}"
            ),
            RqaError::Numerical(e) => write!(f, "numerical degeneracy: {e}"),
        }
    }
}

impl std::error::Error for RqaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = RqaError::Config("microstate size must be at least 2".into());
        assert!(e.to_string().contains("invalid configuration"));

        let e = RqaError::DimensionMismatch {
            needed: 6,
            available: 5,
        };
        assert!(e.to_string().contains("at least 6"));
        assert!(e.to_string().contains("got 5"));

        let e = RqaError::Numerical("no valid anchors".into());
        assert!(e.to_string().contains("degeneracy"));
    }
}
