//! # RustyRQA
//!
//! `rustyrqa-rs` computes probability distributions of recurrence
//! microstates: N×N binary sub-patterns of a recurrence structure built
//! over time-delay embedded state-space data. This crate provides the
//! numeric engine (embedding, thresholding, threshold calibration, and
//! exhaustive or Monte Carlo pattern counting) as a pure in-memory
//! library.
//!
//! ```
//! use rustyrqa_rs::{
//!     build_tensor, compute_probabilities, EmbeddingConfig, MicrostateConfig,
//!     RawSeries, RecurrenceCriterion, Settings,
//! };
//!
//! let data: Vec<f64> = (0..200)
//!     .map(|t| (t as f64 * std::f64::consts::TAU / 20.0).sin())
//!     .collect();
//! let series = RawSeries::from_scalar(&data);
//! let settings = Settings::validate(
//!     &series,
//!     EmbeddingConfig::new(2, 1),
//!     RecurrenceCriterion::target_rate(0.1),
//!     MicrostateConfig::exhaustive(2),
//! )
//! .unwrap();
//! let tensor = build_tensor(&series, &settings).unwrap();
//! let dist = compute_probabilities(&tensor, &settings).unwrap();
//! let sum: f64 = dist.entries().iter().map(|e| e.probability).sum();
//! assert!((sum - 1.0).abs() < 1e-9);
//! ```

use std::sync::atomic::AtomicBool;

pub mod error;
pub mod probability;
pub mod settings;
pub mod tensor;

pub use error::RqaError;
pub use probability::{Distribution, DistributionEntry};
pub use rustyrqa_core::Metric;
pub use settings::{
    Calibration, CountStorage, EmbeddingConfig, MicrostateConfig, RawSeries, RecurrenceCriterion,
    SamplingMode, Settings,
};
pub use tensor::RecurrenceTensor;

use tensor::EmbeddedPoints;

/// Build the auto-recurrence tensor of `series` under validated `settings`.
///
/// The tensor is immutable and may back any number of
/// [`compute_probabilities`] calls.
pub fn build_tensor(series: &RawSeries, settings: &Settings) -> Result<RecurrenceTensor, RqaError> {
    let points = EmbeddedPoints::embed(series, &settings.embedding)?;
    if points.len() < settings.microstate.size {
        return Err(RqaError::DimensionMismatch {
            needed: settings.embedding.span() + settings.microstate.size - 1,
            available: series.len(),
        });
    }
    Ok(RecurrenceTensor::build_auto(&points, settings))
}

/// Build the cross-recurrence tensor between `x` and `y`.
pub fn build_cross_tensor(
    x: &RawSeries,
    y: &RawSeries,
    settings: &Settings,
) -> Result<RecurrenceTensor, RqaError> {
    let px = EmbeddedPoints::embed(x, &settings.embedding)?;
    let py = EmbeddedPoints::embed(y, &settings.embedding)?;
    let needed = settings.embedding.span() + settings.microstate.size - 1;
    if px.len() < settings.microstate.size {
        return Err(RqaError::DimensionMismatch {
            needed,
            available: x.len(),
        });
    }
    if py.len() < settings.microstate.size {
        return Err(RqaError::DimensionMismatch {
            needed,
            available: y.len(),
        });
    }
    Ok(RecurrenceTensor::build_cross(&px, &py, settings))
}

/// Estimate the microstate probability distribution of `tensor`.
pub fn compute_probabilities(
    tensor: &RecurrenceTensor,
    settings: &Settings,
) -> Result<Distribution, RqaError> {
    probability::estimate(tensor, settings, None)
}

/// Like [`compute_probabilities`], but Monte Carlo runs poll `cancel`
/// between batches and stop early when it is set. A run cancelled before
/// any samples were drawn reports a numerical error; otherwise the partial
/// distribution is returned with `converged: false`.
pub fn compute_probabilities_with_cancel(
    tensor: &RecurrenceTensor,
    settings: &Settings,
    cancel: &AtomicBool,
) -> Result<Distribution, RqaError> {
    probability::estimate(tensor, settings, Some(cancel))
}
