//! # RustyRQA Core
//!
//! Shared primitives for the rustyrqa ecosystem.
//!
//! This crate provides:
//! - **BitMatrix**: flat row-major bit array for recurrence structures.
//!   One u64 word holds 64 columns; rows occupy disjoint word spans so
//!   construction can be parallelized without synchronization.
//! - **Metrics**: distance functions over phase-space points, including a
//!   pluggable custom metric.
//! - **Parallel execution**: scoped-thread utilities for data-parallel
//!   kernels.
//! - **SplitMix64**: deterministic PRNG for reproducible sampling.

pub mod bitmat;
pub mod metric;
pub mod parallel;
pub mod rng;

pub use bitmat::BitMatrix;
pub use metric::Metric;
pub use parallel::{available_threads, parallel_for_chunks, parallel_map_ranges};
pub use rng::SplitMix64;
