//! Normalization of RNA-seq count data

mod counts;
mod size_factors;

pub use counts::{log_normalized, LOG_PSEUDOCOUNT};
pub use size_factors::{estimate_size_factors, size_factors_for, SizeFactorMethod};
