//! Error types for rust_degenrich

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid design matrix: {reason}")]
    InvalidDesignMatrix { reason: String },

    #[error("Invalid contrast specification: {reason}")]
    InvalidContrast { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Surrogate variable estimation failed: {reason}")]
    SurrogateFailed { reason: String },

    #[error("Invalid quantification input: {reason}")]
    InvalidQuant { reason: String },

    #[error("Invalid annotation: {reason}")]
    InvalidAnnotation { reason: String },

    #[error("Invalid gene set file at line {line}: {reason}")]
    InvalidGeneSet { line: usize, reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Plotting failed: {reason}")]
    PlotFailed { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
